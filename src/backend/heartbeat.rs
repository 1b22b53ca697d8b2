//! Heartbeat monitor for an established backend link.
//!
//! Issues a liveness probe every `interval` and arms a `deadline` timer for
//! the acknowledgment. An ack re-arms the monitor; a missed deadline
//! declares the link dead exactly once, after which the monitor is inert.
//! A fresh monitor is created for the next link.
//!
//! The monitor is a pure state machine over instants so the policy can be
//! tested without sleeping; the owning session drives it from its select
//! loop via [`next_wakeup`](HeartbeatMonitor::next_wakeup) and
//! [`on_tick`](HeartbeatMonitor::on_tick).

use tokio::time::{Duration, Instant};

use crate::config::schema::HeartbeatConfig;

/// What the session should do after a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a liveness probe on the link.
    SendProbe,
    /// The link missed its acknowledgment deadline; begin reconnecting.
    Dead,
}

/// Probe/acknowledgment state for one backend link.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    deadline: Duration,
    next_probe: Instant,
    /// Armed while a probe is outstanding.
    ack_due: Option<Instant>,
    dead: bool,
}

impl HeartbeatMonitor {
    pub fn new(config: &HeartbeatConfig, now: Instant) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_s),
            deadline: Duration::from_secs(config.deadline_s),
            next_probe: now + Duration::from_secs(config.interval_s),
            ack_due: None,
            dead: false,
        }
    }

    /// The next instant the session loop should wake this monitor.
    ///
    /// Once dead the monitor never asks to be woken again.
    pub fn next_wakeup(&self) -> Option<Instant> {
        if self.dead {
            return None;
        }
        match self.ack_due {
            Some(due) => Some(due.min(self.next_probe)),
            None => Some(self.next_probe),
        }
    }

    /// Advance the monitor to `now` and report what is due.
    ///
    /// A missed deadline takes priority over a due probe and fires at most
    /// once per monitor lifetime.
    pub fn on_tick(&mut self, now: Instant) -> Option<HeartbeatAction> {
        if self.dead {
            return None;
        }

        if let Some(due) = self.ack_due {
            if now >= due {
                self.dead = true;
                return Some(HeartbeatAction::Dead);
            }
        }

        if now >= self.next_probe {
            self.next_probe = now + self.interval;
            if self.ack_due.is_none() {
                self.ack_due = Some(now + self.deadline);
            }
            return Some(HeartbeatAction::SendProbe);
        }

        None
    }

    /// Record an acknowledgment, disarming the deadline.
    pub fn ack(&mut self) {
        if !self.dead {
            self.ack_due = None;
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }
}
