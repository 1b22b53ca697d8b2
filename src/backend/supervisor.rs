//! Reconnect supervisor: bounded-retry backoff around a backend dialer.
//!
//! Produces a connected link or a terminal failure. The first attempt dials
//! immediately (the caller is waiting on the line); each further attempt
//! waits an exponentially growing delay built with `backon`, the same
//! backoff machinery used across the codebase.

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::time::Duration;
use tracing::{info, warn};

use crate::backend::connector::{BackendDialer, BackendLink};
use crate::config::schema::ReconnectConfig;
use crate::errors::ConnectError;

/// Bounded exponential backoff for obtaining or replacing a backend link.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    config: ReconnectConfig,
}

impl ReconnectSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::new()
            .with_min_delay(Duration::from_millis(self.config.base_delay_ms))
            .with_max_delay(Duration::from_secs(60))
            .with_factor(2.0)
            .with_max_times(self.config.max_attempts.saturating_sub(1) as usize)
    }

    /// The delays between consecutive attempts (one fewer than the attempt
    /// count; the first attempt is immediate). Exposed so backoff policy is
    /// testable without dialing anything.
    pub fn delays(&self) -> Vec<Duration> {
        self.backoff().build().collect()
    }

    /// Dial until a link is obtained or the attempt budget is exhausted.
    ///
    /// `on_attempt` is called with the 1-based attempt number before each
    /// dial, so the owning session can track its retry count. Auth failures
    /// abort immediately; retrying a rejected credential cannot succeed.
    pub async fn acquire(
        &self,
        dialer: &dyn BackendDialer,
        mut on_attempt: impl FnMut(u32) + Send,
    ) -> Result<BackendLink, ConnectError> {
        let mut delays = self.backoff().build();
        let max = self.config.max_attempts.max(1);

        for attempt in 1..=max {
            on_attempt(attempt);
            match dialer.dial().await {
                Ok(link) => {
                    if attempt > 1 {
                        info!("Backend link restored on attempt {}", attempt);
                    }
                    return Ok(link);
                }
                Err(e) if !e.is_transient() => {
                    warn!("Backend connect failed terminally: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = match delays.next() {
                        Some(d) if attempt < max => d,
                        _ => {
                            warn!(
                                "Backend connect failed after {} attempts: {}",
                                attempt, e
                            );
                            return Err(e);
                        }
                    };
                    warn!(
                        "Backend connect attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Unreachable: the loop always returns on its last attempt.
        Err(ConnectError::NetworkUnreachable(
            "no connect attempts configured".into(),
        ))
    }
}
