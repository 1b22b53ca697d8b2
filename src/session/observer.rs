//! Collaborator callbacks emitted by call sessions.
//!
//! The bridge never talks to a database, calendar, or notification service
//! directly; everything external happens behind this trait. Implementations
//! must be cheap or hand off to their own tasks, because callbacks run on
//! the session's task.

use async_trait::async_trait;
use tracing::info;

/// Who produced a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

/// Why a call ended, reported with the final stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalState {
    /// The caller hung up or the conversation ran to completion.
    Completed,
    /// The backend stayed unreachable after every reconnect attempt.
    BackendFailed,
    /// The whole-call maximum duration expired.
    TimedOut,
}

/// Lifecycle callbacks for one call.
#[async_trait]
pub trait CallObserver: Send + Sync {
    async fn on_call_started(&self, _call_id: &str) {}

    async fn on_transcript_turn(&self, _call_id: &str, _role: Role, _text: &str) {}

    /// A caller transcript that looks like it names an appointment time.
    /// The text is forwarded raw; parsing it is the collaborator's job.
    async fn on_appointment_candidate(&self, _call_id: &str, _text: &str) {}

    /// The backend is unreachable and the session is draining.
    async fn on_backend_unavailable(&self, _call_id: &str) {}

    async fn on_call_ended(&self, _call_id: &str, _duration_secs: u64, _final_state: FinalState) {}
}

/// Observer that does nothing. Useful for tests and embedding.
pub struct NullObserver;

#[async_trait]
impl CallObserver for NullObserver {}

/// Observer that logs every event through `tracing`.
///
/// The default wiring for the standalone binary, where persistence and
/// notifications live in a separate service consuming the logs.
pub struct LogObserver;

#[async_trait]
impl CallObserver for LogObserver {
    async fn on_call_started(&self, call_id: &str) {
        info!("Call started: {}", call_id);
    }

    async fn on_transcript_turn(&self, call_id: &str, role: Role, text: &str) {
        info!("[{}] {}: {}", call_id, role.as_str(), text);
    }

    async fn on_appointment_candidate(&self, call_id: &str, text: &str) {
        info!("[{}] appointment candidate: {}", call_id, text);
    }

    async fn on_backend_unavailable(&self, call_id: &str) {
        info!("[{}] backend unavailable, draining", call_id);
    }

    async fn on_call_ended(&self, call_id: &str, duration_secs: u64, final_state: FinalState) {
        info!(
            "Call ended: {} after {}s ({:?})",
            call_id, duration_secs, final_state
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_strings() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Agent.as_str(), "agent");
    }

    #[tokio::test]
    async fn test_null_observer_defaults_are_callable() {
        let obs = NullObserver;
        obs.on_call_started("CA1").await;
        obs.on_transcript_turn("CA1", Role::User, "hello").await;
        obs.on_appointment_candidate("CA1", "tomorrow at 3pm").await;
        obs.on_backend_unavailable("CA1").await;
        obs.on_call_ended("CA1", 12, FinalState::Completed).await;
    }
}
