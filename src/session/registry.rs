//! Process-wide registry of active call sessions.
//!
//! Maps call ids to live session handles so the outer server can route
//! inbound frames and answer status queries. The lock protects only the
//! map; no I/O ever happens while it is held. Sessions unregister
//! themselves exactly once, on reaching `Closed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::errors::RegistryError;
use crate::session::call::SessionState;
use crate::telephony::protocol::InboundFrame;

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// Live counters for one session, updated by its owning task.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Attempts in the current reconnect episode; 0 while the link is
    /// healthy.
    pub retry_count: AtomicU32,
    /// Frames evicted from the outbound buffer over the call's lifetime.
    pub frames_dropped: AtomicU64,
    pub user_turns: AtomicU32,
    pub agent_turns: AtomicU32,
}

/// Shared handle to a running call session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Route an inbound telephony frame to the session.
    pub frames: mpsc::Sender<InboundFrame>,
    /// Observe the session's lifecycle state.
    pub state: watch::Receiver<SessionState>,
    pub stats: Arc<SessionStats>,
    /// Wall-clock call start, for status queries.
    pub started_at: DateTime<Local>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Map from call id to active session. The only state shared across calls.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Duplicate call ids are a protocol violation:
    /// the registration is rejected and the existing session untouched.
    pub fn register(&self, call_id: &str, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut map = self.lock();
        if map.contains_key(call_id) {
            warn!("Rejecting duplicate session registration for {}", call_id);
            return Err(RegistryError::DuplicateSession(call_id.to_string()));
        }
        map.insert(call_id.to_string(), handle);
        Ok(())
    }

    /// Look up the session for a call, if one is active.
    pub fn lookup(&self, call_id: &str) -> Option<SessionHandle> {
        self.lock().get(call_id).cloned()
    }

    /// Remove a session. Called exactly once, by the session itself, upon
    /// reaching `Closed`. Returns whether the id was present.
    pub fn unregister(&self, call_id: &str) -> bool {
        self.lock().remove(call_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of all active calls, for status queries.
    pub fn call_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        // A panicked session task cannot corrupt a plain HashMap; recover
        // the guard rather than poisoning every other call on the box.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, watch::Sender<SessionState>) {
        let (frames, _rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        (
            SessionHandle {
                frames,
                state: state_rx,
                stats: Arc::new(SessionStats::default()),
                started_at: Local::now(),
            },
            state_tx,
        )
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = SessionRegistry::new();
        let (h, _state) = handle();

        registry.register("CA1", h).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("CA1").is_some());
        assert!(registry.lookup("CA2").is_none());

        assert!(registry.unregister("CA1"));
        assert!(!registry.unregister("CA1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected_first_untouched() {
        let registry = SessionRegistry::new();
        let (first, _s1) = handle();
        first.stats.user_turns.store(7, Ordering::SeqCst);
        let (second, _s2) = handle();

        registry.register("CA1", first).unwrap();
        let err = registry.register("CA1", second).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSession("CA1".into()));

        // The surviving handle is the original one.
        let looked_up = registry.lookup("CA1").unwrap();
        assert_eq!(looked_up.stats.user_turns.load(Ordering::SeqCst), 7);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_call_ids_lists_active_calls() {
        let registry = SessionRegistry::new();
        let (h1, _s1) = handle();
        let (h2, _s2) = handle();
        registry.register("CA1", h1).unwrap();
        registry.register("CA2", h2).unwrap();

        let mut ids = registry.call_ids();
        ids.sort();
        assert_eq!(ids, vec!["CA1".to_string(), "CA2".to_string()]);
    }
}
