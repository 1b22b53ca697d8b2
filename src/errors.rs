//! Domain error types for voxbridge.
//!
//! Typed errors at module boundaries enable structured handling via pattern
//! matching: the reconnect supervisor retries transient connect failures,
//! the session treats send failures as link loss, and protocol errors are
//! logged and dropped without tearing anything down.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Backend link errors
// ---------------------------------------------------------------------------

/// Errors establishing a connection to the voice-AI backend.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("Backend authentication failed: {0}")]
    AuthFailed(String),

    #[error("Backend unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Backend connect timed out after {0}s")]
    Timeout(u64),
}

impl ConnectError {
    /// Whether a retry could plausibly succeed.
    ///
    /// A rejected credential stays rejected, so `AuthFailed` aborts the
    /// reconnect loop immediately.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ConnectError::AuthFailed(_))
    }
}

/// Errors sending a frame over an established backend link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Backend link closed")]
    ConnectionClosed,

    #[error("Backend send timed out after {0}ms")]
    Timeout(u64),
}

// ---------------------------------------------------------------------------
// Wire protocol errors
// ---------------------------------------------------------------------------

/// A frame that could not be decoded.
///
/// Never fatal: the offending frame is logged and dropped, and the link
/// keeps running.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON frame: {0}")]
    MalformedJson(String),

    #[error("Frame missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid audio payload: {0}")]
    BadPayload(String),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors from the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two live calls with the same id is a telephony-protocol violation.
    /// The registration is rejected; the existing session is untouched.
    #[error("Session already registered for call {0}")]
    DuplicateSession(String),
}
