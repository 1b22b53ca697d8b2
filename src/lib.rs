//! voxbridge: real-time voice session bridge.
//!
//! Terminates telephony media-stream WebSockets, relays audio to a realtime
//! voice-AI backend over a second WebSocket, and supervises that backend
//! link (heartbeat, bounded reconnect with in-order replay, bounded
//! buffering) for the duration of one phone call. Everything external
//! (persistence, calendars, notifications) happens behind the
//! [`session::CallObserver`] trait.

pub mod backend;
pub mod codec;
pub mod config;
pub mod errors;
pub mod session;
pub mod telephony;
