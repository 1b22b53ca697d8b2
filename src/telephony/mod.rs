//! Telephony media-stream boundary: wire protocol and WebSocket server.

pub mod protocol;
pub mod ws_server;

pub use protocol::{InboundFrame, MarkPayload, MediaPayload, OutboundFrame, StartMeta};
pub use ws_server::BridgeServer;
