//! Voice-AI backend link: connector, wire protocol, and supervision.

pub mod connector;
pub mod heartbeat;
pub mod protocol;
pub mod supervisor;

pub use connector::{BackendDialer, BackendLink, WsDialer};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use protocol::{BackendEvent, ClientMessage};
pub use supervisor::ReconnectSupervisor;
