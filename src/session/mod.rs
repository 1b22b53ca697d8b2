//! Call sessions: the per-call state machine, its registry, and the
//! collaborator boundary.

pub mod buffer;
pub mod call;
pub mod intent;
pub mod observer;
pub mod registry;

pub use call::{CallSession, SessionState, TurnState};
pub use observer::{CallObserver, FinalState, LogObserver, NullObserver, Role};
pub use registry::{SessionHandle, SessionRegistry, SessionStats};
