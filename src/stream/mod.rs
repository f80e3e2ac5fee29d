//! Streaming protocol: wire events, chunk coalescing and sessions

pub mod coalesce;
pub mod event;
pub mod session;

pub use coalesce::ChunkCoalescer;
pub use event::{ControlMessage, Resync, StreamEvent};
pub use session::{SessionError, SessionHub, StreamingSession};
