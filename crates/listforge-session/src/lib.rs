//! Streaming session management.
//!
//! One [`Connection`] multiplexes a bounded set of concurrent compilations
//! over a single frame writer. The manager is transport-agnostic: it
//! consumes [`ClientFrame`] values and produces [`ServerFrame`] values;
//! the WebSocket (or test-harness) layer is a thin codec around it.

mod frames;
mod manager;

pub use frames::{ClientFrame, ServerFrame};
pub use manager::{Connection, SessionManager, SessionManagerConfig};
