//! The transport handle and worker lifecycle state.
//!
//! This module provides the `Connection` type the worker drives: a
//! context-carrying handle over an established WebSocket transport, with a
//! shared read deadline and a pong observer.
//!
//! ## Worker Lifecycle
//!
//! 1. **Idle** - Worker created, not yet run
//! 2. **Running** - Read and write pumps active
//! 3. **Closing** - Teardown claimed by the first terminating cause
//! 4. **Closed** - Transport closed, result published
//!
//! ## Example
//!
//! ```rust,ignore
//! use ws_lifecycle::{Connection, Context, OpCode};
//!
//! let ws = tokio_tungstenite::accept_async(stream).await?;
//! let conn = Connection::new(ws, Context::new());
//!
//! conn.set_read_deadline(Some(Instant::now() + Duration::from_secs(30)));
//! let (opcode, payload) = conn.read_message().await?;
//! conn.close().await?;
//! ```

mod deadline;
mod state;

pub use deadline::ReadDeadline;
pub(crate) use state::AtomicState;
pub use state::ConnectionState;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{Connection, DEFAULT_CLOSE_TIMEOUT, PongHandler};
