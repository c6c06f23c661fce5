//! # ws-lifecycle - Per-connection lifecycle management for WebSockets
//!
//! `ws-lifecycle` takes an already established WebSocket transport and owns
//! its entire runtime behavior: concurrent read and write pumps, keepalive,
//! graceful and forced shutdown, and a pre-upgrade middleware pipeline.
//!
//! ## Features
//!
//! - **Exactly-once teardown** under racing read, write, keepalive and
//!   application-initiated termination
//! - **Classified termination**: every connection ends with one [`Error`]
//! - **Keepalive** with pong-extended read deadlines
//! - **Close handshake** with a bounded grace period
//! - **Middleware** stages that can augment or reject a connection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ws_lifecycle::{Config, Manager, TungsteniteUpgrader};
//!
//! let config = Config::keepalive(Duration::from_secs(30), Duration::from_secs(45));
//! let manager = Manager::new(TungsteniteUpgrader::new(), |_: &Context| Ok(EchoHandler::new()), config);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! while let Ok((stream, _)) = listener.accept().await {
//!     manager.serve(stream);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod handler;
pub mod manager;
pub mod message;
pub mod middleware;
pub mod upgrade;
pub mod worker;

pub use config::Config;
pub use connection::{Connection, ConnectionState, PongHandler, ReadDeadline};
pub use context::Context;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use handler::{ConnectionHandler, SocketFactory};
pub use manager::Manager;
pub use message::{ClientCloseMessage, CloseCode, Message, OpCode};
pub use middleware::{Middleware, MiddlewareChain};
pub use upgrade::{RequestHead, TungsteniteUpgrader, Upgrader, run, upgrade};
pub use worker::Worker;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Config>();
        assert_send::<Context>();
        assert_send::<Connection>();
        assert_send::<Message>();
        assert_send::<CloseCode>();
        assert_send::<ClientCloseMessage>();
        assert_send::<ConnectionState>();
        assert_send::<MiddlewareChain>();
        assert_send::<ReadDeadline>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Config>();
        assert_sync::<Context>();
        assert_sync::<Connection>();
        assert_sync::<Message>();
        assert_sync::<CloseCode>();
        assert_sync::<ClientCloseMessage>();
        assert_sync::<ConnectionState>();
        assert_sync::<MiddlewareChain>();
        assert_sync::<ReadDeadline>();
    }
}
