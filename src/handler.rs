//! Application callbacks for a connection.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::BoxError;
use crate::message::{ClientCloseMessage, Message};

/// Per-connection application callbacks plus the outbound message source.
///
/// One handler value serves exactly one connection. The worker calls
/// [`on_connect`](Self::on_connect) before any other callback and
/// [`on_disconnect`](Self::on_disconnect) exactly once, after which no new
/// [`on_message`](Self::on_message) is dispatched.
///
/// Inbound messages are dispatched in arrival order, but each call to
/// `on_message` runs as its own task, so calls may overlap and complete in
/// any order. A call may still be running after `on_disconnect`; it can
/// watch [`Context::cancelled`] to stop early.
///
/// ## Example
///
/// ```rust,ignore
/// struct Echo {
///     tx: mpsc::Sender<Message>,
///     rx: Mutex<Option<mpsc::Receiver<Message>>>,
/// }
///
/// impl ConnectionHandler for Echo {
///     fn on_connect(&self, _ctx: &Context) {}
///
///     fn on_disconnect(&self, _ctx: &Context, close: Option<ClientCloseMessage>) {
///         tracing::info!(?close, "peer left");
///     }
///
///     async fn on_message(&self, _ctx: &Context, payload: Bytes) -> Result<(), BoxError> {
///         self.tx.send(Message::binary(payload)).await?;
///         Ok(())
///     }
///
///     fn message_writer(&self, _ctx: &Context) -> Result<mpsc::Receiver<Message>, BoxError> {
///         self.rx.lock().unwrap().take().ok_or_else(|| "writer taken".into())
///     }
/// }
/// ```
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Called once the worker starts, before the pumps run.
    fn on_connect(&self, ctx: &Context);

    /// Called exactly once when the connection terminates.
    ///
    /// `close` is the peer's close message if the peer initiated a
    /// protocol-level close.
    fn on_disconnect(&self, ctx: &Context, close: Option<ClientCloseMessage>);

    /// Called for every inbound text or binary payload.
    ///
    /// An error terminates the connection.
    fn on_message(
        &self,
        ctx: &Context,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// The source of outbound messages, taken once by the write pump.
    ///
    /// Dropping every sender without sending a close message terminates the
    /// connection with `WriterChannelClosed`.
    fn message_writer(&self, ctx: &Context) -> Result<mpsc::Receiver<Message>, BoxError>;
}

/// Creates one [`ConnectionHandler`] per upgraded connection.
///
/// Implemented for closures `Fn(&Context) -> Result<H, BoxError>`.
pub trait SocketFactory: Send + Sync + 'static {
    /// The handler type produced.
    type Handler: ConnectionHandler;

    /// Create the handler for the connection described by `ctx`.
    fn create(&self, ctx: &Context) -> Result<Self::Handler, BoxError>;
}

impl<F, H> SocketFactory for F
where
    F: Fn(&Context) -> Result<H, BoxError> + Send + Sync + 'static,
    H: ConnectionHandler,
{
    type Handler = H;

    fn create(&self, ctx: &Context) -> Result<H, BoxError> {
        self(ctx)
    }
}
