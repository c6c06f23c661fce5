//! Turning an incoming request into a running connection worker.
//!
//! The upgrade sequence is fixed:
//!
//! 1. transport handshake, via an [`Upgrader`]
//! 2. the [`MiddlewareChain`], in order
//! 3. configuration validation
//! 4. handler creation, via the [`SocketFactory`]
//! 5. [`Worker`] construction
//!
//! Any failure after the handshake closes the connection before the error
//! is returned.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, Uri};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::{Connection, DEFAULT_CLOSE_TIMEOUT};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::SocketFactory;
use crate::middleware::MiddlewareChain;
use crate::worker::Worker;

/// Performs the transport handshake for requests of type `R`.
pub trait Upgrader<R>: Send + Sync + 'static {
    /// Complete the handshake, appending `response_headers` to the response,
    /// and return a connection carrying `ctx`.
    fn upgrade(
        &self,
        request: R,
        response_headers: &HeaderMap,
        ctx: Context,
    ) -> impl Future<Output = Result<Connection>> + Send;
}

/// The URI and headers of the upgrade request.
///
/// Attached to the connection context by [`TungsteniteUpgrader`] so
/// middlewares can derive request-scoped values from it.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

/// Server-side upgrader over any byte stream, backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteUpgrader {
    ws_config: Option<WebSocketConfig>,
}

impl TungsteniteUpgrader {
    /// Create an upgrader with the transport's default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `ws_config` for every upgraded connection.
    #[must_use]
    pub fn with_config(mut self, ws_config: WebSocketConfig) -> Self {
        self.ws_config = Some(ws_config);
        self
    }
}

impl<S> Upgrader<S> for TungsteniteUpgrader
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn upgrade(
        &self,
        stream: S,
        response_headers: &HeaderMap,
        ctx: Context,
    ) -> Result<Connection> {
        let mut head = None;
        let callback = |request: &Request,
                        mut response: Response|
         -> std::result::Result<Response, ErrorResponse> {
            head = Some(RequestHead {
                uri: request.uri().clone(),
                headers: request.headers().clone(),
            });
            for (name, value) in response_headers {
                response.headers_mut().append(name.clone(), value.clone());
            }
            Ok(response)
        };

        let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, self.ws_config)
            .await
            .map_err(|err| Error::Handshake(err.to_string()))?;

        let ctx = match head {
            Some(head) => {
                debug!(uri = %head.uri, "connection upgraded");
                ctx.with_value(head)
            }
            None => ctx,
        };
        Ok(Connection::new(ws, ctx))
    }
}

/// Upgrade `request` and prepare a worker for it.
///
/// The returned worker has not been run.
///
/// # Errors
///
/// - `Error::Handshake` if the handshake failed
/// - `Error::MiddlewareFailed` if a middleware rejected the connection
/// - a configuration error if `config` is invalid
/// - `Error::HandlerFailed` if the factory failed
/// - `Error::ConnectionCloseError` if closing the connection after one of
///   the above also failed
pub async fn upgrade<R, U, F>(
    request: R,
    ctx: Context,
    upgrader: &U,
    response_headers: &HeaderMap,
    factory: &F,
    config: Arc<Config>,
    middlewares: &MiddlewareChain,
) -> Result<Worker<F::Handler>>
where
    U: Upgrader<R>,
    F: SocketFactory,
{
    let conn = upgrader.upgrade(request, response_headers, ctx).await?;
    let conn = middlewares.apply(conn).await?;
    prepare(conn, factory, config).await
}

/// Run an already upgraded connection to completion.
///
/// Returns the terminating cause, as [`Worker::run`] does.
pub async fn run<F>(conn: Connection, factory: &F, config: Arc<Config>) -> Error
where
    F: SocketFactory,
{
    match prepare(conn, factory, config).await {
        Ok(worker) => worker.run().await,
        Err(err) => err,
    }
}

async fn prepare<F>(conn: Connection, factory: &F, config: Arc<Config>) -> Result<Worker<F::Handler>>
where
    F: SocketFactory,
{
    if let Err(err) = config.validate() {
        warn!(error = %err, "invalid connection config");
        return Err(conn.close_with_cause(err, DEFAULT_CLOSE_TIMEOUT).await);
    }

    match factory.create(conn.context()) {
        Ok(handler) => Ok(Worker::new(conn, handler, config)),
        Err(err) => {
            warn!(error = %err, "failed to create connection handler");
            let cause = Error::HandlerFailed(err.to_string());
            Err(conn.close_with_cause(cause, DEFAULT_CLOSE_TIMEOUT).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::handler::ConnectionHandler;
    use crate::message::{ClientCloseMessage, Message};
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    struct Silent;

    impl ConnectionHandler for Silent {
        fn on_connect(&self, _ctx: &Context) {}

        fn on_disconnect(&self, _ctx: &Context, _close: Option<ClientCloseMessage>) {}

        async fn on_message(&self, _ctx: &Context, _payload: Bytes) -> std::result::Result<(), BoxError> {
            Ok(())
        }

        fn message_writer(&self, _ctx: &Context) -> std::result::Result<mpsc::Receiver<Message>, BoxError> {
            Err("unused".into())
        }
    }

    async fn conn() -> (Connection, WebSocketStream<tokio::io::DuplexStream>) {
        let (server, client) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (Connection::new(server, Context::new()), client)
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config_and_closes() {
        let (conn, _peer) = conn().await;
        let handle = conn.clone();
        let factory = |_: &Context| -> std::result::Result<Silent, BoxError> {
            panic!("factory must not run for an invalid config")
        };
        let config = Arc::new(Config::new().with_ping_payload("hb"));

        let err = run(conn, &factory, config).await;
        assert_eq!(err, Error::PartialKeepaliveConfiguration);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_run_factory_failure_closes() {
        let (conn, _peer) = conn().await;
        let handle = conn.clone();
        let factory =
            |_: &Context| -> std::result::Result<Silent, BoxError> { Err("no capacity".into()) };

        let err = run(conn, &factory, Arc::new(Config::new())).await;
        assert_eq!(err, Error::HandlerFailed("no capacity".into()));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_run_message_writer_failure() {
        let (conn, _peer) = conn().await;
        let factory = |_: &Context| -> std::result::Result<Silent, BoxError> { Ok(Silent) };

        let err = run(conn, &factory, Arc::new(Config::new())).await;
        assert_eq!(err, Error::HandlerFailed("unused".into()));
    }

    #[tokio::test]
    async fn test_tungstenite_upgrader_handshake_failure() {
        let (server, mut client) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            client.shutdown().await.unwrap();
        });

        let err = TungsteniteUpgrader::new()
            .upgrade(server, &HeaderMap::new(), Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
    }
}
