//! The per-connection worker: read pump, write pump and the single close routine.
//!
//! A [`Worker`] owns one connection from the moment it is run until the
//! transport is closed. Two tasks drive it:
//!
//! - the **read pump**, the only reader, which dispatches every inbound
//!   payload to [`ConnectionHandler::on_message`] as its own task;
//! - the **write pump**, the only writer, which serves the handler's
//!   outbound channel and, when keepalive is enabled, a ping ticker.
//!
//! Whichever of them (or an in-flight message callback) first hits a
//! terminating condition claims the close routine. The claim is atomic, so
//! `on_disconnect` runs exactly once and exactly one classified [`Error`]
//! reaches the caller of [`Worker::run`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::connection::{AtomicState, Connection, ConnectionState};
use crate::context::Context;
use crate::error::Error;
use crate::handler::ConnectionHandler;
use crate::message::Message;

/// Drives a single connection through its lifecycle.
///
/// ## Example
///
/// ```rust,ignore
/// let worker = Worker::new(conn, ChatHandler::new(room), config.clone());
/// let cause = worker.run().await;
/// if !cause.is_disconnect() {
///     tracing::warn!(%cause, "connection failed");
/// }
/// ```
pub struct Worker<H: ConnectionHandler> {
    shared: Arc<Shared<H>>,
}

struct Shared<H> {
    conn: Connection,
    config: Arc<Config>,
    handler: Arc<H>,
    ctx: Context,
    ran: AtomicBool,
    closed: AtomicBool,
    close_sent: AtomicBool,
    state: AtomicState,
    result_tx: Mutex<Option<oneshot::Sender<Error>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Error>>>,
}

impl<H: ConnectionHandler> Worker<H> {
    /// Create a worker for `conn`.
    ///
    /// The worker runs in a child scope of the connection's context:
    /// cancelling the parent cancels the worker, and the worker cancels its
    /// own scope when it closes.
    pub fn new(conn: Connection, handler: H, config: Arc<Config>) -> Self {
        let ctx = conn.context().child();
        let conn = conn.with_context(ctx.clone());
        let (tx, rx) = oneshot::channel();

        Self {
            shared: Arc::new(Shared {
                conn,
                config,
                handler: Arc::new(handler),
                ctx,
                ran: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_sent: AtomicBool::new(false),
                state: AtomicState::default(),
                result_tx: Mutex::new(Some(tx)),
                result_rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Run the connection until it terminates and return the cause.
    ///
    /// Only the first call runs the worker; later calls return
    /// `Error::WorkerAlreadyRun` immediately.
    ///
    /// If the configuration is invalid the transport is closed and the
    /// validation error is returned without calling any handler callback.
    pub async fn run(&self) -> Error {
        let shared = &self.shared;
        if shared.ran.swap(true, Ordering::AcqRel) {
            return Error::WorkerAlreadyRun;
        }

        if let Err(err) = shared.config.validate() {
            warn!(error = %err, "invalid connection config");
            return shared.abort(err).await;
        }

        let rx = shared
            .result_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(rx) = rx else {
            return Error::WorkerAlreadyRun;
        };

        shared.state.store(ConnectionState::Running);
        shared.handler.on_connect(&shared.ctx);
        debug!(
            keepalive = shared.config.is_keepalive_enabled(),
            "connection worker started"
        );

        tokio::spawn(read_pump(Arc::clone(shared)));
        tokio::spawn(write_pump(Arc::clone(shared)));

        rx.await.unwrap_or_else(|_| Error::ConnectionClosed(None))
    }

    /// Run the worker on a new task.
    pub fn spawn(self) -> JoinHandle<Error> {
        tokio::spawn(async move { self.run().await })
    }

    /// Terminate the connection.
    ///
    /// The worker ends with `Error::Cancelled` unless another cause got there
    /// first.
    pub fn cancel(&self) {
        self.shared.ctx.cancel();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// The worker's context, a child scope of the connection's context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.shared.ctx
    }
}

impl<H: ConnectionHandler> fmt::Debug for Worker<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state())
            .field("close_sent", &self.shared.close_sent.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<H: ConnectionHandler> Shared<H> {
    /// The single close routine.
    ///
    /// Only the first caller proceeds; every later call returns immediately.
    async fn close(&self, cause: Error) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(cause = %cause, "connection already closing");
            return;
        }

        self.state.store(ConnectionState::Closing);
        self.ctx.cancel();

        let close_message = match &cause {
            Error::CloseMessageReceived(msg) => Some(msg.clone()),
            _ => None,
        };
        let cause = if self.close_sent.load(Ordering::Acquire) {
            Error::CloseMessageSent(Box::new(cause))
        } else {
            cause
        };

        debug!(cause = %cause, "closing connection");
        self.handler.on_disconnect(&self.ctx, close_message);

        let result = self.close_transport(cause).await;
        self.state.store(ConnectionState::Closed);
        self.publish(result);
    }

    /// Tear down a connection whose pumps were never started.
    async fn abort(&self, cause: Error) -> Error {
        self.closed.store(true, Ordering::Release);
        self.ctx.cancel();
        let result = self.close_transport(cause).await;
        self.state.store(ConnectionState::Closed);
        result
    }

    async fn close_transport(&self, cause: Error) -> Error {
        self.conn
            .close_with_cause(cause, self.config.write_timeout())
            .await
    }

    fn publish(&self, result: Error) {
        let tx = self
            .result_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
    }

    async fn read_loop(self: &Arc<Self>) -> Error {
        loop {
            let payload = match self.conn.read_message().await {
                Ok((_, payload)) => payload,
                Err(err) => return classify_read_error(err),
            };

            if self.close_sent.load(Ordering::Acquire) {
                trace!(len = payload.len(), "dropping message received after close was sent");
                continue;
            }

            tokio::spawn(dispatch(Arc::clone(self), payload));
        }
    }

    async fn write_loop(&self) -> Error {
        let mut outbound = match self.handler.message_writer(&self.ctx) {
            Ok(rx) => rx,
            Err(err) => {
                warn!(error = %err, "failed to obtain message writer");
                return Error::HandlerFailed(err.to_string());
            }
        };

        let config = &self.config;
        let write_timeout = config.write_timeout();

        let mut ticker = None;
        let mut ping = None;
        if let (Some(payload), Some(frequency), Some(pong_timeout)) = (
            config.ping_payload(),
            config.ping_frequency(),
            config.pong_timeout(),
        ) {
            match Message::ping(payload.clone(), write_timeout) {
                Ok(msg) => ping = Some(msg),
                Err(err) => return Error::PingMessageFailed(Box::new(err)),
            }

            let deadline = self.conn.read_deadline();
            deadline.extend(pong_timeout);
            self.conn.set_pong_handler(Some(Arc::new(move |_: &Bytes| {
                deadline.extend(pong_timeout);
            })));

            let mut interval = tokio::time::interval_at(Instant::now() + frequency, frequency);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker = Some(interval);
        }

        loop {
            tokio::select! {
                biased;
                _ = self.ctx.cancelled() => return Error::Cancelled,
                _ = tick(&mut ticker) => {
                    let Some(ping) = &ping else { continue };
                    trace!("sending keepalive ping");
                    match ping.write(&self.conn, write_timeout).await {
                        Ok(()) => {}
                        Err(Error::Cancelled) => return Error::Cancelled,
                        Err(err) => return Error::PingMessageFailed(Box::new(err)),
                    }
                }
                msg = outbound.recv() => {
                    let Some(msg) = msg else {
                        return Error::WriterChannelClosed;
                    };
                    // The peer's reply can be read before the write returns.
                    if msg.is_close() {
                        self.close_sent.store(true, Ordering::Release);
                    }
                    let written = msg.write(&self.conn, write_timeout).await;
                    if written.is_err() && msg.is_close() {
                        self.close_sent.store(false, Ordering::Release);
                    }
                    match written {
                        Ok(()) => {}
                        Err(Error::Cancelled) => return Error::Cancelled,
                        Err(Error::WriteTimeoutExceeded) => return Error::WriteTimeoutExceeded,
                        Err(err) => return Error::FailedToWrite(Box::new(err)),
                    }

                    if msg.is_close() {
                        self.conn.set_pong_handler(None);
                        self.conn
                            .set_read_deadline(Some(Instant::now() + config.grace_period()));
                        outbound.close();
                        debug!(grace_period = ?config.grace_period(), "close message sent");

                        self.ctx.cancelled().await;
                        return Error::Cancelled;
                    }
                }
            }
        }
    }
}

async fn read_pump<H: ConnectionHandler>(shared: Arc<Shared<H>>) {
    let cause = shared.read_loop().await;
    debug!(cause = %cause, "read pump stopped");
    shared.close(cause).await;
}

async fn write_pump<H: ConnectionHandler>(shared: Arc<Shared<H>>) {
    let cause = shared.write_loop().await;
    debug!(cause = %cause, "write pump stopped");
    shared.close(cause).await;
}

async fn dispatch<H: ConnectionHandler>(shared: Arc<Shared<H>>, payload: Bytes) {
    if let Err(err) = shared.handler.on_message(&shared.ctx, payload).await {
        warn!(error = %err, "message handler failed");
        shared.close(Error::HandlerFailed(err.to_string())).await;
    }
}

async fn tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

fn classify_read_error(err: Error) -> Error {
    match err {
        Error::ConnectionClosed(Some(msg)) => Error::CloseMessageReceived(msg),
        Error::ConnectionClosed(None) => Error::ConnectionClosed(None),
        Error::TimeoutExceeded => Error::PongTimeoutExceeded,
        Error::Cancelled => Error::Cancelled,
        other => Error::FailedToRead(Box::new(other)),
    }
}
