use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{trace, warn};

use crate::connection::ReadDeadline;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::message::{
    ClientCloseMessage, MAX_CONTROL_PAYLOAD_LEN, OpCode, parse_close_payload,
};

/// Upper bound on how long [`Connection::close`] waits for the close frame to flush.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Observer invoked with the payload of every pong the connection reads.
pub type PongHandler = Arc<dyn Fn(&Bytes) + Send + Sync>;

type BoxedReader = Pin<Box<dyn Stream<Item = std::result::Result<WsMessage, tungstenite::Error>> + Send>>;
type BoxedWriter = Pin<Box<dyn Sink<WsMessage, Error = tungstenite::Error> + Send>>;

struct Transport {
    reader: Mutex<BoxedReader>,
    writer: Mutex<BoxedWriter>,
    read_deadline: ReadDeadline,
    pong_handler: StdMutex<Option<PongHandler>>,
    closed: AtomicBool,
}

/// A context-carrying handle over an established WebSocket transport.
///
/// The transport is split into a read half and a write half on construction,
/// so one task can block in [`read_message`](Self::read_message) while
/// another writes. Every error is normalized into the crate's [`Error`]
/// taxonomy.
///
/// Cloning a `Connection`, or deriving one with
/// [`with_context`](Self::with_context), yields another handle over the same
/// transport.
///
/// ## Example
///
/// ```rust,ignore
/// use ws_lifecycle::{Connection, Context};
///
/// let ws = tokio_tungstenite::accept_async(tcp_stream).await?;
/// let conn = Connection::new(ws, Context::new());
///
/// let (opcode, payload) = conn.read_message().await?;
/// conn.write_message(opcode, payload, Instant::now() + Duration::from_secs(5)).await?;
/// conn.close().await?;
/// ```
#[derive(Clone)]
pub struct Connection {
    ctx: Context,
    transport: Arc<Transport>,
}

impl Connection {
    /// Wrap an established transport.
    ///
    /// `socket` is typically a `tokio_tungstenite::WebSocketStream`, but any
    /// stream/sink pair speaking tungstenite messages works.
    pub fn new<S>(socket: S, ctx: Context) -> Self
    where
        S: Stream<Item = std::result::Result<WsMessage, tungstenite::Error>>
            + Sink<WsMessage, Error = tungstenite::Error>
            + Send
            + 'static,
    {
        let (writer, reader) = socket.split();
        Self {
            ctx,
            transport: Arc::new(Transport {
                reader: Mutex::new(Box::pin(reader)),
                writer: Mutex::new(Box::pin(writer)),
                read_deadline: ReadDeadline::new(),
                pong_handler: StdMutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a handle over the same transport carrying `ctx`.
    #[must_use]
    pub fn with_context(&self, ctx: Context) -> Self {
        Self {
            ctx,
            transport: Arc::clone(&self.transport),
        }
    }

    /// The context carried by this handle.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Returns `true` once [`close`](Self::close) has been called on any handle.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.transport.closed.load(Ordering::Acquire)
    }

    /// Handle to the read deadline shared by every handle over this transport.
    #[must_use]
    pub fn read_deadline(&self) -> ReadDeadline {
        self.transport.read_deadline.clone()
    }

    /// Set (or clear, with `None`) the read deadline.
    ///
    /// A pending [`read_message`](Self::read_message) observes the new
    /// deadline immediately.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.transport.read_deadline.set(deadline);
    }

    /// Install (or remove, with `None`) the pong observer.
    pub fn set_pong_handler(&self, handler: Option<PongHandler>) {
        *self
            .transport
            .pong_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Read the next text or binary payload.
    ///
    /// Pings are answered by the transport and pongs are handed to the pong
    /// observer; neither is returned.
    ///
    /// ## Errors
    ///
    /// - `Error::ConnectionClosed(Some(_))` when the peer sent a close frame
    /// - `Error::ConnectionClosed(None)` when the transport ended without one
    /// - `Error::TimeoutExceeded` when the read deadline elapsed
    /// - `Error::Cancelled` when the context was cancelled
    /// - any other transport error
    pub async fn read_message(&self) -> Result<(OpCode, Bytes)> {
        let mut reader = self.transport.reader.lock().await;
        let mut deadline = self.transport.read_deadline.subscribe();

        loop {
            let at = *deadline.borrow_and_update();
            let frame = tokio::select! {
                biased;
                _ = self.ctx.cancelled() => return Err(Error::Cancelled),
                changed = deadline.changed() => {
                    if changed.is_err() {
                        return Err(Error::ConnectionClosed(None));
                    }
                    continue;
                }
                () = sleep_until(at) => return Err(Error::TimeoutExceeded),
                frame = reader.next() => frame,
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => return Ok((OpCode::Text, Bytes::from(text))),
                Some(Ok(WsMessage::Binary(data))) => return Ok((OpCode::Binary, data)),
                Some(Ok(WsMessage::Ping(_))) => trace!("received ping"),
                Some(Ok(WsMessage::Pong(data))) => {
                    trace!("received pong");
                    self.on_pong(&data);
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let msg = ClientCloseMessage::from_frame(frame.as_ref());
                    return Err(Error::ConnectionClosed(Some(msg)));
                }
                // Raw frames are never yielded when reading.
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Err(err)) => return Err(classify_transport_error(err)),
                None => return Err(Error::ConnectionClosed(None)),
            }
        }
    }

    /// Write a text or binary payload before `deadline`.
    ///
    /// ## Errors
    ///
    /// - `Error::ProtocolViolation` for a control opcode
    /// - `Error::InvalidUtf8` for a text payload that is not UTF-8
    /// - `Error::TimeoutExceeded` if the deadline elapsed
    /// - `Error::ConnectionClosed` if the transport is closed
    pub async fn write_message(&self, opcode: OpCode, payload: Bytes, deadline: Instant) -> Result<()> {
        let frame = match opcode {
            OpCode::Text => {
                let text = String::from_utf8(payload.to_vec()).map_err(|_| Error::InvalidUtf8)?;
                WsMessage::Text(text.into())
            }
            OpCode::Binary => WsMessage::Binary(payload),
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "{other} is not a data frame"
                )));
            }
        };
        self.send_frame(frame, deadline).await
    }

    /// Write a control frame before `deadline`.
    ///
    /// A close payload is the 2-byte big-endian status followed by the
    /// reason, as built by [`format_close_payload`](crate::message::format_close_payload).
    ///
    /// ## Errors
    ///
    /// Same as [`write_message`](Self::write_message), plus
    /// `Error::ControlFrameTooLarge` for payloads over 125 bytes.
    pub async fn write_control(&self, opcode: OpCode, payload: Bytes, deadline: Instant) -> Result<()> {
        if payload.len() > MAX_CONTROL_PAYLOAD_LEN {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        let frame = match opcode {
            OpCode::Ping => WsMessage::Ping(payload),
            OpCode::Pong => WsMessage::Pong(payload),
            OpCode::Close => WsMessage::Close(parse_close_payload(&payload)?.map(|msg| {
                WsCloseFrame {
                    code: WsCloseCode::from(msg.code.as_u16()),
                    reason: msg.reason.into(),
                }
            })),
            other => {
                return Err(Error::ProtocolViolation(format!(
                    "{other} is not a control frame"
                )));
            }
        };
        self.send_frame(frame, deadline).await
    }

    pub(crate) async fn send_frame(&self, frame: WsMessage, deadline: Instant) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed(None));
        }

        let write = async {
            let mut writer = self.transport.writer.lock().await;
            writer.send(frame).await
        };

        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout_at(deadline, write) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(classify_transport_error(err)),
                Err(_) => Err(Error::TimeoutExceeded),
            },
        }
    }

    /// Close the transport, waiting at most [`DEFAULT_CLOSE_TIMEOUT`].
    ///
    /// ## Errors
    ///
    /// See [`close_within`](Self::close_within).
    pub async fn close(&self) -> Result<()> {
        self.close_within(DEFAULT_CLOSE_TIMEOUT).await
    }

    /// Close the transport, waiting at most `timeout` for it to flush.
    ///
    /// A close frame is sent first if none has been sent yet. Closing is not
    /// affected by cancellation of the context.
    ///
    /// ## Errors
    ///
    /// - `Error::AlreadyClosed` if the transport was already closed, by an
    ///   earlier call or by the peer
    /// - `Error::TimeoutExceeded` if flushing did not finish in time
    /// - any other transport error
    pub async fn close_within(&self, timeout: Duration) -> Result<()> {
        if self.transport.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }

        let close = async {
            let mut writer = self.transport.writer.lock().await;
            writer.close().await
        };

        match tokio::time::timeout(timeout, close).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => match classify_transport_error(err) {
                Error::ConnectionClosed(_) => Err(Error::AlreadyClosed),
                other => Err(other),
            },
            Err(_) => Err(Error::TimeoutExceeded),
        }
    }

    /// Close the transport while handling `cause`.
    ///
    /// Returns `cause` unless the close itself fails, in which case both
    /// errors are reported together.
    pub(crate) async fn close_with_cause(&self, cause: Error, timeout: Duration) -> Error {
        match self.close_within(timeout).await {
            Ok(()) | Err(Error::AlreadyClosed) => cause,
            Err(close) => {
                warn!(cause = %cause, error = %close, "failed to close connection");
                Error::ConnectionCloseError {
                    cause: Box::new(cause),
                    close: Box::new(close),
                }
            }
        }
    }

    fn on_pong(&self, payload: &Bytes) {
        let handler = self
            .transport
            .pong_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(payload);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("ctx", &self.ctx)
            .field("closed", &self.is_closed())
            .field("read_deadline", &self.transport.read_deadline.get())
            .finish_non_exhaustive()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Maps a transport error into the taxonomy.
///
/// Anything that means "the other side is gone" becomes
/// `ConnectionClosed(None)`.
fn classify_transport_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            Error::ConnectionClosed(None)
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            Error::ConnectionClosed(None)
        }
        tungstenite::Error::Io(err) => match err.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::NotConnected => Error::ConnectionClosed(None),
            std::io::ErrorKind::TimedOut => Error::TimeoutExceeded,
            _ => Error::from(err),
        },
        other => Error::Transport(other.to_string()),
    }
}
