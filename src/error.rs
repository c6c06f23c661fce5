//! Error types for the connection lifecycle.
//!
//! Every way a connection can end is classified into exactly one [`Error`]
//! variant. Variants produced by the worker may wrap a lower-level cause
//! (for diagnostics); [`Error::is`] looks through that wrapping the same way
//! for every kind.

use std::time::Duration;

use thiserror::Error;

use crate::message::ClientCloseMessage;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by application callbacks and middlewares.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while upgrading, driving or closing a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The transport observed a close.
    ///
    /// Carries the peer's close message when the close was initiated by a
    /// protocol-level close frame.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<ClientCloseMessage>),

    /// A transport deadline elapsed before the operation completed.
    #[error("Timeout exceeded")]
    TimeoutExceeded,

    /// An outbound write did not complete before its deadline.
    #[error("Write timeout exceeded")]
    WriteTimeoutExceeded,

    /// No pong (or close acknowledgement) arrived before the read deadline.
    #[error("Pong timeout exceeded")]
    PongTimeoutExceeded,

    /// The outbound message source was closed without sending a close frame.
    #[error("Writer channel closed")]
    WriterChannelClosed,

    /// A close frame had been sent when the connection terminated.
    #[error("Close message sent: {0}")]
    CloseMessageSent(Box<Error>),

    /// The peer initiated a protocol-level close.
    #[error("Close message received: {0}")]
    CloseMessageReceived(ClientCloseMessage),

    /// Writing a keepalive ping failed.
    #[error("Ping message failed: {0}")]
    PingMessageFailed(Box<Error>),

    /// Writing an outbound message failed.
    #[error("Failed to write: {0}")]
    FailedToWrite(Box<Error>),

    /// Reading an inbound message failed.
    #[error("Failed to read: {0}")]
    FailedToRead(Box<Error>),

    /// The transport had already been closed.
    #[error("Connection already closed")]
    AlreadyClosed,

    /// `run` was called on a worker that has already been run.
    #[error("Worker already run")]
    WorkerAlreadyRun,

    /// A middleware stage rejected the upgrade.
    #[error("Middleware failed: {0}")]
    MiddlewareFailed(String),

    /// Closing the transport failed while handling another error.
    #[error("Connection close error: {close} (while handling: {cause})")]
    ConnectionCloseError {
        /// The error being handled when the close was attempted.
        cause: Box<Error>,
        /// The error returned by the close itself.
        close: Box<Error>,
    },

    /// Only some of ping payload, ping frequency and pong timeout are set.
    #[error("Partial keepalive configuration: ping payload, ping frequency and pong timeout must be set together")]
    PartialKeepaliveConfiguration,

    /// The pong timeout does not leave room for a ping to be written and answered.
    #[error(
        "Invalid keepalive frequency: pong timeout {pong_timeout:?} must exceed ping frequency {frequency:?} + write timeout {write_timeout:?}"
    )]
    InvalidKeepaliveFrequency {
        /// Configured ping frequency.
        frequency: Duration,
        /// Configured write timeout.
        write_timeout: Duration,
        /// Configured pong timeout.
        pong_timeout: Duration,
    },

    /// The grace period is zero.
    #[error("Invalid grace period: must be positive")]
    InvalidGracePeriod,

    /// The worker context was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// An application callback failed.
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    /// The transport handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Unclassified transport error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid UTF-8 in a text payload.
    #[error("Invalid UTF-8 in text payload")]
    InvalidUtf8,

    /// Reserved or out-of-range close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Operation not allowed for the given frame type.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

/// The classification of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    ConnectionClosed,
    TimeoutExceeded,
    WriteTimeoutExceeded,
    PongTimeoutExceeded,
    WriterChannelClosed,
    CloseMessageSent,
    CloseMessageReceived,
    PingMessageFailed,
    FailedToWrite,
    FailedToRead,
    AlreadyClosed,
    WorkerAlreadyRun,
    MiddlewareFailed,
    ConnectionCloseError,
    PartialKeepaliveConfiguration,
    InvalidKeepaliveFrequency,
    InvalidGracePeriod,
    Cancelled,
    HandlerFailed,
    Handshake,
    Transport,
    Io,
    InvalidUtf8,
    InvalidCloseCode,
    ControlFrameTooLarge,
    ProtocolViolation,
}

impl Error {
    /// The kind of the outermost error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            Error::TimeoutExceeded => ErrorKind::TimeoutExceeded,
            Error::WriteTimeoutExceeded => ErrorKind::WriteTimeoutExceeded,
            Error::PongTimeoutExceeded => ErrorKind::PongTimeoutExceeded,
            Error::WriterChannelClosed => ErrorKind::WriterChannelClosed,
            Error::CloseMessageSent(_) => ErrorKind::CloseMessageSent,
            Error::CloseMessageReceived(_) => ErrorKind::CloseMessageReceived,
            Error::PingMessageFailed(_) => ErrorKind::PingMessageFailed,
            Error::FailedToWrite(_) => ErrorKind::FailedToWrite,
            Error::FailedToRead(_) => ErrorKind::FailedToRead,
            Error::AlreadyClosed => ErrorKind::AlreadyClosed,
            Error::WorkerAlreadyRun => ErrorKind::WorkerAlreadyRun,
            Error::MiddlewareFailed(_) => ErrorKind::MiddlewareFailed,
            Error::ConnectionCloseError { .. } => ErrorKind::ConnectionCloseError,
            Error::PartialKeepaliveConfiguration => ErrorKind::PartialKeepaliveConfiguration,
            Error::InvalidKeepaliveFrequency { .. } => ErrorKind::InvalidKeepaliveFrequency,
            Error::InvalidGracePeriod => ErrorKind::InvalidGracePeriod,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::HandlerFailed(_) => ErrorKind::HandlerFailed,
            Error::Handshake(_) => ErrorKind::Handshake,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Io(_) => ErrorKind::Io,
            Error::InvalidUtf8 => ErrorKind::InvalidUtf8,
            Error::InvalidCloseCode(_) => ErrorKind::InvalidCloseCode,
            Error::ControlFrameTooLarge(_) => ErrorKind::ControlFrameTooLarge,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
        }
    }

    /// Returns `true` if this error, or any error it wraps, is of `kind`.
    ///
    /// A grace-period timeout after a self-initiated close is both
    /// `CloseMessageSent` and `PongTimeoutExceeded`.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            Error::CloseMessageSent(inner)
            | Error::PingMessageFailed(inner)
            | Error::FailedToWrite(inner)
            | Error::FailedToRead(inner) => inner.is(kind),
            Error::ConnectionCloseError { cause, close } => cause.is(kind) || close.is(kind),
            _ => false,
        }
    }

    /// The peer's close message, if the peer initiated a protocol-level close.
    #[must_use]
    pub fn client_close_message(&self) -> Option<&ClientCloseMessage> {
        match self {
            Error::CloseMessageReceived(msg) | Error::ConnectionClosed(Some(msg)) => Some(msg),
            Error::CloseMessageSent(inner) => inner.client_close_message(),
            Error::ConnectionCloseError { cause, .. } => cause.client_close_message(),
            _ => None,
        }
    }

    /// Returns `true` for ordinary endings of a connection's life: the peer
    /// went away or closed, a close handshake completed, or the worker was
    /// cancelled. Everything else is an operational failure worth alerting on.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed(_) | Error::CloseMessageReceived(_) | Error::Cancelled => true,
            Error::CloseMessageSent(inner) => {
                inner.is_disconnect() || inner.kind() == ErrorKind::PongTimeoutExceeded
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
