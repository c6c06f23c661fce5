//! Outbound messages, frame types and close codes.
//!
//! A [`Message`] is encoded once at construction and can then be written to
//! any number of connections, which keeps broadcast fan-out cheap: cloning a
//! message only bumps reference counts on its payload.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Largest reason that fits in a close frame next to its 2-byte status code.
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// Largest payload of any control frame.
pub const MAX_CONTROL_PAYLOAD_LEN: usize = 125;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (e.g., server shutdown, browser navigating away).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame or protocol violation.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received data type it cannot handle.
    UnsupportedData,
    /// No status received (1005). The peer's close frame carried no status code.
    NoStatusReceived,
    /// Invalid payload (1007). Endpoint received a message with invalid data (e.g., non-UTF-8 in text).
    InvalidPayload,
    /// Policy violation (1008). Endpoint received a message that violates its policy.
    PolicyViolation,
    /// Message too big (1009). Endpoint received a message too large to process.
    MessageTooBig,
    /// Mandatory extension (1010). Client expected server to negotiate an extension.
    MandatoryExtension,
    /// Internal error (1011). Server encountered an unexpected condition.
    InternalError,
    /// Custom close code (3000-4999 for applications, 1012-1014 for registered codes).
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code is valid for sending per RFC 6455 Section 7.4.1.
    ///
    /// Valid codes:
    /// - 1000-1003: Normal, GoingAway, ProtocolError, UnsupportedData
    /// - 1007-1011: InvalidPayload, PolicyViolation, MessageTooBig, MandatoryExtension, InternalError
    /// - 1012-1014: ServiceRestart, TryAgainLater, BadGateway (RFC 6455 registered)
    /// - 3000-4999: Reserved for libraries/frameworks and applications
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1:
    /// - 1004: Reserved
    /// - 1005: No Status Received (MUST NOT be set by endpoint)
    /// - 1006: Abnormal Closure (MUST NOT be set by endpoint)
    /// - 1015: TLS Handshake (MUST NOT be set by endpoint)
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// The close message sent by the peer when it initiated a protocol-level close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCloseMessage {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes).
    pub reason: String,
}

impl ClientCloseMessage {
    /// Create a new close message with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Extracts the close message from a received close frame.
    ///
    /// A frame without a status is reported as [`CloseCode::NoStatusReceived`].
    pub(crate) fn from_frame(frame: Option<&WsCloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(
                CloseCode::from_u16(u16::from(frame.code)),
                frame.reason.as_str(),
            ),
            None => Self::new(CloseCode::NoStatusReceived, ""),
        }
    }
}

impl fmt::Display for ClientCloseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.reason)
        }
    }
}

/// Formats a close frame payload: 2-byte big-endian status followed by the reason.
#[must_use]
pub fn format_close_payload(code: CloseCode, reason: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code.as_u16());
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

/// Parses a close frame payload produced by [`format_close_payload`].
///
/// An empty payload means "no status".
///
/// # Errors
///
/// Returns `Error::ProtocolViolation` for a 1-byte payload and
/// `Error::InvalidUtf8` if the reason is not UTF-8.
pub fn parse_close_payload(payload: &[u8]) -> Result<Option<ClientCloseMessage>> {
    match payload {
        [] => Ok(None),
        [_] => Err(Error::ProtocolViolation("Invalid close frame".into())),
        [hi, lo, reason @ ..] => {
            let code = u16::from_be_bytes([*hi, *lo]);
            let reason = std::str::from_utf8(reason)?;
            Ok(Some(ClientCloseMessage::new(CloseCode::from_u16(code), reason)))
        }
    }
}

/// WebSocket frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum OpCode {
    /// Text frame (0x1). Payload must be valid UTF-8.
    Text = 0x1,
    /// Binary frame (0x2).
    Binary = 0x2,
    /// Close frame (0x8). May contain status code and reason.
    Close = 0x8,
    /// Ping frame (0x9). Used for keepalive.
    Ping = 0x9,
    /// Pong frame (0xA). Response to Ping.
    Pong = 0xA,
}

impl OpCode {
    /// Convert OpCode to raw byte value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a control frame opcode.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Check if this is a data frame opcode.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }

    /// Get human-readable name for this opcode.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An outbound unit of work for the write pump.
///
/// Data messages (text, binary) are written with the worker's write timeout.
/// Control messages (ping, close) carry their own timeout.
#[derive(Debug, Clone)]
pub struct Message {
    opcode: OpCode,
    frame: WsMessage,
    timeout: Option<Duration>,
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            opcode: OpCode::Text,
            frame: WsMessage::Text(s.into().into()),
            timeout: None,
        }
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            frame: WsMessage::Binary(data.into()),
            timeout: None,
        }
    }

    /// Create a ping message written within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ControlFrameTooLarge` if the payload exceeds 125 bytes.
    pub fn ping(data: impl Into<Bytes>, timeout: Duration) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_CONTROL_PAYLOAD_LEN {
            return Err(Error::ControlFrameTooLarge(data.len()));
        }
        Ok(Self {
            opcode: OpCode::Ping,
            frame: WsMessage::Ping(data),
            timeout: Some(timeout),
        })
    }

    /// Create a close message with status code and reason, written within `timeout`.
    ///
    /// Once the write pump sends a close message it stops writing and gives
    /// the peer the configured grace period to acknowledge.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCloseCode` for reserved or unassigned codes and
    /// `Error::ControlFrameTooLarge` if the reason exceeds 123 bytes.
    pub fn close(code: CloseCode, reason: impl Into<String>, timeout: Duration) -> Result<Self> {
        if code.is_reserved() || !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        let reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON_LEN {
            return Err(Error::ControlFrameTooLarge(2 + reason.len()));
        }
        Ok(Self {
            opcode: OpCode::Close,
            frame: WsMessage::Close(Some(WsCloseFrame {
                code: WsCloseCode::from(code.as_u16()),
                reason: reason.into(),
            })),
            timeout: Some(timeout),
        })
    }

    /// The frame type of this message.
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns `true` if this is a close frame.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self.opcode, OpCode::Close)
    }

    /// Returns `true` if this is a control message (ping or close).
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// The message's own write timeout, if it is a control message.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Writes this message to `conn`.
    ///
    /// Data messages use `write_timeout`; control messages use their own.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the transport is closed
    /// - `Error::WriteTimeoutExceeded` if the write did not finish in time
    /// - `Error::Cancelled` if the connection context was cancelled
    pub async fn write(&self, conn: &Connection, write_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + self.timeout.unwrap_or(write_timeout);
        conn.send_frame(self.frame.clone(), deadline)
            .await
            .map_err(|err| match err {
                Error::TimeoutExceeded => Error::WriteTimeoutExceeded,
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_creation() {
        let msg = Message::text("hello");
        assert_eq!(msg.opcode(), OpCode::Text);
        assert!(matches!(msg.frame, WsMessage::Text(ref s) if s.as_str() == "hello"));
        assert_eq!(msg.timeout(), None);
    }

    #[test]
    fn test_message_binary_creation() {
        let msg = Message::binary(vec![1, 2, 3]);
        assert_eq!(msg.opcode(), OpCode::Binary);
        assert!(matches!(msg.frame, WsMessage::Binary(ref d) if d == &vec![1u8, 2, 3]));
    }

    #[test]
    fn test_message_ping() {
        let ping = Message::ping(vec![1, 2, 3], Duration::from_secs(1)).unwrap();
        assert_eq!(ping.opcode(), OpCode::Ping);
        assert!(ping.is_control());
        assert!(!ping.is_close());
        assert_eq!(ping.timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_message_ping_too_large() {
        let result = Message::ping(vec![0u8; 126], Duration::from_secs(1));
        assert_eq!(result.unwrap_err(), Error::ControlFrameTooLarge(126));
    }

    #[test]
    fn test_message_close_with_code() {
        let msg = Message::close(CloseCode::Normal, "goodbye", Duration::from_secs(5)).unwrap();
        assert!(msg.is_close());
        match msg.frame {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "goodbye");
            }
            _ => panic!("Expected Close message with frame"),
        }
    }

    #[test]
    fn test_message_close_rejects_reserved_code() {
        let result = Message::close(CloseCode::Other(1006), "", Duration::from_secs(1));
        assert_eq!(result.unwrap_err(), Error::InvalidCloseCode(1006));

        let result = Message::close(CloseCode::Other(999), "", Duration::from_secs(1));
        assert_eq!(result.unwrap_err(), Error::InvalidCloseCode(999));
    }

    #[test]
    fn test_message_close_rejects_long_reason() {
        let reason = "x".repeat(MAX_CLOSE_REASON_LEN + 1);
        let result = Message::close(CloseCode::Normal, reason, Duration::from_secs(1));
        assert_eq!(result.unwrap_err(), Error::ControlFrameTooLarge(126));

        let reason = "x".repeat(MAX_CLOSE_REASON_LEN);
        assert!(Message::close(CloseCode::Normal, reason, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_message_clone_shares_payload() {
        let msg = Message::binary(vec![7u8; 1024]);
        let cloned = msg.clone();
        match (&msg.frame, &cloned.frame) {
            (WsMessage::Binary(a), WsMessage::Binary(b)) => assert_eq!(a.as_ptr(), b.as_ptr()),
            _ => panic!("Expected binary frames"),
        }
    }

    #[test]
    fn test_close_payload_format_and_parse() {
        let payload = format_close_payload(CloseCode::PolicyViolation, "taken");
        assert_eq!(&payload[..2], &[0x03, 0xf0]);
        assert_eq!(&payload[2..], b"taken");

        let parsed = parse_close_payload(&payload).unwrap().unwrap();
        assert_eq!(parsed, ClientCloseMessage::new(CloseCode::PolicyViolation, "taken"));
    }

    #[test]
    fn test_close_payload_parse_edge_cases() {
        assert_eq!(parse_close_payload(&[]).unwrap(), None);
        assert!(matches!(
            parse_close_payload(&[0x03]),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(
            parse_close_payload(&[0x03, 0xe8, 0xff]).unwrap_err(),
            Error::InvalidUtf8
        );
    }

    #[test]
    fn test_client_close_message_from_frame() {
        let frame = WsCloseFrame {
            code: WsCloseCode::from(1001),
            reason: "bye".into(),
        };
        let msg = ClientCloseMessage::from_frame(Some(&frame));
        assert_eq!(msg, ClientCloseMessage::new(CloseCode::GoingAway, "bye"));

        let msg = ClientCloseMessage::from_frame(None);
        assert_eq!(msg.code, CloseCode::NoStatusReceived);
        assert!(msg.reason.is_empty());
    }

    #[test]
    fn test_client_close_message_display() {
        assert_eq!(
            ClientCloseMessage::new(CloseCode::Normal, "bye").to_string(),
            "1000 bye"
        );
        assert_eq!(
            ClientCloseMessage::new(CloseCode::GoingAway, "").to_string(),
            "1001"
        );
    }

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1001), CloseCode::GoingAway);
        assert_eq!(CloseCode::from_u16(1005), CloseCode::NoStatusReceived);
        assert_eq!(CloseCode::from_u16(1008), CloseCode::PolicyViolation);
        assert_eq!(CloseCode::from_u16(1011), CloseCode::InternalError);
        assert_eq!(CloseCode::from_u16(4999), CloseCode::Other(4999));
    }

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::Normal.is_valid());
        assert!(CloseCode::PolicyViolation.is_valid());
        assert!(CloseCode::Other(1012).is_valid());
        assert!(CloseCode::Other(3000).is_valid());
        assert!(CloseCode::Other(4999).is_valid());

        assert!(!CloseCode::NoStatusReceived.is_valid());
        assert!(!CloseCode::Other(999).is_valid());
        assert!(!CloseCode::Other(1006).is_valid());
        assert!(!CloseCode::Other(2999).is_valid());
        assert!(!CloseCode::Other(5000).is_valid());
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Other(1004).is_reserved());
        assert!(CloseCode::NoStatusReceived.is_reserved());
        assert!(CloseCode::Other(1006).is_reserved());
        assert!(CloseCode::Other(1015).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert_eq!(OpCode::Close.as_u8(), 0x8);
        assert_eq!(OpCode::Pong.to_string(), "Pong");
    }

    #[test]
    fn test_opcode_wire_values_and_names() {
        let all = [
            (OpCode::Text, 0x1, "Text"),
            (OpCode::Binary, 0x2, "Binary"),
            (OpCode::Close, 0x8, "Close"),
            (OpCode::Ping, 0x9, "Ping"),
            (OpCode::Pong, 0xA, "Pong"),
        ];
        for (opcode, byte, name) in all {
            assert_eq!(opcode.as_u8(), byte);
            assert_eq!(opcode.name(), name);
        }
    }
}
