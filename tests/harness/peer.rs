//! The remote end of a connection under test.

use tokio::io::DuplexStream;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use ws_lifecycle::{Connection, Context};

/// A client-role WebSocket over an in-memory pipe.
pub type Peer = WebSocketStream<DuplexStream>;

/// A server-side `Connection` and the client peer talking to it.
pub async fn duplex_pair(ctx: Context) -> (Connection, Peer) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    (Connection::new(server, ctx), client)
}

/// A server-side `Connection` whose peer never reads or writes.
///
/// `capacity` bounds the bytes the pipe buffers before server writes stall.
/// The returned raw end must be kept alive to keep the pipe open.
pub async fn stalled_pair(ctx: Context, capacity: usize) -> (Connection, DuplexStream) {
    let (server, client) = tokio::io::duplex(capacity);
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (Connection::new(server, ctx), client)
}

/// A listener on an ephemeral local port and the URL to reach it.
pub async fn tcp_pair() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/chat?room=lobby", listener.local_addr().unwrap());
    (listener, url)
}

/// Connect a client to `url`.
pub async fn connect(url: &str) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// A close frame with the given code and reason.
pub fn close_frame(code: u16, reason: &str) -> CloseFrame {
    CloseFrame {
        code: WsCloseCode::from(code),
        reason: reason.into(),
    }
}
