//! A handler that records every callback it receives.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use ws_lifecycle::{BoxError, ClientCloseMessage, ConnectionHandler, Context, Message};

/// A callback observed by the [`Recorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Message(Bytes),
    Disconnect(Option<ClientCloseMessage>),
}

struct Inner {
    events: Mutex<Vec<Event>>,
    writer: Mutex<Option<mpsc::Receiver<Message>>>,
    fail_on: Option<Bytes>,
    echo: Option<mpsc::Sender<Message>>,
    inbound: mpsc::UnboundedSender<Bytes>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

/// Records callbacks; cloning shares the record.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    /// A recorder and the sender feeding its outbound channel.
    pub fn new() -> (Self, mpsc::Sender<Message>) {
        Self::build(None, false)
    }

    /// A recorder whose `on_message` fails for `payload`.
    pub fn failing_on(payload: &'static [u8]) -> (Self, mpsc::Sender<Message>) {
        Self::build(Some(Bytes::from_static(payload)), false)
    }

    /// A recorder that writes every inbound payload back as binary.
    pub fn echo() -> (Self, mpsc::Sender<Message>) {
        Self::build(None, true)
    }

    fn build(fail_on: Option<Bytes>, echo: bool) -> (Self, mpsc::Sender<Message>) {
        let (tx, rx) = mpsc::channel(16);
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let recorder = Self {
            inner: Arc::new(Inner {
                events: Mutex::new(Vec::new()),
                writer: Mutex::new(Some(rx)),
                fail_on,
                echo: echo.then(|| tx.clone()),
                inbound,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            }),
        };
        (recorder, tx)
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Connect))
            .count()
    }

    pub fn disconnects(&self) -> Vec<Option<ClientCloseMessage>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Disconnect(close) => Some(close),
                _ => None,
            })
            .collect()
    }

    /// Wait for the next payload delivered to `on_message`.
    pub async fn next_message(&self) -> Bytes {
        let mut rx = self.inner.inbound_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("recorder dropped")
    }

    fn record(&self, event: Event) {
        self.inner.events.lock().unwrap().push(event);
    }
}

impl ConnectionHandler for Recorder {
    fn on_connect(&self, _ctx: &Context) {
        self.record(Event::Connect);
    }

    fn on_disconnect(&self, _ctx: &Context, close: Option<ClientCloseMessage>) {
        self.record(Event::Disconnect(close));
    }

    async fn on_message(&self, _ctx: &Context, payload: Bytes) -> Result<(), BoxError> {
        self.record(Event::Message(payload.clone()));
        let _ = self.inner.inbound.send(payload.clone());

        if self.inner.fail_on.as_ref() == Some(&payload) {
            return Err(format!("rejected {:?}", payload).into());
        }
        if let Some(echo) = &self.inner.echo {
            echo.send(Message::binary(payload)).await?;
        }
        Ok(())
    }

    fn message_writer(&self, _ctx: &Context) -> Result<mpsc::Receiver<Message>, BoxError> {
        self.inner
            .writer
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| "message writer already taken".into())
    }
}
