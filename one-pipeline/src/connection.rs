//! The stateful duplex channel owning a WebSocket and an ordered list of
//! plugins. Plugins are ordered from index 0 (nearest the socket) to the
//! last index (nearest the application) — the encryption plugin always sits
//! at index 0 once installed, satisfying the received-direction ordering
//! invariant (encryption before ping/pong before promise).

use crate::errors::{Error, Result};
use crate::event::{CloseOrigin, IncomingEvent, OutgoingEvent, Payload};
use crate::plugin::Plugin;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use one_core::ConnectionId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const TICK_INTERVAL: Duration = Duration::from_millis(20);

pub trait Transport:
    futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
    + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
    + Unpin
    + Send
    + 'static
{
}

impl<T> Transport for WebSocketStream<T> where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static
{
}

/// A lightweight handle the owner (a route, the handshake protocol, or the
/// routes-group manager) uses to drive a running connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    outbound_tx: mpsc::UnboundedSender<OutgoingEvent>,
}

impl ConnectionHandle {
    /// A handle with no connection behind it, for tests that need an
    /// `OpenedConnection` without driving a real socket.
    pub fn detached(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<OutgoingEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (Self { id, outbound_tx }, outbound_rx)
    }

    pub fn send(&self, payload: Payload) -> Result<()> {
        self.outbound_tx
            .send(OutgoingEvent::Message(payload))
            .map_err(|_| Error::closed("connection closed"))
    }

    pub fn close(&self, reason: impl Into<String>) -> Result<()> {
        self.outbound_tx
            .send(OutgoingEvent::Close {
                reason: reason.into(),
            })
            .map_err(|_| Error::closed("connection closed"))
    }
}

pub struct Connection<T: Transport> {
    id: ConnectionId,
    plugins: Vec<Box<dyn Plugin>>,
    write: SplitSink<T, Message>,
    read: SplitStream<T>,
    outbound_rx: mpsc::UnboundedReceiver<OutgoingEvent>,
    upstream_tx: mpsc::UnboundedSender<IncomingEvent>,
    accepting_plugins: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(
        id: ConnectionId,
        socket: T,
    ) -> (Self, ConnectionHandle, mpsc::UnboundedReceiver<IncomingEvent>) {
        let (write, read) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id,
            plugins: Vec::new(),
            write,
            read,
            outbound_rx,
            upstream_tx,
            accepting_plugins: true,
        };
        let handle = ConnectionHandle { id, outbound_tx };
        (connection, handle, upstream_rx)
    }

    /// Appends a plugin to the chain. Only legal before the handshake
    /// transitions the connection into encrypted mode.
    pub fn add_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        if !self.accepting_plugins {
            return Err(Error::protocol("cannot add a plugin after the handshake"));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Installs the encryption plugin at the handshake's transition point.
    /// It always occupies index 0, nearest the socket; after this call no
    /// further plugins may be added.
    pub fn install_encryption_plugin(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.insert(0, plugin);
        self.accepting_plugins = false;
    }

    pub fn plugin_named(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    async fn write_wire(&mut self, payload: &Payload) -> Result<()> {
        let message = match payload {
            Payload::Bytes(bytes) => Message::Binary(bytes.clone()),
            Payload::Text(text) => Message::Text(text.clone()),
        };
        self.write.send(message).await?;
        Ok(())
    }

    fn dispatch_incoming(&mut self, mut event: IncomingEvent) -> Option<IncomingEvent> {
        for plugin in self.plugins.iter_mut() {
            match plugin.transform_incoming(event) {
                Some(next) => event = next,
                None => return None,
            }
        }
        Some(event)
    }

    /// Runs `event` through `transform_outgoing` starting just below
    /// `from_index` (exclusive) down to the socket. `from_index` is
    /// `plugins.len()` for application-originated sends.
    fn dispatch_outgoing(&mut self, from_index: usize, mut event: OutgoingEvent) -> Option<OutgoingEvent> {
        for plugin in self.plugins[..from_index].iter_mut().rev() {
            match plugin.transform_outgoing(event) {
                Some(next) => event = next,
                None => return None,
            }
        }
        Some(event)
    }

    /// Drives the connection until it closes, either locally or remotely.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                incoming = self.read.next() => {
                    let event = match incoming {
                        Some(Ok(Message::Binary(data))) => IncomingEvent::Message(Payload::Bytes(data)),
                        Some(Ok(Message::Text(text))) => IncomingEvent::Message(Payload::Text(text)),
                        Some(Ok(Message::Close(frame))) => IncomingEvent::Closed {
                            reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                            origin: CloseOrigin::Remote,
                        },
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => IncomingEvent::Closed {
                            reason: err.to_string(),
                            origin: CloseOrigin::Remote,
                        },
                        None => IncomingEvent::Closed {
                            reason: "connection closed".into(),
                            origin: CloseOrigin::Remote,
                        },
                    };
                    let is_closed = matches!(event, IncomingEvent::Closed { .. });
                    if let Some(delivered) = self.dispatch_incoming(event) {
                        let _ = self.upstream_tx.send(delivered);
                    }
                    if is_closed {
                        break;
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    match outbound {
                        Some(OutgoingEvent::Close { reason }) => {
                            let _ = self.write.send(Message::Close(None)).await;
                            let _ = self.upstream_tx.send(IncomingEvent::Closed {
                                reason,
                                origin: CloseOrigin::Local,
                            });
                            break;
                        }
                        Some(event) => {
                            let from = self.plugins.len();
                            if let Some(OutgoingEvent::Message(payload)) = self.dispatch_outgoing(from, event) {
                                if self.write_wire(&payload).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Some(close) = self.poll_plugin_timers().await {
                        let _ = self.upstream_tx.send(IncomingEvent::Closed {
                            reason: close,
                            origin: CloseOrigin::Local,
                        });
                        let _ = self.write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
        let _ = self.write.close().await;
    }

    async fn poll_plugin_timers(&mut self) -> Option<String> {
        for index in 0..self.plugins.len() {
            if let Some(reason) = self.plugins[index].on_tick_close() {
                return Some(reason);
            }
            let due = self.plugins[index].on_tick();
            for event in due {
                if let Some(OutgoingEvent::Message(payload)) = self.dispatch_outgoing(index, event) {
                    let _ = self.write_wire(&payload).await;
                }
            }
        }
        None
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}
