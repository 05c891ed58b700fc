//! The three route variants, each producing `(connection, localKey,
//! remoteKey, routeId)` tuples for the routes-group manager as
//! `RouteEvent`s. All three share the `start()/stop()/active` contract.

use crate::backoff::ReconnectPolicy;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use one_core::{ConnectionId, PublicKey, RouteId};
use one_crypto::CryptoApi;
use one_handshake::{acceptor_handshake, dialer_handshake};
use one_pipeline::{
    Connection, ConnectionHandle, FramingEncryptionPlugin, IncomingEvent, PingPongPlugin,
    PromiseHandle, PromisePlugin, Role, StatisticsHandle, StatisticsPlugin,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);
const PING_PERIOD: Duration = Duration::from_secs(15);
const PING_RTT_BUDGET: Duration = Duration::from_secs(5);
const PROMISE_QUEUE_BOUND: usize = 1;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// What a route hands off once a peer connection is live: a handle to drive
/// it, a feed of the events it couldn't consume itself, and the handles
/// plugins installed during assembly expose to the owner.
pub struct OpenedConnection {
    pub id: ConnectionId,
    pub handle: ConnectionHandle,
    pub incoming: mpsc::UnboundedReceiver<IncomingEvent>,
    pub statistics: StatisticsHandle,
    pub promise: PromiseHandle,
}

pub struct RouteEvent {
    pub connection: OpenedConnection,
    pub local_key: PublicKey,
    pub remote_key: PublicKey,
    pub group_name: String,
    pub route_id: RouteId,
}

/// Wires the standard plugin chain onto a handshaken socket: encryption
/// nearest the socket, then statistics, ping/pong, and promise nearest the
/// application, and starts the connection's run loop.
fn assemble_connection<T: one_pipeline::Transport>(
    socket: T,
    session: one_crypto::SymmetricSession,
    ping_role: Role,
) -> OpenedConnection {
    let id = next_connection_id();
    let (mut connection, handle, incoming) = Connection::new(id, socket);

    let (statistics_plugin, statistics) = StatisticsPlugin::new();
    let (promise_plugin, promise) = PromisePlugin::new(PROMISE_QUEUE_BOUND);

    connection
        .add_plugin(Box::new(statistics_plugin))
        .expect("plugins may be added before the encryption plugin is installed");
    connection
        .add_plugin(Box::new(PingPongPlugin::new(ping_role)))
        .expect("plugins may be added before the encryption plugin is installed");
    connection
        .add_plugin(Box::new(promise_plugin))
        .expect("plugins may be added before the encryption plugin is installed");
    connection.install_encryption_plugin(Box::new(FramingEncryptionPlugin::new(session)));

    tokio::spawn(connection.run());

    OpenedConnection {
        id,
        handle,
        incoming,
        statistics,
        promise,
    }
}

/// Whether a route dials out or waits to be dialed. The group manager only
/// ever suppresses outgoing routes while a connection is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Incoming,
    Outgoing,
}

#[async_trait]
pub trait ConnectionRoute: Send {
    fn id(&self) -> &RouteId;
    fn kind(&self) -> RouteKind;
    fn active(&self) -> bool;
    async fn start(&mut self, events: mpsc::UnboundedSender<RouteEvent>) -> Result<()>;
    async fn stop(&mut self);
}

/// Runs a local listener; every accepted socket becomes an acceptor-side
/// handshake, producing a tuple for the group named `group_name`.
pub struct IncomingDirect {
    route_id: RouteId,
    host: String,
    port: u16,
    crypto: Arc<CryptoApi>,
    group_name: String,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl IncomingDirect {
    pub fn new(host: impl Into<String>, port: u16, crypto: Arc<CryptoApi>, group_name: impl Into<String>) -> Self {
        let host = host.into();
        let group_name = group_name.into();
        let route_id = RouteId(format!("incoming-direct:{host}:{port}"));
        Self {
            route_id,
            host,
            port,
            crypto,
            group_name,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl ConnectionRoute for IncomingDirect {
    fn id(&self) -> &RouteId {
        &self.route_id
    }

    fn kind(&self) -> RouteKind {
        RouteKind::Incoming
    }

    fn active(&self) -> bool {
        self.task.is_some()
    }

    async fn start(&mut self, events: mpsc::UnboundedSender<RouteEvent>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::route_start_failure(format!("invalid bind address: {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::route_start_failure(e.to_string()))?;

        let crypto = self.crypto.clone();
        let group_name = self.group_name.clone();
        let cancel = self.cancel.clone();
        let local_key = crypto.public_key();

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let crypto = crypto.clone();
                        let events = events.clone();
                        let group_name = group_name.clone();
                        tokio::spawn(async move {
                            if let Err(err) = accept_one(stream, peer, &crypto, &group_name, local_key, &events).await {
                                debug!(%peer, error = %err, "incoming direct handshake failed");
                            }
                        });
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_one(
    stream: TcpStream,
    peer: SocketAddr,
    crypto: &CryptoApi,
    group_name: &str,
    local_key: PublicKey,
    events: &mpsc::UnboundedSender<RouteEvent>,
) -> Result<()> {
    let mut socket = tokio_tungstenite::accept_async(stream).await?;
    let outcome = acceptor_handshake(&mut socket, crypto, HANDSHAKE_STEP_TIMEOUT).await?;
    let opened = assemble_connection(
        socket,
        outcome.session,
        Role::Passive {
            period: PING_PERIOD,
            rtt: PING_RTT_BUDGET,
        },
    );
    let route_id = RouteId(format!("incoming-direct:{peer}"));
    let _ = events.send(RouteEvent {
        connection: opened,
        local_key,
        remote_key: outcome.remote_public_key,
        group_name: group_name.to_string(),
        route_id,
    });
    Ok(())
}

/// Maintains a registration with the rendezvous broker, re-registering
/// whenever the current registration is consumed (the broker spliced a
/// dialer to it, or dropped the slot).
pub struct IncomingViaBroker {
    route_id: RouteId,
    broker_url: String,
    crypto: Arc<CryptoApi>,
    group_name: String,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl IncomingViaBroker {
    pub fn new(broker_url: impl Into<String>, crypto: Arc<CryptoApi>, group_name: impl Into<String>) -> Self {
        let broker_url = broker_url.into();
        let route_id = RouteId(format!("incoming-via-broker:{broker_url}"));
        Self {
            route_id,
            broker_url,
            crypto,
            group_name: group_name.into(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl ConnectionRoute for IncomingViaBroker {
    fn id(&self) -> &RouteId {
        &self.route_id
    }

    fn kind(&self) -> RouteKind {
        RouteKind::Incoming
    }

    fn active(&self) -> bool {
        self.task.is_some()
    }

    async fn start(&mut self, events: mpsc::UnboundedSender<RouteEvent>) -> Result<()> {
        let crypto = self.crypto.clone();
        let broker_url = self.broker_url.clone();
        let group_name = self.group_name.clone();
        let cancel = self.cancel.clone();
        let local_key = crypto.public_key();

        self.task = Some(tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match register_once(&broker_url, &crypto, &group_name, local_key, &events, &cancel).await {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        warn!(error = %err, attempt = consecutive_failures, "broker registration failed");
                        let delay = ReconnectPolicy::default_exponential().delay_for(consecutive_failures);
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn register_once(
    broker_url: &str,
    crypto: &CryptoApi,
    group_name: &str,
    local_key: PublicKey,
    events: &mpsc::UnboundedSender<RouteEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    use futures_util::SinkExt;
    use one_handshake::WireMessage;
    use tokio_tungstenite::tungstenite::Message;

    let (mut socket, _) = tokio_tungstenite::connect_async(broker_url)
        .await
        .map_err(Error::WebSocket)?;

    let register = serde_json::to_string(&WireMessage::Register {
        public_key: local_key,
    })
    .expect("register always serializes");
    socket.send(Message::Text(register)).await?;

    let challenge_frame = match tokio::time::timeout(HANDSHAKE_STEP_TIMEOUT, socket.next())
        .await
        .map_err(|_| Error::route_start_failure("timed out waiting for authentication_request"))?
    {
        Some(Ok(Message::Text(text))) => {
            serde_json::from_str::<WireMessage>(&text).map_err(|e| Error::route_start_failure(e.to_string()))?
        }
        _ => return Err(Error::route_start_failure("broker closed before authenticating")),
    };
    let (challenge, broker_key) = match challenge_frame {
        WireMessage::AuthenticationRequest { challenge, public_key } => (challenge, public_key),
        other => {
            return Err(Error::route_start_failure(format!(
                "expected authentication_request, got {}",
                other.command()
            )))
        }
    };

    let mut session = crypto.encrypt_decrypt_for(broker_key);
    let plaintext = session
        .decrypt_with_embedded_nonce(&challenge)
        .map_err(|e| Error::route_start_failure(e.to_string()))?;
    let response: Vec<u8> = plaintext.iter().map(|b| !b).collect();
    let ciphertext = session
        .encrypt_and_embed_nonce(&response)
        .map_err(|e| Error::route_start_failure(e.to_string()))?;
    let response_message = serde_json::to_string(&WireMessage::AuthenticationResponse { response: ciphertext })
        .expect("authentication_response always serializes");
    socket.send(Message::Text(response_message)).await?;

    match tokio::time::timeout(HANDSHAKE_STEP_TIMEOUT, socket.next())
        .await
        .map_err(|_| Error::route_start_failure("timed out waiting for authentication_success"))?
    {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<WireMessage>(&text) {
            Ok(WireMessage::AuthenticationSuccess) => {}
            _ => return Err(Error::route_start_failure("broker did not confirm registration")),
        },
        _ => return Err(Error::route_start_failure("broker closed before confirming registration")),
    }

    // Parked: wait for the broker to splice a dialer through, then run the
    // acceptor half of the handshake over what is now a direct pipe.
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        outcome = acceptor_handshake(&mut socket, crypto, HANDSHAKE_STEP_TIMEOUT) => {
            let outcome = outcome?;
            let opened = assemble_connection(
                socket,
                outcome.session,
                Role::Passive { period: PING_PERIOD, rtt: PING_RTT_BUDGET },
            );
            let _ = events.send(RouteEvent {
                connection: opened,
                local_key,
                remote_key: outcome.remote_public_key,
                group_name: group_name.to_string(),
                route_id: RouteId(format!("incoming-via-broker:{broker_url}")),
            });
            Ok(())
        }
    }
}

/// Dials a fixed URL, reconnecting with backoff on any failure or
/// unexpectedly early close.
pub struct OutgoingDial {
    route_id: RouteId,
    url: String,
    crypto: Arc<CryptoApi>,
    target: PublicKey,
    group_name: String,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl OutgoingDial {
    pub fn new(
        url: impl Into<String>,
        crypto: Arc<CryptoApi>,
        target: PublicKey,
        group_name: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        let url = url.into();
        let route_id = RouteId(format!("outgoing-dial:{url}"));
        Self {
            route_id,
            url,
            crypto,
            target,
            group_name: group_name.into(),
            policy,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl ConnectionRoute for OutgoingDial {
    fn id(&self) -> &RouteId {
        &self.route_id
    }

    fn kind(&self) -> RouteKind {
        RouteKind::Outgoing
    }

    fn active(&self) -> bool {
        self.task.is_some()
    }

    async fn start(&mut self, events: mpsc::UnboundedSender<RouteEvent>) -> Result<()> {
        let url = self.url.clone();
        let crypto = self.crypto.clone();
        let target = self.target;
        let group_name = self.group_name.clone();
        let policy = self.policy;
        let cancel = self.cancel.clone();
        let route_id = self.route_id.clone();
        let local_key = crypto.public_key();

        self.task = Some(tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match dial_once(&url, &crypto, target, &group_name, local_key, &route_id, &events).await {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        warn!(error = %err, attempt = consecutive_failures, "outgoing dial failed");
                    }
                }
                let delay = policy.delay_for(consecutive_failures);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn dial_once(
    url: &str,
    crypto: &CryptoApi,
    target: PublicKey,
    group_name: &str,
    local_key: PublicKey,
    route_id: &RouteId,
    events: &mpsc::UnboundedSender<RouteEvent>,
) -> Result<()> {
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.map_err(Error::WebSocket)?;
    let outcome = dialer_handshake(&mut socket, crypto, target, HANDSHAKE_STEP_TIMEOUT).await?;
    let opened = assemble_connection(
        socket,
        outcome.session,
        Role::Active {
            period: PING_PERIOD,
            rtt: PING_RTT_BUDGET,
        },
    );
    let _ = events.send(RouteEvent {
        connection: opened,
        local_key,
        remote_key: target,
        group_name: group_name.to_string(),
        route_id: route_id.clone(),
    });
    Ok(())
}
