//! Accept loop, listener registration/authentication, and dialer splicing.
//! Accept, authenticate, and splice each run as independent per-connection
//! tasks; `ListenerRegistry` is the only structure they share.

use crate::error::{Error, Result};
use crate::registry::ListenerRegistry;
use futures_util::{SinkExt, StreamExt};
use one_core::PublicKey;
use one_crypto::CryptoApi;
use one_handshake::WireMessage;
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

const SPARE_CAPACITY: usize = 2;
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);
const CHALLENGE_LEN: usize = 32;

pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub ping_interval: Duration,
}

pub struct BrokerServer {
    registry: Arc<ListenerRegistry>,
    config: BrokerConfig,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            registry: Arc::new(ListenerRegistry::new(SPARE_CAPACITY)),
            config,
        }
    }

    /// Binds the configured host/port without starting the accept loop, so
    /// callers (and tests) can learn the actual address before serving.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        Ok((listener, local_addr))
    }

    /// Binds the listening socket and serves connections until `shutdown`
    /// resolves.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        let (listener, addr) = self.bind().await?;
        info!(%addr, "rendezvous broker listening");
        self.serve(listener, shutdown).await
    }

    /// Serves connections accepted from an already-bound `listener` until
    /// `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let registry = self.registry.clone();
        let ping_interval = self.config.ping_interval;
        let accept_loop = async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, peer, registry, ping_interval).await {
                                debug!(%peer, error = %err, "connection ended");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                }
            }
        };

        tokio::select! {
            _ = accept_loop => Ok(()),
            _ = shutdown => {
                info!("rendezvous broker shutting down");
                Ok(())
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ListenerRegistry>,
    ping_interval: Duration,
) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    let first = recv_message(&mut ws, REGISTRATION_TIMEOUT).await?;
    match first {
        WireMessage::Register { public_key } => {
            listener_flow(ws, public_key, registry, ping_interval).await
        }
        request @ WireMessage::CommunicationRequest { .. } => {
            dialer_flow(ws, request, registry).await
        }
        other => {
            debug!(%peer, command = other.command(), "unexpected first frame");
            Err(Error::protocol("expected register or communication_request"))
        }
    }
}

async fn recv_message(ws: &mut WebSocketStream<TcpStream>, step: Duration) -> Result<WireMessage> {
    match timeout(step, ws.next())
        .await
        .map_err(|_| Error::protocol("timed out waiting for a frame"))?
    {
        Some(Ok(Message::Text(text))) => Ok(serde_json::from_str(&text)?),
        Some(Ok(Message::Close(_))) | None => Err(Error::protocol("closed before registering")),
        Some(Ok(_)) => Err(Error::protocol("expected a text frame")),
        Some(Err(err)) => Err(Error::WebSocket(err)),
    }
}

async fn send_message(ws: &mut WebSocketStream<TcpStream>, message: &WireMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

fn invert_bits(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| !b).collect()
}

async fn listener_flow(
    mut ws: WebSocketStream<TcpStream>,
    public_key: PublicKey,
    registry: Arc<ListenerRegistry>,
    ping_interval: Duration,
) -> Result<()> {
    let ephemeral = CryptoApi::generate();
    let mut session = ephemeral.encrypt_decrypt_for(public_key);

    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    let ciphertext = session.encrypt_and_embed_nonce(&challenge)?;

    send_message(
        &mut ws,
        &WireMessage::AuthenticationRequest {
            challenge: ciphertext,
            public_key: ephemeral.public_key(),
        },
    )
    .await?;

    let response = match recv_message(&mut ws, REGISTRATION_TIMEOUT).await? {
        WireMessage::AuthenticationResponse { response } => response,
        other => {
            return Err(Error::protocol(format!(
                "expected authentication_response, got {}",
                other.command()
            )))
        }
    };

    let plaintext = session.decrypt_with_embedded_nonce(&response)?;
    if plaintext != invert_bits(&challenge) {
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "authentication failure".into(),
            }))
            .await;
        return Err(Error::AuthenticationFailure);
    }

    send_message(&mut ws, &WireMessage::AuthenticationSuccess).await?;
    info!(key = %public_key, "listener registered");

    let (claim_tx, claim_rx) = tokio::sync::mpsc::unbounded_channel();
    registry.park(public_key, claim_tx).await;
    spawn_keepalive(ws, claim_rx, ping_interval);
    Ok(())
}

fn spawn_keepalive(
    mut ws: WebSocketStream<TcpStream>,
    mut claim_rx: tokio::sync::mpsc::UnboundedReceiver<crate::registry::ClaimRequest>,
    ping_interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if send_message(&mut ws, &WireMessage::CommPing).await.is_err() {
                        return;
                    }
                }
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Err(_)) => return,
                        _ => {}
                    }
                }
                claim = claim_rx.recv() => {
                    match claim {
                        Some(respond_to) => {
                            let _ = respond_to.send(ws);
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    });
}

async fn dialer_flow(
    mut dialer: WebSocketStream<TcpStream>,
    request: WireMessage,
    registry: Arc<ListenerRegistry>,
) -> Result<()> {
    let target_public_key = match &request {
        WireMessage::CommunicationRequest {
            target_public_key, ..
        } => *target_public_key,
        _ => return Err(Error::protocol("expected communication_request")),
    };

    match registry.claim(target_public_key).await {
        Some(mut listener) => {
            send_message(&mut listener, &request).await?;
            send_message(&mut listener, &WireMessage::ConnectionHandover).await?;
            splice(dialer, listener).await;
            Ok(())
        }
        None => {
            let _ = dialer
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "no listener for target".into(),
                }))
                .await;
            Err(Error::NoListenerForTarget)
        }
    }
}

async fn splice(a: WebSocketStream<TcpStream>, b: WebSocketStream<TcpStream>) {
    let (mut a_write, mut a_read) = a.split();
    let (mut b_write, mut b_read) = b.split();

    let a_to_b = async {
        while let Some(Ok(message)) = a_read.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
            if b_write.send(message).await.is_err() {
                break;
            }
        }
        let _ = b_write.close().await;
    };
    let b_to_a = async {
        while let Some(Ok(message)) = b_read.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
            if a_write.send(message).await.is_err() {
                break;
            }
        }
        let _ = a_write.close().await;
    };
    tokio::join!(a_to_b, b_to_a);
}
