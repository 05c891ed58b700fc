//! The dialer/acceptor exchange that turns a fresh, plaintext WebSocket into
//! an authenticated, encrypted one. Runs directly against the transport —
//! the plugin pipeline (and its encryption plugin) is only constructed once
//! this returns successfully.

use crate::error::{Error, Result};
use crate::messages::WireMessage;
use futures_util::{SinkExt, StreamExt};
use one_core::PublicKey;
use one_crypto::{CryptoApi, SymmetricSession};
use one_pipeline::Transport;
use rand::RngCore;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const DISCRIMINATOR_BYTES: u8 = 0x00;
const DISCRIMINATOR_STRING: u8 = 0x01;
const CHALLENGE_LEN: usize = 32;

/// The shared key and peer identity a successful handshake establishes.
pub struct HandshakeOutcome {
    pub remote_public_key: PublicKey,
    pub session: SymmetricSession,
}

async fn send_json<T: Transport>(socket: &mut T, message: &WireMessage, step: Duration) -> Result<()> {
    let text = serde_json::to_string(message)?;
    timeout(step, socket.send(Message::Text(text)))
        .await
        .map_err(|_| Error::Timeout)??;
    Ok(())
}

async fn recv_json<T: Transport>(socket: &mut T, step: Duration) -> Result<WireMessage> {
    match timeout(step, socket.next()).await.map_err(|_| Error::Timeout)? {
        Some(Ok(Message::Text(text))) => Ok(serde_json::from_str(&text)?),
        Some(Ok(Message::Close(_))) | None => {
            Err(Error::ConnectionClosed("closed during handshake".into()))
        }
        Some(Ok(_)) => Err(Error::protocol("expected a text frame")),
        Some(Err(err)) => Err(Error::WebSocket(err)),
    }
}

async fn send_encrypted<T: Transport>(
    socket: &mut T,
    session: &mut SymmetricSession,
    discriminator: u8,
    plaintext: &[u8],
    step: Duration,
) -> Result<()> {
    let mut framed = Vec::with_capacity(plaintext.len() + 1);
    framed.push(discriminator);
    framed.extend_from_slice(plaintext);
    let ciphertext = session.encrypt_and_embed_nonce(&framed)?;
    timeout(step, socket.send(Message::Binary(ciphertext)))
        .await
        .map_err(|_| Error::Timeout)??;
    Ok(())
}

async fn recv_encrypted<T: Transport>(
    socket: &mut T,
    session: &mut SymmetricSession,
    step: Duration,
) -> Result<(u8, Vec<u8>)> {
    loop {
        match timeout(step, socket.next()).await.map_err(|_| Error::Timeout)? {
            Some(Ok(Message::Binary(data))) => {
                let plaintext = session.decrypt_with_embedded_nonce(&data)?;
                if plaintext.is_empty() {
                    return Err(Error::protocol("empty encrypted frame"));
                }
                return Ok((plaintext[0], plaintext[1..].to_vec()));
            }
            // A rendezvous broker splices a listener straight into the
            // handshake's read side; its `connection_handover` notice lands
            // in between the forwarded `communication_request` and the
            // dialer's real frames and carries no handshake content, so it
            // is transparently skipped here rather than rejected.
            Some(Ok(Message::Text(text))) if is_connection_handover(&text) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::ConnectionClosed("closed during handshake".into()))
            }
            Some(Ok(_)) => return Err(Error::protocol("expected a binary frame")),
            Some(Err(err)) => return Err(Error::WebSocket(err)),
        }
    }
}

fn is_connection_handover(text: &str) -> bool {
    matches!(
        serde_json::from_str::<WireMessage>(text),
        Ok(WireMessage::ConnectionHandover)
    )
}

async fn send_synchronisation<T: Transport>(
    socket: &mut T,
    session: &mut SymmetricSession,
    value: &str,
    step: Duration,
) -> Result<()> {
    let message = WireMessage::Synchronisation {
        value: value.to_string(),
    };
    let json = serde_json::to_vec(&message)?;
    send_encrypted(socket, session, DISCRIMINATOR_STRING, &json, step).await
}

async fn recv_synchronisation<T: Transport>(
    socket: &mut T,
    session: &mut SymmetricSession,
    step: Duration,
) -> Result<String> {
    let (discriminator, plaintext) = recv_encrypted(socket, session, step).await?;
    if discriminator != DISCRIMINATOR_STRING {
        return Err(Error::protocol("expected the synchronisation frame's string encoding"));
    }
    match serde_json::from_slice(&plaintext)? {
        WireMessage::Synchronisation { value } => Ok(value),
        other => Err(Error::protocol(format!(
            "expected synchronisation, got {}",
            other.command()
        ))),
    }
}

fn invert_bits(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| !b).collect()
}

const SYNC_TOKEN: &str = "one-connection-substrate/sync/v1";

/// Runs the dialer half of the handshake: sends `communication_request`,
/// derives the shared key, answers the acceptor's challenge and completes
/// synchronisation.
pub async fn dialer_handshake<T: Transport>(
    socket: &mut T,
    crypto: &CryptoApi,
    target: PublicKey,
    step_timeout: Duration,
) -> Result<HandshakeOutcome> {
    send_json(
        socket,
        &WireMessage::CommunicationRequest {
            source_public_key: crypto.public_key(),
            target_public_key: target,
        },
        step_timeout,
    )
    .await?;

    match recv_json(socket, step_timeout).await? {
        WireMessage::CommunicationReady => {}
        other => {
            return Err(Error::protocol(format!(
                "expected communication_ready, got {}",
                other.command()
            )))
        }
    }

    let mut session = crypto.encrypt_decrypt_for(target);

    let (discriminator, challenge) = recv_encrypted(socket, &mut session, step_timeout).await?;
    if discriminator != DISCRIMINATOR_BYTES {
        return Err(Error::protocol("expected the challenge's byte encoding"));
    }
    let response = invert_bits(&challenge);
    send_encrypted(
        socket,
        &mut session,
        DISCRIMINATOR_BYTES,
        &response,
        step_timeout,
    )
    .await?;

    send_synchronisation(socket, &mut session, SYNC_TOKEN, step_timeout).await?;
    let echoed = recv_synchronisation(socket, &mut session, step_timeout).await?;
    if echoed != SYNC_TOKEN {
        return Err(Error::protocol("synchronisation frame mismatch"));
    }

    Ok(HandshakeOutcome {
        remote_public_key: target,
        session,
    })
}

/// Runs the acceptor half of the handshake: answers `communication_request`
/// with `communication_ready`, issues the challenge, verifies the inverted
/// response and echoes synchronisation.
pub async fn acceptor_handshake<T: Transport>(
    socket: &mut T,
    crypto: &CryptoApi,
    step_timeout: Duration,
) -> Result<HandshakeOutcome> {
    let source = match recv_json(socket, step_timeout).await? {
        WireMessage::CommunicationRequest {
            source_public_key,
            target_public_key,
        } => {
            if target_public_key != crypto.public_key() {
                return Err(Error::protocol("communication_request targeted a different peer"));
            }
            source_public_key
        }
        other => {
            return Err(Error::protocol(format!(
                "expected communication_request, got {}",
                other.command()
            )))
        }
    };

    send_json(socket, &WireMessage::CommunicationReady, step_timeout).await?;

    let mut session = crypto.encrypt_decrypt_for(source);

    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    send_encrypted(
        socket,
        &mut session,
        DISCRIMINATOR_BYTES,
        &challenge,
        step_timeout,
    )
    .await?;

    let (discriminator, response) = recv_encrypted(socket, &mut session, step_timeout).await?;
    if discriminator != DISCRIMINATOR_BYTES || response != invert_bits(&challenge) {
        return Err(Error::AuthenticationFailure);
    }

    let sync_value = recv_synchronisation(socket, &mut session, step_timeout).await?;
    send_synchronisation(socket, &mut session, &sync_value, step_timeout).await?;

    Ok(HandshakeOutcome {
        remote_public_key: source,
        session,
    })
}
