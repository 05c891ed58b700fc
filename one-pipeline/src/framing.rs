//! The plugin sitting at the position where plaintext becomes ciphertext.
//! Below it on the wire: WebSocket binary frames whose payload is
//! `discriminator(1) ‖ ciphertext‖authTag`. Above it: plaintext
//! `Payload::Bytes`/`Payload::Text` messages.

use crate::event::{CloseOrigin, IncomingEvent, OutgoingEvent, Payload};
use crate::plugin::Plugin;
use one_crypto::SymmetricSession;

const DISCRIMINATOR_BYTES: u8 = 0x00;
const DISCRIMINATOR_STRING: u8 = 0x01;

pub struct FramingEncryptionPlugin {
    session: SymmetricSession,
}

impl FramingEncryptionPlugin {
    /// Installed at the handshake's transition point (step 3), once both
    /// sides have derived the shared key and initialised nonce counters.
    pub fn new(session: SymmetricSession) -> Self {
        Self { session }
    }

    pub fn outgoing_frame_count(&self) -> u64 {
        self.session.outgoing_frame_count()
    }

    pub fn incoming_frame_count(&self) -> u64 {
        self.session.incoming_frame_count()
    }
}

impl Plugin for FramingEncryptionPlugin {
    fn name(&self) -> &'static str {
        "framing-encryption"
    }

    fn transform_incoming(&mut self, event: IncomingEvent) -> Option<IncomingEvent> {
        match event {
            IncomingEvent::Message(Payload::Bytes(frame)) => {
                if frame.is_empty() {
                    return Some(IncomingEvent::Closed {
                        reason: "decryption failure".into(),
                        origin: CloseOrigin::Remote,
                    });
                }
                let (discriminator, ciphertext) = (frame[0], &frame[1..]);
                match self.session.decrypt_with_embedded_nonce(ciphertext) {
                    Ok(plaintext) => match discriminator {
                        DISCRIMINATOR_STRING => match String::from_utf8(plaintext) {
                            Ok(text) => Some(IncomingEvent::Message(Payload::Text(text))),
                            Err(_) => Some(IncomingEvent::Closed {
                                reason: "decryption failure".into(),
                                origin: CloseOrigin::Remote,
                            }),
                        },
                        _ => Some(IncomingEvent::Message(Payload::Bytes(plaintext))),
                    },
                    Err(_) => Some(IncomingEvent::Closed {
                        reason: "decryption failure".into(),
                        origin: CloseOrigin::Remote,
                    }),
                }
            }
            other => Some(other),
        }
    }

    fn transform_outgoing(&mut self, event: OutgoingEvent) -> Option<OutgoingEvent> {
        match event {
            OutgoingEvent::Message(payload) => {
                let (discriminator, plaintext) = match &payload {
                    Payload::Bytes(b) => (DISCRIMINATOR_BYTES, b.clone()),
                    Payload::Text(s) => (DISCRIMINATOR_STRING, s.clone().into_bytes()),
                };
                let mut framed = Vec::with_capacity(plaintext.len() + 1);
                framed.push(discriminator);
                framed.extend_from_slice(&plaintext);

                match self.session.encrypt_and_embed_nonce(&framed) {
                    Ok(ciphertext) => Some(OutgoingEvent::Message(Payload::Bytes(ciphertext))),
                    Err(_) => None,
                }
            }
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use one_crypto::CryptoApi;

    fn paired_sessions() -> (SymmetricSession, SymmetricSession) {
        let alice = CryptoApi::generate();
        let bob = CryptoApi::generate();
        (
            alice.encrypt_decrypt_for(bob.public_key()),
            bob.encrypt_decrypt_for(alice.public_key()),
        )
    }

    #[test]
    fn round_trips_text_payload() {
        let (alice_session, bob_session) = paired_sessions();
        let mut alice = FramingEncryptionPlugin::new(alice_session);
        let mut bob = FramingEncryptionPlugin::new(bob_session);

        let outgoing = alice
            .transform_outgoing(OutgoingEvent::Message(Payload::Text("hello".into())))
            .expect("outgoing");
        let OutgoingEvent::Message(Payload::Bytes(wire)) = outgoing else {
            panic!("expected binary wire frame");
        };

        let incoming = bob
            .transform_incoming(IncomingEvent::Message(Payload::Bytes(wire)))
            .expect("incoming");
        match incoming {
            IncomingEvent::Message(Payload::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn tampered_frame_closes_with_decryption_failure() {
        let (alice_session, bob_session) = paired_sessions();
        let mut alice = FramingEncryptionPlugin::new(alice_session);
        let mut bob = FramingEncryptionPlugin::new(bob_session);

        let outgoing = alice
            .transform_outgoing(OutgoingEvent::Message(Payload::Bytes(b"data".to_vec())))
            .unwrap();
        let OutgoingEvent::Message(Payload::Bytes(mut wire)) = outgoing else {
            panic!("expected binary wire frame");
        };
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let incoming = bob
            .transform_incoming(IncomingEvent::Message(Payload::Bytes(wire)))
            .unwrap();
        match incoming {
            IncomingEvent::Closed { reason, .. } => assert_eq!(reason, "decryption failure"),
            other => panic!("expected close, got {other:?}"),
        }
    }
}
