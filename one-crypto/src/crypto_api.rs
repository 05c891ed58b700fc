//! The capability bundle substrate code actually holds: a `CryptoApi` for one
//! local identity, which derives per-peer shared keys and symmetric sessions.
//! The substrate never touches raw secret key bytes directly.

use crate::aead::{AeadCipher, AeadKey};
use crate::error::Result;
use crate::nonce::NonceCounter;
use hkdf::Hkdf;
use one_core::types::PublicKey;
use sha2::Sha256;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

const SHARED_KEY_INFO: &[u8] = b"one-connection-substrate/shared-key/v1";

/// A derived shared key between two identities, without any session state
/// (nonce counters) attached yet. Produced by `CryptoApi::shared_key`.
pub struct SymmetricCryptoApi {
    key_bytes: [u8; 32],
}

impl SymmetricCryptoApi {
    /// Installs this key as a fresh encryption session with both nonce
    /// counters initialised to zero, per the handshake's step 3.
    pub fn into_session(self) -> SymmetricSession {
        SymmetricSession {
            outgoing: AeadCipher::new(AeadKey::from_bytes(self.key_bytes)),
            incoming: AeadCipher::new(AeadKey::from_bytes(self.key_bytes)),
            outgoing_counter: NonceCounter::new(),
            incoming_counter: NonceCounter::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn key_bytes(&self) -> [u8; 32] {
        self.key_bytes
    }
}

/// A live, stateful symmetric session: a shared key plus the two
/// independent per-direction nonce counters.
pub struct SymmetricSession {
    outgoing: AeadCipher,
    incoming: AeadCipher,
    outgoing_counter: NonceCounter,
    incoming_counter: NonceCounter,
}

impl SymmetricSession {
    /// Encrypts `plaintext`, advancing the outgoing nonce counter.
    pub fn encrypt_and_embed_nonce(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.outgoing.seal(&mut self.outgoing_counter, plaintext)
    }

    /// Decrypts `ciphertext` produced for the next expected incoming counter
    /// value, advancing the incoming counter on success.
    pub fn decrypt_with_embedded_nonce(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let next_value = self.incoming_counter.value() + 1;
        let plaintext = self.incoming.open(next_value, ciphertext)?;
        self.incoming_counter.advance_to(next_value);
        Ok(plaintext)
    }

    pub fn outgoing_frame_count(&self) -> u64 {
        self.outgoing_counter.value()
    }

    pub fn incoming_frame_count(&self) -> u64 {
        self.incoming_counter.value()
    }
}

/// A capability bundle for one local identity.
pub struct CryptoApi {
    public_key: PublicKey,
    secret: StaticSecret,
}

impl CryptoApi {
    pub fn new(public_key: PublicKey, secret: StaticSecret) -> Self {
        Self { public_key, secret }
    }

    /// Generates a fresh identity using the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = XPublicKey::from(&secret);
        Self {
            public_key: PublicKey::from_bytes(*public.as_bytes()),
            secret,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Derives the raw shared key for `remote` without installing any
    /// session state.
    pub fn shared_key(&self, remote: PublicKey) -> SymmetricCryptoApi {
        let remote_point = XPublicKey::from(*remote.as_bytes());
        let dh = self.secret.diffie_hellman(&remote_point);

        let hk = Hkdf::<Sha256>::new(None, dh.as_bytes());
        let mut key_bytes = [0u8; 32];
        hk.expand(SHARED_KEY_INFO, &mut key_bytes)
            .expect("32 bytes is a valid HKDF-SHA256 output length");

        SymmetricCryptoApi { key_bytes }
    }

    /// Convenience: derives the shared key for `remote` and installs it
    /// directly as a fresh session.
    pub fn encrypt_decrypt_for(&self, remote: PublicKey) -> SymmetricSession {
        self.shared_key(remote).into_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_key_is_symmetric_between_peers() {
        let alice = CryptoApi::generate();
        let bob = CryptoApi::generate();

        let alice_view = alice.shared_key(bob.public_key());
        let bob_view = bob.shared_key(alice.public_key());

        assert_eq!(alice_view.key_bytes(), bob_view.key_bytes());
    }

    #[test]
    fn session_round_trip_across_two_parties() {
        let alice = CryptoApi::generate();
        let bob = CryptoApi::generate();

        let mut alice_session = alice.encrypt_decrypt_for(bob.public_key());
        let mut bob_session = bob.encrypt_decrypt_for(alice.public_key());

        let ct = alice_session
            .encrypt_and_embed_nonce(b"hello bob")
            .expect("encrypt");
        let pt = bob_session
            .decrypt_with_embedded_nonce(&ct)
            .expect("decrypt");
        assert_eq!(pt, b"hello bob");
        assert_eq!(alice_session.outgoing_frame_count(), 1);
        assert_eq!(bob_session.incoming_frame_count(), 1);
    }

    #[test]
    fn frame_counts_track_number_of_frames() {
        let alice = CryptoApi::generate();
        let bob = CryptoApi::generate();
        let mut alice_session = alice.encrypt_decrypt_for(bob.public_key());
        let mut bob_session = bob.encrypt_decrypt_for(alice.public_key());

        for _ in 0..5 {
            let ct = alice_session.encrypt_and_embed_nonce(b"x").unwrap();
            bob_session.decrypt_with_embedded_nonce(&ct).unwrap();
        }
        assert_eq!(alice_session.outgoing_frame_count(), 5);
        assert_eq!(bob_session.incoming_frame_count(), 5);
    }
}
