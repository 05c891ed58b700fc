use crate::error::{Error, Result};
use crate::nonce::{NonceCounter, NONCE_LEN};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use once_cell::sync::OnceCell;
use zeroize::Zeroize;

/// A 32-byte symmetric key, zeroized on drop.
#[derive(Clone)]
pub struct AeadKey([u8; 32]);

impl AeadKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// One direction's symmetric session key plus its nonce counter. The
/// underlying cipher is built once and cached, matching the pre-computed
/// cipher pattern used elsewhere for AEAD suites in this workspace.
pub struct AeadCipher {
    key: AeadKey,
    cipher: OnceCell<XChaCha20Poly1305>,
}

impl AeadCipher {
    pub fn new(key: AeadKey) -> Self {
        Self {
            key,
            cipher: OnceCell::new(),
        }
    }

    fn cipher(&self) -> &XChaCha20Poly1305 {
        self.cipher
            .get_or_init(|| XChaCha20Poly1305::new(self.key.0.as_slice().into()))
    }

    /// Encrypts `plaintext` under the nonce for `counter`.
    pub fn seal(&self, counter: &mut NonceCounter, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = counter.next();
        let nonce = XNonce::from_slice(&nonce_bytes);
        self.cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::DecryptionFailure)
    }

    /// Decrypts `ciphertext` using the nonce for the counter value the peer
    /// claims this frame is. The caller advances its incoming counter only
    /// after successful authentication.
    pub fn open(&self, counter_value: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = NonceCounter::encode(counter_value);
        let nonce = XNonce::from_slice(&nonce_bytes);
        self.cipher()
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::DecryptionFailure)
    }
}

pub const NONCE_BYTES: usize = NONCE_LEN;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip() {
        let cipher = AeadCipher::new(AeadKey::from_bytes([9u8; 32]));
        let mut counter = NonceCounter::new();
        let ct = cipher.seal(&mut counter, b"hello substrate").expect("seal");
        let pt = cipher.open(1, &ct).expect("open");
        assert_eq!(pt, b"hello substrate");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = AeadCipher::new(AeadKey::from_bytes([3u8; 32]));
        let mut counter = NonceCounter::new();
        let mut ct = cipher.seal(&mut counter, b"message").expect("seal");
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(cipher.open(1, &ct), Err(Error::DecryptionFailure)));
    }

    #[test]
    fn wrong_counter_fails() {
        let cipher = AeadCipher::new(AeadKey::from_bytes([4u8; 32]));
        let mut counter = NonceCounter::new();
        let ct = cipher.seal(&mut counter, b"message").expect("seal");
        assert!(matches!(cipher.open(2, &ct), Err(Error::DecryptionFailure)));
    }

    proptest! {
        #[test]
        fn round_trip_arbitrary_plaintext(msg in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let cipher = AeadCipher::new(AeadKey::from_bytes([5u8; 32]));
            let mut counter = NonceCounter::new();
            let ct = cipher.seal(&mut counter, &msg).unwrap();
            let pt = cipher.open(1, &ct).unwrap();
            prop_assert_eq!(pt, msg);
        }
    }
}
