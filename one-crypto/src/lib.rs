#![forbid(unsafe_code)]

//! Curve25519-style box scheme crypto for the connection substrate: per-peer
//! key agreement, XChaCha20-Poly1305 authenticated encryption, and the
//! 24-byte counter nonce shared by every encrypted connection.

pub mod aead;
pub mod crypto_api;
pub mod error;
pub mod nonce;

pub use crypto_api::{CryptoApi, SymmetricCryptoApi, SymmetricSession};
pub use error::{Error, Result};
pub use nonce::NonceCounter;
