use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("decryption failure: ciphertext failed authentication")]
    DecryptionFailure,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("core: {0}")]
    Core(#[from] one_core::Error),
}
