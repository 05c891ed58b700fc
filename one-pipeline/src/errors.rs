pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },
    #[error("timeout waiting for a message")]
    Timeout,
    #[error("promise plugin queue overflow (bound {bound})")]
    QueueOverflow { bound: usize },
    #[error("unexpected message type: expected `{expected}`, got `{actual}`")]
    UnexpectedMessageType { expected: String, actual: String },
    #[error("decryption failure")]
    DecryptionFailure,
    #[error("crypto: {0}")]
    Crypto(#[from] one_crypto::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}
