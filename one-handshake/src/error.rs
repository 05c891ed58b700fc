use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("handshake step timed out")]
    Timeout,
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("crypto: {0}")]
    Crypto(#[from] one_crypto::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
