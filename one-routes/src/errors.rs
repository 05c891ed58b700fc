use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no group matches this connection")]
    NoGroup,
    #[error("route failed to start: {0}")]
    RouteStartFailure(String),
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("handshake: {0}")]
    Handshake(#[from] one_handshake::Error),
    #[error("pipeline: {0}")]
    Pipeline(#[from] one_pipeline::Error),
}

impl Error {
    pub fn route_start_failure(msg: impl Into<String>) -> Self {
        Self::RouteStartFailure(msg.into())
    }
}
