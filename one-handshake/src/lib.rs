#![forbid(unsafe_code)]

pub mod error;
pub mod messages;
pub mod protocol;

pub use error::{Error, Result};
pub use messages::WireMessage;
pub use protocol::{acceptor_handshake, dialer_handshake, HandshakeOutcome};
