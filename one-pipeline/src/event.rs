//! Events flowing through the duplex plugin pipeline. Incoming events start
//! at the socket end and travel up through `transform_incoming`; outgoing
//! events start at the application end and travel down through
//! `transform_outgoing`.

use serde_json::Value;

/// Either a raw byte payload or a UTF-8 string payload, mirroring the dual
/// mode the encryption plugin normalises around its boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

impl Payload {
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Bytes(b) => b.clone(),
            Payload::Text(s) => s.clone().into_bytes(),
        }
    }

    pub fn as_json(&self) -> Option<Value> {
        match self {
            Payload::Text(s) => serde_json::from_str(s).ok(),
            Payload::Bytes(b) => serde_json::from_slice(b).ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub enum IncomingEvent {
    Opened,
    Message(Payload),
    Closed {
        reason: String,
        origin: CloseOrigin,
    },
}

#[derive(Debug, Clone)]
pub enum OutgoingEvent {
    Message(Payload),
    Close { reason: String },
}
