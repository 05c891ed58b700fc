//! Wire messages exchanged during the handshake and reused verbatim by the
//! rendezvous broker for the frames it forwards or terminates itself.

use one_core::PublicKey;
use serde::{Deserialize, Serialize};

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WireMessage {
    CommunicationRequest {
        #[serde(rename = "sourcePublicKey")]
        source_public_key: PublicKey,
        #[serde(rename = "targetPublicKey")]
        target_public_key: PublicKey,
    },
    CommunicationReady,
    Register {
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    AuthenticationRequest {
        #[serde(with = "hex_bytes")]
        challenge: Vec<u8>,
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    AuthenticationResponse {
        #[serde(with = "hex_bytes")]
        response: Vec<u8>,
    },
    AuthenticationSuccess,
    ConnectionHandover,
    Synchronisation {
        value: String,
    },
    CommPing,
    CommPong,
}

impl WireMessage {
    pub fn command(&self) -> &'static str {
        match self {
            WireMessage::CommunicationRequest { .. } => "communication_request",
            WireMessage::CommunicationReady => "communication_ready",
            WireMessage::Register { .. } => "register",
            WireMessage::AuthenticationRequest { .. } => "authentication_request",
            WireMessage::AuthenticationResponse { .. } => "authentication_response",
            WireMessage::AuthenticationSuccess => "authentication_success",
            WireMessage::ConnectionHandover => "connection_handover",
            WireMessage::Synchronisation { .. } => "synchronisation",
            WireMessage::CommPing => "comm_ping",
            WireMessage::CommPong => "comm_pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use one_core::PublicKey;

    #[test]
    fn communication_request_uses_literal_field_names() {
        let message = WireMessage::CommunicationRequest {
            source_public_key: PublicKey::from_bytes([1u8; 32]),
            target_public_key: PublicKey::from_bytes([2u8; 32]),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["command"], "communication_request");
        assert!(json["sourcePublicKey"].is_string());
        assert!(json["targetPublicKey"].is_string());
    }

    #[test]
    fn round_trips_through_json() {
        let message = WireMessage::AuthenticationRequest {
            challenge: vec![0xAB; 32],
            public_key: PublicKey::from_bytes([7u8; 32]),
        };
        let json = serde_json::to_string(&message).unwrap();
        let parsed: WireMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.command(), "authentication_request");
    }

    #[test]
    fn synchronisation_round_trips() {
        let message = WireMessage::Synchronisation {
            value: "sync-token".into(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"synchronisation\""));
        let parsed: WireMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WireMessage::Synchronisation { value } if value == "sync-token"));
    }
}
