use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const KEY_LEN: usize = 32;

/// A 32-byte public key, suitable for a curve-25519-style box scheme.
///
/// Serializes as lowercase hex so it can be used directly as a map key or a
/// wire-message field.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

/// A 32-byte secret key. Never printed or logged; `Debug` redacts the bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

macro_rules! fixed_key {
    ($ty:ident) => {
        impl $ty {
            pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                let bytes = hex::decode(s)?;
                if bytes.len() != KEY_LEN {
                    return Err(Error::InvalidKeyLength {
                        expected: KEY_LEN,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; KEY_LEN];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl FromStr for $ty {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_key!(PublicKey);
fixed_key!(SecretKey);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Stable identifier for one `ConnectionRoute`, derived from its variant and
/// parameters so routes can be compared and deduplicated inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteId(pub String);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RouteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Monotonically increasing identifier assigned to every `Connection` for
/// tracing, independent of which route produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_hex_round_trip() {
        let key = PublicKey::from_bytes([7u8; KEY_LEN]);
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        let parsed = PublicKey::from_hex(&hex).expect("parse");
        assert_eq!(parsed, key);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = PublicKey::from_hex("aabb").unwrap_err();
        assert!(matches!(err, Error::InvalidKeyLength { .. }));
    }

    #[test]
    fn serializes_as_hex_string() {
        let key = PublicKey::from_bytes([0xab; KEY_LEN]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_hex()));
    }
}
