//! Identity files as consumed by route constructors (see external interfaces).
//!
//! Both the public and secret variants are plaintext JSON; the route
//! constructor is their only authoritative consumer. Reading a public file
//! where a secret file is expected, or vice versa, fails at parse time
//! because the two are distinct types with disjoint required fields.

use crate::error::{Error, Result};
use crate::types::PublicKey;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The public half of an identity file: `*.id.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub person_email: String,
    pub instance_name: String,
    pub person_public_key: PublicKey,
    pub instance_public_key: PublicKey,
    pub person_public_sign_key: PublicKey,
    pub instance_public_sign_key: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The secret half of an identity file: `*_secret.id.json`. Carries the same
/// public fields plus the matching secret keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretIdentity {
    pub person_email: String,
    pub instance_name: String,
    pub person_public_key: PublicKey,
    pub instance_public_key: PublicKey,
    pub person_public_sign_key: PublicKey,
    pub instance_public_sign_key: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub person_secret_key: crate::types::SecretKey,
    pub instance_secret_key: crate::types::SecretKey,
    pub person_secret_sign_key: crate::types::SecretKey,
    pub instance_secret_sign_key: crate::types::SecretKey,
}

impl Identity {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let identity: Self = serde_json::from_str(&data)?;
        Ok(identity)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

impl SecretIdentity {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let identity: Self = serde_json::from_str(&data)?;
        Ok(identity)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn public(&self) -> Identity {
        Identity {
            person_email: self.person_email.clone(),
            instance_name: self.instance_name.clone(),
            person_public_key: self.person_public_key,
            instance_public_key: self.instance_public_key,
            person_public_sign_key: self.person_public_sign_key,
            instance_public_sign_key: self.instance_public_sign_key,
            url: self.url.clone(),
        }
    }
}

/// Writes a fresh identity pair (public + secret) from generated key material.
/// Mirrors the reference `writeNewIdentity`/`readIdentity` round trip: writing
/// then reading back yields byte-equal records.
pub fn write_new_identity(
    public_path: impl AsRef<Path>,
    secret_path: impl AsRef<Path>,
    identity: &SecretIdentity,
) -> Result<()> {
    identity.public().write(public_path)?;
    identity.write(secret_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SecretKey;

    fn sample() -> SecretIdentity {
        SecretIdentity {
            person_email: "alice@example.invalid".into(),
            instance_name: "alice-laptop".into(),
            person_public_key: PublicKey::from_bytes([1u8; 32]),
            instance_public_key: PublicKey::from_bytes([2u8; 32]),
            person_public_sign_key: PublicKey::from_bytes([3u8; 32]),
            instance_public_sign_key: PublicKey::from_bytes([4u8; 32]),
            url: Some("wss://example.invalid".into()),
            person_secret_key: SecretKey::from_bytes([5u8; 32]),
            instance_secret_key: SecretKey::from_bytes([6u8; 32]),
            person_secret_sign_key: SecretKey::from_bytes([7u8; 32]),
            instance_secret_sign_key: SecretKey::from_bytes([8u8; 32]),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let public_path = dir.path().join("alice.id.json");
        let secret_path = dir.path().join("alice_secret.id.json");
        let identity = sample();

        write_new_identity(&public_path, &secret_path, &identity).expect("write");

        let read_public = Identity::read(&public_path).expect("read public");
        let read_secret = SecretIdentity::read(&secret_path).expect("read secret");

        assert_eq!(read_public.person_public_key, identity.person_public_key);
        assert_eq!(read_secret.person_secret_key, identity.person_secret_key);
    }

    #[test]
    fn reading_public_as_secret_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let public_path = dir.path().join("alice.id.json");
        sample().public().write(&public_path).expect("write");

        let err = SecretIdentity::read(&public_path).unwrap_err();
        assert!(matches!(err, Error::Serde(_)));
    }
}
