#![forbid(unsafe_code)]

//! Core types shared across the connection substrate: key material,
//! identity files, and the workspace's common error domain.

pub mod error;
pub mod identity;
pub mod types;

pub use error::{Error, Result};
pub use identity::{Identity, SecretIdentity};
pub use types::{ConnectionId, PublicKey, RouteId, SecretKey};
