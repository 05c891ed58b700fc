#![forbid(unsafe_code)]

pub mod error;
pub mod registry;
pub mod server;

pub use error::{Error, Result};
pub use registry::ListenerRegistry;
pub use server::{BrokerConfig, BrokerServer};
