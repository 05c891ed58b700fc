#![forbid(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod event;
pub mod framing;
pub mod pingpong;
pub mod plugin;
pub mod promise;
pub mod statistics;

pub use connection::{Connection, ConnectionHandle, Transport};
pub use errors::{Error, Result};
pub use event::{CloseOrigin, IncomingEvent, OutgoingEvent, Payload};
pub use framing::FramingEncryptionPlugin;
pub use pingpong::{PingPongPlugin, Role};
pub use plugin::Plugin;
pub use promise::{PromiseHandle, PromisePlugin};
pub use statistics::{StatisticsHandle, StatisticsPlugin};
