#![forbid(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod group;
pub mod manager;
pub mod map;
pub mod route;

pub use backoff::ReconnectPolicy;
pub use errors::{Error, Result};
pub use group::{AcceptedConnection, GroupState, LoggedStatistics, OfferOutcome, RoutesGroup};
pub use manager::{ConnectionEvent, GroupConfig, RoutesGroupManager, UnknownConnectionHandler};
pub use map::{ConnectionRoutesGroupMap, GroupLookup, RemoteKey};
pub use route::{ConnectionRoute, IncomingDirect, IncomingViaBroker, OpenedConnection, OutgoingDial, RouteEvent, RouteKind};
