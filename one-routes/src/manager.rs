//! Owns the `ConnectionRoutesGroupMap` and every route, and is the single
//! consumer of the `RouteEvent`s every route produces. This is where
//! duplicate suppression, outgoing-route enable/disable, and reconnect
//! backoff actually happen — `RoutesGroup` only decides, the manager acts.

use crate::backoff::ReconnectPolicy;
use crate::errors::{Error, Result};
use crate::group::{GroupState, OfferOutcome, RoutesGroup};
use crate::map::{ConnectionRoutesGroupMap, GroupLookup, RemoteKey};
use crate::route::{ConnectionRoute, RouteEvent};
use one_core::{PublicKey, RouteId};
use one_pipeline::{ConnectionHandle, IncomingEvent, PromiseHandle, StatisticsHandle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

const CONNECTION_EVENT_CHANNEL_CAPACITY: usize = 256;

/// What upper layers learn about a routes group's connections: when one
/// opens (with the handles needed to actually use it), when it closes and
/// why, and when the group's own state transitions as a result.
#[derive(Clone)]
pub enum ConnectionEvent {
    Opened {
        remote_key: PublicKey,
        group_name: String,
        route_id: RouteId,
        handle: ConnectionHandle,
        promise: PromiseHandle,
        statistics: StatisticsHandle,
    },
    Closed {
        remote_key: PublicKey,
        group_name: String,
        route_id: RouteId,
        reason: String,
    },
    StateChanged {
        remote_key: PublicKey,
        group_name: String,
        state: GroupState,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    pub drop_duplicates: bool,
    pub duplicate_window: Duration,
    pub policy: ReconnectPolicy,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            drop_duplicates: false,
            duplicate_window: Duration::from_secs(2),
            policy: ReconnectPolicy::default_exponential(),
        }
    }
}

/// Decides whether a connection the catch-all caught should become a
/// permanent group. Called synchronously from the manager's event loop.
pub type UnknownConnectionHandler = Arc<dyn Fn(PublicKey, &str) -> bool + Send + Sync>;

struct Shared {
    local_key: PublicKey,
    map: ConnectionRoutesGroupMap,
    routes: AsyncMutex<HashMap<RouteId, Box<dyn ConnectionRoute>>>,
    events_tx: mpsc::UnboundedSender<RouteEvent>,
    on_unknown: std::sync::Mutex<Option<UnknownConnectionHandler>>,
    connection_events: broadcast::Sender<ConnectionEvent>,
}

pub struct RoutesGroupManager {
    shared: Arc<Shared>,
    events_rx: mpsc::UnboundedReceiver<RouteEvent>,
}

impl RoutesGroupManager {
    pub fn new(local_key: PublicKey) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connection_events, _) = broadcast::channel(CONNECTION_EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                local_key,
                map: ConnectionRoutesGroupMap::new(),
                routes: AsyncMutex::new(HashMap::new()),
                events_tx,
                on_unknown: std::sync::Mutex::new(None),
                connection_events,
            }),
            events_rx,
        }
    }

    /// The sender routes report their opened connections through. Exposed
    /// so routes constructed outside `add_route` (e.g. in tests) can still
    /// feed this manager.
    pub fn events_sender(&self) -> mpsc::UnboundedSender<RouteEvent> {
        self.shared.events_tx.clone()
    }

    pub fn set_unknown_connection_handler(&self, f: impl Fn(PublicKey, &str) -> bool + Send + Sync + 'static) {
        *self.shared.on_unknown.lock().expect("on_unknown mutex poisoned") = Some(Arc::new(f));
    }

    /// Forces a route down administratively: the group stops offering it to
    /// restart-after-close, and any currently running task for it is
    /// stopped. The route stays registered and can be brought back with
    /// `enable_route`.
    pub async fn disable_route(&self, remote: RemoteKey, group_name: &str, route_id: &RouteId) -> Result<()> {
        let found = self
            .shared
            .map
            .with_group_by_key(self.shared.local_key, remote, group_name, |group| group.disable_route(route_id))
            .unwrap_or(false);
        if !found {
            return Err(Error::NoGroup);
        }
        let mut routes = self.shared.routes.lock().await;
        if let Some(route) = routes.get_mut(route_id) {
            route.stop().await;
        }
        Ok(())
    }

    /// Clears a route's administrative disable and, if it isn't already
    /// running, starts it immediately rather than waiting for the next
    /// reconnect cycle to notice.
    pub async fn enable_route(&self, remote: RemoteKey, group_name: &str, route_id: &RouteId) -> Result<()> {
        let found = self
            .shared
            .map
            .with_group_by_key(self.shared.local_key, remote, group_name, |group| group.enable_route(route_id))
            .unwrap_or(false);
        if !found {
            return Err(Error::NoGroup);
        }
        let mut routes = self.shared.routes.lock().await;
        if let Some(route) = routes.get_mut(route_id) {
            if !route.active() {
                if let Err(err) = route.start(self.shared.events_tx.clone()).await {
                    warn!(%route_id, error = %err, "failed to start re-enabled route");
                }
            }
        }
        Ok(())
    }

    pub fn add_group(&self, remote: RemoteKey, group_name: impl Into<String>, config: GroupConfig) {
        let group_name = group_name.into();
        let is_catch_all = matches!(remote, RemoteKey::Any);
        let group = RoutesGroup::new(group_name.clone(), is_catch_all, config.drop_duplicates, config.duplicate_window, config.policy);
        self.shared.map.insert(self.shared.local_key, remote, group_name, group);
    }

    /// Registers `route` with the named group and starts it.
    pub async fn add_route(&self, remote: RemoteKey, group_name: &str, mut route: Box<dyn ConnectionRoute>) -> Result<()> {
        let id = route.id().clone();
        let kind = route.kind();
        self.shared
            .map
            .with_group_by_key(self.shared.local_key, remote, group_name, |group| {
                group.register_route(id.clone(), kind)
            })
            .ok_or(Error::NoGroup)?;

        route.start(self.shared.events_tx.clone()).await?;
        self.shared.routes.lock().await.insert(id, route);
        Ok(())
    }

    /// Runs until the event channel closes (every route sender dropped).
    pub async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            let shared = self.shared.clone();
            tokio::spawn(async move { handle_event(shared, event).await });
        }
    }

    /// Subscribes to connection-level events: openings (with the handles to
    /// actually drive the connection), closes, and group state transitions.
    /// Each subscriber gets its own lagging-tolerant receiver; a subscriber
    /// that falls behind misses the oldest events rather than blocking the
    /// manager.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.connection_events.subscribe()
    }

    pub async fn stop_all(&self) {
        let mut routes = self.shared.routes.lock().await;
        for route in routes.values_mut() {
            route.stop().await;
        }
        for (local, remote, group_name) in self.shared.map.keys() {
            self.shared.map.with_group_by_key(local, remote, &group_name, |g| g.stop());
        }
    }
}

async fn handle_event(shared: Arc<Shared>, event: RouteEvent) {
    let RouteEvent {
        connection,
        local_key,
        remote_key,
        group_name,
        route_id,
    } = event;

    match shared.map.lookup(local_key, remote_key, &group_name) {
        GroupLookup::None => {
            debug!(%remote_key, group_name, "no group matches this connection");
            let _ = connection.handle.close("no group matches this connection");
        }
        GroupLookup::Specific => {
            let outcome = shared
                .map
                .with_group_by_key(local_key, RemoteKey::Specific(remote_key), &group_name, |group| {
                    group.offer(route_id, connection)
                })
                .expect("lookup just confirmed this group exists");
            apply_offer(shared, local_key, RemoteKey::Specific(remote_key), group_name, outcome);
        }
        GroupLookup::CatchAll => {
            let promote = shared
                .on_unknown
                .lock()
                .expect("on_unknown mutex poisoned")
                .as_ref()
                .map(|f| f(remote_key, &group_name))
                .unwrap_or(false);

            if !promote {
                info!(%remote_key, group_name, "unknown peer not promoted, closing");
                let _ = connection.handle.close("unknown peer rejected");
                return;
            }

            let config = shared
                .map
                .with_group_by_key(local_key, RemoteKey::Any, &group_name, |g| {
                    (g.drop_duplicates, g.duplicate_window, g.policy)
                })
                .expect("lookup just confirmed the catch-all exists");

            let mut group = RoutesGroup::new(group_name.clone(), false, config.0, config.1, config.2);
            let outcome = group.offer(route_id, connection);
            shared
                .map
                .promote_from_catch_all(local_key, remote_key, &group_name, group);
            info!(%remote_key, group_name, "promoted catch-all connection to a permanent group");
            apply_offer(shared, local_key, RemoteKey::Specific(remote_key), group_name, outcome);
        }
    }
}

fn remote_public_key(remote: &RemoteKey) -> PublicKey {
    match remote {
        RemoteKey::Specific(key) => *key,
        RemoteKey::Any => unreachable!("apply_offer/watch_for_close only run against a promoted, specific group"),
    }
}

fn apply_offer(shared: Arc<Shared>, local_key: PublicKey, remote: RemoteKey, group_name: String, outcome: OfferOutcome) {
    let accepted = match outcome {
        OfferOutcome::Rejected { reason } => {
            debug!(reason, group_name, "connection rejected");
            return;
        }
        OfferOutcome::Accept(accepted) => accepted,
    };
    let remote_key = remote_public_key(&remote);

    let outgoing_ids: Vec<RouteId> = shared
        .map
        .with_group_by_key(local_key, remote, &group_name, |group| {
            group.outgoing_routes().map(|r| r.id.clone()).collect()
        })
        .unwrap_or_default();

    tokio::spawn({
        let shared = shared.clone();
        let outgoing_ids = outgoing_ids.clone();
        async move {
            let mut routes = shared.routes.lock().await;
            for id in &outgoing_ids {
                if let Some(route) = routes.get_mut(id) {
                    route.stop().await;
                }
            }
        }
    });

    let _ = shared.connection_events.send(ConnectionEvent::Opened {
        remote_key,
        group_name: group_name.clone(),
        route_id: accepted.route_id.clone(),
        handle: accepted.handle,
        promise: accepted.promise,
        statistics: accepted.statistics,
    });
    let _ = shared.connection_events.send(ConnectionEvent::StateChanged {
        remote_key,
        group_name: group_name.clone(),
        state: GroupState::Active,
    });

    tokio::spawn(watch_for_close(shared, local_key, remote, group_name, accepted.incoming));
}

async fn watch_for_close(
    shared: Arc<Shared>,
    local_key: PublicKey,
    remote: RemoteKey,
    group_name: String,
    mut incoming: mpsc::UnboundedReceiver<IncomingEvent>,
) {
    let reason = loop {
        match incoming.recv().await {
            Some(IncomingEvent::Closed { reason, .. }) => break reason,
            Some(_) => continue,
            None => break "connection dropped".to_string(),
        }
    };

    let remote_key = remote_public_key(&remote);
    let outcome = shared
        .map
        .with_group_by_key(local_key, remote, &group_name, |group| {
            let route_id = group.active_route().cloned();
            group.clear_active(reason.clone());
            (
                route_id,
                group.state(),
                group.outgoing_routes().map(|r| r.id.clone()).collect::<Vec<_>>(),
            )
        });
    let Some((route_id, state, outgoing_ids)) = outcome else { return };

    let _ = shared.connection_events.send(ConnectionEvent::Closed {
        remote_key,
        group_name: group_name.clone(),
        route_id: route_id.unwrap_or_else(|| RouteId("unknown".into())),
        reason,
    });
    let _ = shared.connection_events.send(ConnectionEvent::StateChanged {
        remote_key,
        group_name: group_name.clone(),
        state,
    });

    if state != GroupState::Reconnecting || outgoing_ids.is_empty() {
        return;
    }

    let delay = shared
        .map
        .with_group_by_key(local_key, remote, &group_name, |group| group.next_backoff())
        .unwrap_or(Duration::from_secs(1));
    tokio::time::sleep(delay).await;

    let startable: Vec<RouteId> = shared
        .map
        .with_group_by_key(local_key, remote, &group_name, |group| {
            group.startable_outgoing_routes().map(|r| r.id.clone()).collect()
        })
        .unwrap_or_default();

    let mut routes = shared.routes.lock().await;
    for id in &outgoing_ids {
        if !startable.contains(id) {
            debug!(%id, group_name, "skipping restart of an administratively disabled route");
            continue;
        }
        if let Some(route) = routes.get_mut(id) {
            if let Err(err) = route.start(shared.events_tx.clone()).await {
                warn!(%id, error = %err, "failed to restart outgoing route after backoff");
            }
        }
    }
    drop(routes);
    shared.map.with_group_by_key(local_key, remote, &group_name, |group| group.mark_reconnected());
}
