//! Per-(local key, remote key, group name) state machine: the active
//! connection, the known routes, and the duplicate-suppression and
//! reconnect-backoff policy that govern it.

use crate::backoff::ReconnectPolicy;
use crate::route::{OpenedConnection, RouteKind};
use one_core::RouteId;
use one_pipeline::{ConnectionHandle, PromiseHandle, StatisticsHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Idle,
    Active,
    Reconnecting,
    Stopped,
}

/// A byte-counter snapshot appended when an active connection closes.
#[derive(Debug, Clone)]
pub struct LoggedStatistics {
    pub route_id: RouteId,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub closed_reason: String,
}

pub struct RouteEntry {
    pub id: RouteId,
    pub kind: RouteKind,
    pub disabled: bool,
}

struct ActiveConnection {
    route_id: RouteId,
    handle: ConnectionHandle,
    statistics: StatisticsHandle,
    opened_at: Instant,
}

/// The parts of an `OpenedConnection` the caller still needs once the group
/// has accepted it: the handle to drive it, the feed of events its own
/// plugins didn't consume, the promise handle for request/reply use, and the
/// statistics handle for the byte counters. The manager broadcasts clones of
/// `handle`/`promise`/`statistics` as a `ConnectionEvent::Opened` and keeps
/// `incoming` to itself to watch for the connection's close.
pub struct AcceptedConnection {
    pub handle: ConnectionHandle,
    pub incoming: mpsc::UnboundedReceiver<one_pipeline::IncomingEvent>,
    pub promise: PromiseHandle,
    pub statistics: StatisticsHandle,
    pub route_id: RouteId,
}

pub enum OfferOutcome {
    Accept(AcceptedConnection),
    Rejected { reason: &'static str },
}

/// The aggregate state for one (localKey, remoteKey, groupName) triple, or
/// for the catch-all form where the remote key is unconstrained.
pub struct RoutesGroup {
    pub group_name: String,
    pub is_catch_all: bool,
    pub drop_duplicates: bool,
    pub duplicate_window: Duration,
    pub policy: ReconnectPolicy,
    state: GroupState,
    active: Option<ActiveConnection>,
    window_armed: bool,
    consecutive_failures: u32,
    routes: Vec<RouteEntry>,
    pub statistics_log: Vec<LoggedStatistics>,
}

impl RoutesGroup {
    pub fn new(
        group_name: impl Into<String>,
        is_catch_all: bool,
        drop_duplicates: bool,
        duplicate_window: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            is_catch_all,
            drop_duplicates,
            duplicate_window,
            policy,
            state: GroupState::Idle,
            active: None,
            window_armed: true,
            consecutive_failures: 0,
            routes: Vec::new(),
            statistics_log: Vec::new(),
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn active_route(&self) -> Option<&RouteId> {
        self.active.as_ref().map(|a| &a.route_id)
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn register_route(&mut self, id: RouteId, kind: RouteKind) {
        if !self.routes.iter().any(|r| r.id == id) {
            self.routes.push(RouteEntry {
                id,
                kind,
                disabled: false,
            });
        }
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// All outgoing routes registered with this group, administratively
    /// disabled or not.
    pub fn outgoing_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter().filter(|r| r.kind == RouteKind::Outgoing)
    }

    /// Outgoing routes the manager is allowed to start or restart right now.
    /// A route with `disabled` set has been forced down administratively and
    /// is skipped until `enable_route` clears the flag.
    pub fn startable_outgoing_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.outgoing_routes().filter(|r| !r.disabled)
    }

    /// Forces `id` down: the manager will stop starting it until
    /// `enable_route` is called, though an already-running connection on it
    /// is left alone.
    pub fn disable_route(&mut self, id: &RouteId) -> bool {
        match self.routes.iter_mut().find(|r| &r.id == id) {
            Some(entry) => {
                entry.disabled = true;
                true
            }
            None => false,
        }
    }

    pub fn enable_route(&mut self, id: &RouteId) -> bool {
        match self.routes.iter_mut().find(|r| &r.id == id) {
            Some(entry) => {
                entry.disabled = false;
                true
            }
            None => false,
        }
    }

    /// Decide what to do with a newly opened connection for `route_id`.
    ///
    /// The duplicate-suppression window arms only on the first opening; once
    /// a replacement happens (or the window lapses), subsequent openings are
    /// unconditional replacements. A rejected connection is closed here;
    /// a replaced-out connection is closed here too, so the caller never has
    /// to juggle the connection it didn't get back.
    pub fn offer(&mut self, route_id: RouteId, connection: OpenedConnection) -> OfferOutcome {
        let within_window = self.window_armed
            && self
                .active
                .as_ref()
                .map(|a| a.opened_at.elapsed() < self.duplicate_window)
                .unwrap_or(false);

        if self.active.is_some() && self.drop_duplicates && within_window {
            let _ = connection.handle.close("duplicate");
            return OfferOutcome::Rejected { reason: "duplicate" };
        }

        if let Some(previous) = self.active.take() {
            let _ = previous.handle.close("replaced");
        }

        self.window_armed = false;
        self.state = GroupState::Active;
        self.consecutive_failures = 0;
        self.active = Some(ActiveConnection {
            route_id: route_id.clone(),
            handle: connection.handle.clone(),
            statistics: connection.statistics.clone(),
            opened_at: Instant::now(),
        });

        OfferOutcome::Accept(AcceptedConnection {
            handle: connection.handle,
            incoming: connection.incoming,
            promise: connection.promise,
            statistics: connection.statistics,
            route_id,
        })
    }

    /// The active connection closed. Records the statistics snapshot,
    /// clears the active slot, and leaves the group in `Reconnecting` when
    /// it still has outgoing routes to restart, `Idle` otherwise.
    pub fn clear_active(&mut self, closed_reason: impl Into<String>) {
        if let Some(active) = self.active.take() {
            self.statistics_log.push(LoggedStatistics {
                route_id: active.route_id,
                bytes_sent: active.statistics.bytes_sent(),
                bytes_received: active.statistics.bytes_received(),
                closed_reason: closed_reason.into(),
            });
        }
        self.state = if self.outgoing_routes().next().is_some() {
            GroupState::Reconnecting
        } else {
            GroupState::Idle
        };
    }

    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.consecutive_failures);
        self.consecutive_failures += 1;
        delay
    }

    pub fn mark_reconnected(&mut self) {
        self.consecutive_failures = 0;
        if self.state == GroupState::Reconnecting {
            self.state = GroupState::Idle;
        }
    }

    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.handle.close("group stopped");
        }
        self.state = GroupState::Stopped;
    }
}
