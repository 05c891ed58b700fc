//! Tracks per-connection byte counters, later appended to a routes-group's
//! `connectionStatisticsLog` when the connection closes.

use crate::event::{IncomingEvent, OutgoingEvent, Payload};
use crate::plugin::Plugin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

#[derive(Clone, Default)]
pub struct StatisticsHandle {
    counters: Arc<Counters>,
}

impl StatisticsHandle {
    pub fn bytes_sent(&self) -> u64 {
        self.counters.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.counters.bytes_received.load(Ordering::Relaxed)
    }
}

pub struct StatisticsPlugin {
    handle: StatisticsHandle,
}

impl StatisticsPlugin {
    pub fn new() -> (Self, StatisticsHandle) {
        let handle = StatisticsHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

fn payload_len(payload: &Payload) -> u64 {
    match payload {
        Payload::Bytes(b) => b.len() as u64,
        Payload::Text(s) => s.len() as u64,
    }
}

impl Plugin for StatisticsPlugin {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn transform_incoming(&mut self, event: IncomingEvent) -> Option<IncomingEvent> {
        if let IncomingEvent::Message(payload) = &event {
            self.handle
                .counters
                .bytes_received
                .fetch_add(payload_len(payload), Ordering::Relaxed);
        }
        Some(event)
    }

    fn transform_outgoing(&mut self, event: OutgoingEvent) -> Option<OutgoingEvent> {
        if let OutgoingEvent::Message(payload) = &event {
            self.handle
                .counters
                .bytes_sent
                .fetch_add(payload_len(payload), Ordering::Relaxed);
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_both_directions() {
        let (mut plugin, handle) = StatisticsPlugin::new();
        plugin.transform_incoming(IncomingEvent::Message(Payload::Bytes(vec![0u8; 10])));
        plugin.transform_outgoing(OutgoingEvent::Message(Payload::Text("hello".into())));
        assert_eq!(handle.bytes_received(), 10);
        assert_eq!(handle.bytes_sent(), 5);
    }
}
