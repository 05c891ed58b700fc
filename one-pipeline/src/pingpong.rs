//! Two cooperating watchdogs for connection liveness. Ping and pong frames
//! never surface to the application: both are consumed by this plugin.

use crate::event::{IncomingEvent, OutgoingEvent, Payload};
use crate::plugin::Plugin;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const COMM_PING: &str = "comm_ping";
const COMM_PONG: &str = "comm_pong";

#[derive(Serialize, Deserialize)]
struct CommandFrame<'a> {
    command: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub enum Role {
    /// Holds a send-timer (period `p`) and a timeout-timer (period `p + rtt`).
    Active { period: Duration, rtt: Duration },
    /// Holds one timeout-timer of period `p + 2*rtt`.
    Passive { period: Duration, rtt: Duration },
}

pub struct PingPongPlugin {
    role: Role,
    last_incoming: Instant,
    last_send: Instant,
    pending: Vec<OutgoingEvent>,
}

impl PingPongPlugin {
    pub fn new(role: Role) -> Self {
        let now = Instant::now();
        Self {
            role,
            last_incoming: now,
            last_send: now,
            pending: Vec::new(),
        }
    }

    fn timeout_reason() -> String {
        "ping/pong: connection timed out".to_string()
    }

    fn command_event(command: &str) -> OutgoingEvent {
        let json = serde_json::to_string(&CommandFrame { command })
            .expect("command frame always serializes");
        OutgoingEvent::Message(Payload::Text(json))
    }
}

fn command_of(payload: &Payload) -> Option<String> {
    let value = payload.as_json()?;
    value.get("command")?.as_str().map(str::to_owned)
}

impl Plugin for PingPongPlugin {
    fn name(&self) -> &'static str {
        "ping-pong"
    }

    fn transform_incoming(&mut self, event: IncomingEvent) -> Option<IncomingEvent> {
        if let IncomingEvent::Message(payload) = &event {
            let now = Instant::now();
            self.last_incoming = now;
            self.last_send = now;
            match command_of(payload).as_deref() {
                Some(COMM_PING) => {
                    if let Role::Passive { .. } = self.role {
                        self.pending.push(Self::command_event(COMM_PONG));
                    }
                    return None;
                }
                Some(COMM_PONG) => return None,
                _ => {}
            }
        }
        Some(event)
    }

    fn transform_outgoing(&mut self, event: OutgoingEvent) -> Option<OutgoingEvent> {
        Some(event)
    }

    fn on_tick(&mut self) -> Vec<OutgoingEvent> {
        let mut due = std::mem::take(&mut self.pending);
        if let Role::Active { period, .. } = self.role {
            if self.last_send.elapsed() >= period {
                self.last_send = Instant::now();
                due.push(Self::command_event(COMM_PING));
            }
        }
        due
    }

    fn on_tick_close(&mut self) -> Option<String> {
        let timed_out = match self.role {
            Role::Active { period, rtt } => self.last_incoming.elapsed() >= period + rtt,
            Role::Passive { period, rtt } => self.last_incoming.elapsed() >= period + rtt * 2,
        };
        if timed_out {
            Some(Self::timeout_reason())
        } else {
            None
        }
    }
}
