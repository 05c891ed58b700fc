use crate::event::{IncomingEvent, OutgoingEvent};

/// A single stage in the duplex event-transforming chain a `Connection` owns.
///
/// Incoming events travel from the socket upward through each plugin's
/// `transform_incoming`; returning `None` stops propagation (the `⊥` case).
/// Outgoing events travel from the application downward through
/// `transform_outgoing` in reverse plugin order.
///
/// Plugins may also originate events on their own schedule (a ping plugin's
/// send timer, an encryption plugin's handshake frames) via `on_tick`,
/// which the owning `Connection` polls periodically and feeds into the
/// outgoing chain starting just below the originating plugin.
pub trait Plugin: Send {
    fn name(&self) -> &'static str;

    fn transform_incoming(&mut self, event: IncomingEvent) -> Option<IncomingEvent> {
        Some(event)
    }

    fn transform_outgoing(&mut self, event: OutgoingEvent) -> Option<OutgoingEvent> {
        Some(event)
    }

    /// Polled by the connection's run loop on a fixed tick. Returns any
    /// events this plugin wants to originate this tick.
    fn on_tick(&mut self) -> Vec<OutgoingEvent> {
        Vec::new()
    }

    /// Polled alongside `on_tick`; `Some(reason)` terminates the connection.
    fn on_tick_close(&mut self) -> Option<String> {
        None
    }
}
