//! Overlays a request/reply discipline on the frame stream. Each `wait_for_*`
//! call enqueues a pending resolver; the plugin dispatches the next incoming
//! frame to the head of the queue.

use crate::errors::{Error, Result};
use crate::event::{IncomingEvent, OutgoingEvent, Payload};
use crate::plugin::Plugin;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

enum Waiter {
    Any(oneshot::Sender<Result<Payload>>),
    Binary(oneshot::Sender<Result<Vec<u8>>>),
    Json(oneshot::Sender<Result<Value>>),
    JsonTyped {
        expected: String,
        tx: oneshot::Sender<Result<Value>>,
    },
}

#[derive(Default)]
struct Inner {
    waiters: VecDeque<Waiter>,
    closed: Option<String>,
}

fn fail_waiter(waiter: Waiter, err: Error) {
    match waiter {
        Waiter::Any(tx) => {
            let _ = tx.send(Err(err));
        }
        Waiter::Binary(tx) => {
            let _ = tx.send(Err(err));
        }
        Waiter::Json(tx) => {
            let _ = tx.send(Err(err));
        }
        Waiter::JsonTyped { tx, .. } => {
            let _ = tx.send(Err(err));
        }
    }
}

fn resolve_waiter(waiter: Waiter, payload: Payload) {
    match waiter {
        Waiter::Any(tx) => {
            let _ = tx.send(Ok(payload));
        }
        Waiter::Binary(tx) => {
            let _ = tx.send(Ok(payload.as_bytes()));
        }
        Waiter::Json(tx) => {
            let result = payload
                .as_json()
                .ok_or_else(|| Error::protocol("message was not valid JSON"));
            let _ = tx.send(result);
        }
        Waiter::JsonTyped { expected, tx } => {
            let result = payload
                .as_json()
                .ok_or_else(|| Error::protocol("message was not valid JSON"))
                .and_then(|json| {
                    let actual = json
                        .get("command")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    if actual == expected {
                        Ok(json)
                    } else {
                        Err(Error::UnexpectedMessageType {
                            expected: expected.clone(),
                            actual: actual.to_string(),
                        })
                    }
                });
            let _ = tx.send(result);
        }
    }
}

/// Handle used by callers (the handshake protocol, application code) to
/// register waiters against the live frame stream.
#[derive(Clone)]
pub struct PromiseHandle {
    inner: Arc<Mutex<Inner>>,
    bound: usize,
}

impl PromiseHandle {
    async fn wait<T>(
        &self,
        timeout: Duration,
        make_waiter: impl FnOnce(oneshot::Sender<Result<T>>) -> Waiter,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().expect("promise plugin mutex poisoned");
            if let Some(reason) = &inner.closed {
                return Err(Error::closed(reason.clone()));
            }
            if inner.waiters.len() >= self.bound {
                return Err(Error::QueueOverflow { bound: self.bound });
            }
            inner.waiters.push_back(make_waiter(tx));
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::closed("promise plugin dropped")),
            Err(_) => Err(Error::Timeout),
        }
    }

    pub async fn wait_for_message(&self, timeout: Duration) -> Result<Payload> {
        self.wait(timeout, Waiter::Any).await
    }

    pub async fn wait_for_binary_message(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.wait(timeout, Waiter::Binary).await
    }

    pub async fn wait_for_json_message(&self, timeout: Duration) -> Result<Value> {
        self.wait(timeout, Waiter::Json).await
    }

    pub async fn wait_for_json_message_with_type(
        &self,
        expected_type: &str,
        timeout: Duration,
    ) -> Result<Value> {
        let expected = expected_type.to_string();
        self.wait(timeout, move |tx| Waiter::JsonTyped { expected, tx })
            .await
    }
}

pub struct PromisePlugin {
    inner: Arc<Mutex<Inner>>,
}

impl PromisePlugin {
    /// Creates the plugin plus a shareable handle callers use to register
    /// waiters. `bound` is the maximum number of outstanding waiters
    /// (default 1 per the spec).
    pub fn new(bound: usize) -> (Self, PromiseHandle) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            Self {
                inner: inner.clone(),
            },
            PromiseHandle { inner, bound },
        )
    }
}

impl Plugin for PromisePlugin {
    fn name(&self) -> &'static str {
        "promise"
    }

    fn transform_incoming(&mut self, event: IncomingEvent) -> Option<IncomingEvent> {
        let mut inner = self.inner.lock().expect("promise plugin mutex poisoned");
        match &event {
            IncomingEvent::Message(payload) => {
                if let Some(waiter) = inner.waiters.pop_front() {
                    resolve_waiter(waiter, payload.clone());
                    return None;
                }
                drop(inner);
                Some(event)
            }
            IncomingEvent::Closed { reason, .. } => {
                inner.closed = Some(reason.clone());
                while let Some(waiter) = inner.waiters.pop_front() {
                    fail_waiter(waiter, Error::closed(reason.clone()));
                }
                drop(inner);
                Some(event)
            }
            IncomingEvent::Opened => {
                drop(inner);
                Some(event)
            }
        }
    }

    fn transform_outgoing(&mut self, event: OutgoingEvent) -> Option<OutgoingEvent> {
        Some(event)
    }
}
