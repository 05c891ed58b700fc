//! The broker's one shared mutable structure: a per-public-key queue of
//! parked listener sockets. Take and put are the only two operations, each
//! serialised through the per-key lock so splice-on-dequeue can never race
//! a second dialer claiming the same slot.

use dashmap::DashMap;
use one_core::PublicKey;
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::WebSocketStream;

/// Sent into a parked listener's keepalive task to claim its socket for
/// splicing. The task replies with the live socket and stops pinging it.
pub type ClaimRequest = oneshot::Sender<WebSocketStream<TcpStream>>;

pub struct ListenerRegistry {
    queues: DashMap<PublicKey, Mutex<VecDeque<tokio::sync::mpsc::UnboundedSender<ClaimRequest>>>>,
    spare_capacity: usize,
}

impl ListenerRegistry {
    pub fn new(spare_capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            spare_capacity,
        }
    }

    /// Parks a listener under `key`. `claim_tx` lets a dialer (or this
    /// registry, when the spare queue overflows) request the live socket
    /// back out of the listener's keepalive task.
    pub async fn park(
        &self,
        key: PublicKey,
        claim_tx: tokio::sync::mpsc::UnboundedSender<ClaimRequest>,
    ) {
        let queue = self
            .queues
            .entry(key)
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut guard = queue.lock().await;
        guard.push_back(claim_tx);
        while guard.len() > self.spare_capacity {
            if let Some(evicted) = guard.pop_front() {
                let (tx, _rx) = oneshot::channel();
                let _ = evicted.send(tx);
            }
        }
    }

    /// Claims the oldest parked listener for `key`, if any. Keeps asking
    /// until one actually answers (a listener may have disconnected
    /// between being queued and being claimed).
    pub async fn claim(&self, key: PublicKey) -> Option<WebSocketStream<TcpStream>> {
        loop {
            let Some(queue) = self.queues.get(&key) else {
                return None;
            };
            let claim_tx = {
                let mut guard = queue.lock().await;
                guard.pop_front()?
            };
            let (tx, rx) = oneshot::channel();
            if claim_tx.send(tx).is_err() {
                continue;
            }
            if let Ok(socket) = rx.await {
                return Some(socket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claiming_an_empty_queue_returns_none() {
        let registry = ListenerRegistry::new(2);
        let key = PublicKey::from_bytes([1u8; 32]);
        assert!(registry.claim(key).await.is_none());
    }

    #[tokio::test]
    async fn overflowing_the_spare_capacity_evicts_the_oldest() {
        let registry = ListenerRegistry::new(1);
        let key = PublicKey::from_bytes([2u8; 32]);

        let (first_tx, mut first_rx) = tokio::sync::mpsc::unbounded_channel();
        registry.park(key, first_tx).await;
        let (second_tx, _second_rx) = tokio::sync::mpsc::unbounded_channel();
        registry.park(key, second_tx).await;

        // The first slot was evicted: it should have received a claim
        // request (which it cannot answer, being a test stub).
        assert!(first_rx.recv().await.is_some());
    }
}
