//! Live event-stream subscribers
//!
//! A subscriber is one open `/events` response, identified by its remote
//! address. Frames are handed to it as pre-encoded JSON strings over an
//! unbounded channel whose only consumer is that connection's SSE writer,
//! so emission is serialized per subscriber and a slow consumer never
//! stalls the coordinator.
//!
//! Keying by remote address means a reconnect from the same address
//! displaces the earlier record, which is the behavior producers rely on.

use cvl_core::{Error, Result};
use indexmap::IndexMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Handle to one attached subscriber.
#[derive(Debug, Clone)]
pub struct Subscriber {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<String>,
}

impl Subscriber {
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { addr, tx }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue one encoded frame for transmission.
    ///
    /// Fails once the subscriber's event stream has been torn down, which is
    /// the signal for the coordinator to drop the registration.
    pub fn send(&self, frame: &str) -> Result<()> {
        self.tx
            .send(frame.to_string())
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// Insertion-ordered set of live subscribers, keyed by remote address.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: IndexMap<SocketAddr, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, superseding any earlier subscriber from the same address.
    pub fn insert(&mut self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber.addr(), subscriber);
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Subscriber> {
        self.subscribers.shift_remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Subscriber> {
        self.subscribers.get(addr)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscribers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    #[tokio::test]
    async fn test_send_reaches_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = Subscriber::new(peer(9000), tx);
        sub.send("{\"x\":1}").unwrap();
        assert_eq!(rx.recv().await.unwrap(), "{\"x\":1}");
    }

    #[tokio::test]
    async fn test_send_fails_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscriber::new(peer(9000), tx);
        drop(rx);
        assert!(sub.send("{}").is_err());
    }

    #[tokio::test]
    async fn test_reinsert_supersedes_but_keeps_position() {
        let mut registry = SubscriberRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let (tx_a2, mut rx_a2) = mpsc::unbounded_channel();
        registry.insert(Subscriber::new(peer(1), tx_a));
        registry.insert(Subscriber::new(peer(2), tx_b));
        registry.insert(Subscriber::new(peer(1), tx_a2));

        assert_eq!(registry.len(), 2);
        let order: Vec<_> = registry.iter().map(|s| s.addr().port()).collect();
        assert_eq!(order, vec![1, 2]);

        // The replacement channel receives; the displaced one is closed.
        registry.get(&peer(1)).unwrap().send("fresh").unwrap();
        assert_eq!(rx_a2.recv().await.unwrap(), "fresh");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_remove_absent_is_none() {
        let mut registry = SubscriberRegistry::new();
        assert!(registry.remove(&peer(5)).is_none());
    }
}
