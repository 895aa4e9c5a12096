//! The object coordinator
//!
//! All mutable state in the service is driven by a single task that drains a
//! FIFO queue of tagged operations, exactly one at a time. The queue is the
//! only synchronization point: the subscriber registry, the query list and
//! the subscriber-id counter are owned outright by the task, and the object
//! store is only ever written from here (HTTP read paths take shared read
//! access on the surrounding lock).
//!
//! Producers hold a [`CoordinatorHandle`], a cheap clone of the sender side.
//! Enqueueing never blocks; there is deliberately no backpressure towards
//! producers. Notifications triggered by an update are re-enqueued on the
//! coordinator's own queue rather than fanned out inline, so they take
//! effect after any operation that was already queued ahead of them.

use crate::query::BroadcastQuery;
use crate::store::ObjectStore;
use crate::subscriber::{Subscriber, SubscriberRegistry};
use bytes::Bytes;
use cvl_core::Frame;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Tagged operation envelope consumed by the coordinator task.
#[derive(Debug)]
pub(crate) enum Op {
    AddSubscriber(Subscriber),
    RemoveSubscriber(SocketAddr),
    Post(String),
    Update {
        key: String,
        metadata: Option<Value>,
        data: Option<Bytes>,
    },
    Msg {
        from: SocketAddr,
        payload: Value,
    },
    AddQuery(Arc<BroadcastQuery>),
    CleanQueries,
}

/// Cloneable producer side of the coordinator's operation queue.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    ops: mpsc::UnboundedSender<Op>,
    subscriber_count: Arc<AtomicUsize>,
}

impl CoordinatorHandle {
    /// Register an attached event-stream subscriber.
    pub(crate) fn add_subscriber(&self, subscriber: Subscriber) {
        self.send(Op::AddSubscriber(subscriber));
    }

    /// Drop the subscriber registered under `addr`, if any.
    pub(crate) fn remove_subscriber(&self, addr: SocketAddr) {
        self.send(Op::RemoveSubscriber(addr));
    }

    /// Fan a frame out to every live subscriber.
    pub fn post(&self, frame: &Frame) {
        match frame.to_json() {
            Ok(encoded) => self.send(Op::Post(encoded)),
            Err(err) => tracing::error!(error = %err, "failed to encode notification frame"),
        }
    }

    /// Upsert the object at `key`; with neither argument, delete it.
    pub fn update(&self, key: impl Into<String>, metadata: Option<Value>, data: Option<Bytes>) {
        self.send(Op::Update {
            key: key.into(),
            metadata,
            data,
        });
    }

    /// Broadcast a control message to every subscriber.
    pub fn control(&self, meta: Value) {
        self.post(&Frame::control(meta));
    }

    /// Route a peer's state report to the in-flight queries.
    pub fn msg(&self, from: SocketAddr, payload: Value) {
        self.send(Op::Msg { from, payload });
    }

    /// Start a broadcast query against the current subscriber set.
    ///
    /// The enqueue order is load-bearing: expired queries are reaped before
    /// the new one is inserted (so the insertion cannot be confused with a
    /// stale entry), and the query frame goes out only after the query is in
    /// place to accept replies that arrive immediately.
    pub fn start_query(&self) -> Arc<BroadcastQuery> {
        let expected = self.subscriber_count.load(Ordering::SeqCst);
        let query = Arc::new(BroadcastQuery::new(expected));
        self.send(Op::CleanQueries);
        self.send(Op::AddQuery(Arc::clone(&query)));
        self.post(&Frame::query());
        query
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    fn send(&self, op: Op) {
        if self.ops.send(op).is_err() {
            tracing::warn!("coordinator is gone; dropping operation");
        }
    }
}

/// The serialized consumer of the operation queue.
///
/// Created together with its handle by [`Coordinator::new`] and then moved
/// into a task via [`Coordinator::run`], where it lives for the rest of the
/// process.
pub struct Coordinator {
    ops: mpsc::UnboundedReceiver<Op>,
    handle: CoordinatorHandle,
    store: Arc<RwLock<ObjectStore>>,
    subscribers: SubscriberRegistry,
    queries: Vec<Arc<BroadcastQuery>>,
    next_subscriber_id: u64,
}

impl Coordinator {
    /// Create the coordinator and its producer handle.
    pub fn new(store: Arc<RwLock<ObjectStore>>) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            ops: tx,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        };
        (
            Self {
                ops: rx,
                handle: handle.clone(),
                store,
                subscribers: SubscriberRegistry::new(),
                queries: Vec::new(),
                next_subscriber_id: 1,
            },
            handle,
        )
    }

    /// Drain the operation queue, one operation at a time.
    pub async fn run(mut self) {
        while let Some(op) = self.ops.recv().await {
            self.apply(op).await;
        }
    }

    async fn apply(&mut self, op: Op) {
        match op {
            Op::AddSubscriber(subscriber) => self.add_subscriber(subscriber),
            Op::RemoveSubscriber(addr) => self.remove_subscriber(addr),
            Op::Post(frame) => self.post_to_all(&frame),
            Op::Update {
                key,
                metadata,
                data,
            } => self.update(key, metadata, data).await,
            Op::Msg { from, payload } => self.handle_msg(from, payload).await,
            Op::AddQuery(query) => self.queries.push(query),
            Op::CleanQueries => self.clean_queries(),
        }
    }

    fn add_subscriber(&mut self, subscriber: Subscriber) {
        let addr = subscriber.addr();
        tracing::info!(addr = %addr, "subscriber attached");
        self.subscribers.insert(subscriber);
        let frame = Frame::id(self.next_subscriber_id);
        self.next_subscriber_id += 1;
        let delivered = match frame.to_json() {
            Ok(encoded) => self
                .subscribers
                .get(&addr)
                .map(|s| s.send(&encoded).is_ok())
                .unwrap_or(false),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode identity frame");
                true
            }
        };
        if delivered {
            self.sync_subscriber_count();
        } else {
            tracing::warn!(addr = %addr, "identity frame rejected; dropping subscriber");
            self.remove_subscriber(addr);
        }
    }

    fn remove_subscriber(&mut self, addr: SocketAddr) {
        if self.subscribers.remove(&addr).is_some() {
            tracing::info!(addr = %addr, "subscriber detached");
        }
        self.sync_subscriber_count();
        self.clean_queries();
    }

    fn sync_subscriber_count(&self) {
        self.handle
            .subscriber_count
            .store(self.subscribers.len(), Ordering::SeqCst);
    }

    /// Fan one encoded frame out in registration order.
    ///
    /// Subscribers whose channel is gone are collected during the sweep and
    /// removed once it finishes, so a failure does not disturb delivery to
    /// the rest.
    fn post_to_all(&mut self, frame: &str) {
        let mut failed = Vec::new();
        for subscriber in self.subscribers.iter() {
            if subscriber.send(frame).is_err() {
                failed.push(subscriber.addr());
            }
        }
        for addr in failed {
            tracing::debug!(addr = %addr, "send failed; removing subscriber");
            self.remove_subscriber(addr);
        }
    }

    async fn update(&mut self, key: String, metadata: Option<Value>, data: Option<Bytes>) {
        if metadata.is_none() && data.is_none() {
            // Delete. The notification goes out even for unknown keys.
            self.store.write().await.remove(&key);
            tracing::debug!(key = %key, "object deleted");
            self.handle.post(&Frame::delete(key));
            return;
        }
        let notify = self.store.write().await.apply_upsert(&key, metadata, data);
        if notify {
            self.handle.post(&Frame::update(key));
        }
    }

    async fn handle_msg(&mut self, from: SocketAddr, payload: Value) {
        let mut accepted = false;
        for query in &self.queries {
            if query.add_response(from, payload.clone()).await {
                accepted = true;
                break;
            }
        }
        if !accepted {
            tracing::warn!(from = %from, payload = %payload, "unhandled subscriber message");
        }
        self.clean_queries();
    }

    fn clean_queries(&mut self) {
        self.queries.retain(|query| !query.expired());
    }
}
