//! Broadcast state queries
//!
//! A broadcast query asks every currently attached subscriber to report its
//! state. The requesting HTTP handler parks on the query while subscribers
//! answer through `POST /state`; it is released as soon as every expected
//! reply arrived or after a fixed two-second window, whichever comes first,
//! and receives whatever replies were collected.
//!
//! Each replying peer is counted at most once; duplicate and post-deadline
//! replies are rejected so the coordinator can offer them to the next query
//! in line (or log them as unhandled).

use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::pin::pin;
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Duration, Instant};

/// Longest a query collects replies before the requester is answered.
pub const MAX_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct ReplyState {
    replies: Vec<Value>,
    responders: HashSet<SocketAddr>,
}

/// One in-flight broadcast query.
///
/// Shared between the coordinator (which records replies) and the HTTP
/// handler that initiated the query (which waits on it). The notify handle
/// plays the role of a condition variable: every accepted reply wakes the
/// waiter so it can re-check the reply count against `expected`.
#[derive(Debug)]
pub struct BroadcastQuery {
    expected: usize,
    deadline: Instant,
    state: Mutex<ReplyState>,
    notify: Notify,
}

impl BroadcastQuery {
    /// New query expecting `expected` replies, expiring [`MAX_WAIT`] from now.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            deadline: Instant::now() + MAX_WAIT,
            state: Mutex::new(ReplyState::default()),
            notify: Notify::new(),
        }
    }

    /// Snapshot of the subscriber count taken when the query was created.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Whether the reply window has closed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Record a reply from `from`.
    ///
    /// Returns false (reply not accepted) when the query has expired or when
    /// this address already answered.
    pub async fn add_response(&self, from: SocketAddr, payload: Value) -> bool {
        if self.expired() {
            return false;
        }
        let mut state = self.state.lock().await;
        if !state.responders.insert(from) {
            return false;
        }
        state.replies.push(payload);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Replies collected so far.
    pub async fn replies(&self) -> Vec<Value> {
        self.state.lock().await.replies.clone()
    }

    /// Park until every expected reply arrived or the deadline passed.
    ///
    /// Returns the replies collected by then, possibly fewer than
    /// `expected`. Total wait is bounded by [`MAX_WAIT`].
    pub async fn wait(&self) -> Vec<Value> {
        loop {
            // Register for wake-ups before checking state, so a reply
            // landing between the check and the await cannot be missed.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let state = self.state.lock().await;
                if state.replies.len() >= self.expected || Instant::now() >= self.deadline {
                    return state.replies.clone();
                }
            }
            if timeout_at(self.deadline, notified).await.is_err() {
                return self.state.lock().await.replies.clone();
            }
        }
    }
}
