//! Log Bus (C15, §4.15).
//!
//! A bounded ring buffer of recent structured log events, fanned out to zero
//! or more subscribers. A slow subscriber drops messages on its own queue
//! only; it never blocks the producer or other subscribers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Bus history capacity.
const HISTORY_CAPACITY: usize = 1000;
/// Per-subscriber queue capacity.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured log event (§4.15).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub source: String,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<LogEvent>,
}

struct Inner {
    history: VecDeque<LogEvent>,
    subscribers: Vec<Subscriber>,
}

/// A handle to a live subscription; drop it (or call [`Subscription::unsubscribe`])
/// to stop receiving events.
pub struct Subscription {
    id: u64,
    bus: Arc<Mutex<Inner>>,
    rx: mpsc::Receiver<LogEvent>,
}

impl Subscription {
    /// Receive the next event, or `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Explicitly tear down the subscription.
    ///
    /// Lock ordering (§5): remove from the broadcaster map under the bus
    /// lock first, then let the receiver drop close the queue under no lock
    /// at all — never the reverse, which would let a publish land in a
    /// channel whose far end is already gone from the map but still open.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.bus.lock();
        inner.subscribers.retain(|s| s.id != self.id);
    }
}

/// The in-memory log bus: bounded history plus live fan-out (§4.15).
#[derive(Clone)]
pub struct LogBus {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBus {
    pub fn new() -> Self {
        LogBus {
            inner: Arc::new(Mutex::new(Inner {
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                subscribers: Vec::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event: append to history (evicting the oldest if full) and
    /// fan out to every live subscriber, dropping on any whose queue is full.
    pub fn publish(&self, level: Level, source: impl Into<String>, message: impl Into<String>) {
        let event = LogEvent {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.into(),
        };
        let mut inner = self.inner.lock();
        if inner.history.len() >= HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());
        for sub in &inner.subscribers {
            // try_send: a full queue means a slow subscriber; drop silently
            // rather than block the publisher or other subscribers.
            let _ = sub.tx.try_send(event.clone());
        }
    }

    pub fn debug(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(Level::Debug, source, message);
    }
    pub fn info(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(Level::Info, source, message);
    }
    pub fn warn(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(Level::Warn, source, message);
    }
    pub fn error(&self, source: impl Into<String>, message: impl Into<String>) {
        self.publish(Level::Error, source, message);
    }

    /// A snapshot of current history, newest last.
    pub fn history(&self) -> Vec<LogEvent> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Subscribe for live events. The returned [`Subscription`] first drains
    /// the history snapshot taken at subscribe time (the small gap between
    /// the snapshot and live enrollment below is accepted in exchange for
    /// never delivering history out of order), then carries live events.
    pub fn subscribe(&self) -> (Vec<LogEvent>, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let snapshot: Vec<LogEvent> = inner.history.iter().cloned().collect();
        inner.subscribers.push(Subscriber { id, tx });
        drop(inner);
        (
            snapshot,
            Subscription {
                id,
                bus: Arc::clone(&self.inner),
                rx,
            },
        )
    }

    /// Number of currently live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_capped() {
        let bus = LogBus::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            bus.info("test", format!("event {i}"));
        }
        assert_eq!(bus.history().len(), HISTORY_CAPACITY);
        assert_eq!(bus.history().first().unwrap().message, "event 10");
    }

    #[tokio::test]
    async fn new_subscriber_gets_snapshot_then_live() {
        let bus = LogBus::new();
        bus.info("test", "before");
        let (snapshot, mut sub) = bus.subscribe();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "before");

        bus.info("test", "after");
        let next = sub.recv().await.unwrap();
        assert_eq!(next.message, "after");
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_broadcaster() {
        let bus = LogBus::new();
        let (_snapshot, sub) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_blocking_others() {
        let bus = LogBus::new();
        let (_snap_a, mut slow) = bus.subscribe();
        let (_snap_b, mut fast) = bus.subscribe();

        // Overflow the slow subscriber's queue without ever reading it.
        for i in 0..(SUBSCRIBER_CAPACITY + 10) {
            bus.info("test", format!("msg {i}"));
        }

        // The fast subscriber still received the first message fine.
        let first = fast.recv().await.unwrap();
        assert_eq!(first.message, "msg 0");

        // Draining the slow one proves the bus never deadlocked on it.
        let mut drained = 0;
        while slow.rx.try_recv().is_ok() {
            drained += 1;
        }
        assert!(drained <= SUBSCRIBER_CAPACITY);
    }
}
