//! In-process backend.
//!
//! Stands in for the hosted platform: keeps one row table per topic, issues
//! durable ids and server timestamps on write, and fans every change out to
//! the topic's subscribers. Fault injection hooks let callers exercise the
//! failure paths of a session.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use synclist_engine::{Change, Record, Timestamp};
use tokio::sync::mpsc;

use super::{Backend, Draft, Subscription};
use crate::error::BackendError;

/// Sender half of a subscriber channel.
type ChangeSender = mpsc::UnboundedSender<Change>;

/// A single subscriber of a topic.
#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: ChangeSender,
}

#[derive(Debug, Default)]
struct Inner {
    /// Rows by topic, in insertion order
    tables: DashMap<String, Vec<Record>>,
    /// Subscribers by topic
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    failing_writes: AtomicUsize,
    failing_fetches: AtomicUsize,
    omit_client_ref: AtomicBool,
    /// Latency added to write responses after the row is stored (ms)
    write_delay_ms: AtomicU64,
}

impl Inner {
    fn unsubscribe(&self, topic: &str, subscriber_id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(topic) {
            subs.retain(|s| s.id != subscriber_id);
            // Clean up empty entries
            if subs.is_empty() {
                drop(subs);
                self.subscribers.remove_if(topic, |_, subs| subs.is_empty());
            }
        }

        tracing::debug!(topic = %topic, subscriber_id, "Subscriber removed");
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory stand-in for the hosted platform.
///
/// Cheap to clone; clones share the same tables and subscribers.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new backend wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Load rows into a topic without notifying subscribers.
    pub fn seed(&self, topic: &str, records: impl IntoIterator<Item = Record>) {
        self.inner
            .tables
            .entry(topic.to_string())
            .or_default()
            .extend(records);
    }

    /// Rows currently stored for a topic.
    pub fn rows(&self, topic: &str) -> Vec<Record> {
        self.inner
            .tables
            .get(topic)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.inner.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Stop echoing the temporary id on confirmed records.
    pub fn set_echo_client_ref(&self, echo: bool) {
        self.inner.omit_client_ref.store(!echo, Ordering::SeqCst);
    }

    /// Hold write responses back for `delay` after the row is stored and
    /// broadcast, as a slow network would.
    pub fn delay_write_responses(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Insert a row written by someone else and notify subscribers.
    pub fn insert_remote(&self, topic: &str, payload: serde_json::Value) -> Record {
        let record = Record::confirmed(uuid::Uuid::new_v4().to_string(), server_now(), payload);
        self.store_and_broadcast(topic, record.clone());
        record
    }

    /// Patch a row and notify subscribers with the updated row.
    pub fn update(&self, topic: &str, id: &str, patch: &serde_json::Value) -> bool {
        let updated = self.inner.tables.get_mut(topic).and_then(|mut rows| {
            let row = rows.iter_mut().find(|r| r.id == id)?;
            row.apply_patch(patch);
            Some(row.clone())
        });

        match updated {
            Some(record) => {
                self.broadcast(topic, Change::Update { record });
                true
            }
            None => false,
        }
    }

    /// Delete a row and notify subscribers.
    pub fn delete(&self, topic: &str, id: &str) -> bool {
        let removed = self
            .inner
            .tables
            .get_mut(topic)
            .map(|mut rows| {
                let before = rows.len();
                rows.retain(|r| r.id != id);
                rows.len() != before
            })
            .unwrap_or(false);

        if removed {
            self.broadcast(topic, Change::Delete { id: id.to_string() });
        }
        removed
    }

    /// Close every subscription of a topic, as a dropped connection would.
    ///
    /// Returns the number of subscriptions closed.
    pub fn drop_subscribers(&self, topic: &str) -> usize {
        let closed = self
            .inner
            .subscribers
            .remove(topic)
            .map(|(_, subs)| subs.len())
            .unwrap_or(0);

        tracing::info!(topic = %topic, closed, "Dropped subscribers");
        closed
    }

    /// Get the number of live subscribers of a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Send a change to every subscriber of a topic.
    ///
    /// Returns the number of subscribers that received it.
    pub fn broadcast(&self, topic: &str, change: Change) -> usize {
        let mut sent_count = 0;

        if let Some(mut subs) = self.inner.subscribers.get_mut(topic) {
            subs.retain(|sub| {
                let delivered = sub.sender.send(change.clone()).is_ok();
                if delivered {
                    sent_count += 1;
                }
                delivered
            });
        }

        tracing::debug!(
            topic = %topic,
            event = change.event(),
            record_id = %change.record_id(),
            recipients = sent_count,
            "Broadcast change to subscribers"
        );

        sent_count
    }

    fn store_and_broadcast(&self, topic: &str, record: Record) {
        self.inner
            .tables
            .entry(topic.to_string())
            .or_default()
            .push(record.clone());
        self.broadcast(topic, Change::Insert { record });
    }
}

impl Backend for MemoryBackend {
    async fn fetch(&self, topic: &str) -> Result<Vec<Record>, BackendError> {
        if Inner::take_failure(&self.inner.failing_fetches) {
            return Err(BackendError::Unavailable("injected fetch failure".into()));
        }

        let mut rows = self.rows(topic);
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BackendError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber_id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);

        self.inner
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id: subscriber_id,
                sender,
            });

        tracing::debug!(topic = %topic, subscriber_id, "Subscriber registered");

        let inner = Arc::downgrade(&self.inner);
        let topic = topic.to_string();
        Ok(Subscription::new(receiver, move || {
            if let Some(inner) = inner.upgrade() {
                inner.unsubscribe(&topic, subscriber_id);
            }
        }))
    }

    async fn write(&self, topic: &str, draft: Draft) -> Result<Record, BackendError> {
        if Inner::take_failure(&self.inner.failing_writes) {
            return Err(BackendError::Rejected("injected write failure".into()));
        }

        let mut record = Record::confirmed(
            uuid::Uuid::new_v4().to_string(),
            server_now(),
            draft.payload,
        );
        if !self.inner.omit_client_ref.load(Ordering::SeqCst) {
            record.client_ref = Some(draft.temp_id);
        }

        self.store_and_broadcast(topic, record.clone());

        let delay = self.inner.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(record)
    }
}

fn server_now() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
