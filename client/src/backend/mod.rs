//! Collaborator contracts for the hosted platform.
//!
//! A session only ever talks to the platform through three calls: an
//! initial fetch, a change subscription and a write. Backends are passed to
//! sessions explicitly; there is no process-wide client instance.

mod memory;

pub use memory::MemoryBackend;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use synclist_engine::{Change, Record, RecordId, Timestamp};
use tokio::sync::mpsc;

use crate::error::BackendError;

/// A record the client asks the backend to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    /// Temporary id of the optimistic placeholder
    pub temp_id: RecordId,
    /// Client-side creation time
    pub created_at: Timestamp,
    /// Content to persist
    pub payload: serde_json::Value,
}

/// The hosted platform as seen by a session.
pub trait Backend: Send + Sync + 'static {
    /// Ordered rows for a topic (conversation, tracking session, ...).
    fn fetch(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Vec<Record>, BackendError>> + Send;

    /// Open a change channel for a topic.
    fn subscribe(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Subscription, BackendError>> + Send;

    /// Persist a draft, resolving with the confirmed record.
    ///
    /// Backends that can should echo `draft.temp_id` as the record's
    /// `client_ref`.
    fn write(
        &self,
        topic: &str,
        draft: Draft,
    ) -> impl Future<Output = Result<Record, BackendError>> + Send;
}

type Teardown = Box<dyn FnOnce() + Send + Sync>;

/// A live change channel. Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Change>,
    teardown: Option<Teardown>,
}

impl Subscription {
    /// Wrap a receiver; `teardown` runs exactly once when the subscription
    /// is dropped.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<Change>,
        teardown: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            teardown: Some(Box::new(teardown)),
        }
    }

    /// Next change, or `None` once the channel has closed.
    pub async fn next_change(&mut self) -> Option<Change> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Change;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Change>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.teardown.is_some())
            .finish()
    }
}
