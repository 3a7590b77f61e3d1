//! Realtime sync sessions.
//!
//! A session follows one topic. It owns a [`Reconciler`] that is mutated
//! only by a single actor task, which reacts to three sources:
//!
//! 1. Commands from the [`SessionHandle`] (user actions)
//! 2. Change notifications from the backend subscription
//! 3. Completions of writes it has spawned
//!
//! The reconciled view is published on a `watch` channel after every change;
//! errors and confirmations are published as [`SessionEvent`]s. Nothing is
//! retried automatically.

mod actor;

use std::sync::Arc;
use std::time::Duration;

use synclist_engine::{MatchPolicy, Reconciler, Record, RecordId, Timestamp};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::error::{Result, SyncError};

use actor::Actor;

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// When a confirmed record retires a placeholder
    pub policy: MatchPolicy,
    /// Drop placeholders that stay unconfirmed this long
    pub stale_after: Option<Duration>,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::default(),
            stale_after: None,
            event_capacity: 64,
        }
    }
}

/// Notifications published by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The authoritative list was (re)loaded
    Synced { confirmed: usize },
    /// A placeholder was replaced by its confirmed record
    Confirmed {
        temp_id: RecordId,
        record_id: RecordId,
    },
    /// Placeholders dropped by stale cleanup
    Pruned { temp_ids: Vec<RecordId> },
    /// A failure the owner should surface to the user
    Error(SyncError),
}

/// Requests from the handle to the actor.
pub(crate) enum Command {
    Send {
        payload: serde_json::Value,
        reply: oneshot::Sender<RecordId>,
        confirm: Option<oneshot::Sender<Result<Record>>>,
    },
    Track {
        payload: serde_json::Value,
        reply: oneshot::Sender<RecordId>,
    },
    Retract {
        temp_id: RecordId,
        reply: oneshot::Sender<bool>,
    },
    Refetch {
        reply: oneshot::Sender<Result<usize>>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Entry point for opening sessions.
pub struct SyncSession;

impl SyncSession {
    /// Open a session on `topic`.
    ///
    /// Subscribes first and fetches second, so no insert published between
    /// the two calls is lost; the overlap is deduplicated by id.
    pub async fn open<B: Backend>(
        backend: Arc<B>,
        topic: impl Into<String>,
        config: SessionConfig,
    ) -> Result<SessionHandle> {
        let topic = topic.into();
        config.policy.validate()?;

        let subscription =
            backend
                .subscribe(&topic)
                .await
                .map_err(|reason| SyncError::SubscribeFailed {
                    topic: topic.clone(),
                    reason,
                })?;

        let records = backend
            .fetch(&topic)
            .await
            .map_err(|reason| SyncError::FetchFailed {
                topic: topic.clone(),
                reason,
            })?;

        let node = uuid::Uuid::new_v4().simple().to_string();
        let mut reconciler = Reconciler::new(config.policy.clone()).with_node(node);
        let confirmed = reconciler.apply_initial_fetch(records).confirmed;

        let (view_tx, view_rx) = watch::channel(reconciler.view());
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        tracing::info!(topic = %topic, confirmed, "Session opened");

        let actor = Actor::new(
            backend,
            topic.clone(),
            config,
            reconciler,
            view_tx,
            events_tx.clone(),
        );
        let task = tokio::spawn(actor.run(commands_rx, Some(subscription)));

        Ok(SessionHandle {
            topic,
            commands: commands_tx,
            view: view_rx,
            events: events_tx,
            task: Some(task),
        })
    }
}

/// Owner's handle to a running session.
///
/// Dropping the handle closes the session.
#[derive(Debug)]
pub struct SessionHandle {
    topic: String,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<Vec<Record>>,
    events: broadcast::Sender<SessionEvent>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Get the topic this session follows.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Latest reconciled view.
    pub fn view(&self) -> Vec<Record> {
        self.view.borrow().clone()
    }

    /// A receiver that is notified whenever the view changes.
    pub fn watch(&self) -> watch::Receiver<Vec<Record>> {
        self.view.clone()
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Show `payload` immediately and persist it in the background.
    ///
    /// Returns the temporary id. A failed write retracts the placeholder and
    /// is reported as [`SessionEvent::Error`].
    pub async fn send(&self, payload: serde_json::Value) -> Result<RecordId> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            payload,
            reply,
            confirm: None,
        })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Like [`send`](Self::send), but waits for the write to resolve.
    pub async fn send_confirmed(&self, payload: serde_json::Value) -> Result<Record> {
        let (reply, _temp_id) = oneshot::channel();
        let (confirm, rx) = oneshot::channel();
        self.request(Command::Send {
            payload,
            reply,
            confirm: Some(confirm),
        })?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Show a placeholder that awaits a server-side event rather than a write.
    pub async fn track(&self, payload: serde_json::Value) -> Result<RecordId> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Track { payload, reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Retract a placeholder. Returns false when it was already gone.
    pub async fn retract(&self, temp_id: impl Into<RecordId>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Retract {
            temp_id: temp_id.into(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    /// Reload the authoritative list, e.g. after a failed fetch.
    pub async fn refetch(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Refetch { reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Subscribe again and reload, after the subscription dropped.
    pub async fn reconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Reconnect { reply })?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Unsubscribe and stop the session.
    ///
    /// Writes still in flight are not cancelled; their results are dropped.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(topic = %self.topic, "Session task failed: {}", e);
            }
        }
    }

    fn request(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Send { .. } => "Send",
            Command::Track { .. } => "Track",
            Command::Retract { .. } => "Retract",
            Command::Refetch { .. } => "Refetch",
            Command::Reconnect { .. } => "Reconnect",
            Command::Close => "Close",
        };
        f.write_str(name)
    }
}

/// Wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
