//! The task that owns a session's reconciler.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use synclist_engine::{Change, ChangeOutcome, Reconciler, Record, RecordId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::{now_millis, Command, SessionConfig, SessionEvent};
use crate::backend::{Backend, Draft, Subscription};
use crate::error::{BackendError, Result, SyncError};

const MIN_PRUNE_PERIOD: Duration = Duration::from_millis(10);

/// Completion of a spawned write.
struct WriteDone {
    temp_id: RecordId,
    result: std::result::Result<Record, BackendError>,
    confirm: Option<oneshot::Sender<Result<Record>>>,
}

pub(super) struct Actor<B> {
    backend: Arc<B>,
    topic: String,
    config: SessionConfig,
    reconciler: Reconciler,
    view: watch::Sender<Vec<Record>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<B: Backend> Actor<B> {
    pub(super) fn new(
        backend: Arc<B>,
        topic: String,
        config: SessionConfig,
        reconciler: Reconciler,
        view: watch::Sender<Vec<Record>>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            backend,
            topic,
            config,
            reconciler,
            view,
            events,
        }
    }

    /// Run until the handle closes the session or is dropped.
    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut subscription: Option<Subscription>,
    ) {
        let (writes_tx, mut writes) = mpsc::unbounded_channel();
        let mut prune = self.config.stale_after.map(prune_interval);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Close) | None => break,
                        Some(Command::Reconnect { reply }) => {
                            subscription = None;
                            let result = match self.resubscribe().await {
                                Ok(new) => {
                                    subscription = Some(new);
                                    self.refetch().await.map(|_| ())
                                }
                                Err(e) => Err(e),
                            };
                            if result.is_ok() {
                                tracing::info!(topic = %self.topic, "Reconnected");
                            }
                            let _ = reply.send(result);
                        }
                        Some(command) => self.handle_command(command, &writes_tx).await,
                    }
                }

                change = next_change(&mut subscription) => {
                    match change {
                        Some(change) => self.handle_change(change),
                        None => {
                            subscription = None;
                            tracing::warn!(topic = %self.topic, "Subscription dropped");
                            self.emit(SessionEvent::Error(SyncError::SubscriptionDropped {
                                topic: self.topic.clone(),
                            }));
                        }
                    }
                }

                Some(done) = writes.recv() => self.handle_write(done),

                _ = tick(&mut prune) => self.prune(),
            }
        }

        drop(subscription);
        tracing::info!(
            topic = %self.topic,
            pending = self.reconciler.pending_count(),
            "Session closed"
        );
    }

    async fn handle_command(
        &mut self,
        command: Command,
        writes: &mpsc::UnboundedSender<WriteDone>,
    ) {
        match command {
            Command::Send {
                payload,
                reply,
                confirm,
            } => {
                let temp_id = self.send(payload, confirm, writes.clone());
                let _ = reply.send(temp_id);
            }

            Command::Track { payload, reply } => {
                let temp_id = self.reconciler.stage(payload, now_millis());
                self.publish();
                tracing::debug!(topic = %self.topic, temp_id = %temp_id, "Tracking placeholder");
                let _ = reply.send(temp_id);
            }

            Command::Retract { temp_id, reply } => {
                let removed = self.reconciler.remove_optimistic(&temp_id).is_some();
                if removed {
                    self.publish();
                }
                let _ = reply.send(removed);
            }

            Command::Refetch { reply } => {
                let result = self.refetch().await;
                let _ = reply.send(result);
            }

            // Handled by the run loop, which owns the subscription
            Command::Reconnect { .. } | Command::Close => {}
        }
    }

    /// Stage a placeholder and persist it in the background.
    fn send(
        &mut self,
        payload: serde_json::Value,
        confirm: Option<oneshot::Sender<Result<Record>>>,
        writes: mpsc::UnboundedSender<WriteDone>,
    ) -> RecordId {
        let created_at = now_millis();
        let temp_id = self.reconciler.stage(payload.clone(), created_at);
        self.publish();

        let draft = Draft {
            temp_id: temp_id.clone(),
            created_at,
            payload,
        };
        let backend = Arc::clone(&self.backend);
        let topic = self.topic.clone();

        tracing::debug!(topic = %topic, temp_id = %temp_id, "Writing draft");

        tokio::spawn(async move {
            let temp_id = draft.temp_id.clone();
            let result = backend.write(&topic, draft).await;
            // The session may have closed meanwhile
            let _ = writes.send(WriteDone {
                temp_id,
                result,
                confirm,
            });
        });

        temp_id
    }

    fn handle_write(&mut self, done: WriteDone) {
        let WriteDone {
            temp_id,
            result,
            confirm,
        } = done;

        let reply = match result {
            Ok(mut record) => {
                record.client_ref.get_or_insert_with(|| temp_id.clone());
                let record_id = record.id.clone();
                let outcome = self.reconciler.apply_insert(record.clone());

                let retired = outcome.retired.as_deref() == Some(temp_id.as_str())
                    || self.reconciler.remove_optimistic(&temp_id).is_some();
                if outcome.inserted || retired {
                    self.publish();
                }
                if retired {
                    self.emit(SessionEvent::Confirmed {
                        temp_id: temp_id.clone(),
                        record_id,
                    });
                }

                tracing::debug!(
                    topic = %self.topic,
                    temp_id = %temp_id,
                    record_id = %record.id,
                    "Write confirmed"
                );
                Ok(record)
            }
            Err(reason) => {
                if self.reconciler.remove_optimistic(&temp_id).is_some() {
                    self.publish();
                }
                tracing::warn!(topic = %self.topic, temp_id = %temp_id, "Write failed: {}", reason);

                let error = SyncError::WriteFailed { temp_id, reason };
                self.emit(SessionEvent::Error(error.clone()));
                Err(error)
            }
        };

        if let Some(confirm) = confirm {
            let _ = confirm.send(reply);
        }
    }

    fn handle_change(&mut self, change: Change) {
        let event = change.event();
        let outcome = self.reconciler.apply_change(change);

        tracing::trace!(topic = %self.topic, event, effective = outcome.is_effective(), "Change applied");

        if let ChangeOutcome::Insert(insert) = &outcome {
            if let Some(temp_id) = &insert.retired {
                self.emit(SessionEvent::Confirmed {
                    temp_id: temp_id.clone(),
                    record_id: insert.record_id.clone(),
                });
            }
        }
        if outcome.is_effective() {
            self.publish();
        }
    }

    async fn refetch(&mut self) -> Result<usize> {
        match self.backend.fetch(&self.topic).await {
            Ok(records) => {
                let outcome = self.reconciler.apply_initial_fetch(records);
                self.publish();
                for retirement in outcome.retired.iter().cloned() {
                    self.emit(SessionEvent::Confirmed {
                        temp_id: retirement.temp_id,
                        record_id: retirement.record_id,
                    });
                }
                self.emit(SessionEvent::Synced {
                    confirmed: outcome.confirmed,
                });
                tracing::info!(
                    topic = %self.topic,
                    confirmed = outcome.confirmed,
                    retired = outcome.retired.len(),
                    "Refetched"
                );
                Ok(outcome.confirmed)
            }
            Err(reason) => {
                tracing::warn!(topic = %self.topic, "Fetch failed: {}", reason);
                let error = SyncError::FetchFailed {
                    topic: self.topic.clone(),
                    reason,
                };
                self.emit(SessionEvent::Error(error.clone()));
                Err(error)
            }
        }
    }

    async fn resubscribe(&self) -> Result<Subscription> {
        self.backend.subscribe(&self.topic).await.map_err(|reason| {
            tracing::warn!(topic = %self.topic, "Resubscribe failed: {}", reason);
            let error = SyncError::SubscribeFailed {
                topic: self.topic.clone(),
                reason,
            };
            self.emit(SessionEvent::Error(error.clone()));
            error
        })
    }

    fn prune(&mut self) {
        let Some(max_age) = self.config.stale_after else {
            return;
        };
        let max_age = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let temp_ids = self.reconciler.prune_stale(now_millis(), max_age);
        if temp_ids.is_empty() {
            return;
        }

        tracing::info!(topic = %self.topic, count = temp_ids.len(), "Pruned stale placeholders");
        self.publish();
        self.emit(SessionEvent::Pruned { temp_ids });
    }

    fn publish(&self) {
        self.view.send_replace(self.reconciler.view());
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

fn prune_interval(stale_after: Duration) -> Interval {
    let period = (stale_after / 2).max(MIN_PRUNE_PERIOD);
    // Nothing can be stale yet, so skip the immediate first tick
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn next_change(subscription: &mut Option<Subscription>) -> Option<Change> {
    match subscription {
        Some(subscription) => subscription.next_change().await,
        None => future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
