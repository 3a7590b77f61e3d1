//! Reconciliation of the authoritative list with the optimistic buffer.
//!
//! This is the core of determinism. Given the same sequence of fetches,
//! notifications and local actions, the reconciler always produces the same
//! view.
//!
//! # Algorithm
//!
//! 1. Confirmed records are kept sorted by (created_at, arrival)
//! 2. Optimistic records are kept in arrival order
//! 3. A new confirmed record retires at most one optimistic record, chosen
//!    by the [`MatchPolicy`]
//! 4. The view is the union of both lists minus optimistic records whose id
//!    is already confirmed, sorted by (created_at, arrival)

use crate::{
    change::{Change, ChangeOutcome, FetchOutcome, InsertOutcome, Retirement},
    record::Origin,
    temp_id::is_temp_id,
    MatchPolicy, Record, RecordId, TempIdGenerator, Timestamp,
};
use std::collections::HashSet;

/// A record plus the order in which the reconciler first saw it.
#[derive(Debug, Clone, PartialEq)]
struct Slot {
    record: Record,
    arrival: u64,
}

impl Slot {
    fn sort_key(&self) -> (Timestamp, u64) {
        (self.record.created_at, self.arrival)
    }
}

/// Merges server-confirmed records with local optimistic placeholders.
///
/// The reconciler is owned by a single caller and mutated only from that
/// caller's event loop. It cannot fail.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: MatchPolicy,
    /// Authoritative list, sorted
    confirmed: Vec<Slot>,
    /// Ids present in `confirmed`
    confirmed_ids: HashSet<RecordId>,
    /// Optimistic buffer, arrival order
    optimistic: Vec<Slot>,
    /// Arrival counter for tie-breaking
    arrivals: u64,
    temp_ids: TempIdGenerator,
}

impl Reconciler {
    /// Create an empty reconciler.
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Tag minted temporary ids with `node`, unique to this client.
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.set_node(node);
        self
    }

    /// Change the node tag. Ids minted earlier keep their old tag.
    pub fn set_node(&mut self, node: impl Into<String>) {
        self.temp_ids.node = node.into();
    }

    /// Get the match policy.
    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    fn next_arrival(&mut self) -> u64 {
        self.arrivals += 1;
        self.arrivals
    }

    /// Replace the authoritative list wholesale.
    ///
    /// Duplicate ids keep the last occurrence. Each fetched record then
    /// retires at most one pending placeholder: exact correlations are
    /// resolved for the whole fetch before any heuristic match, so a
    /// lookalike row cannot take a placeholder that another row correlates
    /// with.
    pub fn apply_initial_fetch(
        &mut self,
        records: impl IntoIterator<Item = Record>,
    ) -> FetchOutcome {
        let mut confirmed: Vec<Slot> = Vec::new();
        let mut ids = HashSet::new();

        for mut record in records {
            record.origin = Origin::Confirmed;
            if ids.contains(&record.id) {
                if let Some(slot) = confirmed.iter_mut().find(|s| s.record.id == record.id) {
                    slot.record = record;
                }
                continue;
            }
            ids.insert(record.id.clone());
            let arrival = self.next_arrival();
            confirmed.push(Slot { record, arrival });
        }

        confirmed.sort_by_key(Slot::sort_key);
        self.confirmed = confirmed;
        self.confirmed_ids = ids;

        let mut retired = Vec::new();
        let mut matched = vec![false; self.confirmed.len()];

        for (slot, matched) in self.confirmed.iter().zip(matched.iter_mut()) {
            let pos = self
                .optimistic
                .iter()
                .position(|o| self.policy.correlates(&slot.record, &o.record));
            if let Some(pos) = pos {
                let placeholder = self.optimistic.remove(pos);
                retired.push(Retirement {
                    temp_id: placeholder.record.id,
                    record_id: slot.record.id.clone(),
                });
                *matched = true;
            }
        }

        for (slot, matched) in self.confirmed.iter().zip(matched) {
            if matched {
                continue;
            }
            let pos = self
                .policy
                .find_match(&slot.record, self.optimistic.iter().map(|o| &o.record));
            if let Some(pos) = pos {
                let placeholder = self.optimistic.remove(pos);
                retired.push(Retirement {
                    temp_id: placeholder.record.id,
                    record_id: slot.record.id.clone(),
                });
            }
        }

        FetchOutcome {
            confirmed: self.confirmed.len(),
            retired,
        }
    }

    /// Fold an insert notification (or a write response) into the lists.
    ///
    /// A record whose id is already confirmed is a no-op and retires
    /// nothing, so a write response and the matching notification can both
    /// be applied safely.
    pub fn apply_insert(&mut self, mut record: Record) -> InsertOutcome {
        record.origin = Origin::Confirmed;
        let record_id = record.id.clone();

        if self.confirmed_ids.contains(&record_id) {
            return InsertOutcome {
                record_id,
                inserted: false,
                retired: None,
            };
        }

        let retired = self
            .policy
            .find_match(&record, self.optimistic.iter().map(|s| &s.record))
            .map(|pos| self.optimistic.remove(pos).record.id);

        let arrival = self.next_arrival();
        let created_at = record.created_at;
        let pos = self
            .confirmed
            .partition_point(|s| s.record.created_at <= created_at);
        self.confirmed_ids.insert(record_id.clone());
        self.confirmed.insert(pos, Slot { record, arrival });

        InsertOutcome {
            record_id,
            inserted: true,
            retired,
        }
    }

    /// Apply an update notification in place.
    ///
    /// Returns false when the id is unknown. The optimistic buffer is never
    /// touched.
    pub fn apply_update(&mut self, record: &Record) -> bool {
        match self.confirmed.iter_mut().find(|s| s.record.id == record.id) {
            Some(slot) => {
                slot.record.apply_patch(&record.payload);
                true
            }
            None => false,
        }
    }

    /// Remove a confirmed record.
    pub fn apply_delete(&mut self, id: &str) -> Option<Record> {
        if !self.confirmed_ids.remove(id) {
            return None;
        }
        let pos = self.confirmed.iter().position(|s| s.record.id == id)?;
        Some(self.confirmed.remove(pos).record)
    }

    /// Dispatch a change notification.
    pub fn apply_change(&mut self, change: Change) -> ChangeOutcome {
        match change {
            Change::Insert { record } => ChangeOutcome::Insert(self.apply_insert(record)),
            Change::Update { record } => ChangeOutcome::Update {
                applied: self.apply_update(&record),
                record_id: record.id,
            },
            Change::Delete { id } => ChangeOutcome::Delete {
                removed: self.apply_delete(&id).is_some(),
                record_id: id,
            },
        }
    }

    /// Add a locally-created placeholder.
    ///
    /// The record keeps its id when it already is a temporary id, otherwise
    /// a new one is minted. An entry with the same temporary id is replaced.
    /// Returns the temporary id so the caller can retract it on failure.
    pub fn add_optimistic(&mut self, mut record: Record) -> RecordId {
        record.origin = Origin::Optimistic;
        record.client_ref = None;
        if !is_temp_id(&record.id) {
            record.id = self.temp_ids.next_id(record.created_at);
        }
        let id = record.id.clone();

        if let Some(slot) = self.optimistic.iter_mut().find(|s| s.record.id == id) {
            slot.record = record;
        } else {
            let arrival = self.next_arrival();
            self.optimistic.push(Slot { record, arrival });
        }

        id
    }

    /// Build and add a placeholder for `payload`.
    pub fn stage(&mut self, payload: serde_json::Value, created_at: Timestamp) -> RecordId {
        let id = self.temp_ids.next_id(created_at);
        self.add_optimistic(Record::optimistic(id, created_at, payload))
    }

    /// Retract a placeholder. Absent ids are a no-op.
    pub fn remove_optimistic(&mut self, temp_id: &str) -> Option<Record> {
        let pos = self.optimistic.iter().position(|s| s.record.id == temp_id)?;
        Some(self.optimistic.remove(pos).record)
    }

    /// Retract placeholders older than `max_age` milliseconds.
    pub fn prune_stale(&mut self, now: Timestamp, max_age: u64) -> Vec<RecordId> {
        let mut pruned = Vec::new();
        self.optimistic.retain(|slot| {
            let stale = now.saturating_sub(slot.record.created_at) > max_age;
            if stale {
                pruned.push(slot.record.id.clone());
            }
            !stale
        });
        pruned
    }

    /// The reconciled view, sorted by creation time then arrival order.
    pub fn view(&self) -> Vec<Record> {
        let mut merged: Vec<&Slot> = self
            .confirmed
            .iter()
            .chain(
                self.optimistic
                    .iter()
                    .filter(|s| !self.confirmed_ids.contains(&s.record.id)),
            )
            .collect();
        merged.sort_by_key(|s| s.sort_key());
        merged.into_iter().map(|s| s.record.clone()).collect()
    }

    /// Get a record by id, confirmed first.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.confirmed
            .iter()
            .chain(self.optimistic.iter())
            .find(|s| s.record.id == id)
            .map(|s| &s.record)
    }

    /// Confirmed records in sort order.
    pub fn confirmed(&self) -> impl Iterator<Item = &Record> {
        self.confirmed.iter().map(|s| &s.record)
    }

    /// Optimistic records in arrival order.
    pub fn optimistic(&self) -> impl Iterator<Item = &Record> {
        self.optimistic.iter().map(|s| &s.record)
    }

    /// Number of placeholders awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.optimistic.len()
    }

    /// Number of records in the view.
    pub fn len(&self) -> usize {
        self.confirmed.len()
            + self
                .optimistic
                .iter()
                .filter(|s| !self.confirmed_ids.contains(&s.record.id))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
