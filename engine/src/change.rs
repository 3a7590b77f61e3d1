//! Change notifications pushed over a subscription channel.
//!
//! Changes arrive one record at a time and are folded into the reconciler,
//! never applied as direct mutations by the caller.

use crate::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Change {
    /// A new confirmed record
    Insert { record: Record },
    /// In-place field update of a confirmed record
    Update { record: Record },
    /// A confirmed record was removed
    Delete { id: RecordId },
}

impl Change {
    /// Get the affected record ID.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Change::Insert { record } | Change::Update { record } => &record.id,
            Change::Delete { id } => id,
        }
    }

    /// Event name as it appears on the wire.
    pub fn event(&self) -> &'static str {
        match self {
            Change::Insert { .. } => "insert",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
        }
    }
}

/// Result of folding an insert into the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOutcome {
    /// The confirmed record ID
    pub record_id: RecordId,
    /// False when the id was already present
    pub inserted: bool,
    /// Optimistic record retired by this insert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired: Option<RecordId>,
}

/// A placeholder retired by a fetched record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retirement {
    pub temp_id: RecordId,
    pub record_id: RecordId,
}

/// Result of replacing the authoritative list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    /// Number of confirmed records held afterwards
    pub confirmed: usize,
    /// Placeholders whose confirmed record came back in the fetch
    pub retired: Vec<Retirement>,
}

/// Result of folding any change into the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ChangeOutcome {
    Insert(InsertOutcome),
    #[serde(rename_all = "camelCase")]
    Update { record_id: RecordId, applied: bool },
    #[serde(rename_all = "camelCase")]
    Delete { record_id: RecordId, removed: bool },
}

impl ChangeOutcome {
    /// Whether the view changed as a result.
    pub fn is_effective(&self) -> bool {
        match self {
            ChangeOutcome::Insert(outcome) => outcome.inserted || outcome.retired.is_some(),
            ChangeOutcome::Update { applied, .. } => *applied,
            ChangeOutcome::Delete { removed, .. } => *removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_wire_format() {
        let json = r#"{
            "event": "insert",
            "record": {
                "id": "srv-9",
                "createdAt": 1706745600500,
                "payload": {"text": "hi"},
                "origin": "confirmed"
            }
        }"#;
        let change: Change = serde_json::from_str(json).unwrap();

        assert_eq!(change.event(), "insert");
        assert_eq!(change.record_id(), "srv-9");
        match change {
            Change::Insert { record } => assert_eq!(record.payload, json!({"text": "hi"})),
            _ => panic!("Expected Insert change"),
        }

        let change: Change = serde_json::from_str(r#"{"event": "delete", "id": "srv-9"}"#).unwrap();
        assert_eq!(change, Change::Delete { id: "srv-9".into() });
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result: Result<Change, _> = serde_json::from_str(r#"{"event": "truncate"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn outcome_effectiveness() {
        let duplicate = ChangeOutcome::Insert(InsertOutcome {
            record_id: "srv-1".into(),
            inserted: false,
            retired: None,
        });
        assert!(!duplicate.is_effective());

        let update = ChangeOutcome::Update {
            record_id: "srv-1".into(),
            applied: true,
        };
        assert!(update.is_effective());

        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"event":"update","recordId":"srv-1","applied":true}"#);
    }
}
