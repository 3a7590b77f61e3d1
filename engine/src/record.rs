//! Record types for synchronized items.

use crate::{temp_id::is_temp_id, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Origin of a record.
///
/// Defaults to `Confirmed` when absent from JSON; the reconciler sets it on
/// every record it accepts anyway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Client-side placeholder awaiting confirmation
    Optimistic,
    /// Returned or pushed by the authoritative backend
    #[default]
    Confirmed,
}

/// A synchronized item: a chat message, a location ping, an overlay entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Durable server id, or a temporary id for optimistic records
    pub id: RecordId,
    /// Creation time (milliseconds since epoch)
    pub created_at: Timestamp,
    /// Opaque content (message text, lat/long pair, ...)
    pub payload: serde_json::Value,
    /// Whether the record is a local placeholder or server-confirmed
    #[serde(default)]
    pub origin: Origin,
    /// Temporary id the write was issued under, when the backend echoes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<RecordId>,
}

impl Record {
    /// Create an optimistic record.
    pub fn optimistic(
        id: impl Into<RecordId>,
        created_at: Timestamp,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            payload,
            origin: Origin::Optimistic,
            client_ref: None,
        }
    }

    /// Create a confirmed record.
    pub fn confirmed(
        id: impl Into<RecordId>,
        created_at: Timestamp,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            created_at,
            payload,
            origin: Origin::Confirmed,
            client_ref: None,
        }
    }

    /// Attach the temporary id this record confirms.
    pub fn with_client_ref(mut self, client_ref: impl Into<RecordId>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    pub fn is_optimistic(&self) -> bool {
        self.origin == Origin::Optimistic
    }

    pub fn is_confirmed(&self) -> bool {
        self.origin == Origin::Confirmed
    }

    /// Check if the id is a client-generated temporary id.
    pub fn is_temporary(&self) -> bool {
        is_temp_id(&self.id)
    }

    /// Apply the mutable fields of an update notification.
    ///
    /// Object patches are merged key by key into an object payload; anything
    /// else replaces the payload. Identity and timestamp never change.
    pub fn apply_patch(&mut self, patch: &serde_json::Value) {
        match (&mut self.payload, patch) {
            (serde_json::Value::Object(current), serde_json::Value::Object(fields)) => {
                for (key, value) in fields {
                    current.insert(key.clone(), value.clone());
                }
            }
            (payload, patch) => *payload = patch.clone(),
        }
    }
}
