//! Temporary ids for optimistic records.
//!
//! Optimistic records need an identity before the backend has issued one.
//! Temporary ids are prefixed so they can never collide with server ids. A
//! generator may carry a node tag so that ids minted by two devices in the
//! same millisecond stay distinct.

use crate::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Prefix shared by every client-generated id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Check if an id was minted on the client.
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Mints `temp-<timestamp>-<n>` ids, or `temp-<timestamp>-<n>-<node>` when
/// a node tag is set.
///
/// The counter is strictly increasing, so ids minted within the same
/// millisecond stay distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempIdGenerator {
    /// Number of ids minted so far
    pub counter: u64,
    /// Tag unique to this generator's owner (empty for none)
    #[serde(default)]
    pub node: String,
}

impl TempIdGenerator {
    /// Create a generator starting at counter 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose ids carry `node`.
    pub fn with_node(node: impl Into<String>) -> Self {
        Self {
            counter: 0,
            node: node.into(),
        }
    }

    /// Mint the next temporary id.
    pub fn next_id(&mut self, now: Timestamp) -> RecordId {
        self.counter += 1;
        if self.node.is_empty() {
            format!("{TEMP_ID_PREFIX}{now}-{}", self.counter)
        } else {
            format!("{TEMP_ID_PREFIX}{now}-{}-{}", self.counter, self.node)
        }
    }
}
