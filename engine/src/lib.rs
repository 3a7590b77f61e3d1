//! # Synclist Engine
//!
//! A deterministic reconciler for realtime lists backed by a hosted platform.
//!
//! Records the user creates (a chat message, a location ping) are shown
//! immediately as *optimistic* placeholders. The platform later confirms
//! them, either in the response to the write or through a change
//! notification pushed over a subscription channel. This crate merges the
//! two streams into one deduplicated, ordered view.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of network, platform or UI
//! - **Deterministic**: Same inputs always produce the same view
//! - **Infallible core**: The reconciler is pure data transformation
//! - **Portable**: Exposed over a C ABI for mobile hosts
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has an id (durable server id, or a temporary `temp-` id),
//! a creation timestamp, an opaque JSON payload and an [`Origin`].
//!
//! ### Matching
//!
//! A confirmed record retires an optimistic one when they share an id or a
//! correlation token, or, failing that, when their content matches and their
//! timestamps fall within the [`MatchPolicy`] tolerance window.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] holds the authoritative list and the optimistic buffer
//! and folds [`Change`] notifications into both.
//!
//! ## Quick Start
//!
//! ```rust
//! use synclist_engine::{Change, MatchPolicy, Reconciler, Record};
//! use serde_json::json;
//!
//! let mut reconciler = Reconciler::new(MatchPolicy::default());
//!
//! // 1. Show the message immediately
//! let temp_id = reconciler.stage(json!({"text": "hi"}), 1_706_745_600_000);
//! assert_eq!(reconciler.view().len(), 1);
//!
//! // 2. The platform confirms it half a second later
//! let confirmed = Record::confirmed("srv-9", 1_706_745_600_500, json!({"text": "hi"}));
//! reconciler.apply_change(Change::Insert { record: confirmed });
//!
//! // 3. Only the confirmed record remains
//! let view = reconciler.view();
//! assert_eq!(view.len(), 1);
//! assert_eq!(view[0].id, "srv-9");
//! assert!(reconciler.get(&temp_id).is_none());
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module provides C-compatible functions for use from other
//! languages. All data is exchanged as JSON strings.

pub mod change;
pub mod error;
pub mod ffi;
pub mod matching;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod temp_id;

// Re-export main types at crate root
pub use change::{Change, ChangeOutcome, FetchOutcome, InsertOutcome, Retirement};
pub use error::Error;
pub use matching::{ContentMatch, MatchPolicy, DEFAULT_TOLERANCE_MS};
pub use reconcile::Reconciler;
pub use record::{Origin, Record};
pub use schema::RowSchema;
pub use temp_id::{is_temp_id, TempIdGenerator, TEMP_ID_PREFIX};

/// Type aliases for clarity
pub type RecordId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
