//! Synclist Client - realtime session runtime for optimistic list sync.
//!
//! Wraps the pure [`synclist_engine::Reconciler`] in an async session that
//! talks to a hosted backend: it loads the authoritative list, follows the
//! topic's change feed, and persists locally-created records while showing
//! them immediately as placeholders.
//!
//! ```no_run
//! use synclist_client::{MemoryBackend, SessionConfig, SyncSession};
//! use serde_json::json;
//!
//! # async fn demo() -> synclist_client::Result<()> {
//! let backend = MemoryBackend::new_shared();
//! let session = SyncSession::open(backend, "room-1", SessionConfig::default()).await?;
//!
//! let temp_id = session.send(json!({"text": "hello"})).await?;
//! assert!(synclist_engine::is_temp_id(&temp_id));
//!
//! let mut view = session.watch();
//! view.changed().await.ok();
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod session;

pub use backend::{Backend, Draft, MemoryBackend, Subscription};
pub use config::{Config, ConfigError};
pub use error::{BackendError, Result, SyncError};
pub use session::{now_millis, SessionConfig, SessionEvent, SessionHandle, SyncSession};
