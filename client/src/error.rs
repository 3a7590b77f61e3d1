//! Unified error handling for sessions and backends.

use synclist_engine::RecordId;

/// Failure reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("channel closed")]
    Closed,
}

/// Errors surfaced to the owner of a session.
///
/// None of these are retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Fetch failed for '{topic}': {reason}")]
    FetchFailed { topic: String, reason: BackendError },

    #[error("Write failed for {temp_id}: {reason}")]
    WriteFailed {
        temp_id: RecordId,
        reason: BackendError,
    },

    #[error("Subscribe failed for '{topic}': {reason}")]
    SubscribeFailed { topic: String, reason: BackendError },

    #[error("Subscription dropped for '{topic}'")]
    SubscriptionDropped { topic: String },

    #[error("Session closed")]
    SessionClosed,

    #[error("Engine error: {0}")]
    Engine(#[from] synclist_engine::Error),
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::WriteFailed {
            temp_id: "temp-1".into(),
            reason: BackendError::Rejected("row level security".into()),
        };
        assert_eq!(
            err.to_string(),
            "Write failed for temp-1: request rejected: row level security"
        );

        let err = SyncError::SubscriptionDropped {
            topic: "room-1".into(),
        };
        assert_eq!(err.to_string(), "Subscription dropped for 'room-1'");

        let err: SyncError = synclist_engine::Error::MissingField("id".into()).into();
        assert_eq!(err.to_string(), "Engine error: missing field: id");
    }
}
