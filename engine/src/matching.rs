//! Matching confirmed records against optimistic placeholders.
//!
//! # Rules
//!
//! 1. Correlation: the confirmed record's `clientRef` or `id` equals the
//!    optimistic id. Exact, always preferred.
//! 2. Heuristic: content matches and the timestamps lie within the
//!    tolerance window. Only consulted when the confirmed record carries no
//!    `clientRef`, since a correlated record that finds no placeholder has
//!    already been retracted or confirmed.
//!
//! Only the first match in buffer order is reported, so two pending entries
//! with identical text are retired one confirmation at a time.

use crate::{error::Result, Error, Record};
use serde::{Deserialize, Serialize};

/// Default tolerance window in milliseconds.
pub const DEFAULT_TOLERANCE_MS: u64 = 2_000;

/// How payloads are compared by the heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentMatch {
    /// Every key of the optimistic payload has the same value in the
    /// confirmed payload. The server may add columns of its own.
    #[default]
    Subset,
    /// Whole payloads must be equal
    Exact,
    /// Only the listed keys are compared
    Fields(Vec<String>),
}

impl ContentMatch {
    /// Check if an optimistic payload matches a confirmed payload.
    pub fn matches(&self, optimistic: &serde_json::Value, confirmed: &serde_json::Value) -> bool {
        use serde_json::Value;

        match (self, optimistic, confirmed) {
            (ContentMatch::Subset, Value::Object(local), Value::Object(remote)) => local
                .iter()
                .all(|(key, value)| remote.get(key) == Some(value)),
            (ContentMatch::Fields(keys), Value::Object(local), Value::Object(remote)) => keys
                .iter()
                .all(|key| local.get(key) == remote.get(key)),
            _ => optimistic == confirmed,
        }
    }
}

/// Policy deciding when a confirmed record retires an optimistic one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchPolicy {
    /// Maximum distance between the two timestamps (milliseconds)
    pub tolerance_ms: u64,
    /// Payload comparison used by the heuristic
    pub content: ContentMatch,
    /// Match on id / clientRef
    pub correlate: bool,
    /// Fall back to content + time window matching
    pub heuristic: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            content: ContentMatch::Subset,
            correlate: true,
            heuristic: true,
        }
    }
}

impl MatchPolicy {
    /// Policy that relies on the backend echoing the temporary id.
    pub fn correlated_only() -> Self {
        Self {
            heuristic: false,
            ..Self::default()
        }
    }

    pub fn with_tolerance(mut self, tolerance_ms: u64) -> Self {
        self.tolerance_ms = tolerance_ms;
        self
    }

    pub fn with_content(mut self, content: ContentMatch) -> Self {
        self.content = content;
        self
    }

    /// Reject policies under which nothing could ever match.
    pub fn validate(&self) -> Result<()> {
        if !self.correlate && !self.heuristic {
            return Err(Error::InvalidPolicy(
                "correlation and heuristic matching are both disabled".into(),
            ));
        }
        if let ContentMatch::Fields(keys) = &self.content {
            if keys.is_empty() {
                return Err(Error::InvalidPolicy("field list is empty".into()));
            }
        }
        Ok(())
    }

    /// Exact correlation between a confirmed and an optimistic record.
    pub fn correlates(&self, confirmed: &Record, optimistic: &Record) -> bool {
        self.correlate
            && (confirmed.id == optimistic.id
                || confirmed.client_ref.as_deref() == Some(optimistic.id.as_str()))
    }

    /// Content and time-window match.
    pub fn resembles(&self, confirmed: &Record, optimistic: &Record) -> bool {
        self.heuristic
            && confirmed.created_at.abs_diff(optimistic.created_at) <= self.tolerance_ms
            && self.content.matches(&optimistic.payload, &confirmed.payload)
    }

    /// Position of the optimistic record retired by `confirmed`, if any.
    pub fn find_match<'a, I>(&self, confirmed: &Record, candidates: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a Record>,
        I::IntoIter: Clone,
    {
        let mut candidates = candidates.into_iter();

        if let Some(pos) = candidates
            .clone()
            .position(|optimistic| self.correlates(confirmed, optimistic))
        {
            return Some(pos);
        }

        if confirmed.client_ref.is_some() && self.correlate {
            return None;
        }

        candidates.position(|optimistic| self.resembles(confirmed, optimistic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subset_allows_extra_server_fields() {
        let content = ContentMatch::Subset;
        assert!(content.matches(
            &json!({"text": "hi"}),
            &json!({"text": "hi", "isRead": false, "senderId": "u1"})
        ));
        assert!(!content.matches(&json!({"text": "hi"}), &json!({"text": "hey"})));
    }

    #[test]
    fn exact_requires_equal_payloads() {
        let content = ContentMatch::Exact;
        assert!(content.matches(&json!({"text": "hi"}), &json!({"text": "hi"})));
        assert!(!content.matches(&json!({"text": "hi"}), &json!({"text": "hi", "isRead": false})));
    }

    #[test]
    fn fields_compare_only_listed_keys() {
        let content = ContentMatch::Fields(vec!["lat".into(), "lng".into()]);
        assert!(content.matches(
            &json!({"lat": 1.0, "lng": 2.0, "accuracy": 5}),
            &json!({"lat": 1.0, "lng": 2.0, "accuracy": 12})
        ));
        assert!(!content.matches(&json!({"lat": 1.0, "lng": 2.0}), &json!({"lat": 1.0, "lng": 3.0})));
    }

    #[test]
    fn scalar_payloads_compare_by_equality() {
        let content = ContentMatch::Fields(vec!["text".into()]);
        assert!(content.matches(&json!("hi"), &json!("hi")));
        assert!(!content.matches(&json!("hi"), &json!("ho")));
    }

    #[test]
    fn heuristic_respects_tolerance_window() {
        let policy = MatchPolicy::default();
        let optimistic = Record::optimistic("temp-1", 10_000, json!({"text": "hi"}));

        let near = Record::confirmed("srv-1", 12_000, json!({"text": "hi"}));
        let far = Record::confirmed("srv-2", 12_001, json!({"text": "hi"}));
        let before = Record::confirmed("srv-3", 8_000, json!({"text": "hi"}));

        assert!(policy.resembles(&near, &optimistic));
        assert!(!policy.resembles(&far, &optimistic));
        assert!(policy.resembles(&before, &optimistic));
    }

    #[test]
    fn correlation_wins_over_earlier_heuristic_candidate() {
        let policy = MatchPolicy::default();
        let buffer = vec![
            Record::optimistic("temp-1", 1000, json!({"text": "hi"})),
            Record::optimistic("temp-2", 1000, json!({"text": "hi"})),
        ];
        let confirmed =
            Record::confirmed("srv-1", 1100, json!({"text": "hi"})).with_client_ref("temp-2");

        assert_eq!(policy.find_match(&confirmed, &buffer), Some(1));
    }

    #[test]
    fn heuristic_takes_first_candidate_only() {
        let policy = MatchPolicy::default();
        let buffer = vec![
            Record::optimistic("temp-1", 1000, json!({"text": "hi"})),
            Record::optimistic("temp-2", 1000, json!({"text": "hi"})),
        ];
        let confirmed = Record::confirmed("srv-1", 1100, json!({"text": "hi"}));

        assert_eq!(policy.find_match(&confirmed, &buffer), Some(0));
    }

    #[test]
    fn dangling_client_ref_skips_heuristic() {
        let policy = MatchPolicy::default();
        let buffer = vec![Record::optimistic("temp-2", 1000, json!({"text": "hi"}))];
        let confirmed =
            Record::confirmed("srv-1", 1100, json!({"text": "hi"})).with_client_ref("temp-1");

        assert_eq!(policy.find_match(&confirmed, &buffer), None);
    }

    #[test]
    fn correlated_only_ignores_content() {
        let policy = MatchPolicy::correlated_only();
        let buffer = vec![Record::optimistic("temp-1", 1000, json!({"text": "hi"}))];
        let confirmed = Record::confirmed("srv-1", 1100, json!({"text": "hi"}));

        assert_eq!(policy.find_match(&confirmed, &buffer), None);
    }

    #[test]
    fn validate_rejects_unmatchable_policies() {
        let policy = MatchPolicy {
            correlate: false,
            heuristic: false,
            ..MatchPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(Error::InvalidPolicy(_))));

        let policy = MatchPolicy::default().with_content(ContentMatch::Fields(vec![]));
        assert!(policy.validate().is_err());

        assert!(MatchPolicy::default().validate().is_ok());
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: MatchPolicy = serde_json::from_str(r#"{"toleranceMs": 500}"#).unwrap();
        assert_eq!(policy.tolerance_ms, 500);
        assert!(policy.correlate);
        assert!(policy.heuristic);
        assert_eq!(policy.content, ContentMatch::Subset);

        let policy: MatchPolicy =
            serde_json::from_str(r#"{"content": {"fields": ["text"]}}"#).unwrap();
        assert_eq!(policy.content, ContentMatch::Fields(vec!["text".into()]));
    }
}
