//! Configuration management for sessions.

use std::env;
use std::time::Duration;

use synclist_engine::{MatchPolicy, DEFAULT_TOLERANCE_MS};

use crate::session::SessionConfig;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Channel / conversation the demo session follows
    pub topic: String,
    /// Tolerance window for heuristic matching (milliseconds)
    pub tolerance_ms: u64,
    /// Whether content/time matching is enabled
    pub heuristic: bool,
    /// Age after which unconfirmed placeholders are dropped
    pub stale_after_ms: Option<u64>,
    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic: "lobby".to_string(),
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            heuristic: true,
            stale_after_ms: None,
            event_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let topic = lookup("SYNCLIST_TOPIC").unwrap_or(defaults.topic);

        let tolerance_ms = match lookup("SYNCLIST_TOLERANCE_MS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidTolerance)?,
            None => defaults.tolerance_ms,
        };

        let heuristic = match lookup("SYNCLIST_HEURISTIC") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidHeuristic)?,
            None => defaults.heuristic,
        };

        let stale_after_ms = match lookup("SYNCLIST_STALE_AFTER_MS") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidStaleAfter)?),
            None => defaults.stale_after_ms,
        };

        let event_capacity = match lookup("SYNCLIST_EVENT_CAPACITY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidEventCapacity),
            },
            None => defaults.event_capacity,
        };

        Ok(Self {
            topic,
            tolerance_ms,
            heuristic,
            stale_after_ms,
            event_capacity,
        })
    }

    /// Session settings derived from this configuration.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            policy: MatchPolicy {
                tolerance_ms: self.tolerance_ms,
                heuristic: self.heuristic,
                ..MatchPolicy::default()
            },
            stale_after: self.stale_after_ms.map(Duration::from_millis),
            event_capacity: self.event_capacity,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid SYNCLIST_TOLERANCE_MS value")]
    InvalidTolerance,

    #[error("Invalid SYNCLIST_HEURISTIC value")]
    InvalidHeuristic,

    #[error("Invalid SYNCLIST_STALE_AFTER_MS value")]
    InvalidStaleAfter,

    #[error("SYNCLIST_EVENT_CAPACITY must be a positive integer")]
    InvalidEventCapacity,
}
