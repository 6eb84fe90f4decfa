//! Shared error taxonomy for adapters, configuration, and matching.

use thiserror::Error;

/// Errors surfaced by a venue adapter.
///
/// `NetworkTimeout`/`NetworkUnavailable` are recovered locally by the caller
/// (fall back to cache, mark the venue `ERROR` for the scan); `AuthenticationFailed`
/// is escalated by the orchestrator to a permanent `DISABLED` venue state.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request to {venue} timed out")]
    NetworkTimeout { venue: String },

    #[error("{venue} unreachable: {reason}")]
    NetworkUnavailable { venue: String, reason: String },

    #[error("{venue} rejected credentials")]
    AuthenticationFailed { venue: String },

    #[error("{venue} payload failed validation: {reason}")]
    ParseError { venue: String, reason: String },

    #[error("{venue} websocket gave up after max reconnect attempts")]
    SubscriptionDied { venue: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    MissingValue(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
