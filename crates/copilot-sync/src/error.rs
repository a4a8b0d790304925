// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the copilot sync layer

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the transport layer.
///
/// Malformed upstream event sequences never produce an error; they are
/// repaired inside the reconciler. What remains here are configuration
/// problems, backend failures and rejected continuations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The upstream no longer recognises the continuation token, or it is
    /// waiting for a tool output this turn does not carry.
    #[error("Continuation rejected: {message}")]
    Continuation { message: String },

    #[error("Scenario error: {message}")]
    Scenario { message: String },

    #[error("HTTP client error: {source}")]
    HttpClient {
        #[from]
        source: reqwest::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("YAML serialization error: {source}")]
    YamlSerialization {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether the stored continuation token must be dropped so the next
    /// turn starts a fresh upstream conversation.
    pub fn requires_session_reset(&self) -> bool {
        matches!(self, Error::Continuation { .. })
    }

    /// Stable machine-readable code carried in `RUN_ERROR` events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config",
            Error::Backend { .. } | Error::HttpClient { .. } => "backend_unavailable",
            Error::Upstream { .. } => "upstream_error",
            Error::Continuation { .. } => "continuation_rejected",
            Error::Scenario { .. } => "scenario",
            Error::Serialization { .. } | Error::YamlSerialization { .. } => "serialization",
            Error::Io { .. } => "io",
        }
    }
}
