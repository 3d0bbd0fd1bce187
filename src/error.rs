//! The core error type and the user-facing error classification taxonomy (§4.14, §7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The possible errors that can occur anywhere in the core.
#[derive(Debug, Error)]
pub enum Error {
    /// An error occurred while interacting with the file system.
    #[error("An IO error occurred: {0}")]
    Io(#[from] std::io::Error),
    /// An error occurred while parsing or writing JSON.
    #[error("A JSON error occurred: {0}")]
    Json(#[from] serde_json::Error),
    /// An error occurred while parsing the TOML configuration.
    #[error("A TOML parse error occurred: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// An error occurred while serializing to TOML.
    #[error("A TOML serialize error occurred: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// An error occurred while joining a spawned task.
    #[error("A task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The configuration file could not be parsed into a valid [`crate::config::Config`].
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A source URL could not be classified as a known Spotify or YouTube resource.
    #[error("Unrecognized URL: {0}")]
    UnrecognizedUrl(String),
    /// `download` was requested for a config hash with no matching plan file.
    #[error("No plan file found for config hash {0}")]
    PlanNotFound(String),
    /// The plan file on disk was generated from a different configuration.
    #[error("Plan hash mismatch: expected {expected}, found {found}")]
    PlanHashMismatch {
        /// The hash of the configuration currently on disk.
        expected: String,
        /// The `config_hash` embedded in the loaded plan file.
        found: String,
    },
    /// The Spotify metadata port returned an error.
    #[error("Spotify error: {0}")]
    Spotify(String),
    /// The audio provider port returned an error.
    #[error("Audio provider error: {0}")]
    Audio(String),
    /// An operation was cancelled via its context.
    #[error("Operation cancelled")]
    Cancelled,
    /// The run controller rejected a request because a run is already in progress.
    #[error("An operation is already running")]
    AlreadyRunning,
    /// The run controller rejected a request because the circuit breaker is open.
    #[error("Circuit breaker is open; retry after {retry_after:?}")]
    BreakerOpen {
        /// How long until the breaker allows a probe request.
        retry_after: Duration,
    },
    /// At least one track item failed during a download run.
    #[error("{failed} of {total} tracks failed")]
    PartialFailure {
        /// Number of failed track items.
        failed: usize,
        /// Total number of track items in the run.
        total: usize,
    },
    /// Catch-all for errors surfaced by external collaborators (ports) as plain text.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for [`Error::Cancelled`], used to distinguish cancellation from
    /// ordinary per-item failures when recording classified errors (§5).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// A stable machine-readable error code (§4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    RateLimited,
    NetworkError,
    Timeout,
    AuthError,
    NotFound,
    FilesystemError,
    YtdlpError,
    Cancelled,
    Unknown,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::FilesystemError => "FILESYSTEM_ERROR",
            ErrorCode::YtdlpError => "YTDLP_ERROR",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing, classified error (§4.14, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub message: String,
    pub explanation: String,
    pub suggestion: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

/// Name of the audio extraction tool, used to recognize its error substrings.
const AUDIO_TOOL_NAME: &str = "rustypipe";

/// Classify a raw error message into the taxonomy of §4.14.
///
/// Matching is substring-based and case-insensitive, exactly as specified:
/// the first matching pattern wins, in the table order below.
pub fn classify(message: &str) -> ClassifiedError {
    let lower = message.to_lowercase();

    let (code, explanation, suggestion, retryable) = if contains_any(
        &lower,
        &["429", "rate limit", "too many requests"],
    ) {
        (
            ErrorCode::RateLimited,
            "The upstream API is throttling requests.",
            "Wait for the rate limit window to reset, or reduce concurrency.",
            true,
        )
    } else if contains_any(
        &lower,
        &[
            "connection refused",
            "no such host",
            "network unreachable",
            "dial",
        ],
    ) {
        (
            ErrorCode::NetworkError,
            "A network connection could not be established.",
            "Check your internet connection and try again.",
            true,
        )
    } else if contains_any(&lower, &["timeout", "deadline exceeded"]) {
        (
            ErrorCode::Timeout,
            "The operation did not complete within its deadline.",
            "Retry the operation; consider raising the timeout.",
            true,
        )
    } else if contains_any(&lower, &["401", "unauthorized", "authentication"]) {
        (
            ErrorCode::AuthError,
            "The provided credentials were rejected.",
            "Check your client id and client secret.",
            false,
        )
    } else if contains_any(&lower, &["404", "not found"]) {
        (
            ErrorCode::NotFound,
            "The requested resource does not exist.",
            "Double check the URL or ID.",
            false,
        )
    } else if contains_any(
        &lower,
        &["permission denied", "no space", "read-only", "disk quota"],
    ) {
        (
            ErrorCode::FilesystemError,
            "A filesystem operation failed.",
            "Check disk space and directory permissions.",
            false,
        )
    } else if lower.contains(AUDIO_TOOL_NAME) {
        (
            ErrorCode::YtdlpError,
            "The audio extraction tool reported an error.",
            "Retry; if it persists, the tool or the source may need updating.",
            true,
        )
    } else if lower.contains("cancelled") || lower.contains("canceled") {
        (
            ErrorCode::Cancelled,
            "The operation was cancelled.",
            "Re-run the operation if it was not intentional.",
            true,
        )
    } else {
        (
            ErrorCode::Unknown,
            "An unclassified error occurred.",
            "Check the logs for more detail.",
            true,
        )
    };

    ClassifiedError {
        code,
        message: message.to_string(),
        explanation: explanation.to_string(),
        suggestion: suggestion.to_string(),
        retryable,
        timestamp: Utc::now(),
    }
}

/// Classify an [`Error`] by its `Display` text, short-circuiting to the exact
/// code for the variants that already carry unambiguous semantics.
pub fn classify_error(err: &Error) -> ClassifiedError {
    match err {
        Error::Cancelled => classify("cancelled"),
        _ => classify(&err.to_string()),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        let c = classify("received HTTP 429 Too Many Requests");
        assert_eq!(c.code, ErrorCode::RateLimited);
        assert!(c.retryable);
    }

    #[test]
    fn classifies_auth_error_as_non_retryable() {
        let c = classify("401 Unauthorized: bad token");
        assert_eq!(c.code, ErrorCode::AuthError);
        assert!(!c.retryable);
    }

    #[test]
    fn classifies_not_found() {
        let c = classify("Spotify API returned 404 Not Found");
        assert_eq!(c.code, ErrorCode::NotFound);
        assert!(!c.retryable);
    }

    #[test]
    fn classifies_filesystem_error() {
        let c = classify("write failed: permission denied");
        assert_eq!(c.code, ErrorCode::FilesystemError);
        assert!(!c.retryable);
    }

    #[test]
    fn classifies_unknown_as_retryable() {
        let c = classify("something unexpected happened");
        assert_eq!(c.code, ErrorCode::Unknown);
        assert!(c.retryable);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let c = classify("DEADLINE EXCEEDED while fetching playlist");
        assert_eq!(c.code, ErrorCode::Timeout);
    }
}
