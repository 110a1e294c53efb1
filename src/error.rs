// src/error.rs

//! Unified error handling for the crawler application.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Upstream request failed after every transport was tried
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Persisting one entity failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot file exists but cannot be used
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// The crawl exceeded its hard time limit
    #[error("Crawl exceeded hard time limit of {limit_secs}s")]
    HardTimeLimit { limit_secs: u64 },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a snapshot error.
    pub fn snapshot(message: impl fmt::Display) -> Self {
        Self::Snapshot(message.to_string())
    }
}

/// Classification of a transport failure, fixed where the failure is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request was rejected by an intermediary proxy (HTTP 407 class).
    ProxyRejected,
    /// The request timed out.
    Timeout,
    /// No connection could be established.
    Connect,
    /// The upstream answered with a non-success status.
    Status(u16),
    /// The body was not a valid search response.
    Decode,
    /// The external client process could not be run or exited abnormally.
    Subprocess,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProxyRejected => f.write_str("proxy rejected"),
            Self::Timeout => f.write_str("timeout"),
            Self::Connect => f.write_str("connect"),
            Self::Status(code) => write!(f, "status {code}"),
            Self::Decode => f.write_str("decode"),
            Self::Subprocess => f.write_str("subprocess"),
        }
    }
}

/// A failed page request.
#[derive(Error, Debug)]
pub enum TransportError {
    /// One transport failed.
    #[error("{transport} transport failed ({kind}): {message}")]
    Failed {
        transport: &'static str,
        kind: TransportErrorKind,
        message: String,
    },

    /// Both transports failed for the same request.
    #[error("all transports failed; primary: {primary}; secondary: {secondary}")]
    Exhausted {
        primary: Box<TransportError>,
        secondary: Box<TransportError>,
    },
}

impl TransportError {
    /// Create a single-transport failure.
    pub fn failed(
        transport: &'static str,
        kind: TransportErrorKind,
        message: impl fmt::Display,
    ) -> Self {
        Self::Failed {
            transport,
            kind,
            message: message.to_string(),
        }
    }

    /// Combine the failures of both transports.
    pub fn exhausted(primary: TransportError, secondary: TransportError) -> Self {
        Self::Exhausted {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }

    /// Classification of the failure. For combined failures, the primary cause wins.
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Failed { kind, .. } => *kind,
            Self::Exhausted { primary, .. } => primary.kind(),
        }
    }

    /// Whether the upstream refused the request for non-content reasons.
    pub fn is_proxy_rejection(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                kind: TransportErrorKind::ProxyRejected,
                ..
            }
        )
    }
}

/// One field of a raw record that could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A raw record that could not be normalized. Only that record is dropped.
#[derive(Error, Debug, Clone)]
#[error("record {} rejected: {}", .source_id.as_deref().unwrap_or("<no id>"), join_issues(.issues))]
pub struct NormalizationError {
    pub source_id: Option<String>,
    pub issues: Vec<FieldIssue>,
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single entity could not be written.
#[derive(Error, Debug, Clone)]
#[error("failed to persist listing {source_id}: {message}")]
pub struct PersistenceError {
    pub source_id: String,
    pub message: String,
}

impl PersistenceError {
    pub fn new(source_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }
}
