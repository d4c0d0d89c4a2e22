use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Classification of a per-location failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure (connect, read, timeout) after exhausting retries.
    Network,
    /// The provider could not resolve the location.
    NotFound,
    /// The credential was rejected.
    Auth,
    /// Rate limiting or server errors persisted after exhausting retries.
    TransientExhausted,
    /// A response arrived but could not be interpreted.
    MalformedResponse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Auth => "auth",
            ErrorKind::TransientExhausted => "transient_exhausted",
            ErrorKind::MalformedResponse => "malformed_response",
        }
    }

    /// Short guidance shown next to the failure.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Check your network connection or raise --timeout.",
            ErrorKind::NotFound => {
                "Check spelling; quote names with spaces (e.g. \"New York\")."
            }
            ErrorKind::Auth => {
                "Check credential configuration (OPENWEATHER_API_KEY or `weather configure`)."
            }
            ErrorKind::TransientExhausted => {
                "Provider is rate limiting or overloaded; wait a bit or use --cache-day."
            }
            ErrorKind::MalformedResponse => "Unexpected provider response; try again later.",
        }
    }

}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure half of a [`crate::FetchOutcome`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {detail}")]
pub struct LookupFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl LookupFailure {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }
}

/// Result of a single provider attempt that did not yield a reading.
///
/// Providers map their wire-level errors onto these variants; the lookup
/// client decides which of them are worth another attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {detail}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        detail: String,
    },

    #[error("location not found: {0}")]
    NotFound(String),

    #[error("credential rejected: {0}")]
    Unauthorized(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Pipeline-level errors. Per-location problems never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to access log file {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write cache file {}: {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
