use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure of a single HTTP fetch after the retry policy has been applied.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("resource not found: {url}")]
    NotFound { url: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Network errors, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::NotFound { .. } | FetchError::InvalidUrl(_) => false,
        }
    }
}

/// A source could not produce its listing. Fatal to that source only.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("listing error: {message}")]
    Listing { message: String },
}

/// Failure while enriching one stub from its detail page.
#[derive(Error, Debug)]
pub enum DetailError {
    /// The detail page is gone; the stub is skipped.
    #[error("detail page not found")]
    NotFound,

    #[error(transparent)]
    Fetch(FetchError),

    #[error("detail error: {message}")]
    Other { message: String },
}

impl From<FetchError> for DetailError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { .. } => DetailError::NotFound,
            other => DetailError::Fetch(other),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("no usable date for '{title}'")]
    NoDate { title: String },

    #[error("event '{title}' started at {start_at}, more than a day ago")]
    PastEvent {
        title: String,
        start_at: DateTime<Utc>,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Errors that abort a whole ingestion invocation.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("another ingestion run ({run_id}) has been running since {started_at}")]
    LockContention {
        run_id: String,
        started_at: DateTime<Utc>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("ingestion run failed: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
