//! Engine Error Types
//!
//! Every failure surfaced by the engine carries a taxonomy tag, a
//! human-readable message, and optionally an actionable hint (e.g. which
//! column is missing). Consumers map the taxonomy to exit codes.

use thiserror::Error;

/// Engine errors, grouped by taxonomy tag
#[derive(Error, Debug)]
pub enum KontraError {
    /// Contract or rule configuration is invalid (unknown rule name,
    /// invalid parameter, duplicate rule-id, malformed contract)
    #[error("config error: {message}")]
    Config {
        message: String,
        hint: Option<String>,
    },

    /// Dataset cannot be resolved or read (bad URI, missing file/table,
    /// missing column, dtype mismatch during materialization)
    #[error("data error: {message}")]
    Data {
        message: String,
        hint: Option<String>,
    },

    /// Driver-level failure reaching a database or object store
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Custom-SQL validation rejection or pushdown execution failure
    #[error("sql error: {message}")]
    Sql { message: String },

    /// Internal invariant violated (e.g. tier disagreement). Fatal.
    #[error("runtime error: {message}")]
    Runtime { message: String },

    /// Per-call deadline exceeded
    #[error("cancelled: deadline of {deadline_ms}ms exceeded after {elapsed_ms}ms")]
    Cancelled { deadline_ms: u64, elapsed_ms: u64 },
}

impl KontraError {
    /// Config error without a hint
    pub fn config(message: impl Into<String>) -> Self {
        KontraError::Config {
            message: message.into(),
            hint: None,
        }
    }

    /// Config error with an actionable hint
    pub fn config_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        KontraError::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Data error without a hint
    pub fn data(message: impl Into<String>) -> Self {
        KontraError::Data {
            message: message.into(),
            hint: None,
        }
    }

    /// Data error with an actionable hint
    pub fn data_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        KontraError::Data {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        KontraError::Connection {
            message: message.into(),
        }
    }

    /// SQL error
    pub fn sql(message: impl Into<String>) -> Self {
        KontraError::Sql {
            message: message.into(),
        }
    }

    /// Internal invariant violation
    pub fn runtime(message: impl Into<String>) -> Self {
        KontraError::Runtime {
            message: message.into(),
        }
    }

    /// The taxonomy tag as a stable lowercase string
    pub fn taxonomy(&self) -> &'static str {
        match self {
            KontraError::Config { .. } => "config",
            KontraError::Data { .. } => "data",
            KontraError::Connection { .. } => "connection",
            KontraError::Sql { .. } => "sql",
            KontraError::Runtime { .. } => "runtime",
            KontraError::Cancelled { .. } => "cancelled",
        }
    }

    /// The actionable hint, when one exists
    pub fn hint(&self) -> Option<&str> {
        match self {
            KontraError::Config { hint, .. } | KontraError::Data { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KontraError {
    fn from(e: std::io::Error) -> Self {
        KontraError::data(format!("I/O error: {e}"))
    }
}

impl From<parquet::errors::ParquetError> for KontraError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        KontraError::data(format!("Parquet error: {e}"))
    }
}

impl From<arrow::error::ArrowError> for KontraError {
    fn from(e: arrow::error::ArrowError) -> Self {
        KontraError::data(format!("Arrow error: {e}"))
    }
}

impl From<serde_json::Error> for KontraError {
    fn from(e: serde_json::Error) -> Self {
        KontraError::data(format!("JSON error: {e}"))
    }
}

/// Result type for engine operations
pub type KontraResult<T> = Result<T, KontraError>;
