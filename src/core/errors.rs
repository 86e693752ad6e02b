//! LTC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LtcError>;

/// Top-level error type for the metrics engine.
#[derive(Debug, Error)]
pub enum LtcError {
    #[error("[LTC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LTC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LTC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LTC-1101] malformed filter {field}: {details}")]
    MalformedFilter {
        field: &'static str,
        details: String,
    },

    #[error("[LTC-2001] fact source unavailable: {details}")]
    SourceUnavailable { details: String },

    #[error("[LTC-2002] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[LTC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LTC-3001] compute cancelled during {stage}")]
    ComputeCancelled { stage: &'static str },

    #[error("[LTC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LTC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LtcError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LTC-1001",
            Self::MissingConfig { .. } => "LTC-1002",
            Self::ConfigParse { .. } => "LTC-1003",
            Self::MalformedFilter { .. } => "LTC-1101",
            Self::SourceUnavailable { .. } => "LTC-2001",
            Self::Sql { .. } => "LTC-2002",
            Self::Serialization { .. } => "LTC-2101",
            Self::ComputeCancelled { .. } => "LTC-3001",
            Self::Io { .. } => "LTC-3002",
            Self::Runtime { .. } => "LTC-3900",
        }
    }

    /// Whether a single bounded retry might resolve the failure.
    ///
    /// Cancellation and bad input are never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::Sql { .. } | Self::Io { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for filter validation failures.
    #[must_use]
    pub fn malformed(field: &'static str, details: impl Into<String>) -> Self {
        Self::MalformedFilter {
            field,
            details: details.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for LtcError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for LtcError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LtcError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
