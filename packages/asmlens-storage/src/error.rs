//! Error types for asmlens-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// No analysis row with the given id
    AnalysisNotFound,
    /// The analysis exists but has no row for the step
    StepNotFound,
    /// `(analysis_id, step)` already present
    DuplicateStep,
    /// Status change outside the step state machine
    InvalidTransition,
    /// Retry requested for a step that is not Failed
    StepCannotBeRetried,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::AnalysisNotFound => "analysis_not_found",
            ErrorKind::StepNotFound => "step_not_found",
            ErrorKind::DuplicateStep => "duplicate_step",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::StepCannotBeRetried => "step_cannot_be_retried",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn analysis_not_found(analysis_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::AnalysisNotFound,
            format!("Analysis not found: {}", analysis_id.into()),
        )
    }

    pub fn step_not_found(analysis_id: &str, step: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::StepNotFound,
            format!("Step {} not found for analysis {}", step, analysis_id),
        )
    }

    pub fn duplicate_step(analysis_id: &str, step: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::DuplicateStep,
            format!("Step {} already exists for analysis {}", step, analysis_id),
        )
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTransition, message)
    }

    pub fn cannot_retry(step: impl fmt::Display, status: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::StepCannotBeRetried,
            format!("Step {} is {} and can only be retried from Failed", step, status),
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::AnalysisNotFound | ErrorKind::StepNotFound)
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi, _) = &err {
            if ffi.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || ffi.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return StorageError::new(
                    ErrorKind::DuplicateStep,
                    format!("Unique constraint violated: {}", err),
                )
                .with_source(err);
            }
        }
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
