use asmlens_metadata::MetadataError;
use asmlens_storage::{ErrorKind, StepName, StepStatus, StorageError};
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("Invalid analysis id: {0}")]
    InvalidAnalysisId(String),

    #[error("Analysis not found: {0}")]
    AnalysisNotFound(String),

    #[error("Step {step} is not completed yet (status: {status})")]
    StepNotCompleted { step: StepName, status: StepStatus },

    #[error("Step {step} failed: {error}")]
    StepFailed { step: StepName, error: String },

    #[error("{0}")]
    StepCannotBeRetried(String),

    #[error("{0}")]
    DuplicateStep(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Artifact {file_name} missing for analysis {analysis_id}")]
    ArtifactMissing {
        analysis_id: String,
        file_name: String,
    },

    /// Durable state and artifact files disagree
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Step execution failed: {0}")]
    StepExecution(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Metadata(MetadataError),
}

impl OrchestratorError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn execution<E: std::fmt::Display>(e: E) -> Self {
        Self::StepExecution(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidModule(_) | Self::InvalidAnalysisId(_) => ErrorCategory::InvalidInput,
            Self::AnalysisNotFound(_) => ErrorCategory::NotFound,
            Self::StepNotCompleted { .. } | Self::StepFailed { .. } => ErrorCategory::NotReady,
            Self::StepCannotBeRetried(_) | Self::DuplicateStep(_) | Self::InvalidTransition(_) => {
                ErrorCategory::Conflict
            }
            Self::ArtifactMissing { .. } => ErrorCategory::NotFound,
            Self::Consistency(_) => ErrorCategory::Consistency,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::StepExecution(_) => ErrorCategory::Execution,
            Self::Storage(e) if e.is_not_found() => ErrorCategory::NotFound,
            Self::Serialization(_) | Self::Io(_) | Self::Storage(_) => {
                ErrorCategory::Infrastructure
            }
            Self::Metadata(e) if e.is_invalid_input() => ErrorCategory::InvalidInput,
            Self::Metadata(MetadataError::HandleNotFound(_)) => ErrorCategory::NotFound,
            Self::Metadata(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Internal errors surface as 5xx to callers
    pub fn is_internal(&self) -> bool {
        self.category().is_internal()
    }
}

impl From<StorageError> for OrchestratorError {
    fn from(err: StorageError) -> Self {
        match err.kind {
            ErrorKind::AnalysisNotFound => Self::AnalysisNotFound(err.message),
            ErrorKind::StepCannotBeRetried => Self::StepCannotBeRetried(err.message),
            ErrorKind::DuplicateStep => Self::DuplicateStep(err.message),
            ErrorKind::InvalidTransition => Self::InvalidTransition(err.message),
            _ => Self::Storage(err),
        }
    }
}

impl From<MetadataError> for OrchestratorError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::InvalidModule(msg) => Self::InvalidModule(msg),
            other => Self::Metadata(other),
        }
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        Self::config(err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

/// Error category used by callers to map failures onto responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// The caller sent something unusable (e.g., not a managed module)
    InvalidInput,
    /// Unknown analysis, step, artifact or entity
    NotFound,
    /// The requested step has not produced its artifact (yet)
    NotReady,
    /// Request conflicts with current step state
    Conflict,
    /// Bad or incomplete wiring/configuration
    Configuration,
    /// Durable state and files disagree
    Consistency,
    /// A step executor failed
    Execution,
    /// Store, filesystem or serialization failure
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::NotReady => "not_ready",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Consistency => "consistency",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Configuration | ErrorCategory::Consistency | ErrorCategory::Infrastructure
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_keep_their_meaning() {
        let err: OrchestratorError = StorageError::analysis_not_found("a-1").into();
        assert!(matches!(err, OrchestratorError::AnalysisNotFound(_)));
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let err: OrchestratorError = StorageError::cannot_retry("Metadata", "Completed").into();
        assert!(matches!(err, OrchestratorError::StepCannotBeRetried(_)));
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(!err.is_internal());

        let err: OrchestratorError = StorageError::database("disk I/O error").into();
        assert!(matches!(err, OrchestratorError::Storage(_)));
        assert!(err.is_internal());
    }

    #[test]
    fn test_metadata_errors() {
        let err: OrchestratorError = MetadataError::invalid("missing BSJB signature").into();
        assert!(matches!(err, OrchestratorError::InvalidModule(_)));
        assert_eq!(err.category(), ErrorCategory::InvalidInput);

        let err: OrchestratorError = MetadataError::HandleNotFound(0x0200_0099).into();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_internal_categories() {
        assert!(OrchestratorError::Consistency("x".into()).is_internal());
        assert!(OrchestratorError::Config("x".into()).is_internal());
        assert!(!OrchestratorError::StepFailed {
            step: StepName::Metadata,
            error: "boom".into()
        }
        .is_internal());
        assert_eq!(ErrorCategory::NotReady.to_string(), "not_ready");
    }
}
