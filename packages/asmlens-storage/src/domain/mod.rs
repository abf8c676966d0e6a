//! Domain layer for analysis bookkeeping
//!
//! # Domain Models
//!
//! - `AnalysisRecord`: one uploaded module and its aggregate status
//! - `StepRecord`: one pipeline step of an analysis, unique per `(analysis_id, step)`
//! - `StepName` / `StepStatus` / `OverallStatus`: closed vocabularies
//!
//! # Step state machine
//!
//! ```text
//! Pending ──claim──▶ Processing ──▶ Completed
//!    ▲                   │
//!    └──── retry ──── Failed ◀┘
//! ```
//!
//! `NotProcessed` marks steps that were never scheduled and admits no transition.
//!
//! # Port Trait
//!
//! - `StepStateStore`: durable step state with an atomic claim

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Vocabularies
// ═══════════════════════════════════════════════════════════════════════════

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepName {
    Metadata,
    Statistics,
    TypeTree,
    Dependencies,
    InheritanceGraph,
    Export,
}

impl StepName {
    pub const ALL: [StepName; 6] = [
        StepName::Metadata,
        StepName::Statistics,
        StepName::TypeTree,
        StepName::Dependencies,
        StepName::InheritanceGraph,
        StepName::Export,
    ];

    /// Steps created with every analysis.
    pub const REQUIRED: [StepName; 5] = [
        StepName::Metadata,
        StepName::Statistics,
        StepName::TypeTree,
        StepName::Dependencies,
        StepName::InheritanceGraph,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Metadata => "Metadata",
            StepName::Statistics => "Statistics",
            StepName::TypeTree => "TypeTree",
            StepName::Dependencies => "Dependencies",
            StepName::InheritanceGraph => "InheritanceGraph",
            StepName::Export => "Export",
        }
    }

    pub fn is_required(&self) -> bool {
        !matches!(self, StepName::Export)
    }

    /// Artifact written by the step under the analysis directory
    pub fn artifact_file_name(&self) -> &'static str {
        match self {
            StepName::Metadata => "metadata.json",
            StepName::Statistics => "statistics.json",
            StepName::TypeTree => "type_tree.json",
            StepName::Dependencies => "dependencies.json",
            StepName::InheritanceGraph => "inheritance_graph.json",
            StepName::Export => "analysis.zip",
        }
    }

    pub fn has_json_artifact(&self) -> bool {
        !matches!(self, StepName::Export)
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        StepName::ALL
            .into_iter()
            .find(|step| step.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StorageError::serialization(format!("Unknown step name: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    NotProcessed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "Pending",
            StepStatus::Processing => "Processing",
            StepStatus::Completed => "Completed",
            StepStatus::Failed => "Failed",
            StepStatus::NotProcessed => "NotProcessed",
        }
    }

    /// Legal edges of the step state machine
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Processing)
                | (StepStatus::Processing, StepStatus::Completed)
                | (StepStatus::Processing, StepStatus::Failed)
                | (StepStatus::Failed, StepStatus::Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(StepStatus::Pending),
            "Processing" => Ok(StepStatus::Processing),
            "Completed" => Ok(StepStatus::Completed),
            "Failed" => Ok(StepStatus::Failed),
            "NotProcessed" => Ok(StepStatus::NotProcessed),
            other => Err(StorageError::serialization(format!(
                "Unknown step status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverallStatus {
    Pending,
    Processing,
    PartiallyCompleted,
    Completed,
    Failed,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Pending => "Pending",
            OverallStatus::Processing => "Processing",
            OverallStatus::PartiallyCompleted => "PartiallyCompleted",
            OverallStatus::Completed => "Completed",
            OverallStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverallStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(OverallStatus::Pending),
            "Processing" => Ok(OverallStatus::Processing),
            "PartiallyCompleted" => Ok(OverallStatus::PartiallyCompleted),
            "Completed" => Ok(OverallStatus::Completed),
            "Failed" => Ok(OverallStatus::Failed),
            other => Err(StorageError::serialization(format!(
                "Unknown overall status: {}",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub original_file_name: String,
    pub overall_status: OverallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(id: impl Into<String>, original_file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            original_file_name: original_file_name.into(),
            overall_status: OverallStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub analysis_id: String,
    pub step: StepName,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl StepRecord {
    pub fn pending(analysis_id: impl Into<String>, step: StepName) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            step,
            status: StepStatus::Pending,
            error_message: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }
}

/// Aggregate status over the steps of one analysis.
///
/// Precedence: any Processing, then any required Failed, then all required
/// Completed, then some required Completed, else Pending. Optional steps only
/// contribute through Processing.
pub fn compute_overall_status(steps: &[StepRecord]) -> OverallStatus {
    if steps.iter().any(|s| s.status == StepStatus::Processing) {
        return OverallStatus::Processing;
    }

    let required: Vec<&StepRecord> = steps.iter().filter(|s| s.step.is_required()).collect();
    if required.iter().any(|s| s.status == StepStatus::Failed) {
        return OverallStatus::Failed;
    }

    let completed = required
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .count();
    if !required.is_empty() && completed == required.len() {
        OverallStatus::Completed
    } else if completed > 0 {
        OverallStatus::PartiallyCompleted
    } else {
        OverallStatus::Pending
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Durable step state.
///
/// Every mutation recomputes the analysis' `overall_status` in the same
/// transaction. Status changes outside [`StepStatus::can_transition_to`] fail
/// with `InvalidTransition` and leave the row untouched.
#[async_trait]
pub trait StepStateStore: Send + Sync {
    /// Inserts the analysis plus one Pending row per step, atomically.
    ///
    /// # Errors
    /// - `DuplicateStep` if the id is already taken or `steps` repeats a name
    async fn create_analysis(&self, record: &AnalysisRecord, steps: &[StepName]) -> Result<()>;

    /// # Errors
    /// - `AnalysisNotFound`
    async fn get_analysis(&self, analysis_id: &str) -> Result<AnalysisRecord>;

    /// Steps in insertion order.
    ///
    /// # Errors
    /// - `AnalysisNotFound`
    async fn list_steps(&self, analysis_id: &str) -> Result<Vec<StepRecord>>;

    /// # Errors
    /// - `AnalysisNotFound`, `StepNotFound`
    async fn get_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord>;

    /// Flips the first Pending step (insertion order) to Processing.
    ///
    /// Two concurrent callers never claim the same row. `None` when nothing is
    /// Pending; nothing is written in that case.
    async fn claim_next_pending(&self, analysis_id: &str) -> Result<Option<StepRecord>>;

    /// Processing → Completed, stamping `completed_at`.
    async fn complete_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord>;

    /// Processing → Failed with an error message, stamping `completed_at`.
    async fn fail_step(&self, analysis_id: &str, step: StepName, error: &str) -> Result<StepRecord>;

    /// Failed → Pending; clears error and timestamps, bumps `retry_count`.
    ///
    /// # Errors
    /// - `StepCannotBeRetried` from any other status
    async fn reset_failed_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord>;

    /// Appends an optional step once every required step is Completed.
    ///
    /// # Errors
    /// - `DuplicateStep` if the step already exists
    /// - `InvalidTransition` while required steps are outstanding
    async fn add_optional_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord>;

    /// Fails every step Processing for longer than `max_age`.
    async fn reconcile_stale_steps(&self, max_age: chrono::Duration) -> Result<Vec<StepRecord>>;

    /// Removes the analysis and, by cascade, its steps. `false` if absent.
    async fn delete_analysis(&self, analysis_id: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step: StepName, status: StepStatus) -> StepRecord {
        StepRecord {
            status,
            ..StepRecord::pending("a", step)
        }
    }

    fn required_with(status: StepStatus) -> Vec<StepRecord> {
        StepName::REQUIRED.iter().map(|s| step(*s, status)).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Vocabulary Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_step_names_round_trip() {
        for name in StepName::ALL {
            assert_eq!(name.as_str().parse::<StepName>().unwrap(), name);
        }
        assert_eq!("typetree".parse::<StepName>().unwrap(), StepName::TypeTree);
        assert!("Decompile".parse::<StepName>().is_err());
    }

    #[test]
    fn test_only_export_is_optional() {
        assert!(StepName::REQUIRED.iter().all(|s| s.is_required()));
        assert!(!StepName::Export.is_required());
        assert_eq!(StepName::Export.artifact_file_name(), "analysis.zip");
        assert!(!StepName::Export.has_json_artifact());
        assert_eq!(
            StepName::InheritanceGraph.artifact_file_name(),
            "inheritance_graph.json"
        );
    }

    #[test]
    fn test_transitions() {
        use StepStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!NotProcessed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            StepStatus::Pending,
            StepStatus::Processing,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::NotProcessed,
        ] {
            assert_eq!(status.as_str().parse::<StepStatus>().unwrap(), status);
        }
        assert_eq!(
            "PartiallyCompleted".parse::<OverallStatus>().unwrap(),
            OverallStatus::PartiallyCompleted
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Overall Status Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_overall_all_pending() {
        assert_eq!(
            compute_overall_status(&required_with(StepStatus::Pending)),
            OverallStatus::Pending
        );
    }

    #[test]
    fn test_overall_processing_wins() {
        let mut steps = required_with(StepStatus::Completed);
        steps[0].status = StepStatus::Failed;
        steps.push(step(StepName::Export, StepStatus::Processing));
        assert_eq!(compute_overall_status(&steps), OverallStatus::Processing);
    }

    #[test]
    fn test_overall_failed_before_partial() {
        let mut steps = required_with(StepStatus::Completed);
        steps[2].status = StepStatus::Failed;
        assert_eq!(compute_overall_status(&steps), OverallStatus::Failed);
    }

    #[test]
    fn test_overall_partial_and_complete() {
        let mut steps = required_with(StepStatus::Pending);
        steps[0].status = StepStatus::Completed;
        assert_eq!(
            compute_overall_status(&steps),
            OverallStatus::PartiallyCompleted
        );

        let mut steps = required_with(StepStatus::Completed);
        assert_eq!(compute_overall_status(&steps), OverallStatus::Completed);

        // a failed optional step does not fail the analysis
        steps.push(step(StepName::Export, StepStatus::Failed));
        assert_eq!(compute_overall_status(&steps), OverallStatus::Completed);
    }

    #[test]
    fn test_records_serialize() {
        let record = StepRecord::pending("a-1", StepName::TypeTree);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["step"], "TypeTree");
        assert_eq!(json["status"], "Pending");
        let back: StepRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
