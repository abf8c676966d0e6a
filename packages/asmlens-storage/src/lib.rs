//! asmlens-storage - durable analysis and step state
//!
//! ## Core Principles
//!
//! 1. **One row per step**: `(analysis_id, step)` is unique
//! 2. **Closed state machine**: `Pending → Processing → {Completed | Failed}`, `Failed → Pending` on retry
//! 3. **Atomic claim**: the next Pending step is flipped to Processing in one transaction
//! 4. **Derived aggregate**: `overall_status` is recomputed after every transition
//!
//! ## Usage
//!
//! ```rust,ignore
//! use asmlens_storage::{AnalysisRecord, SqliteStepStore, StepName, StepStateStore};
//!
//! let store = SqliteStepStore::new("asmlens.db")?;
//! store
//!     .create_analysis(&AnalysisRecord::new("a-1", "Sample.dll"), &StepName::REQUIRED)
//!     .await?;
//!
//! while let Some(step) = store.claim_next_pending("a-1").await? {
//!     // run the step ...
//!     store.complete_step("a-1", step.step).await?;
//! }
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    compute_overall_status, AnalysisRecord, OverallStatus, StepName, StepRecord, StepStateStore,
    StepStatus,
};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteStepStore;
