use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use asmlens_metadata::{DecompiledEntity, Decompiler, ModuleReader};
use asmlens_storage::{
    AnalysisRecord, ErrorKind, OverallStatus, StepName, StepRecord, StepStateStore, StepStatus,
    StorageError,
};
use tracing::{error, info, warn};

use crate::artifact::{validate_analysis_id, ArtifactStore};
use crate::error::{OrchestratorError, Result};
use crate::queue::TaskQueue;

/// Artifact returned to callers of [`AnalysisService::read_artifact`]
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactPayload {
    Json(serde_json::Value),
    Archive {
        bytes: Vec<u8>,
        download_name: String,
    },
}

/// Caller-facing operations over analyses, steps and artifacts.
#[derive(Clone)]
pub struct AnalysisService {
    store: Arc<dyn StepStateStore>,
    artifacts: ArtifactStore,
    queue: TaskQueue,
    decompiler: Arc<dyn Decompiler>,
}

impl AnalysisService {
    pub fn new(
        store: Arc<dyn StepStateStore>,
        artifacts: ArtifactStore,
        queue: TaskQueue,
        decompiler: Arc<dyn Decompiler>,
    ) -> Self {
        Self {
            store,
            artifacts,
            queue,
            decompiler,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Validates the module, creates the Pending required steps, then stores
    /// the module.
    ///
    /// The row insert claims the id, so only the caller that won it ever
    /// writes or removes the analysis directory.
    ///
    /// # Errors
    /// - `InvalidAnalysisId`, `InvalidModule`: nothing is written
    /// - `DuplicateStep`: the id is taken; the existing analysis is untouched
    pub async fn create_analysis(
        &self,
        analysis_id: &str,
        original_file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<AnalysisRecord> {
        validate_analysis_id(analysis_id)?;
        let module = validate_module(bytes).await?;
        let bytes = module.as_bytes();

        let record = AnalysisRecord::new(analysis_id, original_file_name);
        match self.store.create_analysis(&record, &StepName::REQUIRED).await {
            Ok(()) => {}
            Err(e) if e.kind == ErrorKind::DuplicateStep => {
                return Err(OrchestratorError::DuplicateStep(format!(
                    "Analysis {} already exists",
                    analysis_id
                )))
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .artifacts
            .store_module(analysis_id, original_file_name, bytes)
            .await
        {
            self.roll_back(analysis_id).await;
            return Err(e);
        }

        info!(analysis_id, file = original_file_name, bytes = bytes.len(), "analysis created");
        Ok(record)
    }

    async fn roll_back(&self, analysis_id: &str) {
        if let Err(e) = self.store.delete_analysis(analysis_id).await {
            error!(analysis_id, error = %e, "failed to roll back analysis rows");
        }
        if let Err(e) = self.artifacts.delete_analysis_dir(analysis_id).await {
            error!(analysis_id, error = %e, "failed to roll back analysis directory");
        }
    }

    pub fn enqueue(&self, analysis_id: &str) -> Result<()> {
        self.queue.enqueue(analysis_id)
    }

    pub async fn analysis(&self, analysis_id: &str) -> Result<AnalysisRecord> {
        Ok(self.store.get_analysis(analysis_id).await?)
    }

    pub async fn overall_status(&self, analysis_id: &str) -> Result<OverallStatus> {
        Ok(self.store.get_analysis(analysis_id).await?.overall_status)
    }

    /// A never-requested optional step reads as `NotProcessed`.
    pub async fn step_status(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        match self.store.get_step(analysis_id, step).await {
            Ok(record) => Ok(record),
            Err(e) if e.kind == ErrorKind::StepNotFound => {
                self.store.get_analysis(analysis_id).await?;
                Ok(StepRecord {
                    status: StepStatus::NotProcessed,
                    ..StepRecord::pending(analysis_id, step)
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_steps(&self, analysis_id: &str) -> Result<Vec<StepRecord>> {
        Ok(self.store.list_steps(analysis_id).await?)
    }

    /// Failed → Pending, then requeues the analysis.
    ///
    /// # Errors
    /// - `StepCannotBeRetried` unless the step is Failed; state is unchanged
    pub async fn retry_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        let record = match self.store.reset_failed_step(analysis_id, step).await {
            Ok(record) => record,
            Err(e) if e.kind == ErrorKind::StepNotFound => {
                self.store.get_analysis(analysis_id).await?;
                return Err(StorageError::cannot_retry(step, StepStatus::NotProcessed).into());
            }
            Err(e) => return Err(e.into()),
        };
        info!(analysis_id, step = %step, retry_count = record.retry_count, "step retry requested");
        self.enqueue(analysis_id)?;
        Ok(record)
    }

    /// Adds the Export step and queues it.
    ///
    /// # Errors
    /// - `InvalidTransition` while required steps are outstanding
    /// - `DuplicateStep` if already requested
    pub async fn request_export(&self, analysis_id: &str) -> Result<StepRecord> {
        let record = self
            .store
            .add_optional_step(analysis_id, StepName::Export)
            .await?;
        self.enqueue(analysis_id)?;
        Ok(record)
    }

    /// # Errors
    /// - `AnalysisNotFound`
    /// - `StepNotCompleted` (including a never-requested optional step)
    /// - `StepFailed` with the recorded error
    /// - `Consistency` when a Completed step has no artifact file
    pub async fn read_artifact(&self, analysis_id: &str, step: StepName) -> Result<ArtifactPayload> {
        let analysis = self.store.get_analysis(analysis_id).await?;
        let record = match self.store.get_step(analysis_id, step).await {
            Ok(record) => record,
            Err(e) if e.kind == ErrorKind::StepNotFound => {
                return Err(OrchestratorError::StepNotCompleted {
                    step,
                    status: StepStatus::NotProcessed,
                })
            }
            Err(e) => return Err(e.into()),
        };

        match record.status {
            StepStatus::Completed => {}
            StepStatus::Failed => {
                return Err(OrchestratorError::StepFailed {
                    step,
                    error: record.error_message.unwrap_or_default(),
                })
            }
            status => return Err(OrchestratorError::StepNotCompleted { step, status }),
        }

        let file_name = step.artifact_file_name();
        let payload = if step.has_json_artifact() {
            self.artifacts
                .read::<serde_json::Value>(analysis_id, file_name)
                .await
                .map(ArtifactPayload::Json)
        } else {
            self.artifacts
                .read_bytes(analysis_id, file_name)
                .await
                .map(|bytes| ArtifactPayload::Archive {
                    bytes,
                    download_name: archive_download_name(&analysis.original_file_name),
                })
        };

        payload.map_err(|e| match e {
            OrchestratorError::ArtifactMissing { .. } => {
                error!(analysis_id, step = %step, "completed step has no artifact");
                OrchestratorError::Consistency(format!(
                    "Step {} is Completed but {} is missing for analysis {}",
                    step, file_name, analysis_id
                ))
            }
            other => other,
        })
    }

    /// Renders one metadata entity of the analysis' module.
    pub async fn decompile(&self, analysis_id: &str, handle: u32) -> Result<Arc<DecompiledEntity>> {
        self.store.get_analysis(analysis_id).await?;
        let module = self.module_path(analysis_id).await?;

        let decompiler = Arc::clone(&self.decompiler);
        tokio::task::spawn_blocking(move || decompiler.decompile(&module, handle))
            .await
            .map_err(|e| OrchestratorError::execution(format!("decompile task panicked: {}", e)))?
            .map_err(OrchestratorError::from)
    }

    /// Removes rows, artifacts and cached decompilations of the analysis.
    ///
    /// # Errors
    /// - `AnalysisNotFound`
    pub async fn delete_analysis(&self, analysis_id: &str) -> Result<()> {
        if let Some(module) = self.artifacts.find_module_file(analysis_id).await {
            self.decompiler.evict_module(&module);
        }
        if !self.store.delete_analysis(analysis_id).await? {
            return Err(OrchestratorError::AnalysisNotFound(analysis_id.to_string()));
        }
        if !self.artifacts.delete_analysis_dir(analysis_id).await? {
            warn!(analysis_id, "analysis had no artifact directory");
        }
        info!(analysis_id, "analysis deleted");
        Ok(())
    }

    /// Polls until no step is Processing and nothing Pending can still run.
    pub async fn wait_until_settled(&self, analysis_id: &str, poll: Duration) -> Result<Vec<StepRecord>> {
        loop {
            let steps = self.store.list_steps(analysis_id).await?;
            if is_settled(&steps) {
                return Ok(steps);
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn module_path(&self, analysis_id: &str) -> Result<PathBuf> {
        self.artifacts
            .find_module_file(analysis_id)
            .await
            .ok_or_else(|| {
                error!(analysis_id, "analysis has no stored module");
                OrchestratorError::Consistency(format!("module not found for analysis {}", analysis_id))
            })
    }
}

/// A failed step stops its analysis, so Pending steps behind it stay Pending.
fn is_settled(steps: &[StepRecord]) -> bool {
    let processing = steps.iter().any(|s| s.status == StepStatus::Processing);
    let pending = steps.iter().any(|s| s.status == StepStatus::Pending);
    let failed = steps.iter().any(|s| s.status == StepStatus::Failed);
    !processing && (!pending || failed)
}

async fn validate_module(bytes: Vec<u8>) -> Result<ModuleReader> {
    tokio::task::spawn_blocking(move || match ModuleReader::from_bytes(bytes) {
        Ok(reader) => Ok(reader),
        Err(e) if e.is_invalid_input() => Err(OrchestratorError::InvalidModule(e.to_string())),
        Err(e) => Err(e.into()),
    })
    .await
    .map_err(|e| OrchestratorError::execution(format!("module validation panicked: {}", e)))?
}

/// `<original stem>_analysis.zip`
pub fn archive_download_name(original_file_name: &str) -> String {
    let stem = Path::new(original_file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("module");
    format!("{}_analysis.zip", stem)
}
