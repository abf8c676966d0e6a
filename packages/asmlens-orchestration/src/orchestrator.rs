use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use asmlens_storage::{StepName, StepRecord, StepStateStore, StepStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifact::ArtifactStore;
use crate::error::Result;
use crate::pipeline::{AnalysisLocationContext, ExecutorRegistry};

pub const MODULE_NOT_FOUND: &str = "module not found";
pub const SHUTDOWN_MESSAGE: &str = "cancelled: shutdown requested";

/// Outcome of one `execute_next_step` call that claimed a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepExecution {
    pub record: StepRecord,
    pub duration: Duration,
}

impl StepExecution {
    pub fn step(&self) -> StepName {
        self.record.step
    }

    pub fn is_failed(&self) -> bool {
        self.record.status == StepStatus::Failed
    }
}

/// Runs one analysis step at a time against the durable step state.
pub struct AnalysisOrchestrator {
    store: Arc<dyn StepStateStore>,
    artifacts: ArtifactStore,
    registry: ExecutorRegistry,
    step_timeout: Duration,
    shutdown: CancellationToken,
}

impl AnalysisOrchestrator {
    /// # Errors
    /// - `Config` when the registry misses an executor for any step
    pub fn new(
        store: Arc<dyn StepStateStore>,
        artifacts: ArtifactStore,
        registry: ExecutorRegistry,
        step_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        if let Err(e) = registry.validate_complete() {
            error!(error = %e, "executor registry is incomplete");
            return Err(e);
        }

        Ok(Self {
            store,
            artifacts,
            registry,
            step_timeout,
            shutdown,
        })
    }

    pub fn store(&self) -> &Arc<dyn StepStateStore> {
        &self.store
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Claims and runs the first Pending step of the analysis.
    ///
    /// `None` means nothing is Pending; nothing is written in that case.
    /// Executor failures, timeouts and shutdown end as a Failed row and are
    /// returned as `Some`; only store failures are `Err`.
    pub async fn execute_next_step(&self, analysis_id: &str) -> Result<Option<StepExecution>> {
        let Some(claimed) = self.store.claim_next_pending(analysis_id).await? else {
            return Ok(None);
        };
        let step = claimed.step;
        let start = Instant::now();

        info!(analysis_id, step = %step, attempt = claimed.retry_count + 1, "step started");

        let record = match self.run_step(analysis_id, step).await {
            Ok(artifact) => {
                let record = self.store.complete_step(analysis_id, step).await?;
                info!(
                    analysis_id,
                    step = %step,
                    artifact = %artifact.display(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "step completed"
                );
                record
            }
            Err(reason) => {
                warn!(analysis_id, step = %step, reason = %reason, "step failed");
                self.store.fail_step(analysis_id, step, &reason).await?
            }
        };

        Ok(Some(StepExecution {
            record,
            duration: start.elapsed(),
        }))
    }

    async fn run_step(&self, analysis_id: &str, step: StepName) -> std::result::Result<PathBuf, String> {
        let module_path = self
            .artifacts
            .find_module_file(analysis_id)
            .await
            .ok_or_else(|| MODULE_NOT_FOUND.to_string())?;

        let executor = self.registry.get(step).ok_or_else(|| {
            error!(analysis_id, step = %step, "no executor registered");
            format!("no executor for step {}", step)
        })?;

        let ctx = AnalysisLocationContext {
            analysis_id: analysis_id.to_string(),
            module_path,
            output_dir: self.artifacts.analysis_dir(analysis_id),
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SHUTDOWN_MESSAGE.to_string()),
            _ = tokio::time::sleep(self.step_timeout) => {
                Err(format!("timed out after {}s", self.step_timeout.as_secs()))
            }
            result = executor.execute(&ctx) => result.map_err(|e| {
                if e.is_internal() {
                    error!(analysis_id, step = %step, error = %e, "step hit an internal error");
                }
                e.to_string()
            }),
        }
    }

    /// Appends an optional step once every required step is Completed.
    pub async fn add_optional_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        Ok(self.store.add_optional_step(analysis_id, step).await?)
    }

    /// Failed → Pending.
    ///
    /// # Errors
    /// - `StepCannotBeRetried` from any other status; state is unchanged
    pub async fn retry_step(&self, analysis_id: &str, step: StepName) -> Result<StepRecord> {
        let record = self.store.reset_failed_step(analysis_id, step).await?;
        info!(analysis_id, step = %step, retry_count = record.retry_count, "step reset for retry");
        Ok(record)
    }

    /// Fails steps left Processing for longer than `max_age` (crash leftovers).
    pub async fn reconcile_stale_steps(&self, max_age: Duration) -> Result<Vec<StepRecord>> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let reconciled = self.store.reconcile_stale_steps(max_age).await?;
        for record in &reconciled {
            warn!(
                analysis_id = %record.analysis_id,
                step = %record.step,
                "stale processing step marked failed"
            );
        }
        Ok(reconciled)
    }
}
