use std::path::PathBuf;
use std::time::Instant;

use asmlens_metadata::ModuleReader;
use asmlens_storage::StepName;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::artifact::ArtifactStore;
use crate::error::{OrchestratorError, Result};
use crate::pipeline::{AnalysisLocationContext, StepExecutor};

/// Structural analyzer over one module
pub type AnalyzeFn<T> = fn(&ModuleReader) -> asmlens_metadata::Result<T>;

/// Runs a pure analyzer on the blocking pool and stores its DTO as JSON.
pub struct AnalyzerStep<T> {
    step: StepName,
    analyze: AnalyzeFn<T>,
    artifacts: ArtifactStore,
}

impl<T> AnalyzerStep<T> {
    pub fn new(step: StepName, analyze: AnalyzeFn<T>, artifacts: ArtifactStore) -> Self {
        Self {
            step,
            analyze,
            artifacts,
        }
    }
}

#[async_trait]
impl<T> StepExecutor for AnalyzerStep<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn step(&self) -> StepName {
        self.step
    }

    async fn execute(&self, ctx: &AnalysisLocationContext) -> Result<PathBuf> {
        let start = Instant::now();
        let analyze = self.analyze;
        let module_path = ctx.module_path.clone();

        let dto = tokio::task::spawn_blocking(move || {
            let reader = ModuleReader::open(&module_path)?;
            analyze(&reader)
        })
        .await
        .map_err(|e| OrchestratorError::execution(format!("{} analyzer panicked: {}", self.step, e)))??;

        let path = self
            .artifacts
            .save(&ctx.analysis_id, &dto, self.step.artifact_file_name())
            .await?;

        info!(
            analysis_id = %ctx.analysis_id,
            step = %self.step,
            duration_ms = start.elapsed().as_millis() as u64,
            "analyzer step finished"
        );
        Ok(path)
    }
}
