use std::io::{Cursor, Write};
use std::path::PathBuf;

use asmlens_storage::StepName;
use async_trait::async_trait;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifact::ArtifactStore;
use crate::error::{OrchestratorError, Result};
use crate::pipeline::{AnalysisLocationContext, StepExecutor};

/// Artifacts bundled into the export archive, in archive order.
pub const EXPORTED_ARTIFACTS: [StepName; 5] = StepName::REQUIRED;

/// Bundles every required step's JSON artifact into `analysis.zip`.
pub struct ExportStep {
    artifacts: ArtifactStore,
}

impl ExportStep {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl StepExecutor for ExportStep {
    fn step(&self) -> StepName {
        StepName::Export
    }

    async fn execute(&self, ctx: &AnalysisLocationContext) -> Result<PathBuf> {
        let mut entries = Vec::with_capacity(EXPORTED_ARTIFACTS.len());
        for step in EXPORTED_ARTIFACTS {
            let file_name = step.artifact_file_name();
            let bytes = self.artifacts.read_bytes(&ctx.analysis_id, file_name).await?;
            entries.push((file_name, bytes));
        }

        let archive = tokio::task::spawn_blocking(move || build_archive(&entries))
            .await
            .map_err(|e| OrchestratorError::execution(format!("export task panicked: {}", e)))??;

        let path = self
            .artifacts
            .save_bytes(&ctx.analysis_id, &archive, StepName::Export.artifact_file_name())
            .await?;

        info!(
            analysis_id = %ctx.analysis_id,
            bytes = archive.len(),
            "export archive written"
        );
        Ok(path)
    }
}

fn build_archive(entries: &[(&str, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        zip.start_file(*name, options)
            .map_err(|e| OrchestratorError::execution(format!("zip entry {}: {}", name, e)))?;
        zip.write_all(bytes)?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| OrchestratorError::execution(format!("zip finish: {}", e)))?;
    Ok(cursor.into_inner())
}
