use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use asmlens_storage::StepName;
use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};

/// Where one step execution reads its module and writes its artifact.
///
/// Rebuilt for every execution; nothing here outlives the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisLocationContext {
    pub analysis_id: String,
    pub module_path: PathBuf,
    pub output_dir: PathBuf,
}

/// Step executor trait (one per [`StepName`])
///
/// Executors are idempotent: running one twice overwrites its artifact.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn step(&self) -> StepName;

    /// Produces the step's artifact; returns the written path.
    async fn execute(&self, ctx: &AnalysisLocationContext) -> Result<PathBuf>;
}

/// Closed dispatch table from step name to executor
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepName, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` under its own step, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) -> &mut Self {
        self.executors.insert(executor.step(), executor);
        self
    }

    pub fn get(&self, step: StepName) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&step).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Fails with the missing step names unless every step has an executor.
    pub fn validate_complete(&self) -> Result<()> {
        let missing: Vec<&str> = StepName::ALL
            .iter()
            .filter(|step| !self.executors.contains_key(step))
            .map(|step| step.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Config(format!(
                "No executor registered for step(s): {}",
                missing.join(", ")
            )))
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut steps: Vec<_> = self.executors.keys().collect();
        steps.sort();
        f.debug_struct("ExecutorRegistry").field("steps", &steps).finish()
    }
}
