//! Bounded worker pool draining the [`TaskQueue`].
//!
//! Each worker dequeues an analysis id, opens a fresh [`ServiceScope`] and
//! runs `execute_next_step` until the analysis has nothing Pending, a step
//! fails, or the per-turn budget is spent (then the id is requeued).

use std::sync::Arc;
use std::time::Duration;

use asmlens_storage::StepStateStore;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::AnalysisOrchestrator;
use crate::pipeline::ExecutorRegistry;
use crate::queue::TaskQueue;

/// Per-task session over the orchestrator.
pub struct ServiceScope {
    id: Uuid,
    orchestrator: AnalysisOrchestrator,
}

impl ServiceScope {
    pub fn new(orchestrator: AnalysisOrchestrator) -> Self {
        Self {
            id: Uuid::new_v4(),
            orchestrator,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn orchestrator(&self) -> &AnalysisOrchestrator {
        &self.orchestrator
    }
}

pub trait ScopeFactory: Send + Sync {
    fn create_scope(&self) -> Result<ServiceScope>;
}

/// Builds an orchestrator per scope over shared store, artifacts and executors.
#[derive(Clone)]
pub struct OrchestratorScopeFactory {
    store: Arc<dyn StepStateStore>,
    artifacts: ArtifactStore,
    registry: ExecutorRegistry,
    step_timeout: Duration,
    shutdown: CancellationToken,
}

impl OrchestratorScopeFactory {
    pub fn new(
        store: Arc<dyn StepStateStore>,
        artifacts: ArtifactStore,
        registry: ExecutorRegistry,
        step_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        registry.validate_complete()?;
        Ok(Self {
            store,
            artifacts,
            registry,
            step_timeout,
            shutdown,
        })
    }
}

impl ScopeFactory for OrchestratorScopeFactory {
    fn create_scope(&self) -> Result<ServiceScope> {
        let orchestrator = AnalysisOrchestrator::new(
            Arc::clone(&self.store),
            self.artifacts.clone(),
            self.registry.clone(),
            self.step_timeout,
            self.shutdown.clone(),
        )?;
        Ok(ServiceScope::new(orchestrator))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub max_steps_per_turn: usize,
    /// Processing steps older than this are failed at startup
    pub stale_after: Duration,
}

impl From<&EngineConfig> for WorkerPoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers,
            max_steps_per_turn: config.max_steps_per_turn,
            stale_after: config.step_timeout(),
        }
    }
}

/// How one worker turn on an analysis ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing Pending remains
    Drained,
    /// A step ended Failed; the rest wait for a retry
    StepFailed,
    /// Per-turn budget spent with work possibly left
    Requeue,
    Cancelled,
}

/// Runs steps of one analysis until it is drained, fails, or the budget is spent.
pub async fn run_turn(
    orchestrator: &AnalysisOrchestrator,
    analysis_id: &str,
    max_steps: usize,
    shutdown: &CancellationToken,
) -> Result<TurnOutcome> {
    for _ in 0..max_steps {
        if shutdown.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }
        match orchestrator.execute_next_step(analysis_id).await? {
            None => return Ok(TurnOutcome::Drained),
            Some(execution) if execution.is_failed() => return Ok(TurnOutcome::StepFailed),
            Some(_) => {}
        }
    }
    Ok(TurnOutcome::Requeue)
}

pub struct WorkerPool;

impl WorkerPool {
    /// Reconciles stale steps, then spawns `config.workers` tasks.
    pub async fn start(
        config: WorkerPoolConfig,
        queue: TaskQueue,
        factory: Arc<dyn ScopeFactory>,
        shutdown: CancellationToken,
    ) -> Result<WorkerPoolHandle> {
        if config.workers == 0 || config.max_steps_per_turn == 0 {
            return Err(OrchestratorError::Config(
                "worker pool needs at least one worker and one step per turn".to_string(),
            ));
        }

        let scope = factory.create_scope()?;
        let reconciled = scope
            .orchestrator()
            .reconcile_stale_steps(config.stale_after)
            .await?;
        if !reconciled.is_empty() {
            warn!(count = reconciled.len(), "reconciled stale processing steps at startup");
        }

        let tasks = (0..config.workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    config.max_steps_per_turn,
                    queue.clone(),
                    Arc::clone(&factory),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers = config.workers, "worker pool started");
        Ok(WorkerPoolHandle { shutdown, tasks })
    }
}

async fn run_worker(
    worker: usize,
    max_steps: usize,
    queue: TaskQueue,
    factory: Arc<dyn ScopeFactory>,
    shutdown: CancellationToken,
) {
    debug!(worker, "worker started");

    while let Some(analysis_id) = queue.dequeue(&shutdown).await {
        let scope = match factory.create_scope() {
            Ok(scope) => scope,
            Err(e) => {
                error!(worker, analysis_id = %analysis_id, error = %e, "failed to open service scope");
                continue;
            }
        };

        match run_turn(scope.orchestrator(), &analysis_id, max_steps, &shutdown).await {
            Ok(TurnOutcome::Requeue) => {
                debug!(worker, analysis_id = %analysis_id, "turn budget spent, requeueing");
                if let Err(e) = queue.enqueue(&analysis_id) {
                    error!(worker, analysis_id = %analysis_id, error = %e, "requeue failed");
                }
            }
            Ok(outcome) => {
                debug!(worker, analysis_id = %analysis_id, scope = %scope.id(), ?outcome, "turn finished");
            }
            Err(e) if e.is_internal() => {
                error!(worker, analysis_id = %analysis_id, error = %e, "orchestrator error");
            }
            Err(e) => {
                warn!(worker, analysis_id = %analysis_id, error = %e, "analysis skipped");
            }
        }
    }

    debug!(worker, "worker stopped");
}

pub struct WorkerPoolHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Cancels the shared token and joins every worker.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}
