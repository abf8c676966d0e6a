use std::sync::Arc;

use asmlens_metadata::{CachingDecompiler, Decompiler, DecompilerCacheConfig};
use asmlens_storage::{SqliteStepStore, StepStateStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::artifact::{ArtifactStore, RetryPolicy};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::pipeline::ExecutorRegistry;
use crate::queue::TaskQueue;
use crate::service::AnalysisService;
use crate::steps::default_registry;
use crate::worker::{OrchestratorScopeFactory, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};

/// Everything one process needs, built once from an [`EngineConfig`].
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn StepStateStore>,
    artifacts: ArtifactStore,
    queue: TaskQueue,
    decompiler: Arc<CachingDecompiler>,
    registry: ExecutorRegistry,
    shutdown: CancellationToken,
    service: AnalysisService,
}

impl Engine {
    /// Opens (or creates) the SQLite database and storage root from `config`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage_root)?;
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = SqliteStepStore::new(&config.database_path)?;
        info!(
            database = %config.database_path.display(),
            storage_root = %config.storage_root.display(),
            "engine opened"
        );
        Self::with_store(config, Arc::new(store))
    }

    /// Engine over an in-memory database; artifacts still go to `storage_root`.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = SqliteStepStore::in_memory()?;
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: EngineConfig, store: Arc<dyn StepStateStore>) -> Result<Self> {
        let artifacts = ArtifactStore::with_retry(
            config.storage_root.clone(),
            RetryPolicy::from(&config.artifact_retry),
        );
        let registry = default_registry(&artifacts);
        registry.validate_complete()?;

        let queue = TaskQueue::new();
        let decompiler = Arc::new(CachingDecompiler::new(DecompilerCacheConfig::from(
            &config.decompiler_cache,
        )));
        let service = AnalysisService::new(
            Arc::clone(&store),
            artifacts.clone(),
            queue.clone(),
            decompiler.clone(),
        );

        Ok(Self {
            config,
            store,
            artifacts,
            queue,
            decompiler,
            registry,
            shutdown: CancellationToken::new(),
            service,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn service(&self) -> &AnalysisService {
        &self.service
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Starts the worker pool; stale Processing steps are failed first.
    pub async fn start_workers(&self) -> Result<WorkerPoolHandle> {
        let factory = OrchestratorScopeFactory::new(
            Arc::clone(&self.store),
            self.artifacts.clone(),
            self.registry.clone(),
            self.config.step_timeout(),
            self.shutdown.clone(),
        )?;
        WorkerPool::start(
            WorkerPoolConfig::from(&self.config),
            self.queue.clone(),
            Arc::new(factory),
            self.shutdown.clone(),
        )
        .await
    }

    /// Stops the workers and drops every cached module and decompilation.
    pub async fn shutdown(&self, workers: WorkerPoolHandle) {
        workers.shutdown().await;
        self.decompiler.dispose();
    }
}
