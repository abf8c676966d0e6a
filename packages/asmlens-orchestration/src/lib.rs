/*
 * asmlens orchestration - analysis pipeline engine
 *
 * Runs the per-module analysis steps against durable step state.
 *
 * Architecture:
 * - Step state machine (asmlens-storage, SQLite)
 * - Orchestrator: claim next Pending step, run it under timeout + shutdown
 * - Task queue + bounded worker pool (tokio tasks)
 * - Artifact store: one directory per analysis, atomic writes
 * - Service facade: create, retry, export, read artifacts, decompile
 */

pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod steps;
pub mod telemetry;
pub mod worker;

// Re-exports
pub use artifact::{validate_analysis_id, ArtifactStore, RetryPolicy};
pub use config::{ConfigError, DecompilerCacheSettings, EngineConfig, RetryConfig};
pub use engine::Engine;
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use orchestrator::{AnalysisOrchestrator, StepExecution};
pub use pipeline::{AnalysisLocationContext, ExecutorRegistry, StepExecutor};
pub use queue::TaskQueue;
pub use service::{archive_download_name, AnalysisService, ArtifactPayload};
pub use steps::{default_registry, AnalyzerStep, ExportStep};
pub use worker::{
    run_turn, OrchestratorScopeFactory, ScopeFactory, ServiceScope, TurnOutcome, WorkerPool,
    WorkerPoolConfig, WorkerPoolHandle,
};
