//! End-to-end pipeline runs through the engine, worker pool and service.

use std::sync::Arc;
use std::time::Duration;

use asmlens_metadata::testing::{ModuleBuilder, TypeDecl};
use asmlens_orchestration::{
    default_registry, AnalysisOrchestrator, ArtifactPayload, ArtifactStore, Engine, EngineConfig,
    ErrorCategory, OrchestratorError,
};
use asmlens_storage::{
    AnalysisRecord, OverallStatus, SqliteStepStore, StepName, StepStateStore, StepStatus,
};
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(10);

struct Sample {
    bytes: Vec<u8>,
    add_method: u32,
}

fn sample_module() -> Sample {
    let mut b = ModuleBuilder::new("Calc");
    let object = b.type_ref("System", "Object");
    let calc = b.add_type(TypeDecl::class("Acme.Math", "Calculator").extends(object));
    let add = b.add_static_method(calc, "Add", &["a", "b"]);
    b.with_body(add, Some(vec![0x02, 0x03, 0x58, 0x2A]));
    Sample {
        bytes: b.build(),
        add_method: add,
    }
}

fn engine(dir: &tempfile::TempDir) -> Engine {
    let mut config = EngineConfig::rooted_at(dir.path());
    config.workers = 2;
    Engine::in_memory(config).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_pipeline_then_export() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let workers = engine.start_workers().await.unwrap();
    let service = engine.service();

    service
        .create_analysis("a-1", "Calc.dll", sample_module().bytes)
        .await
        .unwrap();
    service.enqueue("a-1").unwrap();

    let steps = service.wait_until_settled("a-1", POLL).await.unwrap();
    let names: Vec<StepName> = steps.iter().map(|s| s.step).collect();
    assert_eq!(names, StepName::REQUIRED.to_vec());
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(
        service.overall_status("a-1").await.unwrap(),
        OverallStatus::Completed
    );

    match service.read_artifact("a-1", StepName::Statistics).await.unwrap() {
        ArtifactPayload::Json(value) => {
            assert_eq!(value["type_count"], 1);
            assert_eq!(value["method_count"], 1);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    service.request_export("a-1").await.unwrap();
    service.wait_until_settled("a-1", POLL).await.unwrap();
    match service.read_artifact("a-1", StepName::Export).await.unwrap() {
        ArtifactPayload::Archive {
            bytes,
            download_name,
        } => {
            assert_eq!(download_name, "Calc_analysis.zip");
            assert_eq!(&bytes[..2], b"PK");
        }
        other => panic!("unexpected payload {:?}", other),
    }

    assert!(matches!(
        service.request_export("a-1").await,
        Err(OrchestratorError::DuplicateStep(_))
    ));

    engine.shutdown(workers).await;
}

#[tokio::test]
async fn test_corrupt_module_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let service = engine.service();

    let mut bytes = sample_module().bytes;
    bytes[0] = b'X';
    let result = service.create_analysis("bad", "Bad.dll", bytes).await;
    assert!(matches!(result, Err(OrchestratorError::InvalidModule(_))));

    assert!(matches!(
        service.analysis("bad").await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));
    assert!(!engine.artifacts().analysis_dir("bad").exists());
}

#[tokio::test]
async fn test_duplicate_analysis_id_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let service = engine.service();

    service
        .create_analysis("a-1", "Calc.dll", sample_module().bytes)
        .await
        .unwrap();
    let result = service
        .create_analysis("a-1", "Other.dll", sample_module().bytes)
        .await;
    assert!(matches!(result, Err(OrchestratorError::DuplicateStep(_))));
    assert_eq!(
        service.analysis("a-1").await.unwrap().original_file_name,
        "Calc.dll"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_execute_claims_once() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactStore::new(dir.path());
    let store = Arc::new(SqliteStepStore::in_memory().unwrap());
    artifacts
        .store_module("a-1", "Calc.dll", &sample_module().bytes)
        .await
        .unwrap();
    store
        .create_analysis(&AnalysisRecord::new("a-1", "Calc.dll"), &[StepName::Metadata])
        .await
        .unwrap();

    let orchestrator = Arc::new(
        AnalysisOrchestrator::new(
            store.clone(),
            artifacts.clone(),
            default_registry(&artifacts),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
        .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..2 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.execute_next_step("a-1").await.unwrap()
        }));
    }
    let mut executed = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            executed += 1;
        }
    }
    assert_eq!(executed, 1);

    let step = store.get_step("a-1", StepName::Metadata).await.unwrap();
    assert_eq!(step.status, StepStatus::Completed);

    for _ in 0..3 {
        assert!(orchestrator.execute_next_step("a-1").await.unwrap().is_none());
    }
    let unchanged = store.get_step("a-1", StepName::Metadata).await.unwrap();
    assert_eq!(unchanged.completed_at, step.completed_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_module_fails_then_retry_completes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let workers = engine.start_workers().await.unwrap();
    let service = engine.service();
    let sample = sample_module();

    service
        .create_analysis("a-1", "Calc.dll", sample.bytes.clone())
        .await
        .unwrap();
    let module = engine.artifacts().find_module_file("a-1").await.unwrap();
    std::fs::remove_file(&module).unwrap();
    service.enqueue("a-1").unwrap();

    service.wait_until_settled("a-1", POLL).await.unwrap();
    let failed = service.step_status("a-1", StepName::Metadata).await.unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("module not found"));
    assert_eq!(
        service.step_status("a-1", StepName::Statistics).await.unwrap().status,
        StepStatus::Pending
    );
    assert_eq!(service.overall_status("a-1").await.unwrap(), OverallStatus::Failed);

    match service.read_artifact("a-1", StepName::Metadata).await {
        Err(OrchestratorError::StepFailed { step, error }) => {
            assert_eq!(step, StepName::Metadata);
            assert_eq!(error, "module not found");
        }
        other => panic!("unexpected result {:?}", other),
    }

    engine
        .artifacts()
        .store_module("a-1", "Calc.dll", &sample.bytes)
        .await
        .unwrap();
    let reset = service.retry_step("a-1", StepName::Metadata).await.unwrap();
    assert_eq!(reset.status, StepStatus::Pending);
    assert_eq!(reset.retry_count, 1);

    let steps = service.wait_until_settled("a-1", POLL).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(matches!(
        service.retry_step("a-1", StepName::Metadata).await,
        Err(OrchestratorError::StepCannotBeRetried(_))
    ));

    engine.shutdown(workers).await;
}

#[tokio::test]
async fn test_read_artifact_errors() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let service = engine.service();

    assert!(matches!(
        service.read_artifact("nope", StepName::Metadata).await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));

    service
        .create_analysis("a-1", "Calc.dll", sample_module().bytes)
        .await
        .unwrap();
    assert!(matches!(
        service.read_artifact("a-1", StepName::TypeTree).await,
        Err(OrchestratorError::StepNotCompleted {
            status: StepStatus::Pending,
            ..
        })
    ));
    assert!(matches!(
        service.read_artifact("a-1", StepName::Export).await,
        Err(OrchestratorError::StepNotCompleted {
            status: StepStatus::NotProcessed,
            ..
        })
    ));
    assert!(matches!(
        service.request_export("a-1").await,
        Err(OrchestratorError::InvalidTransition(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_artifact_of_completed_step_is_consistency_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let workers = engine.start_workers().await.unwrap();
    let service = engine.service();

    service
        .create_analysis("a-1", "Calc.dll", sample_module().bytes)
        .await
        .unwrap();
    service.enqueue("a-1").unwrap();
    service.wait_until_settled("a-1", POLL).await.unwrap();

    let path = engine
        .artifacts()
        .artifact_path("a-1", StepName::Dependencies.artifact_file_name());
    std::fs::remove_file(path).unwrap();

    let err = service
        .read_artifact("a-1", StepName::Dependencies)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Consistency(_)));
    assert!(err.is_internal());

    engine.shutdown(workers).await;
}

#[tokio::test]
async fn test_decompile_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let service = engine.service();
    let sample = sample_module();

    service
        .create_analysis("a-1", "Calc.dll", sample.bytes)
        .await
        .unwrap();

    let entity = service.decompile("a-1", sample.add_method).await.unwrap();
    assert_eq!(entity.name, "Acme.Math.Calculator::Add");
    assert!(entity.disassembly.contains("IL_0002: add"));

    assert!(service.decompile("a-1", 0x0600_0063).await.is_err());

    service.delete_analysis("a-1").await.unwrap();
    assert!(!engine.artifacts().analysis_dir("a-1").exists());
    assert!(matches!(
        service.analysis("a-1").await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));
    assert!(matches!(
        service.delete_analysis("a-1").await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));
    assert!(matches!(
        service.decompile("a-1", sample.add_method).await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));
}

#[tokio::test]
async fn test_path_like_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let service = engine.service();

    service
        .create_analysis("victim", "Calc.dll", sample_module().bytes)
        .await
        .unwrap();

    for id in ["", ".", "..", "../x", "a/b", "a\\b"] {
        let err = service
            .create_analysis(id, "Calc.dll", sample_module().bytes)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidAnalysisId(_)), "{:?}: {}", id, err);
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }

    assert!(service.delete_analysis("").await.is_err());
    assert!(service.delete_analysis("..").await.is_err());

    assert!(engine.artifacts().find_module_file("victim").await.is_some());
    assert!(!dir.path().join("x").exists());
    assert_eq!(service.analysis("victim").await.unwrap().original_file_name, "Calc.dll");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_creates_keep_the_winner_intact() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let bytes = sample_module().bytes;

    for run in 0..20 {
        let id = format!("dup-{}", run);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = engine.service().clone();
                let id = id.clone();
                let bytes = bytes.clone();
                tokio::spawn(async move { service.create_analysis(&id, "Calc.dll", bytes).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(OrchestratorError::DuplicateStep(_)) => {}
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!(created, 1);
        assert!(
            engine.artifacts().find_module_file(&id).await.is_some(),
            "{} lost its module",
            id
        );
        assert_eq!(engine.service().list_steps(&id).await.unwrap().len(), 5);
    }
}

#[tokio::test]
async fn test_unrequested_export_reads_as_not_processed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(&dir);
    let service = engine.service();

    service
        .create_analysis("a-1", "Calc.dll", sample_module().bytes)
        .await
        .unwrap();

    let export = service.step_status("a-1", StepName::Export).await.unwrap();
    assert_eq!(export.status, StepStatus::NotProcessed);
    assert_eq!(export.retry_count, 0);

    assert!(matches!(
        service.retry_step("a-1", StepName::Export).await,
        Err(OrchestratorError::StepCannotBeRetried(_))
    ));
    assert!(matches!(
        service.step_status("nope", StepName::Export).await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));
    assert!(matches!(
        service.retry_step("nope", StepName::Export).await,
        Err(OrchestratorError::AnalysisNotFound(_))
    ));
    assert_eq!(service.list_steps("a-1").await.unwrap().len(), 5);
}
