//! Claim exclusivity under concurrent workers.

use std::collections::HashSet;

use asmlens_storage::{
    AnalysisRecord, OverallStatus, SqliteStepStore, StepName, StepStateStore, StepStatus,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_pending_step_is_claimed_once() {
    let store = SqliteStepStore::in_memory().unwrap();
    store
        .create_analysis(&AnalysisRecord::new("a-1", "One.dll"), &[StepName::Metadata])
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_next_pending("a-1").await.unwrap()
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);

    let step = store.get_step("a-1", StepName::Metadata).await.unwrap();
    assert_eq!(step.status, StepStatus::Processing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_workers_drain_each_step_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStepStore::new(dir.path().join("state.db")).unwrap();
    store
        .create_analysis(&AnalysisRecord::new("a-1", "Many.dll"), &StepName::REQUIRED)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            while let Some(step) = store.claim_next_pending("a-1").await.unwrap() {
                store.complete_step("a-1", step.step).await.unwrap();
                mine.push(step.step);
            }
            mine
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.extend(handle.await.unwrap());
    }
    let distinct: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), StepName::REQUIRED.len());
    assert_eq!(distinct.len(), StepName::REQUIRED.len());
    assert_eq!(
        store.get_analysis("a-1").await.unwrap().overall_status,
        OverallStatus::Completed
    );
}
