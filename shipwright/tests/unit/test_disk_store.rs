//! File-backed store tests

use std::sync::Arc;

use shipwright::filesys::dir::Dir;
use shipwright::models::{BuildId, DeploymentEvent, WorkflowRequest};
use shipwright::orchestrator::{Orchestrator, WorkflowOutcome};
use shipwright::provider::FakeDriver;
use shipwright::status::{DeploymentStatus, Phase};
use shipwright::store::disk::file_stem;
use shipwright::store::{
    AppendOutcome, CheckpointStore, DiskCheckpointStore, DiskEventLog, EventLog,
    WorkflowCheckpoint, WorkflowStage,
};

use crate::support::{build_request, deploy_request, fast_options};

fn event(build_id: &str, status: DeploymentStatus, external_id: &str) -> DeploymentEvent {
    DeploymentEvent::new(BuildId::from(build_id), Phase::Build, status).with_external_id(external_id)
}

#[tokio::test]
async fn test_events_survive_reopen_and_keep_deduplicating() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Dir::new(tmp.path().join("events"));

    let log = DiskEventLog::new(dir.clone());
    assert_eq!(
        log.append(event("b1", DeploymentStatus::Placed, "op-1")).await.unwrap(),
        AppendOutcome::Applied
    );
    assert_eq!(
        log.append(event("b1", DeploymentStatus::Ready, "op-1")).await.unwrap(),
        AppendOutcome::Applied
    );
    drop(log);

    let log = DiskEventLog::new(dir);
    let events = log.events(&BuildId::from("b1")).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        log.append(event("b1", DeploymentStatus::Ready, "op-1")).await.unwrap(),
        AppendOutcome::Duplicate
    );
    assert_eq!(
        log.append(event("b1", DeploymentStatus::Running, "op-1")).await.unwrap(),
        AppendOutcome::Regressed {
            current: DeploymentStatus::Ready
        }
    );
    assert_eq!(
        log.latest(&BuildId::from("b1"), Phase::Build)
            .await
            .unwrap()
            .map(|e| e.status),
        Some(DeploymentStatus::Ready)
    );
}

#[tokio::test]
async fn test_torn_trailing_record_is_skipped_and_repaired() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Dir::new(tmp.path());
    let build_id = BuildId::from("b-torn");

    let first = serde_json::to_string(&event("b-torn", DeploymentStatus::Placed, "op-1")).unwrap();
    let torn = format!("{first}\n{{\"id\":\"half-writ");
    let path = tmp.path().join(format!("{}.jsonl", file_stem(&build_id)));
    std::fs::write(&path, torn).unwrap();

    let log = DiskEventLog::new(dir);
    assert_eq!(log.events(&build_id).await.unwrap().len(), 1);

    assert_eq!(
        log.append(event("b-torn", DeploymentStatus::Running, "op-1")).await.unwrap(),
        AppendOutcome::Applied
    );
    let events = log.events(&build_id).await.unwrap();
    assert_eq!(
        events.iter().map(|e| e.status).collect::<Vec<_>>(),
        vec![DeploymentStatus::Placed, DeploymentStatus::Running]
    );
}

#[tokio::test]
async fn test_corrupt_record_in_the_middle_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let build_id = BuildId::from("b-corrupt");

    let good = serde_json::to_string(&event("b-corrupt", DeploymentStatus::Placed, "op-1")).unwrap();
    let contents = format!("garbage\n{good}\n");
    let path = tmp.path().join(format!("{}.jsonl", file_stem(&build_id)));
    std::fs::write(&path, contents).unwrap();

    let log = DiskEventLog::new(Dir::new(tmp.path()));
    assert!(log.events(&build_id).await.is_err());
}

#[tokio::test]
async fn test_checkpoints_index_external_ids_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Dir::new(tmp.path().join("checkpoints"));

    let store = DiskCheckpointStore::open(dir.clone()).await.unwrap();
    let mut checkpoint = WorkflowCheckpoint::new(deploy_request("b-cp").into());
    checkpoint.advance(WorkflowStage::Submitted);
    checkpoint.build_external_id = Some("op-build-9".to_string());
    store.save(&checkpoint).await.unwrap();

    // a stale copy must not move the stored checkpoint backwards
    let stale = WorkflowCheckpoint::new(deploy_request("b-cp").into());
    let stored = store.save(&stale).await.unwrap();
    assert_eq!(stored.stage, WorkflowStage::Submitted);
    assert_eq!(stored.build_external_id.as_deref(), Some("op-build-9"));
    drop(store);

    let store = DiskCheckpointStore::open(dir).await.unwrap();
    assert_eq!(
        store.find_by_external_id("op-build-9").await.unwrap(),
        Some((BuildId::from("b-cp"), Phase::Build))
    );
    assert!(store.find_by_external_id("op-unknown").await.unwrap().is_none());
    assert_eq!(store.list_unfinished().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_workflow_resumes_from_disk_after_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    driver.lose_next_submit_response();

    let open = |driver: Arc<FakeDriver>| {
        let base = tmp.path().to_path_buf();
        async move {
            Orchestrator::new(
                driver,
                Arc::new(DiskEventLog::new(Dir::new(base.join("events")))),
                Arc::new(
                    DiskCheckpointStore::open(Dir::new(base.join("checkpoints")))
                        .await
                        .unwrap(),
                ),
                fast_options(),
            )
        }
    };

    let first = open(driver.clone()).await;
    assert!(first.run(build_request("b-restart").into()).await.is_err());
    drop(first);

    // same provider, fresh process
    let second = open(driver.clone()).await;
    let unfinished = second.unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 1);
    let outcome = second
        .resume(unfinished.into_iter().next().unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, Some(WorkflowOutcome::Built));
    assert_eq!(driver.submit_count(), 1);
}

#[tokio::test]
async fn test_checkpoints_on_disk_hold_no_secret_values() {
    let tmp = tempfile::tempdir().unwrap();
    let store = DiskCheckpointStore::open(Dir::new(tmp.path())).await.unwrap();
    let request = build_request("b-secret");
    store
        .save(&WorkflowCheckpoint::new(request.clone().into()))
        .await
        .unwrap();

    let mut found_checkpoint = false;
    for entry in std::fs::read_dir(tmp.path()).unwrap() {
        let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        found_checkpoint |= contents.contains("b-secret");
        assert!(!contents.contains("tok-123"));
    }
    assert!(found_checkpoint);

    // the stored request still matches the caller's, so a rerun is accepted
    let reopened = DiskCheckpointStore::open(Dir::new(tmp.path())).await.unwrap();
    let stored = reopened.load(&BuildId::from("b-secret")).await.unwrap().unwrap();
    assert_eq!(stored.request, WorkflowRequest::from(request));
}
