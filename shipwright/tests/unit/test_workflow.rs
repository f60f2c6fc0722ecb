//! Workflow tests against the scripted driver

use std::sync::Arc;
use std::time::Duration;

use provider_api::BuildStatus;
use shipwright::errors::{OrchestratorError, ProviderError};
use shipwright::models::{BuildId, WorkflowRequest};
use shipwright::orchestrator::{Orchestrator, OrchestratorOptions, WorkflowOutcome};
use shipwright::provider::{Capabilities, FakeDriver, ProviderDriver};
use shipwright::status::{DeploymentStatus, Phase};
use shipwright::store::{AppendOutcome, WorkflowStage};

use crate::support::{build_request, deploy_request, orchestrator, orchestrator_with};

async fn statuses(orchestrator: &Orchestrator, build_id: &str, phase: Phase) -> Vec<DeploymentStatus> {
    orchestrator
        .events(&BuildId::from(build_id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.phase == phase)
        .map(|e| e.status)
        .collect()
}

#[tokio::test]
async fn test_successful_build_deploys_once() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());

    let outcome = orchestrator.run(deploy_request("b-a").into()).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Deployed);

    assert_eq!(
        statuses(&orchestrator, "b-a", Phase::Build).await,
        vec![
            DeploymentStatus::Pending,
            DeploymentStatus::Placed,
            DeploymentStatus::Running,
            DeploymentStatus::Ready
        ]
    );
    assert_eq!(
        statuses(&orchestrator, "b-a", Phase::Deploy).await.last(),
        Some(&DeploymentStatus::Ready)
    );
    assert_eq!(driver.submit_count(), 1);
    assert_eq!(driver.deploy_count(), 1);

    let checkpoint = orchestrator
        .checkpoint(&BuildId::from("b-a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.stage, WorkflowStage::DeployTerminal { succeeded: true });
    assert!(checkpoint.is_finished());
}

#[tokio::test]
async fn test_failed_build_never_deploys() {
    let driver = Arc::new(FakeDriver::new().with_build_statuses(vec![
        BuildStatus::Queued,
        BuildStatus::Working,
        BuildStatus::Failure,
    ]));
    let orchestrator = orchestrator(driver.clone());

    let outcome = orchestrator.run(deploy_request("b-b").into()).await.unwrap();
    assert_eq!(
        outcome,
        WorkflowOutcome::BuildFailed {
            status: DeploymentStatus::Error
        }
    );
    assert_eq!(
        statuses(&orchestrator, "b-b", Phase::Build).await.last(),
        Some(&DeploymentStatus::Error)
    );
    assert_eq!(driver.deploy_calls(), 0);
    assert!(statuses(&orchestrator, "b-b", Phase::Deploy).await.is_empty());
}

#[tokio::test]
async fn test_build_only_workflow() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());

    let outcome = orchestrator.run(build_request("b-only").into()).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Built);
    assert_eq!(driver.deploy_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_build_is_aborted() {
    let driver = Arc::new(
        FakeDriver::new().with_build_statuses(vec![BuildStatus::Queued, BuildStatus::Cancelled]),
    );
    let orchestrator = orchestrator(driver);

    let outcome = orchestrator.run(build_request("b-cancel").into()).await.unwrap();
    assert_eq!(
        outcome,
        WorkflowOutcome::BuildFailed {
            status: DeploymentStatus::Aborted
        }
    );
}

#[tokio::test]
async fn test_streaming_driver_reaches_the_same_end() {
    let driver = Arc::new(FakeDriver::new().with_capabilities(Capabilities {
        idempotent_submit: false,
        deploy: true,
        stream: true,
    }));
    let orchestrator = orchestrator(driver.clone());

    let outcome = orchestrator.run(deploy_request("b-stream").into()).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Deployed);
    assert_eq!(driver.deploy_count(), 1);
}

#[tokio::test]
async fn test_lost_submit_response_is_recovered_without_resubmitting() {
    let driver = Arc::new(FakeDriver::new());
    driver.lose_next_submit_response();
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = build_request("b-lost").into();

    let err = orchestrator.run(request.clone()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Submit(ProviderError::Transient(_))));

    let checkpoint = orchestrator
        .checkpoint(&BuildId::from("b-lost"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.stage, WorkflowStage::Submitting);
    assert!(checkpoint.build_external_id.is_none());

    let outcome = orchestrator.run(request).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Built);
    assert_eq!(driver.submit_calls(), 1);
    assert_eq!(driver.submit_count(), 1);
}

#[tokio::test]
async fn test_resume_picks_up_unfinished_workflows() {
    let driver = Arc::new(FakeDriver::new());
    driver.lose_next_submit_response();
    let orchestrator = orchestrator(driver.clone());

    assert!(orchestrator.run(deploy_request("b-resume").into()).await.is_err());

    let unfinished = orchestrator.unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 1);

    let outcome = orchestrator
        .resume(unfinished.into_iter().next().unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, Some(WorkflowOutcome::Deployed));
    assert_eq!(driver.submit_count(), 1);
    assert_eq!(driver.deploy_count(), 1);
    assert!(orchestrator.unfinished().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_notification_ahead_of_receipt_links_the_operation() {
    let driver = Arc::new(FakeDriver::new());
    driver.lose_next_submit_response();
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = build_request("b-race").into();

    assert!(orchestrator.run(request.clone()).await.is_err());
    let external_id = driver
        .external_id(&BuildId::from("b-race"), Phase::Build)
        .unwrap();

    driver.advance(&external_id);
    let payload = driver.notification(&external_id).unwrap();
    let observed = driver.parse_notification(&payload).unwrap();
    let ingested = orchestrator.ingest(observed).await.unwrap().unwrap();
    assert_eq!(ingested.build_id, BuildId::from("b-race"));
    assert_eq!(ingested.status, DeploymentStatus::Running);

    let checkpoint = orchestrator
        .checkpoint(&BuildId::from("b-race"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.build_external_id.as_deref(), Some(external_id.as_str()));

    assert_eq!(orchestrator.run(request).await.unwrap(), WorkflowOutcome::Built);
    assert_eq!(driver.submit_count(), 1);
}

#[tokio::test]
async fn test_rejected_submit_fails_the_build() {
    let driver = Arc::new(FakeDriver::new());
    driver.fail_next_submit(ProviderError::Permanent {
        status: 400,
        body: "invalid build config".to_string(),
    });
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = deploy_request("b-reject").into();

    let err = orchestrator.run(request.clone()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Submit(ProviderError::Permanent { .. })));
    assert_eq!(
        statuses(&orchestrator, "b-reject", Phase::Build).await,
        vec![DeploymentStatus::Pending, DeploymentStatus::Error]
    );

    // the failure is final; running again does not resubmit
    let outcome = orchestrator.run(request).await.unwrap();
    assert_eq!(
        outcome,
        WorkflowOutcome::BuildFailed {
            status: DeploymentStatus::Error
        }
    );
    assert_eq!(driver.submit_calls(), 1);
    assert_eq!(driver.deploy_calls(), 0);
}

#[tokio::test]
async fn test_deploy_failure_is_recorded_once() {
    let driver = Arc::new(FakeDriver::new());
    driver.fail_deploy(ProviderError::Permanent {
        status: 403,
        body: "permission denied".to_string(),
    });
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = deploy_request("b-deploy-fail").into();

    let err = orchestrator.run(request.clone()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Deploy(_)));
    assert_eq!(
        statuses(&orchestrator, "b-deploy-fail", Phase::Deploy).await,
        vec![DeploymentStatus::Pending, DeploymentStatus::Error]
    );

    let outcome = orchestrator.run(request).await.unwrap();
    assert_eq!(
        outcome,
        WorkflowOutcome::DeployFailed {
            status: DeploymentStatus::Error
        }
    );
    assert_eq!(driver.deploy_calls(), 1);
}

#[tokio::test]
async fn test_lost_deploy_response_is_recovered_without_redeploying() {
    let driver = Arc::new(FakeDriver::new());
    driver.lose_next_deploy_response();
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = deploy_request("b-lost-deploy").into();

    let err = orchestrator.run(request.clone()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Deploy(ProviderError::Transient(_))));

    let checkpoint = orchestrator
        .checkpoint(&BuildId::from("b-lost-deploy"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.stage, WorkflowStage::DeploySubmitting);
    assert!(checkpoint.deploy_external_id.is_none());
    assert_eq!(driver.deploy_count(), 1);

    let outcome = orchestrator.run(request).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Deployed);
    assert_eq!(driver.deploy_calls(), 1);
    assert_eq!(driver.deploy_count(), 1);
    assert!(!statuses(&orchestrator, "b-lost-deploy", Phase::Deploy)
        .await
        .contains(&DeploymentStatus::Error));
}

#[tokio::test]
async fn test_deployment_is_refused_when_the_driver_cannot_deploy() {
    let driver = Arc::new(FakeDriver::new().with_capabilities(Capabilities {
        idempotent_submit: false,
        deploy: false,
        stream: false,
    }));
    let orchestrator = orchestrator(driver.clone());

    let err = orchestrator
        .run(deploy_request("b-no-deploy").into())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DeployUnsupported { provider: "fake", .. }));
    assert_eq!(driver.submit_calls(), 0);
    assert!(orchestrator
        .checkpoint(&BuildId::from("b-no-deploy"))
        .await
        .unwrap()
        .is_none());

    let outcome = orchestrator.run(build_request("b-build-only").into()).await.unwrap();
    assert_eq!(outcome, WorkflowOutcome::Built);
}

#[tokio::test]
async fn test_finished_workflow_is_not_driven_again() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = deploy_request("b-twice").into();

    assert_eq!(orchestrator.run(request.clone()).await.unwrap(), WorkflowOutcome::Deployed);
    assert_eq!(orchestrator.run(request).await.unwrap(), WorkflowOutcome::Deployed);
    assert_eq!(driver.submit_calls(), 1);
    assert_eq!(driver.deploy_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_submit_once() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let request: WorkflowRequest = deploy_request("b-concurrent").into();

    let (a, b) = tokio::join!(
        orchestrator.run(request.clone()),
        orchestrator.run(request.clone())
    );
    assert_eq!(a.unwrap(), WorkflowOutcome::Deployed);
    assert_eq!(b.unwrap(), WorkflowOutcome::Deployed);
    assert_eq!(driver.submit_calls(), 1);
    assert_eq!(driver.deploy_calls(), 1);
}

#[tokio::test]
async fn test_same_build_id_with_different_request_is_refused() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver);

    orchestrator.run(build_request("b-same").into()).await.unwrap();
    let err = orchestrator
        .run(deploy_request("b-same").into())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RequestMismatch { .. }));
}

#[tokio::test]
async fn test_stuck_build_times_out() {
    let driver = Arc::new(
        FakeDriver::new().with_build_statuses(vec![BuildStatus::Queued, BuildStatus::Working]),
    );
    let orchestrator = orchestrator_with(
        driver,
        OrchestratorOptions {
            poll_interval: Duration::from_millis(5),
            phase_timeout: Duration::from_millis(100),
        },
    );

    let err = orchestrator.run(build_request("b-stuck").into()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Timeout { .. }));

    let checkpoint = orchestrator
        .checkpoint(&BuildId::from("b-stuck"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.stage, WorkflowStage::Submitted);
}

#[tokio::test]
async fn test_late_event_after_terminal_is_discarded() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());

    orchestrator.run(build_request("b-late").into()).await.unwrap();
    let external_id = driver
        .external_id(&BuildId::from("b-late"), Phase::Build)
        .unwrap();

    let payload = driver
        .notification_with_status(&external_id, BuildStatus::Failure)
        .unwrap();
    let observed = driver.parse_notification(&payload).unwrap();
    let ingested = orchestrator.ingest(observed).await.unwrap().unwrap();
    assert_eq!(
        ingested.outcome,
        AppendOutcome::Regressed {
            current: DeploymentStatus::Ready
        }
    );
    assert_eq!(
        orchestrator
            .current_status(&BuildId::from("b-late"), Phase::Build)
            .await
            .unwrap(),
        Some(DeploymentStatus::Ready)
    );
}

#[tokio::test]
async fn test_webhook_wakes_a_waiting_workflow() {
    // a build that never progresses on its own; only the webhook finishes it
    let driver = Arc::new(
        FakeDriver::new().with_build_statuses(vec![BuildStatus::Queued, BuildStatus::Working]),
    );
    let orchestrator = orchestrator_with(
        driver.clone(),
        OrchestratorOptions {
            poll_interval: Duration::from_millis(20),
            phase_timeout: Duration::from_secs(5),
        },
    );
    let request: WorkflowRequest = build_request("b-wake").into();

    let checkpoint = orchestrator.start(request.clone()).await.unwrap();
    assert_eq!(checkpoint.stage, WorkflowStage::Submitted);
    let external_id = checkpoint.build_external_id.clone().unwrap();

    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(request).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let payload = driver
        .notification_with_status(&external_id, BuildStatus::Success)
        .unwrap();
    let observed = driver.parse_notification(&payload).unwrap();
    orchestrator.ingest(observed).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, WorkflowOutcome::Built);
}
