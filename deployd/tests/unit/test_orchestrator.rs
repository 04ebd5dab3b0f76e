//! Orchestrator tests against a local CI and blob stand-in

mod support;

use std::time::Duration;

use deployd::deploy::drift::build_manifest;
use deployd::deploy::fsm::DeploymentStatus;
use deployd::deploy::orchestrator::{BuildCheck, StartOutcome};
use deployd::errors::DeployError;
use deployd::models::deployment::{Deployment, TriggerKind};
use support::{harness, harness_with, read, write_tree, Harness};

const SHA: &str = "9fceb02d0ae598e95dc970b74767f19372d61af8";
const OTHER_SHA: &str = "e83c5163316f89bfbde7d9ab23ca2e25604af290";

const LIVE_V1: &[(&str, &str)] = &[
    ("index.html", "<h1>v1</h1>\n"),
    ("css/site.css", "body { color: black; }\n"),
    ("uploads/keep.txt", "user content\n"),
];

const ARTIFACT_V2: &[(&str, &str)] = &[
    ("index.html", "<h1>v2</h1>\n"),
    ("css/site.css", "body { color: navy; }\n"),
];

async fn start(h: &Harness, sha: &str) -> Deployment {
    match h
        .orchestrator
        .start_deployment(sha, TriggerKind::Manual, 1, None)
        .await
        .unwrap()
    {
        StartOutcome::Started(deployment) => deployment,
        other => panic!("expected a started deployment, got {:?}", other),
    }
}

/// Start, then report the build as finished and poll it through
async fn deploy(h: &Harness, sha: &str, run_id: u64) -> Deployment {
    let deployment = start(h, sha).await;
    h.fake.add_run(run_id, sha, "completed", Some("success"));
    match h.orchestrator.find_and_poll(deployment.id).await.unwrap() {
        BuildCheck::Deployed(deployment) => deployment,
        other => panic!("expected a deployed build, got {:?}", other),
    }
}

// ================================== STARTING ===================================== //

#[tokio::test]
async fn test_start_triggers_build_without_run_id() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;

    assert_eq!(deployment.status, DeploymentStatus::Building);
    assert_eq!(deployment.workflow_run_id, None);
    assert_eq!(deployment.commit_hash, SHA);
    assert_eq!(deployment.commit.message, "Update styles");
    assert_eq!(deployment.commit.author, "Dev");
    assert_eq!(deployment.trigger, TriggerKind::Manual);
    assert_eq!(h.fake.state.lock().unwrap().dispatches, 1);

    // The lock is only held around the trigger call
    assert_eq!(h.lock.holder().await.unwrap(), None);
}

#[tokio::test]
async fn test_start_while_building_is_blocked() {
    let h = harness().await;
    let first = start(&h, SHA).await;

    let outcome = h
        .orchestrator
        .start_deployment(OTHER_SHA, TriggerKind::Manual, 1, None)
        .await
        .unwrap();
    match outcome {
        StartOutcome::Blocked {
            deployment_id,
            status,
        } => {
            assert_eq!(deployment_id, first.id);
            assert_eq!(status, DeploymentStatus::Building);
        }
        other => panic!("expected blocked, got {:?}", other),
    }

    assert_eq!(h.repo.list_deployments(10).await.unwrap().len(), 1);
    assert_eq!(h.fake.state.lock().unwrap().dispatches, 1);
}

#[tokio::test]
async fn test_start_blocked_by_lock_holder() {
    let h = harness().await;
    h.lock.acquire(77, Duration::from_secs(60)).await.unwrap();

    let outcome = h
        .orchestrator
        .start_deployment(SHA, TriggerKind::Webhook, 0, None)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        StartOutcome::Blocked {
            deployment_id: 77,
            ..
        }
    ));
    assert!(h.repo.list_deployments(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pending_records_do_not_block() {
    let h = harness().await;
    let queued = h
        .orchestrator
        .queue_deployment(SHA, TriggerKind::Webhook, 0, None)
        .await
        .unwrap();
    assert_eq!(queued.status, DeploymentStatus::Pending);

    let started = start(&h, OTHER_SHA).await;
    assert_ne!(started.id, queued.id);

    // Approval now waits for the running build
    let outcome = h
        .orchestrator
        .approve_pending_deployment(queued.id, 9)
        .await
        .unwrap();
    assert!(matches!(outcome, StartOutcome::Blocked { deployment_id, .. } if deployment_id == started.id));
    assert_eq!(
        h.orchestrator.load(queued.id).await.unwrap().status,
        DeploymentStatus::Pending
    );
}

#[tokio::test]
async fn test_approve_requires_pending() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;

    let err = h
        .orchestrator
        .approve_pending_deployment(deployment.id, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidTransition(_)));

    let err = h
        .orchestrator
        .approve_pending_deployment(404, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));
}

#[tokio::test]
async fn test_trigger_failure_fails_record() {
    let h = harness().await;
    h.fake.state.lock().unwrap().dispatch_status = 422;

    let outcome = h
        .orchestrator
        .start_deployment(SHA, TriggerKind::Manual, 1, None)
        .await
        .unwrap();
    let StartOutcome::Failed(deployment) = outcome else {
        panic!("expected a failed trigger");
    };
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.error_message.unwrap().contains("422"));
    assert_eq!(h.lock.holder().await.unwrap(), None);

    // A failed record does not block the next attempt
    h.fake.state.lock().unwrap().dispatch_status = 204;
    start(&h, SHA).await;
}

#[tokio::test]
async fn test_resolve_branch_head() {
    let h = harness().await;
    let head = h.orchestrator.resolve_branch_head().await.unwrap();
    assert_eq!(head.sha, support::HEAD_SHA);
    assert_eq!(head.message, "Release notes");

    h.fake.state.lock().unwrap().head_commits.clear();
    let err = h.orchestrator.resolve_branch_head().await.unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));
}

// ================================== POLLING ====================================== //

#[tokio::test]
async fn test_poll_waits_for_matching_run() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;

    // Only someone else's run so far
    h.fake.add_run(10, OTHER_SHA, "completed", Some("success"));
    assert!(matches!(
        h.orchestrator.find_and_poll(deployment.id).await.unwrap(),
        BuildCheck::NoRunYet
    ));

    h.fake.add_run(11, SHA, "in_progress", None);
    let BuildCheck::Waiting(waiting) = h.orchestrator.find_and_poll(deployment.id).await.unwrap()
    else {
        panic!("expected the build to be running");
    };
    assert_eq!(waiting.workflow_run_id, Some(11));
    assert_eq!(waiting.build_url.as_deref(), Some("https://ci.example/runs/11"));
    assert_eq!(waiting.status, DeploymentStatus::Building);
}

#[tokio::test]
async fn test_failed_conclusion_fails_deployment() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;
    h.fake.add_run(12, SHA, "completed", Some("failure"));

    let BuildCheck::Failed(failed) = h.orchestrator.find_and_poll(deployment.id).await.unwrap()
    else {
        panic!("expected a failed build");
    };
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.error_message.unwrap().contains("failure"));
    assert!(!h.target.exists());

    // Later polls leave it alone
    assert!(matches!(
        h.orchestrator.find_and_poll(deployment.id).await.unwrap(),
        BuildCheck::Skipped(DeploymentStatus::Failed)
    ));
}

#[tokio::test]
async fn test_build_timeout() {
    let h = harness_with(|config| config.build_timeout = Duration::from_millis(1)).await;
    let deployment = start(&h, SHA).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let BuildCheck::TimedOut(timed_out) =
        h.orchestrator.find_and_poll(deployment.id).await.unwrap()
    else {
        panic!("expected a timeout");
    };
    assert_eq!(timed_out.status, DeploymentStatus::Failed);
    assert_eq!(
        timed_out.error_message.as_deref(),
        Some("build timed out after 1ms")
    );
}

#[tokio::test]
async fn test_build_timeout_counts_from_approval() {
    let h = harness_with(|config| config.build_timeout = Duration::from_millis(500)).await;
    let queued = h
        .orchestrator
        .queue_deployment(SHA, TriggerKind::Webhook, 0, None)
        .await
        .unwrap();

    // Waiting for approval longer than a build may take
    tokio::time::sleep(Duration::from_millis(700)).await;
    let StartOutcome::Started(approved) = h
        .orchestrator
        .approve_pending_deployment(queued.id, 42)
        .await
        .unwrap()
    else {
        panic!("expected the approval to start a build");
    };
    assert!(approved.building_since.unwrap() > approved.created_at);

    assert!(matches!(
        h.orchestrator.find_and_poll(approved.id).await.unwrap(),
        BuildCheck::NoRunYet
    ));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(matches!(
        h.orchestrator.find_and_poll(approved.id).await.unwrap(),
        BuildCheck::TimedOut(_)
    ));
}

#[tokio::test]
async fn test_poll_active_visits_building_only() {
    let h = harness().await;
    h.orchestrator
        .queue_deployment(OTHER_SHA, TriggerKind::Webhook, 0, None)
        .await
        .unwrap();
    start(&h, SHA).await;

    assert_eq!(h.orchestrator.poll_active().await.unwrap(), 1);
}

// ================================= DEPLOYING ===================================== //

#[tokio::test]
async fn test_successful_build_is_backed_up_and_installed() {
    let h = harness().await;
    write_tree(&h.target, LIVE_V1);
    h.fake.set_artifact(ARTIFACT_V2);

    let deployed = deploy(&h, SHA, 20).await;

    assert_eq!(deployed.status, DeploymentStatus::Success);
    assert!(deployed.deployed_at.is_some());
    assert_eq!(read(&h.target, "index.html"), "<h1>v2</h1>\n");
    // Clean install drops files the artifact does not carry
    assert!(!h.target.join("uploads/keep.txt").exists());

    let backup = deployed.backup_path.clone().unwrap();
    assert!(std::path::Path::new(&backup).is_file());
    assert!(h.orchestrator.artifact_path(deployed.id).is_file());

    let manifest = deployed.manifest.unwrap();
    assert_eq!(manifest, build_manifest(&h.target).unwrap());

    assert!(!h.fake.state.lock().unwrap().blob_saw_auth);
    assert_eq!(h.lock.holder().await.unwrap(), None);
}

#[tokio::test]
async fn test_overlay_install_keeps_extra_files() {
    let h = harness_with(|config| config.clean_install = false).await;
    write_tree(&h.target, LIVE_V1);
    h.fake.set_artifact(ARTIFACT_V2);

    deploy(&h, SHA, 21).await;
    assert_eq!(read(&h.target, "css/site.css"), "body { color: navy; }\n");
    assert_eq!(read(&h.target, "uploads/keep.txt"), "user content\n");
}

#[tokio::test]
async fn test_first_deploy_has_no_backup() {
    let h = harness().await;
    h.fake.set_artifact(ARTIFACT_V2);

    let deployed = deploy(&h, SHA, 22).await;
    assert_eq!(deployed.backup_path, None);
    assert!(deployed.log.contains("backup skipped"));

    let err = h
        .orchestrator
        .rollback_deployment(deployed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::DeployFailed(_)));
    assert_eq!(
        h.orchestrator.load(deployed.id).await.unwrap().status,
        DeploymentStatus::Success
    );
}

#[tokio::test]
async fn test_missing_redirect_location_fails_deployment() {
    let h = harness().await;
    h.fake.set_artifact(ARTIFACT_V2);
    h.fake.state.lock().unwrap().omit_location = true;

    let deployment = start(&h, SHA).await;
    h.fake.add_run(23, SHA, "completed", Some("success"));
    let BuildCheck::Failed(failed) = h.orchestrator.find_and_poll(deployment.id).await.unwrap()
    else {
        panic!("expected the deployment to fail");
    };
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.error_message.is_some());
    assert!(!h.target.exists());
    assert_eq!(h.lock.holder().await.unwrap(), None);
}

#[tokio::test]
async fn test_no_artifacts_fails_deployment() {
    let h = harness().await;
    h.fake.state.lock().unwrap().artifacts.clear();

    let deployment = start(&h, SHA).await;
    h.fake.add_run(24, SHA, "completed", Some("success"));
    let BuildCheck::Failed(failed) = h.orchestrator.find_and_poll(deployment.id).await.unwrap()
    else {
        panic!("expected the deployment to fail");
    };
    assert!(failed.error_message.unwrap().contains("no artifacts"));
}

#[tokio::test]
async fn test_lock_holder_defers_processing() {
    let h = harness().await;
    h.fake.set_artifact(ARTIFACT_V2);
    let deployment = start(&h, SHA).await;
    h.fake.add_run(25, SHA, "completed", Some("success"));

    h.lock.acquire(500, Duration::from_secs(60)).await.unwrap();
    let outcome = h.orchestrator.find_and_poll(deployment.id).await.unwrap();
    assert!(matches!(outcome, BuildCheck::LockBusy(holder) if holder.deployment_id == 500));
    assert_eq!(
        h.orchestrator.load(deployment.id).await.unwrap().status,
        DeploymentStatus::Building
    );

    assert!(h.lock.release(500).await.unwrap());
    assert!(matches!(
        h.orchestrator.find_and_poll(deployment.id).await.unwrap(),
        BuildCheck::Deployed(_)
    ));
}

#[tokio::test]
async fn test_processing_twice_is_harmless() {
    let h = harness().await;
    h.fake.set_artifact(ARTIFACT_V2);
    let deployed = deploy(&h, SHA, 26).await;

    assert!(matches!(
        h.orchestrator
            .process_successful_build(deployed.id)
            .await
            .unwrap(),
        BuildCheck::Skipped(DeploymentStatus::Success)
    ));
}

#[tokio::test]
async fn test_concurrent_processing_installs_once() {
    let h = harness().await;
    write_tree(&h.target, LIVE_V1);
    h.fake.set_artifact(ARTIFACT_V2);
    let deployment = start(&h, SHA).await;
    h.fake.add_run(27, SHA, "in_progress", None);
    assert!(matches!(
        h.orchestrator.find_and_poll(deployment.id).await.unwrap(),
        BuildCheck::Waiting(_)
    ));

    // Webhook delivery and poller racing on the same finished run
    let (first, second) = tokio::join!(
        h.orchestrator.process_successful_build(deployment.id),
        h.orchestrator.process_successful_build(deployment.id),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let deployed = outcomes
        .iter()
        .filter(|o| matches!(o, BuildCheck::Deployed(_)))
        .count();
    assert_eq!(deployed, 1, "outcomes: {:?}", outcomes);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        BuildCheck::Deployed(_)
            | BuildCheck::LockBusy(_)
            | BuildCheck::Skipped(DeploymentStatus::Success)
    )));

    let stored = h.orchestrator.load(deployment.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Success);
    assert_eq!(stored.error_message, None);
    assert_eq!(read(&h.target, "index.html"), "<h1>v2</h1>\n");
    assert_eq!(h.lock.holder().await.unwrap(), None);
}

// ================================= ROLLBACK ====================================== //

#[tokio::test]
async fn test_rollback_restores_previous_tree() {
    let h = harness().await;
    write_tree(&h.target, LIVE_V1);
    let before = build_manifest(&h.target).unwrap();
    h.fake.set_artifact(ARTIFACT_V2);

    let deployed = deploy(&h, SHA, 30).await;
    assert_ne!(build_manifest(&h.target).unwrap(), before);

    let rolled_back = h.orchestrator.rollback_deployment(deployed.id).await.unwrap();
    assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
    assert_eq!(build_manifest(&h.target).unwrap(), before);
    assert_eq!(read(&h.target, "uploads/keep.txt"), "user content\n");
    assert_eq!(h.lock.holder().await.unwrap(), None);

    // Only once
    let err = h
        .orchestrator
        .rollback_deployment(deployed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_rollback_refused_while_locked() {
    let h = harness().await;
    write_tree(&h.target, LIVE_V1);
    h.fake.set_artifact(ARTIFACT_V2);
    let deployed = deploy(&h, SHA, 31).await;

    h.lock.acquire(999, Duration::from_secs(60)).await.unwrap();
    let err = h
        .orchestrator
        .rollback_deployment(deployed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::LockHeld(999)));
    assert_eq!(read(&h.target, "index.html"), "<h1>v2</h1>\n");
}

// ================================== CANCEL ======================================= //

#[tokio::test]
async fn test_cancel_building_cancels_run() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;
    h.fake.add_run(40, SHA, "in_progress", None);
    h.orchestrator.find_and_poll(deployment.id).await.unwrap();

    let cancelled = h.orchestrator.cancel_deployment(deployment.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    assert_eq!(h.fake.state.lock().unwrap().cancelled, vec![40]);

    // The slot is free again
    start(&h, OTHER_SHA).await;
}

#[tokio::test]
async fn test_cancel_refused_while_its_files_are_written() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;

    // The lease a worker holds while installing this deployment
    h.lock
        .acquire(deployment.id, Duration::from_secs(60))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .cancel_deployment(deployment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::LockHeld(id) if id == deployment.id));
    assert_eq!(
        h.orchestrator.load(deployment.id).await.unwrap().status,
        DeploymentStatus::Building
    );
    assert_eq!(
        h.lock.holder().await.unwrap().unwrap().deployment_id,
        deployment.id
    );
}

#[tokio::test]
async fn test_cancel_leaves_other_lease_alone() {
    let h = harness().await;
    let deployment = start(&h, SHA).await;
    h.lock.acquire(500, Duration::from_secs(60)).await.unwrap();

    let cancelled = h.orchestrator.cancel_deployment(deployment.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
    assert_eq!(h.lock.holder().await.unwrap().unwrap().deployment_id, 500);
}

#[tokio::test]
async fn test_cancel_pending_and_terminal() {
    let h = harness().await;
    let queued = h
        .orchestrator
        .queue_deployment(SHA, TriggerKind::Webhook, 0, None)
        .await
        .unwrap();

    let cancelled = h.orchestrator.cancel_deployment(queued.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);

    let err = h
        .orchestrator
        .cancel_deployment(queued.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidTransition(_)));
}
