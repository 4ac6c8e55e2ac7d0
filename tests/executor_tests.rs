//! Job operation executor tests.
//!
//! These tests drive operations end to end through a running node: the
//! container calls made, the job state recorded and the running count the
//! node reports.


use std::time::Duration;

use jobfleet::error::ClusterError;
use jobfleet::scheduler::{Artifact, JobKey, JobOperation, JobState, MisfirePolicy};
use jobfleet::worker::container::{ContainerCall, InMemoryContainer};
use jobfleet::worker::LaunchSpec;
use test_harness::TestCluster;

/// Container calls as "start <artifact>" / "shutdown <artifact>"
async fn trace(container: &InMemoryContainer) -> Vec<String> {
    container
        .calls()
        .await
        .iter()
        .map(|call| match call {
            ContainerCall::Start { .. } => format!("start {}", call.artifact()),
            ContainerCall::Shutdown { .. } => format!("shutdown {}", call.artifact()),
        })
        .collect()
}

/// Point an existing job at a new artifact and request a restart
async fn request_upgrade(cluster: &TestCluster, path: &str, artifact: &str) {
    let mut job = cluster.read_job(path).await;
    let previous = job.artifact.clone();
    job.artifact = Artifact::new(artifact);
    job.original_artifact = Some(previous);
    job.request(JobOperation::Restart);
    cluster.store.write_job(&job).await.unwrap();
}

#[tokio::test]
async fn test_start_on_bound_node() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let node = &cluster.nodes[0];
    let node_path = node.path();

    let mut job = TestCluster::job("j3", Some(JobOperation::Start));
    job.bind(&node_path);
    cluster.store.write_job(&job).await.unwrap();
    let path = cluster.store.job_path(&job.key);

    let started = cluster
        .wait_for_started(&path, Duration::from_secs(2))
        .await
        .expect("Bound job should start");
    assert_eq!(started.applied_on.as_deref(), Some(node_path.as_str()));
    assert!(started.last_failure.is_none());

    assert!(cluster.wait_for_running(&node_path, 1, Duration::from_secs(2)).await);
    let record = cluster.read_node(&node_path).await.unwrap();
    assert!(record.job_paths.contains(&path));
    assert_eq!(node.ctx().running_job_count().await, 1);
    assert!(node.container.is_scheduled(&job.key).await);
    assert_eq!(trace(&node.container).await, vec!["start j3-v1.jar"]);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_restart_swaps_artifacts() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let (path, job) = cluster.start_job("reports").await;
    let node = &cluster.nodes[0];

    request_upgrade(&cluster, &path, "reports-v2.jar").await;

    let restarted = cluster
        .wait_for_job(&path, Duration::from_secs(2), |j| {
            j.state == JobState::Startup
                && j.artifact.reference == "reports-v2.jar"
                && j.applied_on.is_some()
        })
        .await
        .expect("Restart should complete");
    assert_eq!(restarted.operation, Some(JobOperation::Restart));

    assert_eq!(
        trace(&node.container).await,
        vec!["start reports-v1.jar", "shutdown reports-v1.jar", "start reports-v2.jar"]
    );
    assert_eq!(node.ctx().running_job_count().await, 1);
    assert!(node.container.is_scheduled(&job.key).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_restart_start_failure_records_failure() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let (path, job) = cluster.start_job("j4").await;
    let node = &cluster.nodes[0];
    let node_path = node.path();
    node.container.fail_start_of("j4-v2.jar").await;

    request_upgrade(&cluster, &path, "j4-v2.jar").await;

    let failed = cluster
        .wait_for_job(&path, Duration::from_secs(2), |j| j.state == JobState::Failed)
        .await
        .expect("Restart should fail");
    let failure = failed.last_failure.expect("failure is recorded");
    assert_eq!(failure.category, "artifact_unavailable");
    assert!(failure.message.contains("j4-v2.jar"));
    assert_eq!(failed.applied_on.as_deref(), Some(node_path.as_str()));

    // The shutdown's decrement stays local; the failed start is not counted
    assert_eq!(node.ctx().running_job_count().await, 0);
    assert_eq!(cluster.read_node(&node_path).await.unwrap().running_job_count, 1);

    assert_eq!(
        trace(&node.container).await,
        vec!["start j4-v1.jar", "shutdown j4-v1.jar", "start j4-v2.jar"]
    );
    assert!(!node.container.is_scheduled(&job.key).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_pause_unschedules_and_decrements() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let (path, job) = cluster.start_job("nightly").await;
    let node = &cluster.nodes[0];
    let node_path = node.path();

    cluster
        .store
        .request_operation(&job.key, JobOperation::Pause)
        .await
        .unwrap();

    let paused = cluster
        .wait_for_job(&path, Duration::from_secs(2), |j| j.state == JobState::Pause)
        .await
        .expect("Job should pause");
    assert_eq!(paused.assigned_node.as_deref(), Some(node_path.as_str()));

    assert!(cluster.wait_for_running(&node_path, 0, Duration::from_secs(2)).await);
    let record = cluster.read_node(&node_path).await.unwrap();
    assert!(record.job_paths.is_empty());
    assert!(!node.container.is_scheduled(&job.key).await);
    assert_eq!(
        trace(&node.container).await,
        vec!["start nightly-v1.jar", "shutdown nightly-v1.jar"]
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_start_forwards_full_launch_spec() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let node = &cluster.nodes[0];

    let mut artifact = Artifact::new("billing-v3.jar");
    artifact.scan_targets = vec![
        "com.example.billing".to_string(),
        "com.example.audit".to_string(),
    ];
    artifact.framework_integration = true;
    let mut job = TestCluster::job("billing", Some(JobOperation::Start))
        .with_misfire_policy(MisfirePolicy::FireOnce);
    job.artifact = artifact.clone();
    job.cron = "0 0/15 * * * ?".to_string();
    let key = job.key.clone();
    let path = cluster.store.submit_job(job).await.unwrap();

    cluster
        .wait_for_started(&path, Duration::from_secs(2))
        .await
        .expect("Job should start");

    let calls = node.container.calls().await;
    assert_eq!(
        calls,
        vec![ContainerCall::Start {
            key,
            launch: LaunchSpec {
                artifact,
                cron: "0 0/15 * * * ?".to_string(),
                misfire_policy: MisfirePolicy::FireOnce,
            },
        }]
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_invalid_schedule_fails_without_retry() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let node = &cluster.nodes[0];

    let mut job = TestCluster::job("broken", Some(JobOperation::Start));
    job.cron = "every minute".to_string();
    let path = cluster.store.submit_job(job).await.unwrap();

    let failed = cluster
        .wait_for_job(&path, Duration::from_secs(2), |j| j.state == JobState::Failed)
        .await
        .expect("Start should fail");
    assert_eq!(failed.last_failure.unwrap().category, "invalid_schedule");
    assert_eq!(node.ctx().running_job_count().await, 0);

    // A payload change that does not request a new operation is not a retry
    let mut touched = cluster.read_job(&path).await;
    touched.updated_at = chrono::Utc::now() + chrono::Duration::seconds(1);
    cluster.store.write_job(&touched).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(node.container.calls().await.len(), 1);
    assert_eq!(cluster.read_job(&path).await.state, JobState::Failed);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_operation_not_reapplied_on_redelivery() {
    let cluster = TestCluster::new(&["10.0.0.1", "10.0.0.2"]).await;
    cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");
    let (path, job) = cluster.start_job("steady").await;
    let owner = job.assigned_node.clone().unwrap();

    let current = cluster.read_job(&path).await;
    // Identical payload, then a changed one without a new request
    cluster.store.write_job(&current).await.unwrap();
    let mut touched = current.clone();
    touched.updated_at = chrono::Utc::now() + chrono::Duration::seconds(1);
    cluster.store.write_job(&touched).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut total_calls = 0;
    for node in &cluster.nodes {
        total_calls += node.container.calls().await.len();
    }
    assert_eq!(total_calls, 1);
    assert_eq!(cluster.read_job(&path).await.assigned_node, Some(owner.clone()));
    assert!(cluster.wait_for_running(&owner, 1, Duration::from_secs(1)).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_request_on_missing_job() {
    let cluster = TestCluster::new(&[]).await;

    let err = cluster
        .store
        .request_operation(&JobKey::new("test", "absent"), JobOperation::Start)
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::JobNotFound(ref key) if key == "test.absent"));

    cluster.shutdown().await;
}
