//! Job assignment tests.
//!
//! These tests verify that the leader binds unassigned jobs to the
//! deterministically selected live node, that every node computes the same
//! selection, and which notifications and operations never lead to a binding.


use std::time::Duration;

use jobfleet::coordination::{ChildEvent, ChildEventKind};
use jobfleet::scheduler::watcher::handle_job_event;
use jobfleet::scheduler::{select_node, Assignment, JobOperation, JobState};
use jobfleet::worker::OperationOutcome;
use test_harness::TestCluster;

/// Test 1: Unassigned job is bound to the first node in sorted order
#[tokio::test]
async fn test_unassigned_job_bound_to_first_sorted_node() {
    let cluster = TestCluster::new(&["10.0.0.2", "10.0.0.1", "10.0.0.3"]).await;
    cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");

    let job_path = cluster.submit_start("report").await;
    let job = cluster
        .wait_for_started(&job_path, Duration::from_secs(2))
        .await
        .expect("Job should be started");

    // All counts are equal, so the lowest address wins
    let expected = cluster.node("10.0.0.1").path();
    assert_eq!(job.assigned_node.as_deref(), Some(expected.as_str()));
    assert_eq!(job.state, JobState::Startup);

    let owner = cluster.node("10.0.0.1");
    assert_eq!(owner.ctx().running_job_count().await, 1);
    assert_eq!(owner.container.scheduled_count().await, 1);
    for other in ["10.0.0.2", "10.0.0.3"] {
        assert_eq!(cluster.node(other).container.scheduled_count().await, 0);
    }

    cluster.shutdown().await;
}

/// Test 2: Later jobs go to the least loaded node
#[tokio::test]
async fn test_assignment_prefers_least_loaded_node() {
    let cluster = TestCluster::new(&["10.0.0.9", "10.0.0.1", "10.0.0.5"]).await;
    cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");

    let first = cluster.submit_start("first").await;
    let first = cluster
        .wait_for_started(&first, Duration::from_secs(2))
        .await
        .expect("First job should be started");
    assert_eq!(first.assigned_node, Some(cluster.node("10.0.0.1").path()));

    // The owner's record must show the job before the next one is submitted
    let owner = cluster.node("10.0.0.1").path();
    let (cluster_ref, owner_ref) = (&cluster, owner.as_str());
    assert!(
        test_harness::wait_until(Duration::from_secs(2), || async move {
            cluster_ref
                .read_node(owner_ref)
                .await
                .map(|r| r.running_job_count == 1)
                .unwrap_or(false)
        })
        .await,
        "Owner record should report one running job"
    );

    let second = cluster.submit_start("second").await;
    let second = cluster
        .wait_for_started(&second, Duration::from_secs(2))
        .await
        .expect("Second job should be started");
    assert_eq!(second.assigned_node, Some(cluster.node("10.0.0.5").path()));

    cluster.shutdown().await;
}

/// Test 3: Every node computes the same target from its own listing
#[tokio::test]
async fn test_selection_is_identical_on_every_node() {
    let cluster = TestCluster::new(&["10.0.0.3", "10.0.0.1", "10.0.0.2", "10.0.0.4"]).await;

    let mut targets = Vec::new();
    for node in &cluster.nodes {
        let live = node.ctx().store().list_nodes().await.unwrap();
        assert_eq!(live.len(), 4);

        let mut reversed = live.clone();
        reversed.reverse();
        let forward = select_node(live).map(|n| n.path);
        let backward = select_node(reversed).map(|n| n.path);
        assert_eq!(forward, backward, "Selection must not depend on listing order");
        targets.push(forward);
    }

    assert!(targets.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(targets[0], Some(cluster.node("10.0.0.1").path()));

    cluster.shutdown().await;
}

/// Test 4: A notification without a payload change never leads to a binding
#[tokio::test]
async fn test_modified_notification_never_assigns() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");
    let ctx = cluster.nodes[leader].ctx().clone();

    // Outside the watched namespace, so only the direct calls below see it
    let path = "/elsewhere/jobs/test.unwatched";
    let operations = [
        Some(JobOperation::Start),
        Some(JobOperation::Restart),
        Some(JobOperation::Pause),
        Some(JobOperation::Unknown),
        None,
    ];
    for operation in operations {
        let job = TestCluster::job("unwatched", operation);
        let payload = serde_json::to_vec(&job).unwrap();
        cluster
            .store
            .coordinator()
            .write_entry(path, payload.clone())
            .await
            .unwrap();

        let dispatch = handle_job_event(
            &ctx,
            ChildEvent {
                kind: ChildEventKind::Modified,
                path: path.to_string(),
                payload,
            },
        )
        .await;

        assert_eq!(dispatch.assignment, None, "operation {:?}", operation);
        assert_eq!(dispatch.outcome, None, "operation {:?}", operation);
        let stored = cluster.read_job(path).await;
        assert_eq!(stored.assigned_node, None);
    }

    // The same record delivered as an update is assigned
    let job = TestCluster::job("unwatched", Some(JobOperation::Start));
    let payload = serde_json::to_vec(&job).unwrap();
    cluster
        .store
        .coordinator()
        .write_entry(path, payload.clone())
        .await
        .unwrap();
    let dispatch = handle_job_event(
        &ctx,
        ChildEvent {
            kind: ChildEventKind::Updated,
            path: path.to_string(),
            payload,
        },
    )
    .await;
    assert_eq!(
        dispatch.assignment,
        Some(Assignment::Bound(ctx.path().to_string()))
    );
    assert_eq!(dispatch.outcome, Some(OperationOutcome::Succeeded(JobState::Startup)));

    // The binding and the outcome land on the record that was notified
    let stored = cluster.read_job(path).await;
    assert_eq!(stored.assigned_node.as_deref(), Some(ctx.path()));
    assert_eq!(stored.applied_on.as_deref(), Some(ctx.path()));
    assert_eq!(stored.state, JobState::Startup);
    let key_path = cluster.store.paths().job("test.unwatched");
    assert!(cluster.store.read_job(&key_path).await.unwrap().is_none());

    cluster.shutdown().await;
}

/// Test 5: Jobs without a recognised operation are never bound
#[tokio::test]
async fn test_unknown_or_missing_operation_never_assigned() {
    let cluster = TestCluster::new(&["10.0.0.1", "10.0.0.2"]).await;
    cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");

    let none = cluster
        .store
        .submit_job(TestCluster::job("idle", None))
        .await
        .unwrap();
    let unknown = cluster
        .store
        .submit_job(TestCluster::job("odd", Some(JobOperation::Unknown)))
        .await
        .unwrap();

    // An unrecognised tag written by another writer decodes as Unknown
    let raw_path = cluster.store.paths().job("test.raw");
    let mut raw = serde_json::to_value(TestCluster::job("raw", None)).unwrap();
    raw["operation"] = serde_json::json!("Reindex");
    cluster
        .store
        .coordinator()
        .write_entry(&raw_path, serde_json::to_vec(&raw).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    for path in [&none, &unknown, &raw_path] {
        let job = cluster.read_job(path).await;
        assert_eq!(job.assigned_node, None, "{} should stay unassigned", path);
        assert_eq!(job.state, JobState::Idle);
    }
    assert_eq!(cluster.read_job(&raw_path).await.operation, Some(JobOperation::Unknown));
    for node in &cluster.nodes {
        assert!(node.container.calls().await.is_empty());
    }

    cluster.shutdown().await;
}

/// Test 6: A job that already has a node is left where it is
#[tokio::test]
async fn test_bound_job_is_not_reassigned() {
    let cluster = TestCluster::new(&["10.0.0.5", "10.0.0.1"]).await;
    cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");

    let target = cluster.node("10.0.0.5").path();
    let mut job = TestCluster::job("pinned", Some(JobOperation::Start));
    job.bind(&target);
    cluster.store.write_job(&job).await.unwrap();
    let path = cluster.store.job_path(&job.key);

    let started = cluster
        .wait_for_started(&path, Duration::from_secs(2))
        .await
        .expect("Pinned job should start on its node");
    assert_eq!(started.assigned_node, Some(target));
    assert_eq!(cluster.node("10.0.0.1").container.scheduled_count().await, 0);

    cluster.shutdown().await;
}

/// Test 7: A job stored under an entry name other than its key is updated in place
#[tokio::test]
async fn test_job_updated_at_its_own_entry() {
    let cluster = TestCluster::new(&["10.0.0.1"]).await;
    cluster
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("Leader should be elected");
    let node = &cluster.nodes[0];
    let node_path = node.path();

    let job = TestCluster::job("ledger", Some(JobOperation::Start));
    let path = cluster.store.paths().job("job-0001");
    cluster
        .store
        .coordinator()
        .write_entry(&path, serde_json::to_vec(&job).unwrap())
        .await
        .unwrap();

    let started = cluster
        .wait_for_started(&path, Duration::from_secs(2))
        .await
        .expect("Job should start at its own entry");
    assert_eq!(started.assigned_node.as_deref(), Some(node_path.as_str()));
    assert_eq!(started.applied_on.as_deref(), Some(node_path.as_str()));

    assert!(cluster.wait_for_running(&node_path, 1, Duration::from_secs(2)).await);
    let record = cluster.read_node(&node_path).await.unwrap();
    assert!(record.job_paths.contains(&path));

    // Nothing was written under the key-derived name
    let key_path = cluster.store.job_path(&job.key);
    assert!(cluster.store.read_job(&key_path).await.unwrap().is_none());
    assert_eq!(cluster.store.list_jobs().await.unwrap().len(), 1);
    assert_eq!(node.container.calls().await.len(), 1);

    cluster.shutdown().await;
}
