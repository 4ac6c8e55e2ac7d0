use std::collections::HashSet;

use crate::error::Result;
use crate::membership::{node_order, LiveNode};
use crate::scheduler::JobRecord;
use crate::store::ClusterStore;

/// Result of trying to bind a job to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The job already had a node; nothing was written.
    AlreadyBound(String),
    /// The job was bound to this node path and persisted.
    Bound(String),
    /// No live node is registered.
    NoLiveNodes,
}

/// Pick the node a job is bound to: the first live node under [`node_order`].
pub fn select_node(mut nodes: Vec<LiveNode>) -> Option<LiveNode> {
    nodes.sort_by(node_order);
    nodes.into_iter().next()
}

/// Bind an unassigned job, read from `job_path`, to the selected live node
/// and persist it back to `job_path`.
///
/// This is a plain read-then-write. Two assigners working from the same stale
/// snapshot can both write; the last write wins.
pub async fn assign(
    store: &ClusterStore,
    job_path: &str,
    job: &mut JobRecord,
) -> Result<Assignment> {
    if let Some(node) = &job.assigned_node {
        return Ok(Assignment::AlreadyBound(node.clone()));
    }

    let nodes = store.list_nodes().await?;
    let Some(target) = select_node(nodes) else {
        tracing::warn!(job = %job.key, "No live nodes to assign job to");
        return Ok(Assignment::NoLiveNodes);
    };

    job.bind(&target.path);
    if let Err(e) = store.write_job_at(job_path, job).await {
        job.assigned_node = None;
        return Err(e);
    }
    tracing::info!(
        job = %job.key,
        node = %target.path,
        address = %target.record.address,
        "Job assigned"
    );
    Ok(Assignment::Bound(target.path))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub released: usize,
    pub assigned: usize,
}

/// Sweep all jobs once: drop bindings to nodes that are no longer registered
/// and bind every unassigned job that has an actionable operation.
///
/// Run by a node when it becomes leader, so that removals it never observed
/// as leader still get failed over.
///
/// The target node is chosen once per sweep: persisted running counts only
/// change when the bound node executes, which happens after the sweep's
/// writes, so every job bound in one sweep lands on the same node.
pub async fn reconcile(store: &ClusterStore) -> Result<ReconcileReport> {
    let nodes = store.list_nodes().await?;
    let live: HashSet<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
    let target = select_node(nodes.clone());

    let mut report = ReconcileReport::default();
    for (path, mut job) in store.list_jobs().await? {
        let mut dirty = false;

        if let Some(node) = job.assigned_node.as_deref() {
            if !live.contains(node) {
                tracing::info!(job = %path, node = %node, "Releasing job bound to departed node");
                job.release();
                report.released += 1;
                dirty = true;
            }
        }

        if job.assigned_node.is_none() && job.actionable_operation().is_some() {
            if let Some(target) = &target {
                job.bind(&target.path);
                report.assigned += 1;
                dirty = true;
            }
        }

        if dirty {
            store.write_job_at(&path, &job).await?;
        }
    }
    Ok(report)
}
