use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordination::{ChildEvent, ChildEventKind};
use crate::error::Result;
use crate::membership::NodeRecord;
use crate::node::NodeContext;
use crate::store::{decode_node, ClusterStore};

/// Drain node-namespace notifications until shutdown or the watch ends.
pub async fn run_node_watch(
    ctx: Arc<NodeContext>,
    mut events: mpsc::UnboundedReceiver<ChildEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_node_event(&ctx, event).await,
                None => {
                    tracing::debug!(node = %ctx.path(), "Node watch closed");
                    break;
                }
            }
        }
    }
}

/// Apply one node-namespace notification.
///
/// Keeps the live-member view current. A removal observed while this node
/// leads releases the removed node's jobs.
pub async fn handle_node_event(ctx: &NodeContext, event: ChildEvent) {
    match event.kind {
        ChildEventKind::Added | ChildEventKind::Updated => match decode_node(&event.payload) {
            Ok(record) => {
                ctx.members.write().await.insert(event.path, record);
            }
            Err(e) => {
                tracing::warn!(node = %event.path, error = %e, "Ignoring undecodable node record");
            }
        },
        ChildEventKind::Modified => {}
        ChildEventKind::Removed => {
            let cached = ctx.members.write().await.remove(&event.path);
            if !ctx.is_leader().await {
                return;
            }
            let last_known = decode_node(&event.payload).ok().or(cached);
            tracing::info!(
                node = %ctx.path(),
                removed = %event.path,
                "Node left the cluster, releasing its jobs"
            );
            release_jobs(ctx.store(), &event.path, last_known.as_ref()).await;
        }
    }
}

/// Clear the binding of every job still bound to `node_path`.
///
/// Candidates are the job paths recorded in the node's last known record plus
/// any job currently bound to it. Jobs bound elsewhere, missing records and
/// failed writes are skipped, so repeated calls are harmless. Returns the
/// number of jobs released.
pub async fn release_jobs(
    store: &ClusterStore,
    node_path: &str,
    last_known: Option<&NodeRecord>,
) -> usize {
    let mut candidates: BTreeSet<String> = last_known
        .map(|record| record.job_paths.clone())
        .unwrap_or_default();

    match store.list_jobs().await {
        Ok(jobs) => candidates.extend(
            jobs.into_iter()
                .filter(|(_, job)| job.is_bound_to(node_path))
                .map(|(path, _)| path),
        ),
        Err(e) => {
            tracing::warn!(node = %node_path, error = %e, "Failed to scan jobs for release");
        }
    }

    let mut released = 0;
    for job_path in candidates {
        match release_job(store, &job_path, node_path).await {
            Ok(true) => released += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    job = %job_path,
                    node = %node_path,
                    error = %e,
                    "Failed to release job"
                );
            }
        }
    }

    tracing::info!(node = %node_path, released, "Released jobs");
    released
}

async fn release_job(store: &ClusterStore, job_path: &str, node_path: &str) -> Result<bool> {
    let Some(mut job) = store.read_job(job_path).await? else {
        tracing::debug!(job = %job_path, "Job record gone, nothing to release");
        return Ok(false);
    };
    if !job.is_bound_to(node_path) {
        return Ok(false);
    }
    job.release();
    store.write_job_at(job_path, &job).await?;
    tracing::debug!(job = %job.key, node = %node_path, "Job released");
    Ok(true)
}
