use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordination::{ChildEvent, ChildEventKind};
use crate::node::NodeContext;
use crate::scheduler::assigner::{self, Assignment};
use crate::worker::executor::{execute_operation, OperationOutcome};

/// What one job notification led to on this node.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub assignment: Option<Assignment>,
    pub outcome: Option<OperationOutcome>,
}

impl Dispatch {
    fn ignored() -> Self {
        Self {
            assignment: None,
            outcome: None,
        }
    }
}

/// Drain job-namespace notifications until shutdown or the watch ends.
pub async fn run_job_watch(
    ctx: Arc<NodeContext>,
    mut events: mpsc::UnboundedReceiver<ChildEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    handle_job_event(&ctx, event).await;
                }
                None => {
                    tracing::debug!(node = %ctx.path(), "Job watch closed");
                    break;
                }
            }
        }
    }
}

/// Process one job notification: assign when leading, then execute when the
/// job is bound here and its operation has not been applied here yet.
///
/// The record is re-read from the coordination service so that a stale event
/// payload never replays an operation that was already applied.
pub async fn handle_job_event(ctx: &NodeContext, event: ChildEvent) -> Dispatch {
    match event.kind {
        ChildEventKind::Modified | ChildEventKind::Removed => return Dispatch::ignored(),
        ChildEventKind::Added | ChildEventKind::Updated => {}
    }

    let mut job = match ctx.store().read_job(&event.path).await {
        Ok(Some(job)) => job,
        Ok(None) => return Dispatch::ignored(),
        Err(e) => {
            tracing::warn!(job = %event.path, error = %e, "Failed to read job record");
            return Dispatch::ignored();
        }
    };

    if job.actionable_operation().is_none() {
        tracing::trace!(job = %job.key, "No actionable operation");
        return Dispatch::ignored();
    }

    let mut dispatch = Dispatch::ignored();
    if job.assigned_node.is_none() && ctx.is_leader().await {
        match assigner::assign(ctx.store(), &event.path, &mut job).await {
            Ok(assignment) => dispatch.assignment = Some(assignment),
            Err(e) => {
                tracing::warn!(job = %job.key, error = %e, "Job assignment failed");
            }
        }
    }

    if job.pending_on(ctx.path()) {
        dispatch.outcome = Some(execute_operation(ctx, &event.path, &mut job).await);
    }
    dispatch
}
