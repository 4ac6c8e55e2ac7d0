//! Leader election controller.
//!
//! A node is a follower until the election primitive calls
//! [`ElectionListener::take_leadership`]. Leadership is held for as long as
//! that call has not returned, so the handler marks the node master and then
//! waits on a step-down signal created fresh for the term. A connection-state
//! change delivered on another task releases this node's jobs and fires the
//! signal of the term that is current at that moment, and only that one.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::coordination::{ConnectionState, ElectionListener, LeadershipTerm};
use crate::membership::registry::release_jobs;
use crate::membership::NodeRole;
use crate::node::NodeContext;
use crate::scheduler::assigner;

/// Step-down signal of one leadership term.
#[derive(Debug)]
pub struct StepDown {
    pub term: u64,
    signal: CancellationToken,
}

impl StepDown {
    fn new(term: u64) -> Self {
        Self {
            term,
            signal: CancellationToken::new(),
        }
    }
}

/// Hold leadership for one term.
///
/// Returns when the term's step-down signal fires, when the primitive revokes
/// the term, or immediately if this node cannot be marked master.
pub async fn hold_leadership(ctx: &NodeContext, term: LeadershipTerm) {
    let previous = ctx.terms_held.fetch_add(1, Ordering::SeqCst);
    tracing::info!(
        node = %ctx.path(),
        term = term.term,
        previous_terms = previous,
        "Acquired leadership"
    );

    let step_down = StepDown::new(term.term);
    let signal = step_down.signal.clone();
    *ctx.step_down.lock().await = Some(step_down);

    match ctx.mark_role(NodeRole::Master).await {
        Ok(()) => {
            match assigner::reconcile(ctx.store()).await {
                Ok(report) => tracing::info!(
                    node = %ctx.path(),
                    released = report.released,
                    assigned = report.assigned,
                    "Reconciled job bindings"
                ),
                Err(e) => {
                    tracing::warn!(node = %ctx.path(), error = %e, "Job reconciliation failed")
                }
            }

            tokio::select! {
                _ = signal.cancelled() => {
                    tracing::info!(node = %ctx.path(), term = term.term, "Step-down signalled");
                }
                _ = term.revoked.cancelled() => {
                    tracing::info!(node = %ctx.path(), term = term.term, "Leadership revoked");
                }
            }
        }
        Err(e) => {
            tracing::error!(
                node = %ctx.path(),
                term = term.term,
                error = %e,
                "Startup as master failed, relinquishing leadership"
            );
        }
    }

    {
        let mut slot = ctx.step_down.lock().await;
        if slot.as_ref().map(|s| s.term) == Some(term.term) {
            *slot = None;
        }
    }

    if let Err(e) = ctx.mark_role(NodeRole::Standby).await {
        tracing::debug!(node = %ctx.path(), error = %e, "Could not record standby role");
    }
    tracing::info!(node = %ctx.path(), term = term.term, "Relinquishing leadership");
}

/// React to a connection-state change of this node's session.
///
/// On any non-connected state the node's own jobs are released, then the
/// current term (if any) is told to step down.
pub async fn on_connection_state(ctx: &NodeContext, state: ConnectionState) {
    tracing::info!(node = %ctx.path(), %state, "Connection state changed");
    if state.is_connected() {
        return;
    }

    let own = ctx.record_snapshot().await;
    release_jobs(ctx.store(), ctx.path(), Some(&own)).await;

    let step_down = ctx.step_down.lock().await.take();
    match step_down {
        Some(step_down) => {
            tracing::info!(node = %ctx.path(), term = step_down.term, "Signalling step-down");
            step_down.signal.cancel();
        }
        None => {
            tracing::debug!(node = %ctx.path(), "No leadership term to step down from");
        }
    }
}

/// [`ElectionListener`] bound to one node's context.
pub struct ElectionController {
    ctx: Arc<NodeContext>,
}

impl ElectionController {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ElectionListener for ElectionController {
    async fn take_leadership(&self, term: LeadershipTerm) {
        hold_leadership(&self.ctx, term).await;
    }

    async fn state_changed(&self, state: ConnectionState) {
        on_connection_state(&self.ctx, state).await;
    }
}
