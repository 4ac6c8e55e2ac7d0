use crate::membership::NodeRecord;
use crate::node::NodeContext;
use crate::scheduler::{JobFailure, JobOperation, JobRecord, JobState};
use crate::worker::container::{ContainerError, ExecutionContainer, LaunchSpec};

/// Result of applying a job's operation on this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded(JobState),
    Failed(JobFailure),
    /// Nothing to apply (no operation, or `Unknown`).
    Skipped,
}

impl From<ContainerError> for JobFailure {
    fn from(err: ContainerError) -> Self {
        JobFailure {
            category: err.category().to_string(),
            message: err.to_string(),
        }
    }
}

/// Change an operation makes to the executing node's record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeDelta {
    pub running: i64,
    /// `Some(true)` once the node hosts the job, `Some(false)` once it stopped hosting it.
    pub hosts_job: Option<bool>,
}

impl NodeDelta {
    pub fn is_empty(&self) -> bool {
        self.running == 0 && self.hosts_job.is_none()
    }

    pub fn apply_to(&self, node: &mut NodeRecord, job_path: &str) {
        node.running_job_count += self.running;
        match self.hosts_job {
            Some(true) => {
                node.job_paths.insert(job_path.to_string());
            }
            Some(false) => {
                node.job_paths.remove(job_path);
            }
            None => {}
        }
    }
}

/// Drive the container through `job`'s operation and report the change it
/// makes to the node's record.
///
/// | Operation | Container calls                          | running count |
/// |-----------|------------------------------------------|---------------|
/// | Start     | start(current)                           | +1            |
/// | Restart   | shutdown(previous), then start(current)  | -1, then +1   |
/// | Pause     | shutdown(current)                        | -1            |
/// | Unknown   | none                                     | 0             |
///
/// Count changes made before a failing step stay in the returned delta.
pub async fn apply_operation(
    container: &dyn ExecutionContainer,
    job: &JobRecord,
) -> (OperationOutcome, NodeDelta) {
    let mut delta = NodeDelta::default();
    let Some(operation) = job.operation else {
        return (OperationOutcome::Skipped, delta);
    };

    let result = match operation {
        JobOperation::Start => start_job(container, job, &mut delta)
            .await
            .map(|()| Some(JobState::Startup)),
        JobOperation::Restart => restart_job(container, job, &mut delta)
            .await
            .map(|()| Some(JobState::Startup)),
        JobOperation::Pause => pause_job(container, job, &mut delta)
            .await
            .map(|()| Some(JobState::Pause)),
        JobOperation::Unknown => Ok(None),
    };

    let outcome = match result {
        Ok(Some(state)) => OperationOutcome::Succeeded(state),
        Ok(None) => OperationOutcome::Skipped,
        Err(e) => OperationOutcome::Failed(e.into()),
    };
    (outcome, delta)
}

async fn start_job(
    container: &dyn ExecutionContainer,
    job: &JobRecord,
    delta: &mut NodeDelta,
) -> Result<(), ContainerError> {
    let launch = LaunchSpec {
        artifact: job.artifact.clone(),
        cron: job.cron.clone(),
        misfire_policy: job.misfire_policy,
    };
    container.start(&job.key, &launch).await?;
    delta.running += 1;
    delta.hosts_job = Some(true);
    Ok(())
}

async fn restart_job(
    container: &dyn ExecutionContainer,
    job: &JobRecord,
    delta: &mut NodeDelta,
) -> Result<(), ContainerError> {
    container.shutdown(&job.key, job.previous_artifact()).await?;
    delta.running -= 1;
    start_job(container, job, delta).await
}

async fn pause_job(
    container: &dyn ExecutionContainer,
    job: &JobRecord,
    delta: &mut NodeDelta,
) -> Result<(), ContainerError> {
    container.shutdown(&job.key, &job.artifact).await?;
    delta.running -= 1;
    delta.hosts_job = Some(false);
    Ok(())
}

/// Apply `job`'s operation on this node and persist the result at `job_path`.
///
/// Container calls run without holding the node record, so a slow container
/// never delays release or step-down. The record is updated afterwards.
/// Success persists the job record and this node's record. Failure persists
/// only the job record; any count change made before the failing step stays
/// in the node-local record without being written.
pub async fn execute_operation(
    ctx: &NodeContext,
    job_path: &str,
    job: &mut JobRecord,
) -> OperationOutcome {
    tracing::info!(
        node = %ctx.path(),
        job = %job.key,
        operation = ?job.operation,
        "Executing operation"
    );
    let (outcome, delta) = apply_operation(ctx.container(), job).await;

    match &outcome {
        OperationOutcome::Succeeded(state) => {
            job.mark_succeeded(ctx.path(), *state);
            if let Err(e) = ctx.store().write_job_at(job_path, job).await {
                tracing::error!(job = %job.key, error = %e, "Failed to persist job");
            }
            let mut node = ctx.record.lock().await;
            delta.apply_to(&mut node, job_path);
            if let Err(e) = ctx.store().write_node(ctx.path(), &node).await {
                tracing::error!(node = %ctx.path(), error = %e, "Failed to persist node record");
            }
            tracing::info!(
                node = %ctx.path(),
                job = %job.key,
                state = %state,
                running = node.running_job_count,
                "Operation succeeded"
            );
        }
        OperationOutcome::Failed(failure) => {
            tracing::error!(
                node = %ctx.path(),
                job = %job.key,
                category = %failure.category,
                error = %failure.message,
                "Operation failed"
            );
            if !delta.is_empty() {
                delta.apply_to(&mut *ctx.record.lock().await, job_path);
            }
            job.mark_failed(ctx.path(), failure.clone());
            if let Err(e) = ctx.store().write_job_at(job_path, job).await {
                tracing::error!(job = %job.key, error = %e, "Failed to persist job failure");
            }
        }
        OperationOutcome::Skipped => {}
    }
    outcome
}
