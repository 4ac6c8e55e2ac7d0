use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::scheduler::{Artifact, JobKey, MisfirePolicy};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("Artifact {0} is unavailable")]
    ArtifactUnavailable(String),

    #[error("Invalid schedule '{cron}': {reason}")]
    InvalidSchedule { cron: String, reason: String },

    #[error("Failed to shut down {job}: {reason}")]
    Shutdown { job: String, reason: String },
}

impl ContainerError {
    /// Classification recorded on a failed job.
    pub fn category(&self) -> &'static str {
        match self {
            ContainerError::ArtifactUnavailable(_) => "artifact_unavailable",
            ContainerError::InvalidSchedule { .. } => "invalid_schedule",
            ContainerError::Shutdown { .. } => "shutdown",
        }
    }
}

/// Everything the container needs to schedule a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub artifact: Artifact,
    pub cron: String,
    pub misfire_policy: MisfirePolicy,
}

/// Runs scheduled jobs loaded from artifacts.
#[async_trait]
pub trait ExecutionContainer: Send + Sync {
    /// Load the artifact and schedule the job.
    async fn start(&self, key: &JobKey, launch: &LaunchSpec) -> Result<(), ContainerError>;

    /// Unschedule the job from the container hosting `artifact`.
    async fn shutdown(&self, key: &JobKey, artifact: &Artifact) -> Result<(), ContainerError>;
}

/// A call observed by [`InMemoryContainer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerCall {
    Start { key: JobKey, launch: LaunchSpec },
    Shutdown { key: JobKey, artifact: String },
}

impl ContainerCall {
    pub fn artifact(&self) -> &str {
        match self {
            ContainerCall::Start { launch, .. } => &launch.artifact.reference,
            ContainerCall::Shutdown { artifact, .. } => artifact,
        }
    }
}

#[derive(Default)]
struct ContainerState {
    scheduled: HashMap<JobKey, LaunchSpec>,
    calls: Vec<ContainerCall>,
    failing_starts: HashSet<String>,
    failing_shutdowns: HashSet<String>,
}

/// Container that only records schedules in memory.
///
/// Artifacts can be marked as failing to start or shut down.
#[derive(Default)]
pub struct InMemoryContainer {
    state: Mutex<ContainerState>,
}

impl InMemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_start_of(&self, artifact: &str) {
        self.state
            .lock()
            .await
            .failing_starts
            .insert(artifact.to_string());
    }

    pub async fn fail_shutdown_of(&self, artifact: &str) {
        self.state
            .lock()
            .await
            .failing_shutdowns
            .insert(artifact.to_string());
    }

    pub async fn calls(&self) -> Vec<ContainerCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn is_scheduled(&self, key: &JobKey) -> bool {
        self.state.lock().await.scheduled.contains_key(key)
    }

    pub async fn scheduled_count(&self) -> usize {
        self.state.lock().await.scheduled.len()
    }
}

/// Quartz-style expressions carry six or seven whitespace separated fields.
fn validate_cron(cron: &str) -> Result<(), ContainerError> {
    let fields = cron.split_whitespace().count();
    if !(6..=7).contains(&fields) {
        return Err(ContainerError::InvalidSchedule {
            cron: cron.to_string(),
            reason: format!("expected 6 or 7 fields, found {}", fields),
        });
    }
    Ok(())
}

#[async_trait]
impl ExecutionContainer for InMemoryContainer {
    async fn start(&self, key: &JobKey, launch: &LaunchSpec) -> Result<(), ContainerError> {
        let mut state = self.state.lock().await;
        state.calls.push(ContainerCall::Start {
            key: key.clone(),
            launch: launch.clone(),
        });
        if state.failing_starts.contains(&launch.artifact.reference) {
            return Err(ContainerError::ArtifactUnavailable(
                launch.artifact.reference.clone(),
            ));
        }
        validate_cron(&launch.cron)?;
        state.scheduled.insert(key.clone(), launch.clone());
        tracing::debug!(
            job = %key,
            artifact = %launch.artifact.reference,
            cron = %launch.cron,
            "Job scheduled"
        );
        Ok(())
    }

    async fn shutdown(&self, key: &JobKey, artifact: &Artifact) -> Result<(), ContainerError> {
        let mut state = self.state.lock().await;
        state.calls.push(ContainerCall::Shutdown {
            key: key.clone(),
            artifact: artifact.reference.clone(),
        });
        if state.failing_shutdowns.contains(&artifact.reference) {
            return Err(ContainerError::Shutdown {
                job: key.to_string(),
                reason: format!("container for {} did not stop", artifact.reference),
            });
        }
        state.scheduled.remove(key);
        tracing::debug!(job = %key, artifact = %artifact.reference, "Job unscheduled");
        Ok(())
    }
}
