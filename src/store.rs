//! Typed access to node and job records.
//!
//! Records are JSON documents stored as whole entries. Every update is a
//! plain read-then-write with no version check, so concurrent writers follow
//! last-writer-wins.

use std::sync::Arc;

use crate::config::ClusterPaths;
use crate::coordination::Coordinator;
use crate::error::{ClusterError, Result};
use crate::membership::{LiveNode, NodeRecord};
use crate::scheduler::{JobKey, JobOperation, JobRecord};

pub fn decode_job(payload: &[u8]) -> Result<JobRecord> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn decode_node(payload: &[u8]) -> Result<NodeRecord> {
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Clone)]
pub struct ClusterStore {
    coordinator: Arc<dyn Coordinator>,
    paths: ClusterPaths,
}

impl ClusterStore {
    pub fn new(coordinator: Arc<dyn Coordinator>, paths: ClusterPaths) -> Self {
        Self { coordinator, paths }
    }

    pub fn paths(&self) -> &ClusterPaths {
        &self.paths
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    pub fn job_path(&self, key: &JobKey) -> String {
        self.paths.job(&key.entry_name())
    }

    /// Register `record` as an ephemeral node entry, returning its path.
    pub async fn register_node(&self, record: &NodeRecord) -> Result<String> {
        let payload = serde_json::to_vec(record)?;
        Ok(self
            .coordinator
            .register_ephemeral(&self.paths.nodes(), payload)
            .await?)
    }

    pub async fn read_node(&self, path: &str) -> Result<Option<NodeRecord>> {
        match self.coordinator.read_entry(path).await? {
            Some(payload) => Ok(Some(decode_node(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn write_node(&self, path: &str, record: &NodeRecord) -> Result<()> {
        let payload = serde_json::to_vec(record)?;
        self.coordinator.write_entry(path, payload).await?;
        Ok(())
    }

    /// All registered nodes. Entries that fail to decode are skipped.
    pub async fn list_nodes(&self) -> Result<Vec<LiveNode>> {
        let children = self.coordinator.list_children(&self.paths.nodes()).await?;
        Ok(children
            .into_iter()
            .filter_map(|(path, payload)| match decode_node(&payload) {
                Ok(record) => Some(LiveNode { path, record }),
                Err(e) => {
                    tracing::warn!(node = %path, error = %e, "Skipping undecodable node record");
                    None
                }
            })
            .collect())
    }

    pub async fn read_job(&self, path: &str) -> Result<Option<JobRecord>> {
        match self.coordinator.read_entry(path).await? {
            Some(payload) => Ok(Some(decode_job(&payload)?)),
            None => Ok(None),
        }
    }

    /// Persist `job` at the path derived from its key.
    pub async fn write_job(&self, job: &JobRecord) -> Result<()> {
        self.write_job_at(&self.job_path(&job.key), job).await
    }

    /// Persist `job` at `path`. Read-modify-write cycles write back to the
    /// path the record was read from, whatever its entry name.
    pub async fn write_job_at(&self, path: &str, job: &JobRecord) -> Result<()> {
        let payload = serde_json::to_vec(job)?;
        self.coordinator.write_entry(path, payload).await?;
        Ok(())
    }

    /// All job records with their paths. Entries that fail to decode are skipped.
    pub async fn list_jobs(&self) -> Result<Vec<(String, JobRecord)>> {
        let children = self.coordinator.list_children(&self.paths.jobs()).await?;
        Ok(children
            .into_iter()
            .filter_map(|(path, payload)| match decode_job(&payload) {
                Ok(job) => Some((path, job)),
                Err(e) => {
                    tracing::warn!(job = %path, error = %e, "Skipping undecodable job record");
                    None
                }
            })
            .collect())
    }

    /// Create or replace a job record as pending: unbound and not yet applied.
    pub async fn submit_job(&self, mut job: JobRecord) -> Result<String> {
        job.assigned_node = None;
        job.applied_on = None;
        self.write_job(&job).await?;
        let path = self.job_path(&job.key);
        tracing::info!(job = %job.key, operation = ?job.operation, "Job submitted");
        Ok(path)
    }

    /// Request a new operation on an existing job.
    pub async fn request_operation(&self, key: &JobKey, operation: JobOperation) -> Result<()> {
        let path = self.job_path(key);
        let mut job = self
            .read_job(&path)
            .await?
            .ok_or_else(|| ClusterError::JobNotFound(key.to_string()))?;
        job.request(operation);
        self.write_job(&job).await?;
        tracing::info!(job = %key, %operation, "Operation requested");
        Ok(())
    }
}
