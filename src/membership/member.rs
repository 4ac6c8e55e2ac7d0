use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a node advertises in its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeRole {
    #[default]
    Standby,
    Master,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Standby => write!(f, "standby"),
            NodeRole::Master => write!(f, "master"),
        }
    }
}

/// Persisted node record, stored at the node's ephemeral path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub address: String,
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub running_job_count: i64,
    /// Jobs this node started and has not paused since.
    #[serde(default)]
    pub job_paths: BTreeSet<String>,
    pub registered_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            role: NodeRole::Standby,
            running_job_count: 0,
            job_paths: BTreeSet::new(),
            registered_at: Utc::now(),
        }
    }
}

/// A node record together with the path it is registered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveNode {
    pub path: String,
    pub record: NodeRecord,
}

/// Total order used to pick the node a job is bound to.
///
/// Least loaded first (`running_job_count` ascending), then `address`, then
/// registration `path`. Every node computes the same order for the same
/// snapshot of records.
pub fn node_order(a: &LiveNode, b: &LiveNode) -> Ordering {
    a.record
        .running_job_count
        .cmp(&b.record.running_job_count)
        .then_with(|| a.record.address.cmp(&b.record.address))
        .then_with(|| a.path.cmp(&b.path))
}
