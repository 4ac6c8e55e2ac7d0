/// Coordination-service namespace layout used by a cluster.
///
/// All nodes of one cluster must agree on the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    pub root: String,
}

impl Default for ClusterPaths {
    fn default() -> Self {
        Self {
            root: "/jobfleet/standby".to_string(),
        }
    }
}

impl ClusterPaths {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    /// Parent of the ephemeral node registrations.
    pub fn nodes(&self) -> String {
        format!("{}/nodes", self.root)
    }

    /// Parent of the job records.
    pub fn jobs(&self) -> String {
        format!("{}/jobs", self.root)
    }

    /// Base path of the leader election.
    pub fn master(&self) -> String {
        format!("{}/master", self.root)
    }

    pub fn job(&self, entry_name: &str) -> String {
        format!("{}/{}", self.jobs(), entry_name)
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Identity advertised in this node's record (usually host or ip).
    pub address: String,
    pub paths: ClusterPaths,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            paths: ClusterPaths::default(),
        }
    }
}

impl ClusterConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.paths = ClusterPaths::new(root);
        self
    }
}
