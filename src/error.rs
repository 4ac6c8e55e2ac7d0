use thiserror::Error;

use crate::coordination::CoordinationError;

/// Stage of node activation, reported when bootstrap fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    RegisterNode,
    WatchNodes,
    WatchJobs,
    CreateElection,
}

impl std::fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapStep::RegisterNode => write!(f, "register node"),
            BootstrapStep::WatchNodes => write!(f, "watch node namespace"),
            BootstrapStep::WatchJobs => write!(f, "watch job namespace"),
            BootstrapStep::CreateElection => write!(f, "create leader election"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Bootstrap failed at step '{step}': {source}")]
    Bootstrap {
        step: BootstrapStep,
        #[source]
        source: Box<ClusterError>,
    },

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Node is not active")]
    NotActive,

    #[error("Node is already active at {0}")]
    AlreadyActive(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
