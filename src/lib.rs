pub mod config;
pub mod coordination;
pub mod error;
pub mod membership;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use config::{ClusterConfig, ClusterPaths};
pub use error::{ClusterError, Result};
pub use node::{ClusterNode, NodeContext};
