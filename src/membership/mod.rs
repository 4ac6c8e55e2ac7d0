//! Cluster membership: node records, the live-node registry and leadership.
//!
//! - [`member`]: node record, role and the node ordering used for assignment
//! - [`registry`]: node-namespace watcher and job release on node removal
//! - [`election`]: leader election controller and step-down signalling

pub mod election;
pub mod member;
pub mod registry;

pub use election::{ElectionController, StepDown};
pub use member::{node_order, LiveNode, NodeRecord, NodeRole};
pub use registry::release_jobs;
