pub mod assigner;
pub mod job;
pub mod watcher;

pub use assigner::{assign, reconcile, select_node, Assignment};
pub use job::{Artifact, JobFailure, JobKey, JobOperation, JobRecord, JobState, MisfirePolicy};
