//! Job execution on the node a job is bound to.
//!
//! - [`container`]: the execution container seam and an in-memory container
//! - [`executor`]: applies Start / Restart / Pause to the container and
//!   records the outcome on the job and node records
//!
//! # Execution Flow
//!
//! 1. The job watcher sees a job bound to this node whose operation has not
//!    been applied here
//! 2. [`executor::execute_operation`] drives the container
//! 3. Success persists the job and node records; failure persists only the
//!    job record with the failure's category and message

pub mod container;
pub mod executor;

pub use container::{ContainerError, ExecutionContainer, InMemoryContainer, LaunchSpec};
pub use executor::{execute_operation, NodeDelta, OperationOutcome};
