//! Coordination service client surface.
//!
//! The cluster core consumes a hierarchical namespace with ephemeral entries,
//! child-change watches and a leader-election primitive. Everything it needs
//! is expressed by the [`Coordinator`] and [`LeaderElection`] traits so that a
//! real service client and the bundled [`memory::InMemoryCoordinator`] are
//! interchangeable.
//!
//! # Notification taxonomy
//!
//! | Kind       | Meaning                                                  |
//! |------------|----------------------------------------------------------|
//! | `Added`    | a child entry was created                                |
//! | `Updated`  | a child entry's payload changed                          |
//! | `Removed`  | a child entry was deleted or its owning session ended    |
//! | `Modified` | the entry was touched without a payload change           |

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use memory::InMemoryCoordinator;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("No entry at path {0}")]
    NoNode(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),

    #[error("Leader election at {0} is closed")]
    ElectionClosed(String),

    #[error("Coordination service error: {0}")]
    Service(String),
}

/// Kind of change observed on a child of a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEventKind {
    Added,
    Updated,
    Removed,
    Modified,
}

impl std::fmt::Display for ChildEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildEventKind::Added => write!(f, "added"),
            ChildEventKind::Updated => write!(f, "updated"),
            ChildEventKind::Removed => write!(f, "removed"),
            ChildEventKind::Modified => write!(f, "modified"),
        }
    }
}

/// A child-change notification with the affected entry's path and payload.
///
/// For `Removed` events the payload is the last value the entry held.
#[derive(Debug, Clone)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    pub path: String,
    pub payload: Vec<u8>,
}

/// Connection state of a coordination session, as seen by election listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Suspended,
    Reconnected,
    Lost,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Suspended => write!(f, "suspended"),
            ConnectionState::Reconnected => write!(f, "reconnected"),
            ConnectionState::Lost => write!(f, "lost"),
        }
    }
}

/// One tenure of the leader-election primitive.
///
/// `revoked` is cancelled by the primitive when it is closed or the owning
/// session ends; a leadership handler must stop waiting once it fires.
#[derive(Debug, Clone)]
pub struct LeadershipTerm {
    pub term: u64,
    pub revoked: CancellationToken,
}

/// Callbacks invoked by a [`LeaderElection`].
///
/// `take_leadership` holds leadership for as long as it has not returned.
/// `state_changed` is delivered on a separate task and may run while
/// `take_leadership` is suspended.
#[async_trait]
pub trait ElectionListener: Send + Sync {
    async fn take_leadership(&self, term: LeadershipTerm);

    async fn state_changed(&self, state: ConnectionState);
}

/// Handle to a participant in a leader election.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Enter the candidate queue. Participants re-enter the queue after each
    /// relinquish until closed.
    async fn start(&self) -> Result<(), CoordinationError>;

    async fn has_leadership(&self) -> bool;

    /// Leave the election. A running leadership handler is revoked.
    async fn close(&self);
}

/// Client session against the coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Identifier of this session.
    fn session_id(&self) -> String;

    /// Create a sequential ephemeral child under `base_path`, returning its path.
    async fn register_ephemeral(
        &self,
        base_path: &str,
        payload: Vec<u8>,
    ) -> Result<String, CoordinationError>;

    /// Subscribe to child changes under `base_path`.
    async fn watch_children(
        &self,
        base_path: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChildEvent>, CoordinationError>;

    async fn leader_election(
        &self,
        base_path: &str,
        listener: Arc<dyn ElectionListener>,
    ) -> Result<Arc<dyn LeaderElection>, CoordinationError>;

    async fn read_entry(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError>;

    /// Create or overwrite a persistent entry.
    async fn write_entry(&self, path: &str, payload: Vec<u8>) -> Result<(), CoordinationError>;

    /// Payloads of all direct children of `base_path`, ordered by path.
    async fn list_children(
        &self,
        base_path: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, CoordinationError>;

    /// End the session. Ephemeral entries owned by it are removed.
    async fn close(&self);
}
