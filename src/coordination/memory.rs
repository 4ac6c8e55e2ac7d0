//! In-process coordination service.
//!
//! Implements the [`Coordinator`] contract on a shared in-memory tree so that
//! whole clusters can run inside one process. Sessions obtained from
//! [`InMemoryCoordinator::connect`] own their ephemeral entries; closing or
//! expiring a session removes them and revokes any leadership it holds.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    ChildEvent, ChildEventKind, ConnectionState, CoordinationError, Coordinator, ElectionListener,
    LeaderElection, LeadershipTerm,
};

#[derive(Debug)]
struct Entry {
    payload: Vec<u8>,
    owner: Option<String>,
}

struct Watcher {
    base: String,
    session: String,
    tx: mpsc::UnboundedSender<ChildEvent>,
}

struct SessionState {
    open: bool,
    connected: bool,
}

struct Participant {
    session: String,
    listener: Arc<dyn ElectionListener>,
    closed: bool,
    queued: bool,
    revoked: Option<CancellationToken>,
}

#[derive(Default)]
struct ElectionState {
    queue: VecDeque<u64>,
    leader: Option<u64>,
    last_term: u64,
}

#[derive(Default)]
struct ServiceState {
    entries: BTreeMap<String, Entry>,
    watchers: Vec<Watcher>,
    sessions: HashMap<String, SessionState>,
    participants: HashMap<u64, Participant>,
    elections: HashMap<String, ElectionState>,
    sequence: u64,
    next_participant: u64,
}

/// A leadership grant that still has to be handed to its listener.
struct Promotion {
    base: String,
    participant: u64,
    listener: Arc<dyn ElectionListener>,
    term: LeadershipTerm,
}

fn parent_of(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

fn validate_path(path: &str) -> Result<(), CoordinationError> {
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(CoordinationError::InvalidPath(path.to_string()));
    }
    Ok(())
}

impl ServiceState {
    fn check_session(&self, session: &str) -> Result<(), CoordinationError> {
        match self.sessions.get(session) {
            Some(s) if s.open => Ok(()),
            _ => Err(CoordinationError::SessionClosed(session.to_string())),
        }
    }

    fn notify(&mut self, kind: ChildEventKind, path: &str, payload: &[u8]) {
        let Some(parent) = parent_of(path) else {
            return;
        };
        self.watchers.retain(|w| !w.tx.is_closed());
        for watcher in self.watchers.iter().filter(|w| w.base == parent) {
            let _ = watcher.tx.send(ChildEvent {
                kind,
                path: path.to_string(),
                payload: payload.to_vec(),
            });
        }
    }

    /// Hand the election at `base` to the next open candidate, if it is vacant.
    fn promote(&mut self, base: &str) -> Option<Promotion> {
        let election = self.elections.entry(base.to_string()).or_default();
        if election.leader.is_some() {
            return None;
        }
        while let Some(id) = election.queue.pop_front() {
            let Some(participant) = self.participants.get_mut(&id) else {
                continue;
            };
            participant.queued = false;
            if participant.closed {
                continue;
            }
            election.last_term += 1;
            let revoked = CancellationToken::new();
            participant.revoked = Some(revoked.clone());
            election.leader = Some(id);
            return Some(Promotion {
                base: base.to_string(),
                participant: id,
                listener: participant.listener.clone(),
                term: LeadershipTerm {
                    term: election.last_term,
                    revoked,
                },
            });
        }
        None
    }
}

/// Shared in-memory coordination service. Cloning yields another handle to
/// the same tree.
#[derive(Clone, Default)]
pub struct InMemoryCoordinator {
    state: Arc<Mutex<ServiceState>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client session.
    pub async fn connect(&self) -> Arc<MemorySession> {
        let id = Uuid::new_v4().to_string();
        self.state.lock().await.sessions.insert(
            id.clone(),
            SessionState {
                open: true,
                connected: true,
            },
        );
        tracing::debug!(session = %id, "Session opened");
        Arc::new(MemorySession {
            id,
            service: self.clone(),
        })
    }

    /// Simulate the loss of a session's connection.
    ///
    /// Election listeners of the session observe [`ConnectionState::Lost`]
    /// while the session can still read and write, then the session is closed
    /// and its ephemeral entries disappear.
    pub async fn expire_session(&self, session_id: &str) {
        let listeners: Vec<Arc<dyn ElectionListener>> = {
            let mut state = self.state.lock().await;
            match state.sessions.get_mut(session_id) {
                Some(session) if session.open => session.connected = false,
                _ => return,
            }
            state
                .participants
                .values()
                .filter(|p| p.session == session_id && !p.closed)
                .map(|p| p.listener.clone())
                .collect()
        };

        tracing::info!(session = %session_id, "Session expiring");
        for listener in listeners {
            listener.state_changed(ConnectionState::Lost).await;
        }
        self.close_session(session_id).await;
    }

    /// Session id of the participant currently leading the election at `base_path`.
    pub async fn leader_session(&self, base_path: &str) -> Option<String> {
        let state = self.state.lock().await;
        let leader = state.elections.get(base_path)?.leader?;
        state.participants.get(&leader).map(|p| p.session.clone())
    }

    async fn close_session(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(session_id) {
            Some(session) if session.open => {
                session.open = false;
                session.connected = false;
            }
            _ => return,
        }

        for participant in state
            .participants
            .values_mut()
            .filter(|p| p.session == session_id)
        {
            participant.closed = true;
            if let Some(revoked) = participant.revoked.take() {
                revoked.cancel();
            }
        }
        state.watchers.retain(|w| w.session != session_id);

        let owned: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.owner.as_deref() == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            if let Some(entry) = state.entries.remove(&path) {
                state.notify(ChildEventKind::Removed, &path, &entry.payload);
            }
        }
        tracing::debug!(session = %session_id, "Session closed");
    }

    fn spawn_leadership(&self, promotion: Promotion) {
        let service = self.clone();
        tokio::spawn(async move {
            let Promotion {
                base,
                participant,
                listener,
                term,
            } = promotion;
            tracing::debug!(base = %base, participant, term = term.term, "Leadership granted");
            listener.take_leadership(term).await;
            service.relinquish(&base, participant).await;
        });
    }

    async fn relinquish(&self, base: &str, participant: u64) {
        let next = {
            let mut state = self.state.lock().await;
            let state = &mut *state;
            if let Some(election) = state.elections.get_mut(base) {
                if election.leader == Some(participant) {
                    election.leader = None;
                }
            }
            let requeue = match state.participants.get_mut(&participant) {
                Some(p) => {
                    p.revoked = None;
                    let connected = state
                        .sessions
                        .get(&p.session)
                        .map(|s| s.open && s.connected)
                        .unwrap_or(false);
                    if !p.closed && connected && !p.queued {
                        p.queued = true;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            if requeue {
                state
                    .elections
                    .entry(base.to_string())
                    .or_default()
                    .queue
                    .push_back(participant);
            }
            tracing::debug!(base = %base, participant, requeue, "Leadership relinquished");
            state.promote(base)
        };
        if let Some(promotion) = next {
            self.spawn_leadership(promotion);
        }
    }
}

/// One client session of an [`InMemoryCoordinator`].
pub struct MemorySession {
    id: String,
    service: InMemoryCoordinator,
}

impl MemorySession {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    async fn register_ephemeral(
        &self,
        base_path: &str,
        payload: Vec<u8>,
    ) -> Result<String, CoordinationError> {
        validate_path(base_path)?;
        let mut state = self.service.state.lock().await;
        state.check_session(&self.id)?;
        state.sequence += 1;
        let path = format!("{}/member-{:010}", base_path, state.sequence);
        state.notify(ChildEventKind::Added, &path, &payload);
        state.entries.insert(
            path.clone(),
            Entry {
                payload,
                owner: Some(self.id.clone()),
            },
        );
        Ok(path)
    }

    async fn watch_children(
        &self,
        base_path: &str,
    ) -> Result<mpsc::UnboundedReceiver<ChildEvent>, CoordinationError> {
        validate_path(base_path)?;
        let mut state = self.service.state.lock().await;
        state.check_session(&self.id)?;
        let (tx, rx) = mpsc::unbounded_channel();

        // Existing children are replayed as additions.
        for (path, entry) in state
            .entries
            .iter()
            .filter(|(path, _)| parent_of(path) == Some(base_path))
        {
            let _ = tx.send(ChildEvent {
                kind: ChildEventKind::Added,
                path: path.clone(),
                payload: entry.payload.clone(),
            });
        }
        state.watchers.push(Watcher {
            base: base_path.to_string(),
            session: self.id.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn leader_election(
        &self,
        base_path: &str,
        listener: Arc<dyn ElectionListener>,
    ) -> Result<Arc<dyn LeaderElection>, CoordinationError> {
        validate_path(base_path)?;
        let mut state = self.service.state.lock().await;
        state.check_session(&self.id)?;
        state.next_participant += 1;
        let id = state.next_participant;
        state.participants.insert(
            id,
            Participant {
                session: self.id.clone(),
                listener,
                closed: false,
                queued: false,
                revoked: None,
            },
        );
        Ok(Arc::new(MemoryElection {
            id,
            base: base_path.to_string(),
            service: self.service.clone(),
        }))
    }

    async fn read_entry(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        validate_path(path)?;
        let state = self.service.state.lock().await;
        state.check_session(&self.id)?;
        Ok(state.entries.get(path).map(|e| e.payload.clone()))
    }

    async fn write_entry(&self, path: &str, payload: Vec<u8>) -> Result<(), CoordinationError> {
        validate_path(path)?;
        let mut state = self.service.state.lock().await;
        state.check_session(&self.id)?;
        let kind = match state.entries.get_mut(path) {
            Some(entry) if entry.payload == payload => ChildEventKind::Modified,
            Some(entry) => {
                entry.payload = payload.clone();
                ChildEventKind::Updated
            }
            None => {
                state.entries.insert(
                    path.to_string(),
                    Entry {
                        payload: payload.clone(),
                        owner: None,
                    },
                );
                ChildEventKind::Added
            }
        };
        state.notify(kind, path, &payload);
        Ok(())
    }

    async fn list_children(
        &self,
        base_path: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, CoordinationError> {
        validate_path(base_path)?;
        let state = self.service.state.lock().await;
        state.check_session(&self.id)?;
        Ok(state
            .entries
            .iter()
            .filter(|(path, _)| parent_of(path) == Some(base_path))
            .map(|(path, entry)| (path.clone(), entry.payload.clone()))
            .collect())
    }

    async fn close(&self) {
        self.service.close_session(&self.id).await;
    }
}

/// Participant handle returned by [`MemorySession::leader_election`].
pub struct MemoryElection {
    id: u64,
    base: String,
    service: InMemoryCoordinator,
}

#[async_trait]
impl LeaderElection for MemoryElection {
    async fn start(&self) -> Result<(), CoordinationError> {
        let promotion = {
            let mut state = self.service.state.lock().await;
            let state = &mut *state;
            let Some(participant) = state.participants.get_mut(&self.id) else {
                return Err(CoordinationError::ElectionClosed(self.base.clone()));
            };
            if participant.closed {
                return Err(CoordinationError::ElectionClosed(self.base.clone()));
            }
            let session = participant.session.clone();
            state.check_session(&session)?;

            let election = state.elections.entry(self.base.clone()).or_default();
            let Some(participant) = state.participants.get_mut(&self.id) else {
                return Err(CoordinationError::ElectionClosed(self.base.clone()));
            };
            if !participant.queued && election.leader != Some(self.id) {
                participant.queued = true;
                election.queue.push_back(self.id);
            }
            state.promote(&self.base)
        };
        if let Some(promotion) = promotion {
            self.service.spawn_leadership(promotion);
        }
        Ok(())
    }

    async fn has_leadership(&self) -> bool {
        let state = self.service.state.lock().await;
        state
            .elections
            .get(&self.base)
            .map(|e| e.leader == Some(self.id))
            .unwrap_or(false)
    }

    async fn close(&self) {
        let mut state = self.service.state.lock().await;
        let state = &mut *state;
        if let Some(participant) = state.participants.get_mut(&self.id) {
            participant.closed = true;
            if let Some(revoked) = participant.revoked.take() {
                revoked.cancel();
            }
        }
        if let Some(election) = state.elections.get_mut(&self.base) {
            election.queue.retain(|id| *id != self.id);
        }
        tracing::debug!(base = %self.base, participant = self.id, "Election participant closed");
    }
}
