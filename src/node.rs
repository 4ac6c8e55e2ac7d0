use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::coordination::{Coordinator, LeaderElection};
use crate::error::{BootstrapStep, ClusterError, Result};
use crate::membership::registry::run_node_watch;
use crate::membership::{ElectionController, NodeRecord, NodeRole, StepDown};
use crate::scheduler::watcher::run_job_watch;
use crate::store::ClusterStore;
use crate::worker::ExecutionContainer;

/// State shared by the notification handlers of one registered node.
pub struct NodeContext {
    path: String,
    store: ClusterStore,
    container: Arc<dyn ExecutionContainer>,
    /// This node's own record; the running count here is authoritative.
    pub(crate) record: Mutex<NodeRecord>,
    /// Last known record of every registered node, keyed by path.
    pub(crate) members: RwLock<HashMap<String, NodeRecord>>,
    /// Step-down signal of the leadership term in progress, if any.
    pub(crate) step_down: Mutex<Option<StepDown>>,
    pub(crate) terms_held: AtomicU64,
    election: OnceLock<Arc<dyn LeaderElection>>,
}

impl NodeContext {
    pub fn new(
        path: String,
        store: ClusterStore,
        container: Arc<dyn ExecutionContainer>,
        record: NodeRecord,
    ) -> Self {
        Self {
            path,
            store,
            container,
            record: Mutex::new(record),
            members: RwLock::new(HashMap::new()),
            step_down: Mutex::new(None),
            terms_held: AtomicU64::new(0),
            election: OnceLock::new(),
        }
    }

    /// Path this node is registered at.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn container(&self) -> &dyn ExecutionContainer {
        self.container.as_ref()
    }

    pub(crate) fn attach_election(&self, election: Arc<dyn LeaderElection>) {
        if self.election.set(election).is_err() {
            tracing::warn!(node = %self.path, "Leader election already attached");
        }
    }

    /// Whether this node currently holds the leader-election primitive.
    pub async fn is_leader(&self) -> bool {
        match self.election.get() {
            Some(election) => election.has_leadership().await,
            None => false,
        }
    }

    pub async fn record_snapshot(&self) -> NodeRecord {
        self.record.lock().await.clone()
    }

    pub async fn running_job_count(&self) -> i64 {
        self.record.lock().await.running_job_count
    }

    pub async fn role(&self) -> NodeRole {
        self.record.lock().await.role
    }

    /// Number of leadership terms this node has held so far.
    pub fn terms_held(&self) -> u64 {
        self.terms_held.load(Ordering::SeqCst)
    }

    /// Paths of the nodes currently in this node's registry view.
    pub async fn live_members(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.members.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Set this node's role and persist its record.
    pub async fn mark_role(&self, role: NodeRole) -> Result<()> {
        let mut record = self.record.lock().await;
        record.role = role;
        self.store.write_node(&self.path, &record).await?;
        tracing::debug!(node = %self.path, %role, "Node role recorded");
        Ok(())
    }
}

struct ActiveNode {
    ctx: Arc<NodeContext>,
    election: Arc<dyn LeaderElection>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// A cluster member.
///
/// Construction only stores collaborators. [`ClusterNode::activate`] performs
/// the fallible startup: register the node, subscribe to the node and job
/// namespaces and create the election participant. [`ClusterNode::join`]
/// then enters the election and [`ClusterNode::exit`] leaves it and closes
/// the coordination session.
pub struct ClusterNode {
    config: ClusterConfig,
    coordinator: Arc<dyn Coordinator>,
    container: Arc<dyn ExecutionContainer>,
    active: Option<ActiveNode>,
}

fn bootstrap(step: BootstrapStep) -> impl FnOnce(ClusterError) -> ClusterError {
    move |source| {
        tracing::error!(%step, error = %source, "Node bootstrap failed");
        ClusterError::Bootstrap {
            step,
            source: Box::new(source),
        }
    }
}

impl ClusterNode {
    pub fn new(
        config: ClusterConfig,
        coordinator: Arc<dyn Coordinator>,
        container: Arc<dyn ExecutionContainer>,
    ) -> Self {
        Self {
            config,
            coordinator,
            container,
            active: None,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Shared handler state, once activated.
    pub fn context(&self) -> Option<&Arc<NodeContext>> {
        self.active.as_ref().map(|a| &a.ctx)
    }

    /// Registered path, once activated.
    pub fn path(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.ctx.path())
    }

    pub async fn is_leader(&self) -> bool {
        match &self.active {
            Some(active) => active.ctx.is_leader().await,
            None => false,
        }
    }

    /// Register with the coordination service and start the watches.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Bootstrap`] naming the step that failed. Tasks
    /// started by earlier steps are stopped; an already created registration
    /// disappears with the session.
    pub async fn activate(&mut self) -> Result<Arc<NodeContext>> {
        if let Some(active) = &self.active {
            return Err(ClusterError::AlreadyActive(active.ctx.path().to_string()));
        }

        let paths = self.config.paths.clone();
        let store = ClusterStore::new(self.coordinator.clone(), paths.clone());
        let record = NodeRecord::new(self.config.address.clone());

        let path = store
            .register_node(&record)
            .await
            .map_err(bootstrap(BootstrapStep::RegisterNode))?;
        tracing::info!(node = %path, address = %self.config.address, "Node registered");

        let ctx = Arc::new(NodeContext::new(
            path,
            store,
            self.container.clone(),
            record,
        ));
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let node_events = self
            .coordinator
            .watch_children(&paths.nodes())
            .await
            .map_err(|e| bootstrap(BootstrapStep::WatchNodes)(e.into()))?;
        tasks.push(tokio::spawn(run_node_watch(
            ctx.clone(),
            node_events,
            shutdown.clone(),
        )));

        let job_events = match self.coordinator.watch_children(&paths.jobs()).await {
            Ok(events) => events,
            Err(e) => {
                shutdown.cancel();
                return Err(bootstrap(BootstrapStep::WatchJobs)(e.into()));
            }
        };
        tasks.push(tokio::spawn(run_job_watch(
            ctx.clone(),
            job_events,
            shutdown.clone(),
        )));

        let listener = Arc::new(ElectionController::new(ctx.clone()));
        let election = match self
            .coordinator
            .leader_election(&paths.master(), listener)
            .await
        {
            Ok(election) => election,
            Err(e) => {
                shutdown.cancel();
                return Err(bootstrap(BootstrapStep::CreateElection)(e.into()));
            }
        };
        ctx.attach_election(election.clone());

        self.active = Some(ActiveNode {
            ctx: ctx.clone(),
            election,
            shutdown,
            tasks,
        });
        Ok(ctx)
    }

    /// Enter the leader election. Leadership, when won, is held on the
    /// election's own task until relinquished.
    pub async fn join(&self) -> Result<()> {
        let active = self.active.as_ref().ok_or(ClusterError::NotActive)?;
        active.election.start().await?;
        tracing::info!(node = %active.ctx.path(), "Joined leader election");
        Ok(())
    }

    /// Leave the election, stop the watches and close the coordination session.
    ///
    /// A leadership handler that is still holding is revoked and returns.
    pub async fn exit(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        tracing::info!(node = %active.ctx.path(), "Node exiting");

        active.election.close().await;
        active.shutdown.cancel();
        self.coordinator.close().await;
        for task in active.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Watch task ended abnormally");
            }
        }
    }
}
