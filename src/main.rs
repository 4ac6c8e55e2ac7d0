use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use jobfleet::config::{ClusterConfig, ClusterPaths};
use jobfleet::coordination::{Coordinator, InMemoryCoordinator};
use jobfleet::membership::NodeRole;
use jobfleet::node::ClusterNode;
use jobfleet::scheduler::{Artifact, JobKey, JobOperation, JobRecord};
use jobfleet::shutdown::install_shutdown_handler;
use jobfleet::store::ClusterStore;
use jobfleet::worker::InMemoryContainer;

#[derive(Parser, Debug)]
#[command(name = "jobfleet")]
#[command(version)]
#[command(about = "Master/standby coordination for scheduled-job nodes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a whole cluster in-process and report where jobs ended up
    Simulate(SimulateArgs),

    /// Run a single node against an in-process coordinator until interrupted
    Run(RunArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of nodes to start
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// Number of Start jobs to submit
    #[arg(long, default_value = "4")]
    jobs: usize,

    /// Expire the master's session after the jobs settle
    #[arg(long)]
    kill_leader: bool,

    /// Time to let notifications settle between steps, in milliseconds
    #[arg(long, default_value = "300")]
    settle_ms: u64,

    /// Namespace root in the coordination service
    #[arg(long, default_value = "/jobfleet/standby")]
    root: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Address advertised in this node's record
    #[arg(long, default_value = "127.0.0.1")]
    address: String,

    /// Namespace root in the coordination service
    #[arg(long, default_value = "/jobfleet/standby")]
    root: String,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct NodeStatusOutput {
    path: String,
    address: String,
    role: String,
    running_job_count: i64,
    owned_jobs: usize,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job: String,
    operation: String,
    state: String,
    assigned_node: Option<String>,
    failure: Option<String>,
}

#[derive(Serialize)]
struct ClusterStatusOutput {
    masters: Vec<String>,
    nodes: Vec<NodeStatusOutput>,
    jobs: Vec<JobStatusOutput>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn collect_status(store: &ClusterStore) -> jobfleet::Result<ClusterStatusOutput> {
    let nodes = store.list_nodes().await?;
    let jobs = store.list_jobs().await?;

    Ok(ClusterStatusOutput {
        masters: nodes
            .iter()
            .filter(|n| n.record.role == NodeRole::Master)
            .map(|n| n.path.clone())
            .collect(),
        nodes: nodes
            .into_iter()
            .map(|n| NodeStatusOutput {
                owned_jobs: n.record.job_paths.len(),
                path: n.path,
                address: n.record.address,
                role: n.record.role.to_string(),
                running_job_count: n.record.running_job_count,
            })
            .collect(),
        jobs: jobs
            .into_iter()
            .map(|(_, job)| JobStatusOutput {
                job: job.key.to_string(),
                operation: job
                    .operation
                    .map(|op| op.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                state: job.state.to_string(),
                assigned_node: job.assigned_node,
                failure: job.last_failure.map(|f| f.to_string()),
            })
            .collect(),
    })
}

fn print_status(
    status: &ClusterStatusOutput,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        OutputFormat::Table => {
            println!("Cluster Status");
            println!("{}", "=".repeat(40));
            if status.masters.is_empty() {
                println!("Master: none");
            } else {
                println!("Master: {}", status.masters.join(", "));
            }
            println!();
            println!("Nodes:");
            println!("{:<40} {:<12} {:<8} {:<8} JOBS", "PATH", "ADDRESS", "ROLE", "RUNNING");
            println!("{}", "-".repeat(80));
            for node in &status.nodes {
                println!(
                    "{:<40} {:<12} {:<8} {:<8} {}",
                    node.path, node.address, node.role, node.running_job_count, node.owned_jobs
                );
            }
            println!();
            println!("Jobs:");
            println!("{:<16} {:<10} {:<8} NODE", "JOB", "OPERATION", "STATE");
            println!("{}", "-".repeat(80));
            for job in &status.jobs {
                let node = job.assigned_node.as_deref().unwrap_or("-");
                println!("{:<16} {:<10} {:<8} {}", job.job, job.operation, job.state, node);
                if let Some(failure) = &job.failure {
                    println!("  error: {}", failure);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settle = Duration::from_millis(args.settle_ms);
    let service = InMemoryCoordinator::new();
    let paths = ClusterPaths::new(args.root.clone());

    let mut nodes: Vec<(String, ClusterNode)> = Vec::new();
    for i in 0..args.nodes {
        let session = service.connect().await;
        let session_id = session.session_id();
        let config = ClusterConfig::new(format!("10.0.0.{}", i + 1)).with_root(args.root.clone());
        let mut node = ClusterNode::new(config, session, Arc::new(InMemoryContainer::new()));
        node.activate().await?;
        node.join().await?;
        nodes.push((session_id, node));
    }

    let admin: Arc<dyn Coordinator> = service.connect().await;
    let store = ClusterStore::new(admin.clone(), paths);
    for i in 0..args.jobs {
        let job = JobRecord::new(
            JobKey::new("demo", format!("job-{}", i)),
            Artifact::new(format!("job-{}.jar", i)),
            "0 */5 * * * ?",
        )
        .with_operation(JobOperation::Start);
        store.submit_job(job).await?;
    }
    tokio::time::sleep(settle).await;

    if args.kill_leader {
        let mut leader = None;
        for (idx, (_, node)) in nodes.iter().enumerate() {
            if node.is_leader().await {
                leader = Some(idx);
                break;
            }
        }
        match leader {
            Some(idx) => {
                let (session_id, node) = nodes.remove(idx);
                tracing::info!(node = ?node.path(), "Expiring master session");
                service.expire_session(&session_id).await;
                tokio::time::sleep(settle).await;
            }
            None => tracing::warn!("No master to expire"),
        }
    }

    let status = collect_status(&store).await?;
    print_status(&status, &args.output)?;

    for (_, node) in nodes.iter_mut() {
        node.exit().await;
    }
    admin.close().await;
    Ok(())
}

async fn run_node(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler();
    let service = InMemoryCoordinator::new();
    let session = service.connect().await;

    let config = ClusterConfig::new(args.address).with_root(args.root);
    let mut node = ClusterNode::new(config, session, Arc::new(InMemoryContainer::new()));
    node.activate().await?;
    node.join().await?;

    shutdown.cancelled().await;
    node.exit().await;
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Simulate(simulate_args) => {
            run_simulation(simulate_args).await?;
        }
        Commands::Run(run_args) => {
            run_node(run_args).await?;
        }
    }

    Ok(())
}
