//! Portflow command-line host
//!
//! Loads a graph snapshot, runs it with the built-in node library and logs
//! progress. Ctrl-C cancels the run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use portflow_engine::{
    ErrorPolicy, EventSinkObserver, ExecutionEvent, ExecutorConfig, Graph, GraphSnapshot, NodeRegistry, Parameters,
    ServiceInstance,
};
use portflow_nodes::{ChatClient, EchoChatClient};

/// Portflow - run node graphs from the command line
#[derive(Parser)]
#[command(name = "portflow")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph snapshot
    Run {
        /// Path to the snapshot file (JSON)
        snapshot: PathBuf,

        /// JSON object of run parameters
        #[arg(long)]
        params: Option<PathBuf>,

        /// Maximum node invocations before the run is stopped
        #[arg(long, default_value_t = ExecutorConfig::default().max_steps)]
        max_steps: usize,

        /// Stop the whole run at the first node failure
        #[arg(long)]
        fail_fast: bool,

        /// Answer chat completions offline by echoing the last user message
        #[arg(long)]
        echo_chat: bool,
    },

    /// List registered node types
    Nodes {
        /// Print full metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            snapshot,
            params,
            max_steps,
            fail_fast,
            echo_chat,
        } => {
            let config = ExecutorConfig {
                max_steps,
                error_policy: if fail_fast {
                    ErrorPolicy::CancelRun
                } else {
                    ErrorPolicy::ContinueBranches
                },
            };
            run_graph(snapshot, params, config, echo_chat).await
        }
        Commands::Nodes { json } => list_nodes(json),
    }
}

async fn run_graph(snapshot_file: PathBuf, params: Option<PathBuf>, config: ExecutorConfig, echo_chat: bool) -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    let snapshot = GraphSnapshot::load(&snapshot_file)
        .with_context(|| format!("failed to read snapshot: {}", snapshot_file.display()))?;
    let mut graph = Graph::from_snapshot(&snapshot, &registry).context("failed to restore graph")?;
    log::info!(
        "Loaded graph with {} nodes from {}",
        graph.node_count(),
        snapshot_file.display()
    );

    let parameters = match params {
        Some(path) => Parameters::from_json_file(&path)
            .with_context(|| format!("failed to read parameters: {}", path.display()))?,
        None => Parameters::new(),
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling execution");
            interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log_event(&event);
        }
    });

    let observer = EventSinkObserver::new(tx);
    let mut executor = graph
        .create_executor()
        .with_config(config)
        .with_parameters(parameters);
    if echo_chat {
        let client: Arc<dyn ChatClient> = Arc::new(EchoChatClient);
        executor = executor.with_initializer(ServiceInstance::new(client));
    }
    let outcome = executor.execute(&observer, cancel).await;

    drop(observer);
    printer.await.context("event printer task failed")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_completed() {
        bail!("execution ended {:?}", outcome.state);
    }
    Ok(())
}

fn log_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::ExecutionStarted { execution_id } => log::info!("Execution {} started", execution_id),
        ExecutionEvent::NodeStarted { node_id, node_type, .. } => log::debug!("{} ({}) started", node_type, node_id),
        ExecutionEvent::NodeCompleted { node_id, node_type, .. } => {
            log::debug!("{} ({}) completed", node_type, node_id)
        }
        ExecutionEvent::NodeFailed {
            node_id,
            node_type,
            error,
            ..
        } => log::error!("{} ({}) failed: {}", node_type, node_id, error),
        ExecutionEvent::ExecutionFinished {
            state,
            nodes_executed,
            execution_time_ms,
            ..
        } => log::info!(
            "Execution finished {:?}: {} nodes in {} ms",
            state,
            nodes_executed,
            execution_time_ms
        ),
    }
}

fn list_nodes(json: bool) -> Result<()> {
    let registry = NodeRegistry::with_builtins();
    if json {
        println!("{}", serde_json::to_string_pretty(&registry.all_metadata())?);
        return Ok(());
    }

    let grouped = registry.metadata_by_category();
    let mut categories: Vec<_> = grouped.keys().copied().collect();
    categories.sort();
    for category in categories {
        println!("{:?}", category);
        for metadata in &grouped[&category] {
            println!("  {:<18} {}", metadata.node_type, metadata.description);
        }
    }
    Ok(())
}
