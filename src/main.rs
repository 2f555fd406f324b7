use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use testdist::bucketing;
use testdist::config::{AssignStrategy, PlannerConfig, SchedulerConfig};
use testdist::scheduler::LoadScopeScheduler;
use testdist::worker::{run_worker, ChannelTransport, NodeId, WorkerCommand, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "testdist")]
#[command(version)]
#[command(about = "Distribute test items across worker nodes with duration-based bucketing")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Compute the final bucket partition from the persisted plan plus
    /// newly discovered items
    Plan(PlanArgs),

    /// Run a simulated distribution session over the planned buckets
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Path to the bucket plan (defaults to $TEST_DIR/bins.json, then ./bins.json)
    #[arg(long)]
    bins: Option<PathBuf>,

    /// Root of the test tree to discover items under
    #[arg(long, default_value = "tests")]
    root: PathBuf,

    /// Emit the partition as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the bucket plan (defaults to $TEST_DIR/bins.json, then ./bins.json)
    #[arg(long)]
    bins: Option<PathBuf>,

    /// Root of the test tree to discover items under
    #[arg(long, default_value = "tests")]
    root: PathBuf,

    /// Group work units by scope and hand them out from a shared queue
    /// instead of assigning each worker its whole bucket up front
    #[arg(long)]
    group_by_scope: bool,

    /// Number of workers in grouped mode (full-bucket mode always runs one
    /// worker per bucket)
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Pending-item threshold below which a worker is topped up with
    /// another work unit (grouped mode)
    #[arg(long, default_value = "2")]
    low_watermark: usize,
}

#[derive(Serialize)]
struct PlanOutput {
    bins: Vec<Vec<String>>,
    new_tests: Vec<String>,
}

fn planner_config(bins: Option<PathBuf>, root: PathBuf) -> PlannerConfig {
    let mut config = PlannerConfig::default().with_tests_root(root);
    config.bins_path = bins;
    config
}

fn handle_plan(args: PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = planner_config(args.bins, args.root);
    let (bins, new_tests) = bucketing::bins_and_new_tests(&config)?;

    if args.json {
        let output = PlanOutput { bins, new_tests };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Bucket plan");
    println!("{}", "=".repeat(40));
    for (index, bin) in bins.iter().enumerate() {
        println!("bucket {:<4} {:>6} items", index, bin.len());
    }
    println!();
    if new_tests.is_empty() {
        println!("No new items discovered");
    } else {
        println!("Newly binned items:");
        for test in &new_tests {
            println!("  {test}");
        }
    }
    Ok(())
}

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = planner_config(args.bins, args.root);
    let (bins, new_tests) = bucketing::bins_and_new_tests(&config)?;
    tracing::info!(
        buckets = bins.len(),
        new_items = new_tests.len(),
        "Planned partition"
    );

    // Full-bucket mode: one worker per bucket, each collecting only its own
    // bucket. Grouped mode: every worker collects the full universe and
    // pulls scope units from the shared queue.
    let (strategy, collections): (AssignStrategy, Vec<Vec<String>>) = if args.group_by_scope {
        let universe: Vec<String> = bins.iter().flatten().cloned().collect();
        (
            AssignStrategy::GroupedByScope,
            vec![universe; args.workers.max(1)],
        )
    } else {
        (AssignStrategy::FullCollection, bins)
    };

    let scheduler_config = SchedulerConfig::new(collections.len())
        .with_strategy(strategy)
        .with_low_watermark(args.low_watermark);
    let mut scheduler = LoadScopeScheduler::new(scheduler_config);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut command_senders: HashMap<NodeId, mpsc::UnboundedSender<WorkerCommand>> = HashMap::new();
    for (index, collection) in collections.into_iter().enumerate() {
        let node = NodeId(index as u64);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        scheduler.add_node(node, ChannelTransport::new(node, command_tx.clone()))?;
        command_senders.insert(node, command_tx);
        tokio::spawn(run_worker(node, collection, command_rx, event_tx.clone()));
    }
    drop(event_tx);

    let mut active = command_senders.len();
    let mut completed = 0usize;
    let mut crashed: Vec<String> = Vec::new();

    while active > 0 {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, aborting run");
                break;
            }
            event = event_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WorkerEvent::CollectionReceived { node, items } => {
                scheduler.add_node_collection(node, items)?;
                if scheduler.collection_is_completed() && scheduler.collection().is_none() {
                    scheduler.schedule()?;
                    if scheduler.tests_finished() {
                        terminate_all(&command_senders);
                    }
                }
            }
            WorkerEvent::ItemCompleted {
                node,
                item_index,
                duration,
            } => {
                scheduler.mark_test_complete(node, item_index, duration)?;
                completed += 1;
                if scheduler.tests_finished() {
                    terminate_all(&command_senders);
                }
            }
            WorkerEvent::Finished { node } => {
                if let Some(crashitem) = scheduler.remove_node(node)? {
                    crashed.push(crashitem);
                }
                active -= 1;
            }
        }
    }

    let total_duration: f64 = scheduler.durations().values().sum();
    println!();
    println!("Run summary");
    println!("{}", "=".repeat(40));
    println!("Items completed: {completed}");
    println!("Reported duration: {total_duration:.2}s");
    for item in &crashed {
        println!("Interrupted item: {item}");
    }
    Ok(())
}

fn terminate_all(command_senders: &HashMap<NodeId, mpsc::UnboundedSender<WorkerCommand>>) {
    for sender in command_senders.values() {
        // Workers that already exited have dropped their receiver.
        let _ = sender.send(WorkerCommand::Terminate);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args)?,
        Commands::Run(run_args) => handle_run(run_args).await?,
    }
    Ok(())
}
