// crates/flowcli/src/main.rs

mod demos;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use demos::Demo;
use flowcore::{ExecutionEvent, NodeEvent, StopToken, WorkflowSettings};
use flowruntime::DotRenderer;
use std::path::PathBuf;
use std::thread;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a built-in workflow
    Run {
        demo: Demo,

        /// Path to a workflow settings JSON file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Print the execution report as JSON
        #[arg(long)]
        json: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a workflow's graph without running it
    Graph {
        demo: Demo,

        #[arg(short, long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GraphFormat {
    Dot,
    Json,
    Text,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            demo,
            settings,
            json,
            verbose,
        } => {
            // RUST_LOG wins over the verbosity flag.
            let level = if verbose { "debug" } else { "info" };
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
            tracing_subscriber::fmt().with_env_filter(filter).init();

            run_demo(demo, load_settings(settings)?, json)?;
        }

        Commands::Graph { demo, format } => {
            print_graph(demo, format)?;
        }
    }

    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<WorkflowSettings> {
    let Some(path) = path else {
        return Ok(WorkflowSettings::default());
    };
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading settings from {}", path.display()))?;
    WorkflowSettings::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn run_demo(demo: Demo, settings: WorkflowSettings, json: bool) -> Result<()> {
    let mut workflow = demo.build(settings)?;
    workflow.validate()?;

    let printer = if json {
        None
    } else {
        println!("🚀 Workflow: {}", workflow.name());
        println!("   Nodes: {}", workflow.len());
        println!();
        let events = workflow.subscribe();
        Some(thread::spawn(move || print_events(events)))
    };
    forward_ctrl_c(workflow.stop_token());

    let report = workflow.execute()?;
    if let Some(printer) = printer {
        // WorkflowCompleted has been emitted by now, so the printer is about to exit.
        let _ = printer.join();
    }

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        println!("📊 Execution Summary:");
        print!("{}", report);
    }

    report.into_result()?;
    Ok(())
}

/// Cancel the workflow on Ctrl-C. The watcher lives on its own thread since
/// the workflow drives its own runtime on this one.
fn forward_ctrl_c(stop: StopToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(error = %err, "Ctrl-C handling unavailable");
                return;
            }
        };
        runtime.block_on(async {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        tracing::info!("interrupt received, stopping workflow");
                        stop.cancel();
                    }
                }
                _ = stop.cancelled() => {}
            }
        });
    });
}

fn print_events(mut events: broadcast::Receiver<ExecutionEvent>) {
    loop {
        let event = match events.blocking_recv() {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("     ⚠️  {} events dropped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        match event {
            ExecutionEvent::WorkflowStarted { .. } => {
                println!("▶️  Workflow started");
            }
            ExecutionEvent::NodeStarted { node, mode, .. } => {
                println!("  ⚡ Starting node: {} ({})", node, mode);
            }
            ExecutionEvent::NodeCompleted { node, duration_ms, .. } => {
                println!("  ✅ Node {} completed in {}ms", node, duration_ms);
            }
            ExecutionEvent::NodeFailed { node, error, .. } => {
                println!("  ❌ Node {} failed: {}", node, error);
            }
            ExecutionEvent::NodeEvent { node, event, .. } => match event {
                NodeEvent::Info { message } => println!("     ℹ️  [{}] {}", node, message),
                NodeEvent::Warning { message } => println!("     ⚠️  [{}] {}", node, message),
            },
            ExecutionEvent::WorkflowCompleted {
                success, duration_ms, ..
            } => {
                if success {
                    println!("✨ Workflow completed successfully in {}ms", duration_ms);
                } else {
                    println!("💥 Workflow failed after {}ms", duration_ms);
                }
                return;
            }
        }
    }
}

fn print_graph(demo: Demo, format: GraphFormat) -> Result<()> {
    let mut workflow = demo.build(WorkflowSettings::default())?;
    workflow.validate()?;

    match format {
        GraphFormat::Dot => println!("{}", workflow.visualize(&DotRenderer)),
        GraphFormat::Json => println!("{}", serde_json::to_string_pretty(&workflow.describe())?),
        GraphFormat::Text => {
            let graph = workflow.describe();
            println!("📋 Workflow: {}", graph.workflow);
            for node in &graph.nodes {
                println!("  • {}", node);
            }
            for edge in &graph.edges {
                println!("    {} -> {} ({})", edge.from, edge.to, edge.kind);
            }
        }
    }
    Ok(())
}
