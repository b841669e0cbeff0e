mod simulated;

use clap::{Parser, Subcommand};
use conductor_executor::{
    Conductor, ConductorConfig, ExecutionPreferences, ExecutionStatus, LoggingConfig,
};
use conductor_hierarchy::{AgentInstance, HierarchyStatus};
use conductor_planner::TaskDecomposer;
use serde::Serialize;
use simulated::SimulatedBackend;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor: multi-agent workflow orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    /// Emit logs as JSON (overrides config)
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose a request and print the plan as JSON
    Plan {
        /// Natural-language request
        request: String,
    },
    /// Run a request end to end on the simulated backend
    Run {
        /// Natural-language request
        request: String,
        /// Treat plans that need sign-off as approved
        #[arg(long)]
        approve: bool,
        /// Simulated time each task takes
        #[arg(long, default_value_t = 50)]
        task_delay_ms: u64,
    },
    /// Print the hierarchy as booted from config
    Agents,
}

#[derive(Serialize)]
struct AgentsView {
    status: HierarchyStatus,
    agents: Vec<AgentInstance>,
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json || force_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ConductorConfig::load(&cli.config)?;
    init_tracing(&config.logging, cli.json_logs);

    match cli.command {
        Commands::Plan { request } => {
            let decomposer = TaskDecomposer::new(config.planner)?;
            let plan = decomposer.decompose(&request)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Run {
            request,
            approve,
            task_delay_ms,
        } => {
            let backend = Arc::new(SimulatedBackend::new(Duration::from_millis(task_delay_ms)));
            let conductor = Conductor::new(config, backend)?;
            conductor.start();

            let execution_id = conductor
                .execute(
                    &request,
                    ExecutionPreferences {
                        pre_approved: approve,
                    },
                )
                .await?;
            info!(execution_id = %execution_id, "Waiting for execution to finish");
            let snapshot = conductor.executor().await_completion(&execution_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            conductor.stop().await;

            if snapshot.status != ExecutionStatus::Completed {
                anyhow::bail!("execution {execution_id} ended {}", snapshot.status);
            }
        }
        Commands::Agents => {
            let backend = Arc::new(SimulatedBackend::new(Duration::ZERO));
            let conductor = Conductor::new(config, backend)?;
            let view = AgentsView {
                status: conductor.hierarchy_status().await,
                agents: conductor.hierarchy().agents().await,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}
