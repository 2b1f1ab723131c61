//! Remesh CLI
//!
//! Runs the mesh adaptation pipeline on an SU2 option file, or validates
//! and prints its adaptation schedule.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remesh_core::artifacts::StagingPolicy;
use remesh_core::{
    AmgExecutable, Config, CoordinatorConfig, PipelineCoordinator, PipelineEvent,
    ScheduleBuilder, Su2Executable,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Remesh - Anisotropic mesh adaptation driver for SU2")]
struct Args {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the adaptation pipeline
    Run {
        /// SU2 configuration file with PYADAP_* options
        cfg: PathBuf,
        /// Flow solver executable (default: $REMESH_SOLVER or SU2_CFD)
        #[arg(long)]
        solver: Option<String>,
        /// Adaptation engine executable (default: $REMESH_AMG or amg)
        #[arg(long)]
        amg: Option<String>,
        /// MPI ranks for the flow solver (default: $REMESH_NP or 1)
        #[arg(long)]
        np: Option<u32>,
        /// MPI launcher used when more than one rank is requested
        #[arg(long, default_value = "mpirun")]
        mpi: String,
        /// Copy inputs into the working directory instead of reading them in place
        #[arg(long)]
        copy_inputs: bool,
        /// Working directory name, created next to the configuration file
        #[arg(long, default_value = "ADAP")]
        work_dir: String,
        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Validate the configuration and print the adaptation schedule
    Schedule {
        /// SU2 configuration file with PYADAP_* options
        cfg: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Command-line value, then environment variable, then default.
fn setting(arg: Option<String>, var: &str, default: &str) -> String {
    arg.or_else(|| std::env::var(var).ok())
        .unwrap_or_else(|| default.to_string())
}

fn caller_dir(cfg: &Path) -> PathBuf {
    match cfg.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn load(cfg: &Path) -> Result<Config> {
    Config::load(cfg)
        .await
        .with_context(|| format!("Failed to read configuration {}", cfg.display()))
}

async fn schedule(cfg: PathBuf) -> Result<()> {
    let config = load(&cfg).await?;
    let schedule = ScheduleBuilder::new(&config)
        .build()
        .context("Invalid adaptation schedule")?;
    println!("{}", serde_json::to_string_pretty(&schedule)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run(
    cfg: PathBuf,
    solver: Option<String>,
    amg: Option<String>,
    np: Option<u32>,
    mpi: String,
    copy_inputs: bool,
    work_dir: String,
    summary: Option<PathBuf>,
) -> Result<()> {
    let config = load(&cfg).await?;

    let ranks = match np {
        Some(n) => n,
        None => match std::env::var("REMESH_NP") {
            Ok(v) => v
                .trim()
                .parse()
                .with_context(|| format!("REMESH_NP must be a rank count, got '{}'", v))?,
            Err(_) => 1,
        },
    };
    let solver = Su2Executable::new(setting(solver, "REMESH_SOLVER", "SU2_CFD")).with_mpi(mpi, ranks);
    let amg = AmgExecutable::new(setting(amg, "REMESH_AMG", "amg"));

    let settings = CoordinatorConfig {
        caller_dir: caller_dir(&cfg),
        work_dir_name: work_dir,
        staging: if copy_inputs {
            StagingPolicy::Copy
        } else {
            StagingPolicy::Reference
        },
        backend: None,
    };

    let (tx, mut rx) = mpsc::channel::<PipelineEvent>(64);
    let events = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::debug!(
                seq = event.seq,
                kind = ?event.kind,
                stage = %event.stage,
                iteration = ?event.iteration,
                "Pipeline event"
            );
        }
    });

    let mut coordinator = PipelineCoordinator::new(config, settings)
        .with_solver(Arc::new(solver))
        .with_remesh_tool(Arc::new(amg))
        .with_event_channel(tx);
    let result = coordinator.run().await;
    drop(coordinator);
    let _ = events.await;

    let summary_out = result.context("Mesh adaptation failed")?;
    tracing::info!(
        iterations = summary_out.global_iter,
        artifacts = summary_out.artifacts.len(),
        "Run complete"
    );

    if let Some(path) = summary {
        let json = serde_json::to_string_pretty(&summary_out)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write summary {}", path.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging(args.verbose);

    let result = match args.command {
        CliCommand::Run {
            cfg,
            solver,
            amg,
            np,
            mpi,
            copy_inputs,
            work_dir,
            summary,
        } => run(cfg, solver, amg, np, mpi, copy_inputs, work_dir, summary).await,
        CliCommand::Schedule { cfg } => schedule(cfg).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
