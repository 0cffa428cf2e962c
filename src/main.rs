use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use runbox::build_service;
use runbox_core::RunboxConfig;
use runbox_engine::{load_job_definitions, DockerRuntime, RunboxApiBuilder};
use tracing::info;

#[derive(Parser)]
#[command(name = "runbox")]
#[command(about = "Run named container jobs on demand", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serves the HTTP API (default)
    Serve {
        /// Overrides RUNBOX_BIND
        #[arg(short, long)]
        bind: Option<String>,
        /// Overrides RUNBOX_JOBS_FILE
        #[arg(short, long)]
        jobs_file: Option<PathBuf>,
    },
    /// Parses a jobs file and prints the jobs it defines
    CheckJobs {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RunboxConfig::from_env().context("failed to load runbox configuration")?;

    if let Err(err) = runbox_core::logging::init_tracing(Some(config.log_level.as_str())) {
        eprintln!("failed to initialise tracing: {err}");
    }

    match cli.command {
        Some(Commands::CheckJobs { path }) => check_jobs(path),
        Some(Commands::Serve { bind, jobs_file }) => {
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if jobs_file.is_some() {
                config.jobs_file = jobs_file;
            }
            serve(config).await
        }
        None => serve(config).await,
    }
}

async fn serve(config: RunboxConfig) -> anyhow::Result<()> {
    let runtime = DockerRuntime::connect().context("failed to connect to docker")?;
    let service = build_service(&config, Arc::new(runtime))?;

    RunboxApiBuilder::new(service)
        .serve(config.bind_address(), shutdown_signal())
        .await
        .context("runbox server terminated with error")?;

    info!("runbox stopped");
    Ok(())
}

fn check_jobs(path: PathBuf) -> anyhow::Result<()> {
    let jobs = load_job_definitions(&path)
        .with_context(|| format!("invalid jobs file {}", path.display()))?;
    for job in &jobs {
        let image = job
            .template
            .primary_container()
            .map(|container| container.image.as_str())
            .unwrap_or("-");
        println!("{}\t{}", job.name, image);
    }
    println!("{} job(s) ok", jobs.len());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
