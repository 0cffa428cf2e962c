//! Runbox: run named container jobs on demand.
//!
//! The crates of the workspace split the system in three layers:
//!
//! * `runbox-core`: configuration, logging and the error taxonomy
//! * `runbox-protocol`: job, execution and override resource types
//! * `runbox-engine`: registry, execution engine and HTTP surface
//!
//! This crate wires them into a service.

use std::sync::Arc;

use anyhow::Context;
use runbox_core::RunboxConfig;
use runbox_engine::{
    load_job_definitions, ContainerRuntime, EngineSettings, ExecutionEngine, JobRegistry,
    RunService,
};
use tracing::info;

/// Builds a service backed by `runtime`, registering every job of the
/// configured jobs file before returning.
pub fn build_service(
    config: &RunboxConfig,
    runtime: Arc<dyn ContainerRuntime>,
) -> anyhow::Result<RunService> {
    let registry = JobRegistry::new();

    if let Some(path) = &config.jobs_file {
        let jobs = load_job_definitions(path)
            .with_context(|| format!("failed to load jobs from {}", path.display()))?;
        let count = registry
            .seed(jobs)
            .context("failed to register configured jobs")?;
        info!(count, path = %path.display(), "registered configured jobs");
    }

    let settings = EngineSettings {
        credentials: config.credentials.clone(),
    };
    if let Some(credentials) = &settings.credentials {
        info!(
            host = %credentials.host_dir.display(),
            container = %credentials.container_dir,
            "mounting credentials into job containers"
        );
    }

    let engine = ExecutionEngine::new(runtime, settings);
    Ok(RunService::new(registry, engine))
}
