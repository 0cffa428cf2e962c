use runbox_protocol::execution::Overrides;
use tracing::{debug, info};

use crate::engine::{ExecutionEngine, RunHandle};
use crate::error::EngineError;
use crate::overrides::resolve;
use crate::registry::JobRegistry;

/// Looks jobs up in the registry and hands resolved runs to the engine.
#[derive(Clone)]
pub struct JobRunner {
    registry: JobRegistry,
    engine: ExecutionEngine,
}

impl JobRunner {
    pub fn new(registry: JobRegistry, engine: ExecutionEngine) -> Self {
        Self { registry, engine }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Triggers one run of `name`.
    ///
    /// Overrides are resolved and the effective job validated before the run
    /// counter moves, so a rejected request leaves the stored job untouched.
    pub async fn run(
        &self,
        name: &str,
        overrides: Option<&Overrides>,
    ) -> Result<RunHandle, EngineError> {
        debug!(job = name, "job.run");
        if name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "job name is required".into(),
            ));
        }

        let job = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("unknown job {}", name)))?;

        let effective = resolve(&job, overrides)?;
        ExecutionEngine::validate(&effective)?;

        let recorded = self.registry.record_run(name)?;
        let run = self.engine.start(&effective).await?;
        info!(
            job = name,
            execution = %run.execution.name,
            execution_count = recorded.execution_count,
            "job run triggered"
        );
        Ok(run)
    }
}
