//! Inbound operation set shared by every transport.

use runbox_protocol::execution::{Execution, Operation, Overrides};
use runbox_protocol::job::Job;
use tracing::{debug, info};

use crate::engine::{ExecutionEngine, RunHandle};
use crate::error::EngineError;
use crate::registry::{validate_definition, JobRegistry};
use crate::runner::JobRunner;
use crate::store::ExecutionFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Create the job when it is not registered yet.
    pub allow_missing: bool,
    /// Validate and echo the job without storing it.
    pub validate_only: bool,
}

#[derive(Clone)]
pub struct RunService {
    runner: JobRunner,
}

impl RunService {
    pub fn new(registry: JobRegistry, engine: ExecutionEngine) -> Self {
        Self {
            runner: JobRunner::new(registry, engine),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        self.runner.registry()
    }

    pub fn engine(&self) -> &ExecutionEngine {
        self.runner.engine()
    }

    pub fn create_job(&self, job: Job) -> Result<Job, EngineError> {
        let created = self.registry().create(job)?;
        info!(job = %created.name, "job created");
        Ok(created)
    }

    pub fn get_job(&self, name: &str) -> Result<Job, EngineError> {
        self.registry()
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("unknown job {}", name)))
    }

    pub fn update_job(&self, job: Job, options: UpdateOptions) -> Result<Job, EngineError> {
        debug!(job = %job.name, ?options, "job.update requested");
        if options.validate_only {
            validate_definition(&job)?;
            if !options.allow_missing && !self.registry().contains(&job.name) {
                return Err(EngineError::NotFound(format!("unknown job {}", job.name)));
            }
            return Ok(job);
        }

        if options.allow_missing && !self.registry().contains(&job.name) {
            return self.create_job(job);
        }

        let updated = self.registry().update(job)?;
        info!(job = %updated.name, "job updated");
        Ok(updated)
    }

    /// Starts a run and returns the freshly created execution. The run
    /// itself continues in the background.
    pub async fn run_job(
        &self,
        name: &str,
        overrides: Option<&Overrides>,
    ) -> Result<Execution, EngineError> {
        self.start_job(name, overrides)
            .await
            .map(|run| run.execution)
    }

    /// Like [`RunService::run_job`] but keeps the completion handle.
    pub async fn start_job(
        &self,
        name: &str,
        overrides: Option<&Overrides>,
    ) -> Result<RunHandle, EngineError> {
        self.runner.run(name, overrides).await
    }

    /// Lists executions of `parent`, or of every job for `-`.
    pub fn list_executions(&self, parent: &str) -> Result<Vec<Execution>, EngineError> {
        if parent.is_empty() {
            return Err(EngineError::InvalidArgument(
                "parent job name is required".into(),
            ));
        }

        let mut executions = self.engine().list(&ExecutionFilter::parse(parent));
        executions.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(executions)
    }

    pub fn get_execution(&self, name: &str) -> Result<Execution, EngineError> {
        self.engine().get(name)
    }

    pub async fn delete_execution(&self, name: &str) -> Result<Operation, EngineError> {
        let execution = self.engine().delete(name).await?;
        info!(execution = %execution.name, "execution deleted");
        Ok(Operation::done(execution.name))
    }

    pub async fn shutdown(&self) {
        self.engine().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::container::ScriptedRuntime;
    use crate::engine::EngineSettings;
    use runbox_protocol::job::Container;

    fn service(runtime: ScriptedRuntime) -> RunService {
        let engine = ExecutionEngine::new(Arc::new(runtime), EngineSettings::default());
        RunService::new(JobRegistry::new(), engine)
    }

    fn job(name: &str, image: &str) -> Job {
        Job::with_container(name, Container::new(image))
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let service = service(ScriptedRuntime::new());
        service.create_job(job("a", "busybox")).expect("create");
        assert!(matches!(
            service.create_job(job("a", "busybox")),
            Err(EngineError::AlreadyExists(_))
        ));
        assert!(matches!(
            service.get_job("b"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn validate_only_never_mutates() {
        let service = service(ScriptedRuntime::new());
        service.create_job(job("a", "busybox")).expect("create");

        let echoed = service
            .update_job(
                job("a", "alpine"),
                UpdateOptions {
                    validate_only: true,
                    ..UpdateOptions::default()
                },
            )
            .expect("validate");
        assert_eq!(echoed.template.containers[0].image, "alpine");
        assert_eq!(
            service.get_job("a").expect("job").template.containers[0].image,
            "busybox"
        );

        assert!(matches!(
            service.update_job(
                job("b", "alpine"),
                UpdateOptions {
                    validate_only: true,
                    ..UpdateOptions::default()
                },
            ),
            Err(EngineError::NotFound(_))
        ));
        assert!(!service.registry().contains("b"));
    }

    #[test]
    fn allow_missing_creates() {
        let service = service(ScriptedRuntime::new());
        assert!(matches!(
            service.update_job(job("a", "busybox"), UpdateOptions::default()),
            Err(EngineError::NotFound(_))
        ));

        let created = service
            .update_job(
                job("a", "busybox"),
                UpdateOptions {
                    allow_missing: true,
                    ..UpdateOptions::default()
                },
            )
            .expect("upsert");
        assert!(created.create_time.is_some());

        let updated = service
            .update_job(
                job("a", "alpine"),
                UpdateOptions {
                    allow_missing: true,
                    ..UpdateOptions::default()
                },
            )
            .expect("update");
        assert_eq!(updated.create_time, created.create_time);
        assert!(updated.update_time.is_some());
    }

    #[tokio::test]
    async fn wildcard_lists_every_execution_once() {
        let service = service(ScriptedRuntime::exiting_with(0));
        service.create_job(job("a", "busybox")).expect("create a");
        service.create_job(job("b", "busybox")).expect("create b");

        let mut pending = Vec::new();
        for name in ["a", "a", "b"] {
            pending.push(service.start_job(name, None).await.expect("run"));
        }
        for run in pending {
            run.wait().await.expect("completion");
        }

        let all = service.list_executions("-").expect("list");
        assert_eq!(all.len(), 3);
        let mut names: Vec<_> = all.iter().map(|e| e.name.clone()).collect();
        names.dedup();
        assert_eq!(names.len(), 3);

        assert_eq!(service.list_executions("a").expect("list a").len(), 2);
        assert!(service.list_executions("c").expect("list c").is_empty());
        assert!(matches!(
            service.list_executions(""),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn delete_returns_done_operation() {
        let service = service(ScriptedRuntime::new());
        service.create_job(job("a", "busybox")).expect("create");
        let execution = service.run_job("a", None).await.expect("run");

        let operation = service
            .delete_execution(&execution.name)
            .await
            .expect("delete");
        assert_eq!(operation, Operation::done(execution.name.clone()));
        assert!(service
            .get_execution(&execution.name)
            .expect("execution")
            .delete_time
            .is_some());
        assert!(matches!(
            service.delete_execution("nope").await,
            Err(EngineError::NotFound(_))
        ));
    }
}
