use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use runbox_core::CredentialsConfig;
use runbox_protocol::execution::{Execution, ExecutionState};
use runbox_protocol::job::{Container, Job, Timeout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::container::{BindMount, ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::error::EngineError;
use crate::overrides::merge_env;
use crate::registry::validate_timeout;
use crate::store::{ExecutionFilter, ExecutionStore};

/// Name given to the container backing `execution`.
///
/// Docker names must match `[a-zA-Z0-9][a-zA-Z0-9_.-]+`; every other
/// character of the execution name becomes `-`.
pub fn container_name(execution: &str) -> String {
    let sanitized: String = execution
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("runbox-{}", sanitized)
}

#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// Host credentials mounted read-only into every container.
    pub credentials: Option<CredentialsConfig>,
}

/// Containers of in-flight executions, keyed by execution name.
///
/// Every stop path takes the handle out of the index before acting on it, so
/// a container is only ever stopped by whoever removed its handle.
#[derive(Default, Clone)]
struct ContainerIndex {
    inner: Arc<RwLock<HashMap<String, ContainerHandle>>>,
}

impl ContainerIndex {
    fn insert(&self, execution: &str, handle: ContainerHandle) {
        self.inner.write().insert(execution.to_string(), handle);
    }

    fn take(&self, execution: &str) -> Option<ContainerHandle> {
        self.inner.write().remove(execution)
    }

    fn contains(&self, execution: &str) -> bool {
        self.inner.read().contains_key(execution)
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }

    fn drain(&self) -> Vec<(String, ContainerHandle)> {
        self.inner.write().drain().collect()
    }
}

/// An execution that was just started, plus its in-flight completion.
pub struct RunHandle {
    pub execution: Execution,
    pub completion: JoinHandle<ExecutionState>,
}

impl RunHandle {
    /// Waits for the run loop and returns the terminal state.
    pub async fn wait(self) -> Result<ExecutionState, EngineError> {
        self.completion
            .await
            .map_err(|err| EngineError::Internal(format!("run loop aborted: {}", err)))
    }
}

/// Drives executions from container creation to guaranteed cleanup.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: ExecutionStore,
    containers: ContainerIndex,
    runtime: Arc<dyn ContainerRuntime>,
    settings: Arc<EngineSettings>,
}

impl ExecutionEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: EngineSettings) -> Self {
        Self {
            store: ExecutionStore::new(),
            containers: ContainerIndex::default(),
            runtime,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    /// Whether the execution's container is still tracked as alive.
    pub fn has_container(&self, execution: &str) -> bool {
        self.containers.contains(execution)
    }

    pub fn running_containers(&self) -> usize {
        self.containers.len()
    }

    /// Checks that `job` can be turned into a container.
    pub fn validate(job: &Job) -> Result<(), EngineError> {
        if job.name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "invalid job for execution: name is required".into(),
            ));
        }

        match job.template.primary_container() {
            Some(container) if !container.image.is_empty() => {}
            _ => {
                return Err(EngineError::InvalidArgument(format!(
                    "invalid job {}: template must have at least one container with an image",
                    job.name
                )))
            }
        }

        validate_timeout(job)
    }

    /// Creates the execution and its container, then hands the rest of the
    /// lifecycle to a background task. `job` must already be resolved.
    pub async fn start(&self, job: &Job) -> Result<RunHandle, EngineError> {
        debug!(job = %job.name, "execution.create");
        Self::validate(job)?;

        let container = job
            .template
            .primary_container()
            .ok_or_else(|| EngineError::Internal("validated job lost its container".into()))?;

        let execution = self
            .store
            .create(&job.name, job.template.clone(), Utc::now());
        let spec = self.container_spec(&execution.name, container);
        debug!(execution = %execution.name, image = %spec.image, "creating container");

        let handle = match self.runtime.create(&spec).await {
            Ok(handle) => handle,
            Err(err) => {
                let now = Utc::now();
                self.store.update(&execution.name, |record| {
                    record.mark_outcome(false, now);
                    record.mark_completed(now);
                });
                error!(execution = %execution.name, job = %job.name, error = %err, "failed to create container");
                return Err(EngineError::Internal(format!(
                    "failed to create container for execution {}: {}",
                    execution.name, err
                )));
            }
        };

        self.containers.insert(&execution.name, handle.clone());
        info!(execution = %execution.name, job = %job.name, container = %handle, "execution created");

        let engine = self.clone();
        let name = execution.name.clone();
        let job_name = job.name.clone();
        let timeout = job.template.timeout;
        let completion =
            tokio::spawn(async move { engine.drive(name, job_name, handle, timeout).await });

        Ok(RunHandle {
            execution,
            completion,
        })
    }

    pub fn get(&self, name: &str) -> Result<Execution, EngineError> {
        debug!(execution = name, "execution.get");
        self.store
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("unknown execution {}", name)))
    }

    pub fn list(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        debug!(?filter, "execution.list");
        self.store.list(filter)
    }

    /// Marks an execution deleted and force-stops its container if it is
    /// still tracked. Does not wait for the run loop to finish.
    pub async fn delete(&self, name: &str) -> Result<Execution, EngineError> {
        debug!(execution = name, "execution.delete");
        self.store
            .update(name, |record| record.mark_deleted(Utc::now()))
            .ok_or_else(|| EngineError::NotFound(format!("unknown execution {}", name)))?;

        // The handle is only indexed while the run loop has not cleaned up.
        if let Some(handle) = self.containers.take(name) {
            info!(execution = name, container = %handle, "force-stopping container");
            self.stop_container(name, &handle).await;
        }

        self.get(name)
    }

    /// Force-stops every container still tracked. Run loops observe the exit
    /// and record their executions as failed.
    pub async fn shutdown(&self) {
        let remaining = self.containers.drain();
        if remaining.is_empty() {
            return;
        }

        info!(count = remaining.len(), "stopping in-flight containers");
        for (execution, handle) in remaining {
            self.stop_container(&execution, &handle).await;
        }
    }

    fn container_spec(&self, execution: &str, container: &Container) -> ContainerSpec {
        let env = merge_env(&container.env, &[])
            .iter()
            .map(|var| var.render())
            .collect();

        let mounts = self
            .settings
            .credentials
            .iter()
            .map(|credentials| BindMount {
                source: credentials.host_dir.display().to_string(),
                target: credentials.container_dir.clone(),
                read_only: true,
            })
            .collect();

        ContainerSpec {
            name: container_name(execution),
            image: container.image.clone(),
            env,
            args: container.args.clone(),
            mounts,
        }
    }

    async fn drive(
        self,
        name: String,
        job: String,
        handle: ContainerHandle,
        timeout: Timeout,
    ) -> ExecutionState {
        let outcome = AssertUnwindSafe(self.race(&name, &job, &handle, timeout))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(EngineError::Internal("execution run loop panicked".into())));

        let now = Utc::now();
        match &outcome {
            Ok(()) => {
                self.store
                    .update(&name, |record| record.mark_outcome(true, now));
                info!(execution = %name, job = %job, "execution completed successfully");
            }
            Err(err) => {
                self.store
                    .update(&name, |record| record.mark_outcome(false, now));
                error!(execution = %name, job = %job, kind = %err.kind(), error = %err, "execution failed");
            }
        }

        self.finish(&name).await
    }

    /// Starts the container and races its exit against the deadline.
    async fn race(
        &self,
        name: &str,
        job: &str,
        handle: &ContainerHandle,
        timeout: Timeout,
    ) -> Result<(), EngineError> {
        self.store
            .update(name, |record| record.mark_started(Utc::now()));

        self.runtime.start(handle).await.map_err(|err| {
            EngineError::Internal(format!(
                "failed to start container for execution {}: {}",
                name, err
            ))
        })?;
        self.forward_logs(name, handle);

        let deadline = timeout.as_duration();
        tokio::select! {
            status = self.runtime.wait(handle) => {
                let status = status.map_err(|err| {
                    EngineError::Internal(format!(
                        "failed to wait for execution {} of job {}: {}",
                        name, job, err
                    ))
                })?;

                if status != 0 {
                    return Err(EngineError::Internal(format!(
                        "failed to run execution {} for job {}, container exited with status {}",
                        name, job, status
                    )));
                }
                Ok(())
            }
            _ = tokio::time::sleep(deadline) => {
                self.store
                    .update(name, |record| record.mark_expired(Utc::now()));
                Err(EngineError::DeadlineExceeded(format!(
                    "execution {} timed out after {} ms",
                    name,
                    deadline.as_millis()
                )))
            }
        }
    }

    /// Cleanup shared by every exit path of the run loop.
    async fn finish(&self, name: &str) -> ExecutionState {
        self.store
            .update(name, |record| record.mark_completed(Utc::now()));

        if let Some(handle) = self.containers.take(name) {
            self.stop_container(name, &handle).await;
        }

        self.store
            .get(name)
            .map(|record| record.state())
            .unwrap_or(ExecutionState::Failed)
    }

    /// Kills the container if the runtime still reports it running, then
    /// removes it. Failures are logged and swallowed.
    async fn stop_container(&self, execution: &str, handle: &ContainerHandle) {
        match self.runtime.inspect(handle).await {
            Ok(status) if status.running => {
                if let Err(err) = self.runtime.kill(handle).await {
                    warn!(%execution, container = %handle, error = %err, "failed to kill container");
                }
            }
            Ok(status) => {
                debug!(%execution, container = %handle, exit_code = ?status.exit_code, "container already exited");
            }
            Err(err) if err.is_not_found() => {
                debug!(%execution, container = %handle, "container already gone");
                return;
            }
            Err(err) => {
                warn!(%execution, container = %handle, error = %err, "failed to inspect container");
            }
        }

        match self.runtime.remove(handle).await {
            Ok(()) => debug!(%execution, container = %handle, "container removed"),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(%execution, container = %handle, error = %err, "failed to remove container")
            }
        }
    }

    /// Best effort: log forwarding never affects the execution outcome.
    fn forward_logs(&self, execution: &str, handle: &ContainerHandle) {
        let (sink, mut lines) = mpsc::unbounded_channel();

        let runtime = self.runtime.clone();
        let handle = handle.clone();
        let source = execution.to_string();
        tokio::spawn(async move {
            if let Err(err) = runtime.stream_logs(&handle, sink).await {
                debug!(execution = %source, error = %err, "log stream ended with error");
            }
        });

        let execution = execution.to_string();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                info!(target: "runbox::container", %execution, stream = %line.stream, "{}", line.line);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::container::mock::{RuntimeCall, ScriptedRuntime};
    use runbox_protocol::job::{Container, TaskTemplate, Timeout};

    fn job(timeout: Timeout) -> Job {
        Job::new(
            "report",
            TaskTemplate::new(vec![Container::new("busybox")
                .with_env("A", "1")
                .with_args(["echo", "hi"])])
            .with_timeout(timeout),
        )
    }

    fn engine(runtime: Arc<ScriptedRuntime>) -> ExecutionEngine {
        ExecutionEngine::new(runtime, EngineSettings::default())
    }

    async fn until_started(engine: &ExecutionEngine, name: &str) {
        for _ in 0..100 {
            let started = engine
                .store()
                .get(name)
                .map(|record| record.start_time.is_some())
                .unwrap_or(false);
            if started {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("execution {} never started", name);
    }

    async fn until_logs_requested(runtime: &ScriptedRuntime) {
        for _ in 0..100 {
            if runtime
                .calls()
                .iter()
                .any(|call| matches!(call, RuntimeCall::Logs(_)))
            {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("log stream was never requested");
    }

    #[test]
    fn container_names_are_docker_safe() {
        assert_eq!(container_name("report-1700000000000"), "runbox-report-1700000000000");
        assert_eq!(
            container_name("projects/p/locations/l/jobs/x-17"),
            "runbox-projects-p-locations-l-jobs-x-17"
        );
        assert_eq!(container_name("my job_v1.2"), "runbox-my-job_v1.2");
        assert_eq!(container_name("émoji"), "runbox--moji");
    }

    #[tokio::test]
    async fn job_name_with_slashes_gets_sanitized_container_name() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(0));
        let engine = engine(runtime.clone());

        let job = Job::with_container("projects/p/jobs/x", Container::new("busybox"));
        let run = engine.start(&job).await.expect("start");
        let name = run.execution.name.clone();
        run.wait().await.expect("completion");

        let specs = runtime.created_specs();
        assert_eq!(specs[0].name, container_name(&name));
        assert!(!specs[0].name.contains('/'));
    }

    #[tokio::test]
    async fn out_of_range_timeout_is_rejected_before_creating_anything() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = engine(runtime.clone());

        for timeout in [Timeout::from_secs(i64::MAX), Timeout::from_secs(-1)] {
            let err = engine.start(&job(timeout)).await.err().expect("invalid timeout");
            assert!(matches!(err, EngineError::InvalidArgument(_)));
        }
        assert!(engine.store().is_empty());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn log_lines_do_not_change_the_outcome() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(0).with_log_lines(["starting", "done"]));
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Succeeded);
        until_logs_requested(&runtime).await;
    }

    #[tokio::test]
    async fn log_stream_failure_is_best_effort() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(0).with_failing_logs());
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Succeeded);
        until_logs_requested(&runtime).await;

        let record = engine.get(&name).expect("record");
        assert_eq!(record.succeeded_count, 1);
        assert_eq!(record.failed_count, 0);
    }

    #[tokio::test]
    async fn successful_run_cleans_up() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(0));
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        assert_eq!(run.execution.state(), ExecutionState::Created);

        let state = run.wait().await.expect("completion");
        assert_eq!(state, ExecutionState::Succeeded);

        let record = engine.get(&name).expect("record");
        assert_eq!(record.succeeded_count, 1);
        assert_eq!(record.failed_count, 0);
        assert_eq!(record.running_count, 0);
        assert!(record.completion_time.is_some());
        assert!(record.expire_time.is_none());
        assert!(!engine.has_container(&name));
        assert_eq!(runtime.kill_count(), 0);
        assert!(runtime.live_specs().is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_fails_execution() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(3));
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Failed);

        let record = engine.get(&name).expect("record");
        assert_eq!(record.failed_count, 1);
        assert_eq!(record.succeeded_count, 0);
        assert!(record.completion_time.is_some());
        assert_eq!(runtime.kill_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_and_kills_once() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = engine(runtime.clone());

        let run = engine
            .start(&job(Timeout::new(5, 500_000_000)))
            .await
            .expect("start");
        let name = run.execution.name.clone();
        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Expired);

        let record = engine.get(&name).expect("record");
        assert_eq!(record.failed_count, 1);
        assert_eq!(record.succeeded_count, 0);
        assert_eq!(record.running_count, 0);
        assert!(record.expire_time.is_some());
        assert!(record.completion_time.is_some());
        assert_eq!(runtime.kill_count(), 1);
        assert_eq!(runtime.remove_count(), 1);
        assert!(!engine.has_container(&name));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_before_deadline_cancels_timer() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = engine(runtime.clone());

        let run = engine
            .start(&job(Timeout::from_secs(60)))
            .await
            .expect("start");
        let name = run.execution.name.clone();
        until_started(&engine, &name).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(runtime.finish(&container_name(&name), 0));

        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Succeeded);
        assert!(engine.get(&name).expect("record").expire_time.is_none());
    }

    #[tokio::test]
    async fn delete_force_stops_without_double_kill() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        until_started(&engine, &name).await;

        let deleted = engine.delete(&name).await.expect("delete");
        assert!(deleted.delete_time.is_some());
        assert!(!engine.has_container(&name));

        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Failed);
        let record = engine.get(&name).expect("record");
        assert_eq!(record.running_count, 0);
        assert_eq!(record.failed_count, 1);
        assert_eq!(record.delete_time, deleted.delete_time);
        assert_eq!(runtime.kill_count(), 1);
        assert_eq!(runtime.remove_count(), 1);
    }

    #[tokio::test]
    async fn delete_of_completed_execution_only_stamps() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(0));
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        run.wait().await.expect("completion");

        let removes_before = runtime.remove_count();
        let deleted = engine.delete(&name).await.expect("delete");
        assert!(deleted.delete_time.is_some());
        assert_eq!(deleted.state(), ExecutionState::Succeeded);
        assert_eq!(runtime.remove_count(), removes_before);

        assert!(matches!(
            engine.delete("missing").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_job_without_image_before_creating_anything() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = engine(runtime.clone());

        let job = Job::with_container("broken", Container::default());
        let err = engine.start(&job).await.err().expect("invalid job");
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert!(engine.store().is_empty());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn create_failure_is_internal_and_recorded() {
        let runtime = Arc::new(ScriptedRuntime::failing_create());
        let engine = engine(runtime);

        let err = engine
            .start(&job(Timeout::default()))
            .await
            .err()
            .expect("create fails");
        assert!(matches!(err, EngineError::Internal(_)));

        let records = engine.list(&ExecutionFilter::All);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failed_count, 1);
        assert!(records[0].completion_time.is_some());
        assert_eq!(engine.running_containers(), 0);
    }

    #[tokio::test]
    async fn start_failure_still_cleans_up() {
        let runtime = Arc::new(ScriptedRuntime::failing_start());
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Failed);

        assert!(!engine.has_container(&name));
        assert_eq!(runtime.kill_count(), 0);
        assert_eq!(runtime.remove_count(), 1);
    }

    #[tokio::test]
    async fn container_spec_renders_env_args_and_credentials() {
        let runtime = Arc::new(ScriptedRuntime::exiting_with(0));
        let engine = ExecutionEngine::new(
            runtime.clone(),
            EngineSettings {
                credentials: Some(CredentialsConfig {
                    host_dir: PathBuf::from("/home/alex/.config/gcloud"),
                    container_dir: "/gcp/config".into(),
                }),
            },
        );

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        run.wait().await.expect("completion");

        let specs = runtime.created_specs();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.name, container_name(&name));
        assert_eq!(spec.image, "busybox");
        assert_eq!(spec.env, vec!["A=1".to_string()]);
        assert_eq!(spec.args, vec!["echo".to_string(), "hi".to_string()]);
        assert_eq!(
            spec.mounts.iter().map(BindMount::render).collect::<Vec<_>>(),
            vec!["/home/alex/.config/gcloud:/gcp/config:ro".to_string()]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_tracked_containers() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let engine = engine(runtime.clone());

        let run = engine.start(&job(Timeout::default())).await.expect("start");
        let name = run.execution.name.clone();
        until_started(&engine, &name).await;

        engine.shutdown().await;
        assert_eq!(run.wait().await.expect("completion"), ExecutionState::Failed);
        assert_eq!(runtime.kill_count(), 1);
        assert!(runtime
            .calls()
            .iter()
            .any(|call| matches!(call, RuntimeCall::Remove(_))));
    }
}
