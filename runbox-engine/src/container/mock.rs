//! Scripted in-memory runtime used by tests and local experiments.
//!
//! Containers never exit on their own unless the runtime was built with
//! [`ScriptedRuntime::exiting_with`] or a test calls [`ScriptedRuntime::finish`].
//! A kill terminates a running container with status 137.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    ContainerError, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, LogLine,
    LogSink, LogStream,
};

pub const KILLED_EXIT_CODE: i64 = 137;

/// Call recorded by the scripted runtime, by container id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create(String),
    Start(String),
    Wait(String),
    Inspect(String),
    Kill(String),
    Remove(String),
    Logs(String),
}

struct MockContainer {
    spec: ContainerSpec,
    running: bool,
    exit: watch::Sender<Option<i64>>,
}

#[derive(Default)]
struct Script {
    exit_on_start: Option<i64>,
    fail_create: bool,
    fail_start: bool,
    fail_logs: bool,
    log_lines: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedRuntime {
    containers: Mutex<HashMap<String, MockContainer>>,
    created: Mutex<Vec<ContainerSpec>>,
    calls: Mutex<Vec<RuntimeCall>>,
    next_id: AtomicU64,
    script: Script,
}

impl ScriptedRuntime {
    /// Containers run until killed or finished by the test.
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers exit with `code` as soon as they are started.
    pub fn exiting_with(code: i64) -> Self {
        Self {
            script: Script {
                exit_on_start: Some(code),
                ..Script::default()
            },
            ..Self::default()
        }
    }

    pub fn failing_create() -> Self {
        Self {
            script: Script {
                fail_create: true,
                ..Script::default()
            },
            ..Self::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            script: Script {
                fail_start: true,
                ..Script::default()
            },
            ..Self::default()
        }
    }

    /// Lines emitted on stdout by every container.
    pub fn with_log_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script.log_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Every log stream fails as soon as it is requested.
    pub fn with_failing_logs(mut self) -> Self {
        self.script.fail_logs = true;
        self
    }

    /// Terminates the container created under `container_name` with `code`.
    pub fn finish(&self, container_name: &str, code: i64) -> bool {
        let mut containers = self.containers.lock();
        match containers
            .values_mut()
            .find(|container| container.spec.name == container_name)
        {
            Some(container) => {
                container.running = false;
                container.exit.send_replace(Some(code));
                true
            }
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.count(|call| matches!(call, RuntimeCall::Kill(_)))
    }

    pub fn remove_count(&self) -> usize {
        self.count(|call| matches!(call, RuntimeCall::Remove(_)))
    }

    /// Specs of containers that were created and not yet removed.
    pub fn live_specs(&self) -> Vec<ContainerSpec> {
        self.containers
            .lock()
            .values()
            .map(|container| container.spec.clone())
            .collect()
    }

    /// Every spec handed to `create`, in call order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.created.lock().clone()
    }

    fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RuntimeCall) -> bool,
    {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().push(call);
    }

    fn not_found(handle: &ContainerHandle) -> ContainerError {
        ContainerError::NotFound(format!("no such container: {}", handle))
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        if self.script.fail_create {
            return Err(ContainerError::Engine(format!(
                "unable to create container from image {}",
                spec.image
            )));
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.record(RuntimeCall::Create(id.clone()));
        self.created.lock().push(spec.clone());

        let (exit, _) = watch::channel(None);
        self.containers.lock().insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                running: false,
                exit,
            },
        );

        Ok(ContainerHandle::new(id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.record(RuntimeCall::Start(handle.id().to_string()));
        if self.script.fail_start {
            return Err(ContainerError::Engine("container failed to start".into()));
        }

        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(handle.id())
            .ok_or_else(|| Self::not_found(handle))?;

        match self.script.exit_on_start {
            Some(code) => {
                container.running = false;
                container.exit.send_replace(Some(code));
            }
            None => container.running = true,
        }

        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64, ContainerError> {
        self.record(RuntimeCall::Wait(handle.id().to_string()));
        let mut exit = self
            .containers
            .lock()
            .get(handle.id())
            .map(|container| container.exit.subscribe())
            .ok_or_else(|| Self::not_found(handle))?;

        loop {
            if let Some(code) = *exit.borrow_and_update() {
                return Ok(code);
            }
            if exit.changed().await.is_err() {
                let code = *exit.borrow();
                return code.ok_or_else(|| Self::not_found(handle));
            }
        }
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, ContainerError> {
        self.record(RuntimeCall::Inspect(handle.id().to_string()));
        let containers = self.containers.lock();
        let container = containers
            .get(handle.id())
            .ok_or_else(|| Self::not_found(handle))?;

        let exit_code = *container.exit.borrow();
        Ok(ContainerStatus {
            running: container.running,
            exit_code,
        })
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.record(RuntimeCall::Kill(handle.id().to_string()));
        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(handle.id())
            .ok_or_else(|| Self::not_found(handle))?;

        if !container.running {
            return Err(ContainerError::Engine(format!(
                "container {} is not running",
                handle
            )));
        }

        container.running = false;
        container.exit.send_replace(Some(KILLED_EXIT_CODE));
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.record(RuntimeCall::Remove(handle.id().to_string()));
        self.containers
            .lock()
            .remove(handle.id())
            .map(|_| ())
            .ok_or_else(|| Self::not_found(handle))
    }

    async fn stream_logs(
        &self,
        handle: &ContainerHandle,
        sink: LogSink,
    ) -> Result<(), ContainerError> {
        self.record(RuntimeCall::Logs(handle.id().to_string()));
        if self.script.fail_logs {
            return Err(ContainerError::Engine(format!(
                "log stream for {} broke",
                handle
            )));
        }
        for line in &self.script.log_lines {
            if sink
                .send(LogLine {
                    stream: LogStream::Stdout,
                    line: line.clone(),
                })
                .is_err()
            {
                break;
            }
        }
        Ok(())
    }
}
