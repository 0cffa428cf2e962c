//! Boundary to the container engine that backs every execution.

pub mod docker;
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use docker::DockerRuntime;
pub use mock::ScriptedRuntime;

/// Opaque reference to a container created by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host path exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn render(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

/// Everything the runtime needs to create a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Environment rendered as `NAME=value`.
    pub env: Vec<String>,
    pub args: Vec<String>,
    pub mounts: Vec<BindMount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStream::Stdout => f.write_str("stdout"),
            LogStream::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Receiving end of a container's log lines.
pub type LogSink = mpsc::UnboundedSender<LogLine>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContainerError {
    /// The container (or image) is unknown to the engine, usually because it
    /// was already removed.
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container engine unavailable: {0}")]
    Unavailable(String),
    #[error("container engine error: {0}")]
    Engine(String),
}

impl ContainerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }
}

/// Capability set the execution engine needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    /// Resolves with the exit status once the container terminates.
    async fn wait(&self, handle: &ContainerHandle) -> Result<i64, ContainerError>;

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, ContainerError>;

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    /// Forwards log lines into `sink` until the container's output ends.
    async fn stream_logs(&self, handle: &ContainerHandle, sink: LogSink)
        -> Result<(), ContainerError>;
}
