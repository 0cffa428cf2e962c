//! Runbox engine - job registry, run-time overrides and container-backed
//! execution lifecycle, exposed over HTTP.

pub mod api;
pub mod container;
pub mod engine;
pub mod error;
pub mod overrides;
pub mod registry;
pub mod runner;
pub mod seed;
pub mod service;
pub mod store;

pub use api::RunboxApiBuilder;
pub use container::{ContainerRuntime, DockerRuntime, ScriptedRuntime};
pub use engine::{EngineSettings, ExecutionEngine, RunHandle};
pub use error::{EngineError, SeedError};
pub use registry::JobRegistry;
pub use runner::JobRunner;
pub use seed::load_job_definitions;
pub use service::{RunService, UpdateOptions};
pub use store::{ExecutionFilter, ExecutionStore};
