pub mod execution;
pub mod job;

pub mod prelude {
    pub use crate::execution::{ContainerOverride, Execution, ExecutionState, Operation, Overrides};
    pub use crate::job::{Container, EnvVar, Job, TaskTemplate, Timeout};
}
