mod operation;
mod overrides;
mod record;

pub use operation::Operation;
pub use overrides::{ContainerOverride, Overrides};
pub use record::{Execution, ExecutionState};
