mod container;
mod definition;
mod template;

pub use container::{Container, EnvVar};
pub use definition::Job;
pub use template::{TaskTemplate, Timeout};
