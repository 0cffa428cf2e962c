use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Container, TaskTemplate};

/// A named, reusable description of what to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub template: TaskTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
}

impl Job {
    pub fn new(name: impl Into<String>, template: TaskTemplate) -> Self {
        Self {
            name: name.into(),
            template,
            ..Self::default()
        }
    }

    /// Convenience constructor for the common single-container job.
    pub fn with_container(name: impl Into<String>, container: Container) -> Self {
        Self::new(name, TaskTemplate::new(vec![container]))
    }
}
