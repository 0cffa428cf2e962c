use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use runbox_protocol::execution::Execution;
use runbox_protocol::job::TaskTemplate;

/// Parent selector accepted by execution listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFilter {
    All,
    Job(String),
}

impl ExecutionFilter {
    pub const WILDCARD: &'static str = "-";

    pub fn parse(parent: &str) -> Self {
        if parent == Self::WILDCARD {
            ExecutionFilter::All
        } else {
            ExecutionFilter::Job(parent.to_string())
        }
    }
}

#[derive(Default)]
struct StoreInner {
    executions: HashMap<String, Execution>,
    names_by_job: HashMap<String, Vec<String>>,
}

/// In-memory index of executions by name and by owning job.
#[derive(Default, Clone)]
pub struct ExecutionStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and stores a new execution for `job`.
    ///
    /// The name is `<job>-<unix millis>`; when another run of the same job
    /// already took that instant the millis are bumped until the name is free.
    pub fn create(&self, job: &str, template: TaskTemplate, now: DateTime<Utc>) -> Execution {
        let mut inner = self.inner.write();

        let mut instant = now.timestamp_millis();
        let mut name = format!("{}-{}", job, instant);
        while inner.executions.contains_key(&name) {
            instant += 1;
            name = format!("{}-{}", job, instant);
        }

        let execution = Execution::new(name.clone(), job, template, now);
        inner.executions.insert(name.clone(), execution.clone());
        inner
            .names_by_job
            .entry(job.to_string())
            .or_default()
            .push(name);

        execution
    }

    pub fn get(&self, name: &str) -> Option<Execution> {
        self.inner.read().executions.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let inner = self.inner.read();
        match filter {
            ExecutionFilter::All => inner.executions.values().cloned().collect(),
            ExecutionFilter::Job(job) => inner
                .names_by_job
                .get(job)
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|name| inner.executions.get(name).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Applies `mutate` to the named execution under the write lock.
    pub fn update<F, R>(&self, name: &str, mutate: F) -> Option<R>
    where
        F: FnOnce(&mut Execution) -> R,
    {
        let mut inner = self.inner.write();
        inner.executions.get_mut(name).map(mutate)
    }
}
