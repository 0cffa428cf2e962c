use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use runbox_protocol::job::Job;
use tracing::debug;

use crate::error::EngineError;

/// Checks the shape every stored job must have.
pub fn validate_definition(job: &Job) -> Result<(), EngineError> {
    if job.name.is_empty() {
        return Err(EngineError::InvalidArgument(
            "invalid job: name is required".into(),
        ));
    }

    if job.template.containers.is_empty() {
        return Err(EngineError::InvalidArgument(format!(
            "invalid job {}: template must have at least one container",
            job.name
        )));
    }

    validate_timeout(job)
}

/// Stored timeouts obey the same bounds as run-time overrides.
pub fn validate_timeout(job: &Job) -> Result<(), EngineError> {
    let timeout = job.template.timeout;
    if timeout.is_valid() {
        return Ok(());
    }

    Err(EngineError::InvalidArgument(format!(
        "invalid job {}: timeout {}s {}ns outside (0, 86400]s",
        job.name, timeout.seconds, timeout.nanos
    )))
}

/// In-memory store of job definitions keyed by name.
#[derive(Default, Clone)]
pub struct JobRegistry {
    inner: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Job> {
        debug!(job = name, "job.get");
        self.inner.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new job. Output-only fields of the input are reset.
    pub fn create(&self, job: Job) -> Result<Job, EngineError> {
        debug!(job = %job.name, "job.create");
        validate_definition(&job)?;

        let mut inner = self.inner.write();
        if inner.contains_key(&job.name) {
            return Err(EngineError::AlreadyExists(format!(
                "job {} already exists",
                job.name
            )));
        }

        let stored = Job {
            create_time: Some(Utc::now()),
            update_time: None,
            execution_count: 0,
            ..job
        };
        inner.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    /// Replaces a registered job, keeping its creation time and run counter.
    pub fn update(&self, job: Job) -> Result<Job, EngineError> {
        debug!(job = %job.name, "job.update");
        if job.name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "invalid job: name is required".into(),
            ));
        }
        validate_timeout(&job)?;

        let mut inner = self.inner.write();
        let existing = inner
            .get(&job.name)
            .ok_or_else(|| EngineError::NotFound(format!("unknown job {}", job.name)))?;

        let stored = Job {
            create_time: existing.create_time,
            update_time: Some(Utc::now()),
            execution_count: existing.execution_count,
            ..job
        };
        inner.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    /// Bumps the run counter of a job and returns the updated definition.
    pub fn record_run(&self, name: &str) -> Result<Job, EngineError> {
        let mut inner = self.inner.write();
        let job = inner
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("unknown job {}", name)))?;

        job.execution_count += 1;
        job.update_time = Some(Utc::now());
        Ok(job.clone())
    }

    /// Registers statically configured jobs. Stops at the first rejection.
    pub fn seed<I>(&self, jobs: I) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = Job>,
    {
        let mut count = 0;
        for job in jobs {
            self.create(job)?;
            count += 1;
        }
        Ok(count)
    }
}
