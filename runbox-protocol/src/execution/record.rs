use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::TaskTemplate;

/// Lifecycle state derived from an execution's timestamps and counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created,
    Running,
    Succeeded,
    Failed,
    Expired,
}

/// One triggered run of a job.
///
/// The optional timestamps are set at most once; `update_time` moves on every
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub name: String,
    pub job: String,
    pub template: TaskTemplate,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub running_count: u32,
    #[serde(default)]
    pub succeeded_count: u32,
    #[serde(default)]
    pub failed_count: u32,
}

fn stamp_once(slot: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) {
    if slot.is_none() {
        *slot = Some(now);
    }
}

impl Execution {
    pub fn new(
        name: impl Into<String>,
        job: impl Into<String>,
        template: TaskTemplate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            job: job.into(),
            template,
            create_time: now,
            update_time: now,
            start_time: None,
            completion_time: None,
            expire_time: None,
            delete_time: None,
            running_count: 0,
            succeeded_count: 0,
            failed_count: 0,
        }
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        stamp_once(&mut self.start_time, now);
        self.running_count = 1;
        self.update_time = now;
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        stamp_once(&mut self.expire_time, now);
        self.update_time = now;
    }

    /// Records the outcome. Only the first outcome sticks so that exactly one
    /// of the succeeded/failed counters is ever set.
    pub fn mark_outcome(&mut self, succeeded: bool, now: DateTime<Utc>) {
        if self.succeeded_count == 0 && self.failed_count == 0 {
            if succeeded {
                self.succeeded_count = 1;
            } else {
                self.failed_count = 1;
            }
        }
        self.update_time = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.running_count = 0;
        stamp_once(&mut self.completion_time, now);
        self.update_time = now;
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        stamp_once(&mut self.delete_time, now);
        self.update_time = now;
    }

    pub fn state(&self) -> ExecutionState {
        if self.expire_time.is_some() {
            ExecutionState::Expired
        } else if self.succeeded_count > 0 {
            ExecutionState::Succeeded
        } else if self.failed_count > 0 {
            ExecutionState::Failed
        } else if self.start_time.is_some() {
            ExecutionState::Running
        } else {
            ExecutionState::Created
        }
    }
}
