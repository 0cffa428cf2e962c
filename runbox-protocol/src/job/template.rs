use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Container;

/// Maximum run time for a single task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeout {
    pub seconds: i64,
    #[serde(default)]
    pub nanos: i32,
}

impl Timeout {
    pub const DEFAULT_SECONDS: i64 = 600;
    pub const MAX_SECONDS: i64 = 86_400;
    pub const MAX_NANOS: i32 = 999_999_999;

    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_secs(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    /// Whether the value is within `0 < seconds <= 86400` and
    /// `0 <= nanos <= 999_999_999`. Applies to stored templates and run-time
    /// overrides alike.
    pub fn is_valid(&self) -> bool {
        self.seconds > 0
            && self.seconds <= Self::MAX_SECONDS
            && (0..=Self::MAX_NANOS).contains(&self.nanos)
    }

    /// Total duration in whole milliseconds, keeping sub-second precision.
    /// Negative components count as zero.
    pub fn as_millis(&self) -> u64 {
        let seconds = self.seconds.max(0) as u64;
        let nanos = self.nanos.max(0) as u64;
        seconds
            .saturating_mul(1_000)
            .saturating_add(nanos / 1_000_000)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::from_secs(Self::DEFAULT_SECONDS)
    }
}

/// Task template of a job: what a single run executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskTemplate {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub timeout: Timeout,
}

impl TaskTemplate {
    pub fn new(containers: Vec<Container>) -> Self {
        Self {
            containers,
            timeout: Timeout::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// The only container that is actually run.
    pub fn primary_container(&self) -> Option<&Container> {
        self.containers.first()
    }
}
