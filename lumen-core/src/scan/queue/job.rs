use async_trait::async_trait;
use chrono::TimeDelta;

use crate::error::{Result, ScanError};

/// Deduplication key of a job. Two jobs with the same key never run at
/// the same time and never sit in the backlog together.
pub type JobKey = i64;

/// A unit of scheduled work.
pub trait Job: Send + Sync + 'static {
    fn key(&self) -> JobKey;

    /// Human readable label used in logs and failure events.
    fn description(&self) -> String;
}

/// Executes jobs handed out by a [`JobQueue`](super::JobQueue).
#[async_trait]
pub trait JobProcessor<J: Job>: Send + Sync + 'static {
    async fn process(&self, job: J) -> Result<()>;
}

/// Produces the job set submitted on every periodic tick.
#[async_trait]
pub trait PeriodicTrigger<J: Job>: Send + Sync + 'static {
    async fn collect(&self) -> Result<Vec<J>>;
}

/// What [`JobQueue::submit`](super::JobQueue::submit) did with a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Jobs appended to the backlog
    pub accepted: usize,
    /// Jobs dropped because their key was already queued or running
    pub merged: usize,
}

/// Worker count and trigger interval a queue starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub workers: i32,
    /// Zero disables the periodic trigger.
    pub interval: TimeDelta,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            interval: TimeDelta::zero(),
        }
    }
}

pub(crate) fn validate_worker_count(count: i32) -> Result<usize> {
    usize::try_from(count).map_err(|_| {
        ScanError::InvalidSetting(format!("worker count must not be negative, got {count}"))
    })
}

pub(crate) fn validate_interval(interval: TimeDelta) -> Result<Option<std::time::Duration>> {
    if interval < TimeDelta::zero() {
        return Err(ScanError::InvalidSetting(format!(
            "scan interval must not be negative, got {interval}"
        )));
    }
    if interval.is_zero() {
        return Ok(None);
    }
    interval
        .to_std()
        .map(Some)
        .map_err(|err| ScanError::InvalidSetting(format!("scan interval {interval}: {err}")))
}
