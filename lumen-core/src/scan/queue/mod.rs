//! Generic job scheduler: a deduplicating FIFO backlog drained by a
//! resizable pool of workers, optionally refilled by a periodic trigger.

mod job;
mod scheduler;

pub use job::{Job, JobKey, JobProcessor, PeriodicTrigger, QueueSettings, SubmitOutcome};
pub use scheduler::{JobQueue, JobQueueBuilder};
