use std::any::type_name_of_val;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::job::{
    Job, JobKey, JobProcessor, PeriodicTrigger, QueueSettings, SubmitOutcome, validate_interval,
    validate_worker_count,
};
use crate::error::{Result, ScanError};
use crate::scan::events::{ScanEvent, ScanEventPublisher};

struct QueueState<J> {
    backlog: VecDeque<J>,
    queued: HashSet<JobKey>,
    /// Running jobs and their descriptions.
    ongoing: HashMap<JobKey, String>,
    closed: bool,
}

impl<J> QueueState<J> {
    fn is_idle(&self) -> bool {
        self.backlog.is_empty() && self.ongoing.is_empty()
    }
}

/// An idle worker offering to take the next job.
struct WorkerSlot<J> {
    worker: usize,
    inbox: oneshot::Sender<J>,
}

struct WorkerHandle {
    id: usize,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct WorkerPool {
    active: Vec<WorkerHandle>,
    /// Stopped workers that may still be finishing a job.
    retired: Vec<JoinHandle<()>>,
}

struct Shared<J: Job> {
    state: Mutex<QueueState<J>>,
    backlog_changed: Notify,
    idle: Notify,
    processor: Arc<dyn JobProcessor<J>>,
    trigger: Option<Arc<dyn PeriodicTrigger<J>>>,
    events: Option<Arc<dyn ScanEventPublisher>>,
    ready_tx: mpsc::UnboundedSender<WorkerSlot<J>>,
    interval_tx: watch::Sender<Option<Duration>>,
    shutdown: CancellationToken,
    workers: Mutex<WorkerPool>,
    next_worker_id: AtomicUsize,
    trigger_running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Deduplicating job scheduler.
///
/// A single coordinator task hands backlog jobs, in FIFO order, to idle
/// workers. A key is either queued, running, or absent; submitting a key
/// that is already queued or running is a no-op for that job.
pub struct JobQueue<J: Job> {
    shared: Arc<Shared<J>>,
}

impl<J: Job> fmt::Debug for JobQueue<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (backlog, ongoing, closed) = self
            .shared
            .state
            .try_lock()
            .map(|state| (state.backlog.len(), state.ongoing.len(), state.closed))
            .unwrap_or_default();
        f.debug_struct("JobQueue")
            .field("processor", &type_name_of_val(self.shared.processor.as_ref()))
            .field("has_trigger", &self.shared.trigger.is_some())
            .field("workers", &self.worker_count())
            .field("interval", &self.interval())
            .field("backlog", &backlog)
            .field("ongoing", &ongoing)
            .field("closed", &closed)
            .finish()
    }
}

/// Configures and starts a [`JobQueue`].
pub struct JobQueueBuilder<J: Job> {
    processor: Arc<dyn JobProcessor<J>>,
    trigger: Option<Arc<dyn PeriodicTrigger<J>>>,
    events: Option<Arc<dyn ScanEventPublisher>>,
    settings: QueueSettings,
}

impl<J: Job> fmt::Debug for JobQueueBuilder<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueueBuilder")
            .field("processor", &type_name_of_val(self.processor.as_ref()))
            .field("has_trigger", &self.trigger.is_some())
            .field("has_events", &self.events.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<J: Job> JobQueueBuilder<J> {
    pub fn trigger(mut self, trigger: Arc<dyn PeriodicTrigger<J>>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Publish [`ScanEvent::JobFailed`] for failing jobs.
    pub fn events(mut self, events: Arc<dyn ScanEventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(mut self, settings: QueueSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Spawn the coordinator and the initial workers. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> Result<JobQueue<J>> {
        let workers = validate_worker_count(self.settings.workers)?;
        let interval = validate_interval(self.settings.interval)?;

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (interval_tx, interval_rx) = watch::channel(interval);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                backlog: VecDeque::new(),
                queued: HashSet::new(),
                ongoing: HashMap::new(),
                closed: false,
            }),
            backlog_changed: Notify::new(),
            idle: Notify::new(),
            processor: self.processor,
            trigger: self.trigger,
            events: self.events,
            ready_tx,
            interval_tx,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(WorkerPool::default()),
            next_worker_id: AtomicUsize::new(0),
            trigger_running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let coordinator = tokio::spawn(Arc::clone(&shared).coordinate(ready_rx, interval_rx));
        shared.tasks.lock().push(coordinator);

        let queue = JobQueue { shared };
        queue.resize(workers);
        info!(
            target: "scan::queue",
            workers,
            interval = ?interval,
            "job queue started"
        );
        Ok(queue)
    }
}

impl<J: Job> JobQueue<J> {
    pub fn builder(processor: Arc<dyn JobProcessor<J>>) -> JobQueueBuilder<J> {
        JobQueueBuilder {
            processor,
            trigger: None,
            events: None,
            settings: QueueSettings::default(),
        }
    }

    /// Append every job whose key is neither queued nor running.
    pub fn submit(&self, jobs: impl IntoIterator<Item = J>) -> Result<SubmitOutcome> {
        self.shared.submit(jobs)
    }

    /// Wait until the backlog is empty and no job is running.
    pub async fn consume_backlog(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let state = self.shared.state.lock();
                if state.is_idle() {
                    return Ok(());
                }
                if state.closed {
                    return Err(ScanError::ShuttingDown);
                }
            }
            tokio::select! {
                _ = &mut idle => {}
                _ = cancel.cancelled() => {
                    return Err(ScanError::Cancelled("waiting for the scan backlog".into()));
                }
            }
        }
    }

    /// Grow or shrink the worker pool. Stopped workers finish their
    /// current job first; `0` pauses processing.
    pub fn set_worker_count(&self, count: i32) -> Result<()> {
        let workers = validate_worker_count(count)?;
        if self.shared.state.lock().closed {
            return Err(ScanError::ShuttingDown);
        }
        self.resize(workers);
        info!(target: "scan::queue", workers, "worker count changed");
        Ok(())
    }

    /// Change the periodic trigger interval. Zero disables it; a positive
    /// interval first fires one full period after this call.
    pub fn set_interval(&self, interval: TimeDelta) -> Result<()> {
        let period = validate_interval(interval)?;
        if self.shared.state.lock().closed {
            return Err(ScanError::ShuttingDown);
        }
        self.shared.interval_tx.send_replace(period);
        info!(target: "scan::queue", interval = ?period, "scan interval changed");
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().active.len()
    }

    pub fn interval(&self) -> TimeDelta {
        self.shared
            .interval_tx
            .borrow()
            .and_then(|period| TimeDelta::from_std(period).ok())
            .unwrap_or_else(TimeDelta::zero)
    }

    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    /// Keys of the jobs currently running, ascending.
    pub fn ongoing_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.shared.state.lock().ongoing.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Stop the trigger and the coordinator, let running jobs finish, and
    /// return the jobs that were never dispatched.
    pub async fn close(&self) -> Vec<J> {
        self.shared.state.lock().closed = true;
        self.shared.shutdown.cancel();

        // The coordinator is first in the list; once it has exited nothing
        // moves between backlog and workers anymore.
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(target: "scan::queue", error = %err, "queue task failed during shutdown");
            }
        }

        let dropped: Vec<J> = {
            let mut state = self.shared.state.lock();
            state.queued.clear();
            state.backlog.drain(..).collect()
        };

        let workers: Vec<JoinHandle<()>> = {
            let mut pool = self.shared.workers.lock();
            let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut pool.retired);
            handles.extend(pool.active.drain(..).map(|worker| worker.task));
            handles
        };
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(target: "scan::queue", error = %err, "worker task failed during shutdown");
            }
        }

        self.shared.idle.notify_waiters();
        if !dropped.is_empty() {
            info!(
                target: "scan::queue",
                dropped = dropped.len(),
                "job queue closed with undispatched jobs"
            );
        } else {
            info!(target: "scan::queue", "job queue closed");
        }
        dropped
    }

    fn resize(&self, target: usize) {
        let mut pool = self.shared.workers.lock();
        while pool.active.len() < target {
            let id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
            let stop = self.shared.shutdown.child_token();
            let task = tokio::spawn(Arc::clone(&self.shared).work(id, stop.clone()));
            pool.active.push(WorkerHandle { id, stop, task });
        }
        while pool.active.len() > target {
            if let Some(worker) = pool.active.pop() {
                debug!(target: "scan::queue", worker = worker.id, "stopping worker");
                worker.stop.cancel();
                pool.retired.push(worker.task);
            }
        }
        pool.retired.retain(|task| !task.is_finished());
    }
}

impl<J: Job> Drop for JobQueue<J> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<J: Job> Shared<J> {
    fn submit(&self, jobs: impl IntoIterator<Item = J>) -> Result<SubmitOutcome> {
        let mut outcome = SubmitOutcome::default();
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ScanError::ShuttingDown);
            }
            for job in jobs {
                let key = job.key();
                if state.ongoing.contains_key(&key) || !state.queued.insert(key) {
                    trace!(target: "scan::queue", key, "job already queued or running");
                    outcome.merged += 1;
                    continue;
                }
                state.backlog.push_back(job);
                outcome.accepted += 1;
            }
        }
        if outcome.accepted > 0 {
            self.backlog_changed.notify_one();
        }
        debug!(
            target: "scan::queue",
            accepted = outcome.accepted,
            merged = outcome.merged,
            "jobs submitted"
        );
        Ok(outcome)
    }

    async fn coordinate(
        self: Arc<Self>,
        mut ready_rx: mpsc::UnboundedReceiver<WorkerSlot<J>>,
        mut interval_rx: watch::Receiver<Option<Duration>>,
    ) {
        let mut ticker = make_ticker(*interval_rx.borrow_and_update());
        loop {
            let has_backlog = !self.state.lock().backlog.is_empty();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(target: "scan::queue", "coordinator shutting down");
                    break;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ticker = make_ticker(*interval_rx.borrow_and_update());
                }
                _ = next_tick(&mut ticker) => self.fire_trigger(),
                Some(slot) = ready_rx.recv(), if has_backlog => self.dispatch(slot),
                _ = self.backlog_changed.notified() => {}
            }
        }
    }

    fn dispatch(&self, slot: WorkerSlot<J>) {
        let job = {
            let mut state = self.state.lock();
            let Some(job) = state.backlog.pop_front() else {
                // Dropping the slot makes the worker offer a fresh one.
                return;
            };
            let key = job.key();
            state.queued.remove(&key);
            state.ongoing.insert(key, job.description());
            job
        };
        let key = job.key();
        trace!(target: "scan::queue", key, worker = slot.worker, "dispatching job");
        if let Err(job) = slot.inbox.send(job) {
            // The worker stopped after offering the slot.
            let mut state = self.state.lock();
            state.ongoing.remove(&key);
            state.queued.insert(key);
            state.backlog.push_front(job);
        }
    }

    fn fire_trigger(self: &Arc<Self>) {
        let Some(trigger) = self.trigger.clone() else {
            return;
        };
        if self.trigger_running.swap(true, Ordering::AcqRel) {
            debug!(target: "scan::queue", "previous periodic run still active, skipping tick");
            return;
        }
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            debug!(target: "scan::queue", "periodic trigger fired");
            tokio::select! {
                _ = shared.shutdown.cancelled() => {}
                collected = trigger.collect() => match collected {
                    Ok(jobs) => {
                        if let Err(err) = shared.submit(jobs) {
                            warn!(target: "scan::queue", error = %err, "periodic submit rejected");
                        }
                    }
                    Err(err) => {
                        warn!(target: "scan::queue", error = %err, "periodic trigger failed");
                    }
                },
            }
            shared.trigger_running.store(false, Ordering::Release);
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    async fn work(self: Arc<Self>, id: usize, stop: CancellationToken) {
        trace!(target: "scan::queue", worker = id, "worker started");
        loop {
            if stop.is_cancelled() {
                break;
            }
            let (inbox, mut rx) = oneshot::channel();
            if self.ready_tx.send(WorkerSlot { worker: id, inbox }).is_err() {
                break;
            }
            tokio::select! {
                received = &mut rx => {
                    if let Ok(job) = received {
                        self.run(id, job).await;
                    }
                }
                _ = stop.cancelled() => {
                    // A job handed over at the same moment still runs.
                    rx.close();
                    if let Ok(job) = rx.try_recv() {
                        self.run(id, job).await;
                    }
                    break;
                }
            }
        }
        trace!(target: "scan::queue", worker = id, "worker stopped");
    }

    async fn run(&self, worker: usize, job: J) {
        let key = job.key();
        let description = job.description();
        debug!(target: "scan::queue", worker, key, job = %description, "job started");

        let outcome = AssertUnwindSafe(self.processor.process(job))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => {
                debug!(target: "scan::queue", worker, key, job = %description, "job finished");
                None
            }
            Ok(Err(err)) => {
                warn!(target: "scan::queue", worker, key, job = %description, error = %err, "job failed");
                Some(err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(target: "scan::queue", worker, key, job = %description, panic = %message, "job panicked");
                Some(format!("panicked: {message}"))
            }
        };

        if let (Some(error), Some(events)) = (failure, &self.events) {
            let event = ScanEvent::JobFailed {
                key,
                description,
                error,
            };
            if let Err(err) = events.publish(event).await {
                warn!(target: "scan::queue", error = %err, "failed to publish job failure");
            }
        }

        self.finish(key);
    }

    fn finish(&self, key: JobKey) {
        let idle = {
            let mut state = self.state.lock();
            state.ongoing.remove(&key);
            state.is_idle()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }
}

fn make_ticker(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    #[derive(Debug, Clone)]
    struct TestJob {
        key: JobKey,
        duration: Duration,
        behavior: Behavior,
    }

    impl TestJob {
        fn new(key: JobKey, millis: u64) -> Self {
            Self {
                key,
                duration: Duration::from_millis(millis),
                behavior: Behavior::Succeed,
            }
        }

        fn with(mut self, behavior: Behavior) -> Self {
            self.behavior = behavior;
            self
        }
    }

    impl Job for TestJob {
        fn key(&self) -> JobKey {
            self.key
        }

        fn description(&self) -> String {
            format!("test job {}", self.key)
        }
    }

    #[derive(Default)]
    struct Recorder {
        running: Mutex<HashMap<JobKey, usize>>,
        max_same_key: AtomicUsize,
        completed: Mutex<Vec<JobKey>>,
    }

    #[async_trait]
    impl JobProcessor<TestJob> for Recorder {
        async fn process(&self, job: TestJob) -> Result<()> {
            {
                let mut running = self.running.lock();
                let count = running.entry(job.key).or_default();
                *count += 1;
                self.max_same_key.fetch_max(*count, Ordering::SeqCst);
            }
            tokio::time::sleep(job.duration).await;
            {
                let mut running = self.running.lock();
                if let Some(count) = running.get_mut(&job.key) {
                    *count -= 1;
                }
            }
            self.completed.lock().push(job.key);
            match job.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(ScanError::Internal("boom".into())),
                Behavior::Panic => panic!("job {} exploded", job.key),
            }
        }
    }

    #[derive(Default)]
    struct CountingTrigger {
        runs: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl PeriodicTrigger<TestJob> for CountingTrigger {
        async fn collect(&self) -> Result<Vec<TestJob>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
    }

    fn start(recorder: &Arc<Recorder>, workers: i32) -> JobQueue<TestJob> {
        JobQueue::builder(Arc::clone(recorder) as Arc<dyn JobProcessor<TestJob>>)
            .settings(QueueSettings {
                workers,
                interval: TimeDelta::zero(),
            })
            .start()
            .expect("start queue")
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_is_never_in_flight_twice() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 4);

        queue.submit([TestJob::new(7, 100)]).expect("submit");
        while queue.ongoing_keys() != vec![7] {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for _ in 0..5 {
            let outcome = queue.submit([TestJob::new(7, 100)]).expect("submit");
            assert_eq!(outcome, SubmitOutcome { accepted: 0, merged: 1 });
        }
        assert_eq!(queue.backlog_len(), 0);

        queue
            .consume_backlog(&CancellationToken::new())
            .await
            .expect("drain");
        assert_eq!(recorder.max_same_key.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.completed.lock(), vec![7]);

        // Once finished the key can be queued again.
        let outcome = queue.submit([TestJob::new(7, 1)]).expect("submit");
        assert_eq!(outcome.accepted, 1);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_keys_in_one_batch_are_merged() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 0);
        let outcome = queue
            .submit([TestJob::new(1, 1), TestJob::new(2, 1), TestJob::new(1, 1)])
            .expect("submit");
        assert_eq!(outcome, SubmitOutcome { accepted: 2, merged: 1 });
        assert_eq!(queue.backlog_len(), 2);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_run_in_parallel_across_workers() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 3);
        let started = Instant::now();

        queue
            .submit([TestJob::new(1, 100), TestJob::new(2, 100), TestJob::new(3, 100)])
            .expect("submit");
        queue
            .consume_backlog(&CancellationToken::new())
            .await
            .expect("drain");

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");
        let mut completed = recorder.completed.lock().clone();
        completed.sort_unstable();
        assert_eq!(completed, vec![1, 2, 3]);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn single_worker_preserves_submission_order() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 1);
        queue
            .submit((1..=5).rev().map(|key| TestJob::new(key, 10)))
            .expect("submit");
        queue
            .consume_backlog(&CancellationToken::new())
            .await
            .expect("drain");
        assert_eq!(*recorder.completed.lock(), vec![5, 4, 3, 2, 1]);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rescaling_from_zero_loses_and_duplicates_nothing() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 0);
        queue
            .submit((1..=20).map(|key| TestJob::new(key, 30)))
            .expect("submit");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.backlog_len(), 20);
        assert!(recorder.completed.lock().is_empty());

        queue.set_worker_count(5).expect("grow");
        tokio::time::sleep(Duration::from_millis(40)).await;
        queue.set_worker_count(2).expect("shrink");
        queue.set_worker_count(5).expect("grow again");
        queue
            .consume_backlog(&CancellationToken::new())
            .await
            .expect("drain");

        let mut completed = recorder.completed.lock().clone();
        completed.sort_unstable();
        assert_eq!(completed, (1..=20).collect::<Vec<_>>());
        assert_eq!(queue.worker_count(), 5);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn negative_settings_are_rejected_and_leave_state_unchanged() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 2);
        queue.set_interval(TimeDelta::seconds(30)).expect("interval");

        assert!(matches!(
            queue.set_worker_count(-1),
            Err(ScanError::InvalidSetting(_))
        ));
        assert!(matches!(
            queue.set_interval(TimeDelta::seconds(-1)),
            Err(ScanError::InvalidSetting(_))
        ));
        assert_eq!(queue.worker_count(), 2);
        assert_eq!(queue.interval(), TimeDelta::seconds(30));
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_the_trigger_until_reenabled() {
        let recorder = Arc::new(Recorder::default());
        let trigger = Arc::new(CountingTrigger::default());
        let queue = JobQueue::builder(Arc::clone(&recorder) as Arc<dyn JobProcessor<TestJob>>)
            .trigger(Arc::clone(&trigger) as Arc<dyn PeriodicTrigger<TestJob>>)
            .settings(QueueSettings {
                workers: 1,
                interval: TimeDelta::seconds(10),
            })
            .start()
            .expect("start queue");

        queue.set_interval(TimeDelta::zero()).expect("disable");
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 0);

        queue.set_interval(TimeDelta::seconds(10)).expect("enable");
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 1);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_trigger_ticks_are_skipped() {
        let recorder = Arc::new(Recorder::default());
        let trigger = Arc::new(CountingTrigger {
            runs: AtomicUsize::new(0),
            delay: Duration::from_secs(25),
        });
        let queue = JobQueue::builder(Arc::clone(&recorder) as Arc<dyn JobProcessor<TestJob>>)
            .trigger(Arc::clone(&trigger) as Arc<dyn PeriodicTrigger<TestJob>>)
            .settings(QueueSettings {
                workers: 1,
                interval: TimeDelta::seconds(10),
            })
            .start()
            .expect("start queue");

        // Ticks at 10s (runs until 35s), 20s and 30s (skipped), 40s (runs).
        tokio::time::sleep(Duration::from_secs(39)).await;
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(trigger.runs.load(Ordering::SeqCst), 2);
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_and_panicking_jobs_do_not_stop_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 1);
        queue
            .submit([
                TestJob::new(1, 5).with(Behavior::Fail),
                TestJob::new(2, 5).with(Behavior::Panic),
                TestJob::new(3, 5),
            ])
            .expect("submit");
        queue
            .consume_backlog(&CancellationToken::new())
            .await
            .expect("drain");

        assert_eq!(*recorder.completed.lock(), vec![1, 2, 3]);
        assert!(queue.ongoing_keys().is_empty());
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn consume_backlog_honours_cancellation() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 0);
        queue.submit([TestJob::new(1, 1)]).expect("submit");

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        assert!(matches!(
            queue.consume_backlog(&cancel).await,
            Err(ScanError::Cancelled(_))
        ));
        queue.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_returns_undispatched_jobs_and_rejects_submissions() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 0);
        queue
            .submit([TestJob::new(1, 1), TestJob::new(2, 1), TestJob::new(3, 1)])
            .expect("submit");

        let dropped: Vec<JobKey> = queue.close().await.iter().map(|job| job.key).collect();
        assert_eq!(dropped, vec![1, 2, 3]);
        assert!(matches!(
            queue.submit([TestJob::new(4, 1)]),
            Err(ScanError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_running_jobs() {
        let recorder = Arc::new(Recorder::default());
        let queue = start(&recorder, 1);
        queue.submit([TestJob::new(1, 500)]).expect("submit");
        while queue.ongoing_keys().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let dropped = queue.close().await;
        assert!(dropped.is_empty());
        assert_eq!(*recorder.completed.lock(), vec![1]);
    }
}
