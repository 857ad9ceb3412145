//! Interval job scheduler owned by the process entry point.
//!
//! Jobs are plain data registered before [`Scheduler::start`]. Each job gets
//! its own task that waits one full interval, runs the target to completion,
//! and waits again; missed ticks are skipped, so a job never overlaps itself.
//! [`Scheduler::shutdown`] stops the timers and waits for in-flight runs.

use crate::error::SchedulerError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, instrument, warn};

pub type JobTarget = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct Job {
    pub id: String,
    pub interval: Duration,
    pub target: JobTarget,
}

impl Job {
    pub fn new<F, Fut>(id: impl Into<String>, interval: Duration, target: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: id.into(),
            interval,
            target: Arc::new(move || target().boxed()),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
    stop: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Job) -> Result<(), SchedulerError> {
        if self.stop.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        if job.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(job.id));
        }
        if self.jobs.iter().any(|j| j.id == job.id) {
            return Err(SchedulerError::DuplicateJob(job.id));
        }
        info!(job = %job.id, interval = ?job.interval, "Registered job");
        self.jobs.push(job);
        Ok(())
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|j| j.id.as_str())
    }

    /// Spawn one timer task per registered job.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.stop.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let (tx, rx) = watch::channel(false);
        self.tasks = self
            .jobs
            .iter()
            .cloned()
            .map(|job| tokio::spawn(run_job(job, rx.clone())))
            .collect();
        self.stop = Some(tx);
        info!(jobs = self.tasks.len(), "Scheduler started");
        Ok(())
    }

    /// Stop all timers and wait for any run in progress to finish.
    pub async fn shutdown(mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        let _ = stop.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "Job task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

#[instrument(level = "info", skip_all, fields(job = %job.id))]
async fn run_job(job: Job, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + job.interval, job.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // A dropped sender counts as a stop signal too.
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }

        let t0 = std::time::Instant::now();
        info!("Job starting");
        // Spawned so a panicking run is reported instead of ending the schedule.
        match tokio::spawn((job.target)()).await {
            Ok(()) => info!(elapsed_ms = t0.elapsed().as_millis(), "Job finished"),
            Err(e) => warn!(error = %e, "Job run panicked"),
        }
    }
}
