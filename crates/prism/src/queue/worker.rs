//! Lane workers: claim, run, then complete / retry / dead-letter.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use super::backoff::backoff_delay;
use super::job::{JobRecord, Lane, LaneSettings};
use super::store::JobStore;

/// Upper bound on how long an idle worker sleeps before re-checking.
const IDLE_POLL: Duration = Duration::from_secs(1);
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Why a job attempt failed.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub message: String,
    /// Permanent failures dead-letter without using the remaining attempts.
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Handle given to a running job for progress checkpoints.
pub struct JobContext {
    pub job: JobRecord,
    store: JobStore,
}

impl JobContext {
    pub fn new(job: JobRecord, store: JobStore) -> Self {
        Self { job, store }
    }

    pub fn is_final_attempt(&self) -> bool {
        self.job.is_final_attempt()
    }

    pub fn set_progress(&self, progress: u8) {
        if let Err(e) = self.store.set_progress(&self.job.id, progress, Utc::now()) {
            warn!("Could not record progress for job {}: {}", self.job.id, e);
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobFailure>;

    /// Called once after the job is dead-lettered.
    async fn on_exhausted(&self, _job: &JobRecord, _failure: &JobFailure) {}

    /// Called after a failed attempt that will be retried.
    async fn on_retry(&self, _job: &JobRecord, _failure: &JobFailure) {}
}

pub struct LaneWorker {
    lane: Lane,
    store: JobStore,
    settings: LaneSettings,
    handler: Arc<dyn JobHandler>,
    wakeup: Arc<Notify>,
}

impl LaneWorker {
    pub fn new(
        lane: Lane,
        store: JobStore,
        settings: LaneSettings,
        handler: Arc<dyn JobHandler>,
        wakeup: Arc<Notify>,
    ) -> Self {
        Self {
            lane,
            store,
            settings,
            handler,
            wakeup,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let span = info_span!("lane", lane = %self.lane);
        tokio::spawn(self.run(shutdown).instrument(span))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let this = Arc::new(self);
        info!("{} lane started with {} worker(s)", this.lane, concurrency);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match this.store.claim(this.lane, Utc::now()) {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&this);
                    tokio::spawn(async move {
                        worker.run_job(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    let sleep_for = this.idle_sleep();
                    tokio::select! {
                        _ = this.wakeup.notified() => {}
                        _ = tokio::time::sleep(sleep_for) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to claim {} job: {}", this.lane, e);
                    tokio::time::sleep(ERROR_PAUSE).await;
                }
            }
        }

        // Active jobs are never interrupted; wait for them to finish.
        let in_flight = u32::try_from(concurrency).unwrap_or(u32::MAX);
        if permits.acquire_many(in_flight).await.is_err() {
            warn!("{} lane closed before in-flight jobs finished", this.lane);
        }
        info!("{} lane stopped", this.lane);
    }

    fn idle_sleep(&self) -> Duration {
        match self.store.next_due_at(self.lane) {
            Ok(Some(due)) => (due - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_millis(10))
                .clamp(Duration::from_millis(10), IDLE_POLL),
            _ => IDLE_POLL,
        }
    }

    async fn run_job(&self, job: JobRecord) {
        let span = info_span!("job",
            id = %job.id,
            lane = %job.lane,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
        );
        let ctx = JobContext::new(job, self.store.clone());

        let outcome = AssertUnwindSafe(self.handler.handle(&ctx))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|_| Err(JobFailure::retryable("job handler panicked")));

        let job = &ctx.job;
        let now = Utc::now();
        let result = match outcome {
            Ok(()) => self.store.complete(&job.id, now).map(|_| {
                debug!("Job {} completed on attempt {}", job.id, job.attempts);
            }),
            Err(failure) if failure.retryable && !job.is_final_attempt() => {
                let delay = backoff_delay(job.attempts, self.settings.base_delay, self.settings.max_delay);
                let next = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.id,
                    job.attempts,
                    job.max_attempts,
                    delay,
                    failure.message
                );
                let stored = self.store.retry(&job.id, &failure.message, next, now);
                self.handler.on_retry(job, &failure).instrument(span.clone()).await;
                stored
            }
            Err(failure) => {
                error!(
                    "Job {} failed permanently after {} attempt(s): {}",
                    job.id,
                    job.attempts,
                    failure.message
                );
                let stored = self.store.dead_letter(&job.id, &failure.message, now);
                self.handler.on_exhausted(job, &failure).instrument(span.clone()).await;
                stored
            }
        };

        if let Err(e) = result {
            error!("Failed to record outcome of job {}: {}", job.id, e);
        }
    }
}
