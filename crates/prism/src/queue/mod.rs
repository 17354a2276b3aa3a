//! Durable two-lane job queue.
//!
//! Jobs live in SQLite so they survive restarts. Each lane has its own
//! attempt cap, exponential backoff and worker concurrency. Exhausted jobs
//! are dead-lettered (`failed`) and handed to [`JobHandler::on_exhausted`].

pub mod backoff;
pub mod job;
pub mod stats;
pub mod store;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::db::Database;
use crate::error::QueueError;

pub use backoff::backoff_delay;
pub use job::{JobRecord, JobState, Lane, LaneSettings};
pub use stats::{LaneStats, QueueStats};
pub use store::{EnqueueOutcome, JobStore};
pub use worker::{JobContext, JobFailure, JobHandler, LaneWorker};

#[derive(Clone)]
pub struct JobQueue {
    store: JobStore,
    settings: HashMap<Lane, LaneSettings>,
    wakeups: HashMap<Lane, Arc<Notify>>,
}

impl JobQueue {
    pub fn new(db: Database, config: &QueueConfig) -> Self {
        let settings = HashMap::from([
            (Lane::Analyze, LaneSettings::from_config(Lane::Analyze, &config.analyze)),
            (Lane::Notify, LaneSettings::from_config(Lane::Notify, &config.notify)),
        ]);
        Self::with_settings(db, settings)
    }

    pub fn with_settings(db: Database, settings: HashMap<Lane, LaneSettings>) -> Self {
        let wakeups = Lane::ALL
            .iter()
            .map(|lane| (*lane, Arc::new(Notify::new())))
            .collect();
        Self {
            store: JobStore::new(db),
            settings,
            wakeups,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn settings(&self, lane: Lane) -> LaneSettings {
        self.settings
            .get(&lane)
            .copied()
            .unwrap_or_else(|| LaneSettings::defaults(lane))
    }

    fn wakeup(&self, lane: Lane) -> Arc<Notify> {
        self.wakeups
            .get(&lane)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    /// Adds a job and wakes the lane. A repeated `dedupe_key` returns the
    /// existing job instead.
    pub fn enqueue<T: Serialize>(
        &self,
        lane: Lane,
        payload: &T,
        dedupe_key: Option<&str>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let outcome = self.store.enqueue(
            lane,
            payload,
            dedupe_key,
            self.settings(lane).max_attempts,
            Utc::now(),
        )?;
        match &outcome {
            EnqueueOutcome::Enqueued(id) => {
                debug!("Enqueued {} job {}", lane, id);
                self.wakeup(lane).notify_one();
            }
            EnqueueOutcome::Duplicate(id) => {
                debug!("{} job for key {:?} already exists: {}", lane, dedupe_key, id);
            }
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            analyze: self.store.stats(Lane::Analyze)?,
            notify: self.store.stats(Lane::Notify)?,
        })
    }

    /// Recovers interrupted jobs and spawns one worker loop per lane.
    pub fn start(
        &self,
        analyze: Arc<dyn JobHandler>,
        notify: Arc<dyn JobHandler>,
    ) -> Result<QueueRunner, QueueError> {
        self.store.recover_interrupted(Utc::now())?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = [(Lane::Analyze, analyze), (Lane::Notify, notify)]
            .into_iter()
            .map(|(lane, handler)| {
                LaneWorker::new(
                    lane,
                    self.store.clone(),
                    self.settings(lane),
                    handler,
                    self.wakeup(lane),
                )
                .spawn(shutdown_rx.clone())
            })
            .collect();

        Ok(QueueRunner {
            shutdown: shutdown_tx,
            handles,
        })
    }

    /// Waits until no job is waiting or active, or the timeout passes.
    /// Returns whether the queue drained.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<bool, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.stats()?.is_idle() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Running lane workers. Dropping it also stops them once their active
/// jobs finish, but only [`QueueRunner::shutdown`] waits for that.
pub struct QueueRunner {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl QueueRunner {
    /// Stops claiming new jobs and waits for active ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Lane worker ended abnormally: {}", e);
            }
        }
    }
}
