use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};

use crate::broadcast::report_events::{ReportEventBroadcaster, ReportTracker};
use crate::db::report_repo;
use crate::queue::{JobContext, JobFailure, JobHandler, JobRecord};

use super::context::AnalyzeJob;
use super::progress::JobProgress;
use super::runner::Pipeline;

/// Runs analyze-lane jobs through the [`Pipeline`].
pub struct AnalyzeHandler {
    pipeline: Arc<Pipeline>,
    events: ReportEventBroadcaster,
}

impl AnalyzeHandler {
    pub fn new(pipeline: Arc<Pipeline>, events: ReportEventBroadcaster) -> Self {
        Self { pipeline, events }
    }

    fn tracker_for(&self, report_id: &str) -> Option<ReportTracker> {
        match report_repo::find_by_id(self.pipeline.database(), report_id) {
            Ok(Some(report)) => Some(self.events.track(&report.id, &report.filename)),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not load report {} for events: {}", report_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl JobHandler for AnalyzeHandler {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobFailure> {
        let job: AnalyzeJob = ctx
            .job
            .payload_as()
            .map_err(|e| JobFailure::permanent(e.to_string()))?;

        let report = match report_repo::find_by_id(self.pipeline.database(), &job.report_id) {
            Ok(Some(report)) => report,
            Ok(None) => {
                return Err(JobFailure::permanent(format!(
                    "report {} not found",
                    job.report_id
                )))
            }
            Err(e) => return Err(JobFailure::retryable(e.to_string())),
        };

        let tracker = self.events.track(&report.id, &report.filename);
        let progress = JobProgress::new(ctx, &tracker);

        match self.pipeline.run(&report, &progress).await {
            Ok(Some(analysis)) => {
                tracker.completed(analysis.tasks.len(), analysis.is_degraded());
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                let message = e.to_string();
                if e.is_transient() {
                    Err(JobFailure::retryable(message))
                } else {
                    Err(JobFailure::permanent(message))
                }
            }
        }
    }

    async fn on_retry(&self, job: &JobRecord, failure: &JobFailure) {
        let Ok(payload) = job.payload_as::<AnalyzeJob>() else {
            return;
        };
        self.pipeline
            .record_attempt_failure(&payload.report_id, &failure.message, job.attempts);
        if let Some(tracker) = self.tracker_for(&payload.report_id) {
            tracker.failed(&failure.message, false);
        }
    }

    async fn on_exhausted(&self, job: &JobRecord, failure: &JobFailure) {
        let payload = match job.payload_as::<AnalyzeJob>() {
            Ok(p) => p,
            Err(e) => {
                error!("Dead-lettered job {} has an unreadable payload: {}", job.id, e);
                return;
            }
        };

        match self
            .pipeline
            .fail_report(&payload.report_id, &failure.message, job.attempts)
        {
            Ok(Some(report)) => {
                self.events
                    .track(&report.id, &report.filename)
                    .failed(&failure.message, true);
            }
            Ok(None) => {}
            Err(e) => error!(
                "Could not mark report {} as failed: {}",
                payload.report_id,
                e
            ),
        }
    }
}
