use crate::broadcast::report_events::{ReportPhase, ReportTracker};
use crate::queue::JobContext;

/// Receives the pipeline's phase checkpoints.
pub trait ProgressReporter: Send + Sync {
    fn phase(&self, phase: ReportPhase, message: &str);
}

/// No-op reporter for synchronous runs and unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn phase(&self, _phase: ReportPhase, _message: &str) {}
}

/// Mirrors checkpoints into the job row and the live-update channel.
pub struct JobProgress<'a> {
    job: &'a JobContext,
    tracker: &'a ReportTracker,
}

impl<'a> JobProgress<'a> {
    pub fn new(job: &'a JobContext, tracker: &'a ReportTracker) -> Self {
        Self { job, tracker }
    }
}

impl ProgressReporter for JobProgress<'_> {
    fn phase(&self, phase: ReportPhase, message: &str) {
        let checkpoint = phase.checkpoint();
        if checkpoint > 0 {
            self.job.set_progress(checkpoint);
        }
        self.tracker.update_phase(phase, message);
    }
}
