//! Turns files found on disk into queued reports.

use std::path::Path;

use log::{debug, info};

use crate::broadcast::{ReportEvent, ReportEventBroadcaster, ReportPhase};
use crate::db::{report_repo, Database};
use crate::error::PrismError;
use crate::model::{Report, ReportSource};
use crate::pipeline::AnalyzeJob;
use crate::queue::{EnqueueOutcome, JobQueue, Lane};
use crate::sanitize::redact_path;

/// Files are analysed where they lie; archival later moves them into the
/// folder's `archive/` or `errors/` subdirectory.
#[derive(Clone)]
pub struct FolderIntake {
    db: Database,
    queue: JobQueue,
    events: ReportEventBroadcaster,
    tenant: String,
}

impl FolderIntake {
    pub fn new(db: Database, queue: JobQueue, events: ReportEventBroadcaster, tenant: impl Into<String>) -> Self {
        Self {
            db,
            queue,
            events,
            tenant: tenant.into(),
        }
    }

    /// Creates a report for `path` and queues its analysis. A path that
    /// already has a pending or processing report, e.g. one queued before a
    /// restart, gets that report back instead of a second one.
    pub fn submit(&self, path: &Path, source: ReportSource) -> Result<Report, PrismError> {
        if let Some(open) = report_repo::find_open_by_path(&self.db, &path.to_string_lossy())? {
            debug!("{} is already queued as report {}", redact_path(path), open.id);
            let job = AnalyzeJob::new(&open.id);
            self.queue.enqueue(Lane::Analyze, &job, Some(&job.dedupe_key()))?;
            return Ok(open);
        }

        let report = self.register(path, source)?;
        let job = AnalyzeJob::new(&report.id);
        if let EnqueueOutcome::Enqueued(job_id) =
            self.queue.enqueue(Lane::Analyze, &job, Some(&job.dedupe_key()))?
        {
            info!("Queued {} as report {} (job {})", redact_path(path), report.id, job_id);
        }
        self.events.send(ReportEvent::new(
            &report.id,
            &report.filename,
            ReportPhase::Queued,
            "Picked up from folder",
        ));
        Ok(report)
    }

    /// Creates the report row without queueing it.
    pub fn register(&self, path: &Path, source: ReportSource) -> Result<Report, PrismError> {
        let metadata = std::fs::metadata(path).map_err(|e| crate::error::ExtractError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        let report = Report::new(
            self.tenant.as_str(),
            filename,
            source,
            None,
            metadata.len(),
            path.to_string_lossy().into_owned(),
        );
        report_repo::insert(&self.db, &report)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::model::ReportStatus;
    use crate::queue::JobState;
    use tempfile::TempDir;

    #[test]
    fn test_submit_queues_watch_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rent_roll.csv");
        std::fs::write(&path, "Unit,Status\n101,Occupied\n").unwrap();
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(db.clone(), &QueueConfig::default());
        let intake = FolderIntake::new(db.clone(), queue.clone(), ReportEventBroadcaster::new(4), "default");

        let report = intake.submit(&path, ReportSource::Watch).unwrap();

        let stored = report_repo::find_by_id(&db, &report.id).unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Pending);
        assert_eq!(stored.source, ReportSource::Watch);
        assert_eq!(stored.size_bytes, 25);
        assert_eq!(stored.file_type, "csv");
        let jobs = queue.store().list(Lane::Analyze, Some(JobState::Waiting)).unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn test_resubmitting_an_open_report_reuses_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gl_detail.csv");
        std::fs::write(&path, "GL Account,Amount\n4000,10\n").unwrap();
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(db.clone(), &QueueConfig::default());
        // Two intakes over one database, as after a restart.
        let before = FolderIntake::new(db.clone(), queue.clone(), ReportEventBroadcaster::new(4), "default");
        let after = FolderIntake::new(db.clone(), queue.clone(), ReportEventBroadcaster::new(4), "default");

        let first = before.submit(&path, ReportSource::Watch).unwrap();
        let second = after.submit(&path, ReportSource::Watch).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(queue.store().list(Lane::Analyze, None).unwrap().len(), 1);

        report_repo::mark_completed(&db, &first.id, chrono::Utc::now()).unwrap();
        let third = after.submit(&path, ReportSource::Watch).unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(queue.store().list(Lane::Analyze, None).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(db.clone(), &QueueConfig::default());
        let intake = FolderIntake::new(db, queue, ReportEventBroadcaster::new(4), "default");
        assert!(intake.submit(Path::new("/nonexistent/x.csv"), ReportSource::Watch).is_err());
    }
}
