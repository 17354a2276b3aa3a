//! Report progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of report processing. Each phase after `Queued` is a progress
/// checkpoint of the analyze job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportPhase {
    Queued,
    Extracting,
    Classifying,
    GeneratingInsights,
    Persisting,
    Notifying,
    Completed,
    Failed,
}

impl ReportPhase {
    /// Job progress reached once this phase is done.
    pub fn checkpoint(&self) -> u8 {
        match self {
            ReportPhase::Queued | ReportPhase::Failed => 0,
            ReportPhase::Extracting => 20,
            ReportPhase::Classifying => 40,
            ReportPhase::GeneratingInsights => 70,
            ReportPhase::Persisting => 90,
            ReportPhase::Notifying | ReportPhase::Completed => 100,
        }
    }
}

impl std::fmt::Display for ReportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportPhase::Queued => write!(f, "Queued"),
            ReportPhase::Extracting => write!(f, "Extracting"),
            ReportPhase::Classifying => write!(f, "Classifying"),
            ReportPhase::GeneratingInsights => write!(f, "Generating insights"),
            ReportPhase::Persisting => write!(f, "Persisting"),
            ReportPhase::Notifying => write!(f, "Notifying"),
            ReportPhase::Completed => write!(f, "Completed"),
            ReportPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatusUpdate {
    Processing,
    /// An attempt failed and will be retried.
    Retrying,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEvent {
    pub report_id: String,
    pub filename: String,
    pub phase: ReportPhase,
    pub status: ReportStatusUpdate,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportEvent {
    pub fn new(report_id: &str, filename: &str, phase: ReportPhase, message: &str) -> Self {
        let status = match phase {
            ReportPhase::Completed => ReportStatusUpdate::Completed,
            ReportPhase::Failed => ReportStatusUpdate::Failed,
            _ => ReportStatusUpdate::Processing,
        };
        Self {
            report_id: report_id.to_string(),
            filename: filename.to_string(),
            phase,
            status,
            progress: phase.checkpoint(),
            message: message.to_string(),
            timestamp: Utc::now(),
            task_count: None,
            error: None,
        }
    }

    pub fn completed(report_id: &str, filename: &str, task_count: usize, degraded: bool) -> Self {
        let message = if degraded {
            "Processing completed with degraded analysis"
        } else {
            "Processing completed successfully"
        };
        Self {
            task_count: Some(task_count),
            ..Self::new(report_id, filename, ReportPhase::Completed, message)
        }
    }

    /// `final_attempt` distinguishes a terminal failure from one that
    /// will be retried.
    pub fn failed(report_id: &str, filename: &str, error: &str, final_attempt: bool) -> Self {
        let mut event = Self::new(report_id, filename, ReportPhase::Failed, "Processing failed");
        event.error = Some(error.to_string());
        if !final_attempt {
            event.status = ReportStatusUpdate::Retrying;
            event.message = "Attempt failed, will retry".to_string();
        }
        event
    }
}

/// Broadcasts report events to any number of subscribers.
#[derive(Clone)]
pub struct ReportEventBroadcaster {
    sender: Arc<broadcast::Sender<ReportEvent>>,
}

impl ReportEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: ReportEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReportEvent> {
        self.sender.subscribe()
    }

    /// Tracker for one report. Sends nothing until a phase is reported.
    pub fn track(&self, report_id: &str, filename: &str) -> ReportTracker {
        ReportTracker {
            report_id: report_id.to_string(),
            filename: filename.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for ReportEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Sends events for a single report.
pub struct ReportTracker {
    report_id: String,
    filename: String,
    sender: Arc<broadcast::Sender<ReportEvent>>,
}

impl ReportTracker {
    pub fn update_phase(&self, phase: ReportPhase, message: &str) {
        let _ = self
            .sender
            .send(ReportEvent::new(&self.report_id, &self.filename, phase, message));
    }

    pub fn completed(&self, task_count: usize, degraded: bool) {
        let _ = self.sender.send(ReportEvent::completed(
            &self.report_id,
            &self.filename,
            task_count,
            degraded,
        ));
    }

    pub fn failed(&self, error: &str, final_attempt: bool) {
        let _ = self.sender.send(ReportEvent::failed(
            &self.report_id,
            &self.filename,
            error,
            final_attempt,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_increase() {
        let phases = [
            ReportPhase::Extracting,
            ReportPhase::Classifying,
            ReportPhase::GeneratingInsights,
            ReportPhase::Persisting,
            ReportPhase::Notifying,
        ];
        let values: Vec<u8> = phases.iter().map(|p| p.checkpoint()).collect();
        assert_eq!(values, vec![20, 40, 70, 90, 100]);
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = ReportEventBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.track("r-1", "rent_roll.xlsx");
        tracker.update_phase(ReportPhase::Classifying, "Classifying document");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.report_id, "r-1");
        assert_eq!(received.phase, ReportPhase::Classifying);
        assert_eq!(received.progress, 40);
        assert_eq!(received.status, ReportStatusUpdate::Processing);
    }

    #[test]
    fn test_completion_and_failures() {
        let broadcaster = ReportEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.track("r-2", "pl.csv");

        tracker.completed(3, false);
        let done = rx.try_recv().unwrap();
        assert_eq!(done.status, ReportStatusUpdate::Completed);
        assert_eq!(done.task_count, Some(3));
        assert_eq!(done.progress, 100);

        tracker.failed("disk full", false);
        let retrying = rx.try_recv().unwrap();
        assert_eq!(retrying.status, ReportStatusUpdate::Retrying);

        tracker.failed("disk full", true);
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.status, ReportStatusUpdate::Failed);
        assert_eq!(failed.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_send_without_subscribers() {
        ReportEventBroadcaster::new(1).send(ReportEvent::new("r", "f", ReportPhase::Queued, "q"));
    }
}
