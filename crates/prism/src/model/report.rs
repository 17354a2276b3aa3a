use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a report entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Email,
    Upload,
    Watch,
}

impl ReportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSource::Email => "email",
            ReportSource::Upload => "upload",
            ReportSource::Watch => "watch",
        }
    }
}

impl FromStr for ReportSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ReportSource::Email),
            "upload" => Ok(ReportSource::Upload),
            "watch" => Ok(ReportSource::Watch),
            other => Err(format!("unknown report source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Failed)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "processing" => Ok(ReportStatus::Processing),
            "completed" => Ok(ReportStatus::Completed),
            "failed" => Ok(ReportStatus::Failed),
            other => Err(format!("unknown report status '{}'", other)),
        }
    }
}

/// A document received for analysis.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub tenant_id: String,
    pub filename: String,
    pub source: ReportSource,
    pub sender: Option<String>,
    /// Extension-derived file type (`csv`, `xlsx`, `pdf`, ...).
    pub file_type: String,
    pub size_bytes: u64,
    pub status: ReportStatus,
    pub received_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Current location of the source bytes.
    pub file_path: String,
}

impl Report {
    pub fn new(
        tenant_id: impl Into<String>,
        filename: impl Into<String>,
        source: ReportSource,
        sender: Option<String>,
        size_bytes: u64,
        file_path: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let file_type = std::path::Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            filename,
            source,
            sender,
            file_type,
            size_bytes,
            status: ReportStatus::Pending,
            received_at: Utc::now(),
            processing_started_at: None,
            processing_completed_at: None,
            error_message: None,
            file_path: file_path.into(),
        }
    }
}

/// Outcome recorded for a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Succeeded,
    Degraded,
    Retrying,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Succeeded => "succeeded",
            LogStatus::Degraded => "degraded",
            LogStatus::Retrying => "retrying",
            LogStatus::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(LogStatus::Succeeded),
            "degraded" => Ok(LogStatus::Degraded),
            "retrying" => Ok(LogStatus::Retrying),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status '{}'", other)),
        }
    }
}

/// Append-only processing log line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLogEntry {
    pub report_id: String,
    pub stage: String,
    pub status: LogStatus,
    pub message: String,
    pub duration_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn new(
        report_id: &str,
        stage: &str,
        status: LogStatus,
        message: impl Into<String>,
        duration_ms: Option<i64>,
    ) -> Self {
        Self {
            report_id: report_id.to_string(),
            stage: stage.to_string(),
            status,
            message: message.into(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_pending_with_lowercase_type() {
        let report = Report::new("acme", "Rent Roll.XLSX", ReportSource::Watch, None, 10, "/in/x");
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.file_type, "xlsx");
        assert!(!report.id.is_empty());
    }

    #[test]
    fn test_report_without_extension() {
        let report = Report::new("acme", "README", ReportSource::Upload, None, 0, "/in/README");
        assert_eq!(report.file_type, "unknown");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ReportStatus::Completed.is_terminal());
        assert!(ReportStatus::Failed.is_terminal());
        assert!(!ReportStatus::Processing.is_terminal());
        assert!(!ReportStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Processing,
            ReportStatus::Completed,
            ReportStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ReportStatus>(), Ok(status));
        }
    }
}
