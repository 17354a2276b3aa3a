//! Report repository. Status transitions are guarded so that terminal
//! rows (`completed`, `failed`) are never rewritten.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{get_optional_timestamp, get_parsed, get_timestamp, timestamp, Database, DatabaseError};
use crate::model::{Report, ReportStatus};

fn report_from_row(row: &Row<'_>) -> Result<Report, rusqlite::Error> {
    let size: i64 = row.get("size_bytes")?;
    Ok(Report {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        filename: row.get("filename")?,
        source: get_parsed(row, "source")?,
        sender: row.get("sender")?,
        file_type: row.get("file_type")?,
        size_bytes: size.max(0) as u64,
        status: get_parsed(row, "status")?,
        received_at: get_timestamp(row, "received_at")?,
        processing_started_at: get_optional_timestamp(row, "processing_started_at")?,
        processing_completed_at: get_optional_timestamp(row, "processing_completed_at")?,
        error_message: row.get("error_message")?,
        file_path: row.get("file_path")?,
    })
}

pub fn insert(db: &Database, report: &Report) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO reports (id, tenant_id, filename, source, sender, file_type, size_bytes,
             status, received_at, processing_started_at, processing_completed_at, error_message,
             file_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                report.id,
                report.tenant_id,
                report.filename,
                report.source.as_str(),
                report.sender,
                report.file_type,
                report.size_bytes as i64,
                report.status.as_str(),
                timestamp(report.received_at),
                report.processing_started_at.map(timestamp),
                report.processing_completed_at.map(timestamp),
                report.error_message,
                report.file_path,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Report>, DatabaseError> {
    db.with_conn(|conn| {
        let report = conn
            .query_row(
                "SELECT * FROM reports WHERE id = ?1",
                params![id],
                report_from_row,
            )
            .optional()?;
        Ok(report)
    })
}

/// The oldest `pending` or `processing` report whose source sits at
/// `file_path`.
pub fn find_open_by_path(db: &Database, file_path: &str) -> Result<Option<Report>, DatabaseError> {
    db.with_conn(|conn| {
        let report = conn
            .query_row(
                "SELECT * FROM reports
                 WHERE file_path = ?1 AND status IN ('pending', 'processing')
                 ORDER BY received_at LIMIT 1",
                params![file_path],
                report_from_row,
            )
            .optional()?;
        Ok(report)
    })
}

/// Moves a report into `processing`. Keeps the first start time across
/// retries. Returns `false` when the report is already terminal or missing.
pub fn mark_processing(db: &Database, id: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE reports SET status = 'processing',
             processing_started_at = COALESCE(processing_started_at, ?2)
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id, timestamp(at)],
        )?;
        Ok(changed > 0)
    })
}

pub fn mark_completed(db: &Database, id: &str, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE reports SET status = 'completed', processing_completed_at = ?2,
             error_message = NULL
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id, timestamp(at)],
        )?;
        Ok(changed > 0)
    })
}

pub fn mark_failed(
    db: &Database,
    id: &str,
    error: &str,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE reports SET status = 'failed', processing_completed_at = ?2,
             error_message = ?3
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id, timestamp(at), error],
        )?;
        Ok(changed > 0)
    })
}

/// Records the latest error while the report keeps `processing`.
pub fn record_attempt_error(db: &Database, id: &str, error: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE reports SET error_message = ?2
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id, error],
        )?;
        Ok(())
    })
}

pub fn update_file_path(db: &Database, id: &str, file_path: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE reports SET file_path = ?2 WHERE id = ?1",
            params![id, file_path],
        )?;
        Ok(())
    })
}

pub fn status(db: &Database, id: &str) -> Result<Option<ReportStatus>, DatabaseError> {
    db.with_conn(|conn| {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM reports WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| s.parse().ok()))
    })
}

/// Number of reports completed within `[from, to)`.
pub fn count_completed_between(
    db: &Database,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE status = 'completed'
             AND processing_completed_at >= ?1 AND processing_completed_at < ?2",
            params![timestamp(from), timestamp(to)],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
