//! Append-only processing log.

use rusqlite::params;

use super::{get_parsed, get_timestamp, timestamp, Database, DatabaseError};
use crate::model::ProcessingLogEntry;

pub fn append(db: &Database, entry: &ProcessingLogEntry) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processing_logs (report_id, stage, status, message, duration_ms, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.report_id,
                entry.stage,
                entry.status.as_str(),
                entry.message,
                entry.duration_ms,
                timestamp(entry.timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Entries for a report in insertion order.
pub fn list_for_report(
    db: &Database,
    report_id: &str,
) -> Result<Vec<ProcessingLogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT report_id, stage, status, message, duration_ms, timestamp
             FROM processing_logs WHERE report_id = ?1 ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![report_id], |row| {
                Ok(ProcessingLogEntry {
                    report_id: row.get("report_id")?,
                    stage: row.get("stage")?,
                    status: get_parsed(row, "status")?,
                    message: row.get("message")?,
                    duration_ms: row.get("duration_ms")?,
                    timestamp: get_timestamp(row, "timestamp")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogStatus;

    #[test]
    fn test_append_preserves_order() {
        let db = Database::open_in_memory().unwrap();
        append(
            &db,
            &ProcessingLogEntry::new("r1", "extraction", LogStatus::Succeeded, "ok", Some(12)),
        )
        .unwrap();
        append(
            &db,
            &ProcessingLogEntry::new("r1", "classification", LogStatus::Degraded, "fallback", None),
        )
        .unwrap();
        append(
            &db,
            &ProcessingLogEntry::new("r2", "extraction", LogStatus::Failed, "gone", None),
        )
        .unwrap();

        let entries = list_for_report(&db, "r1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, "extraction");
        assert_eq!(entries[1].status, LogStatus::Degraded);
        assert_eq!(entries[0].duration_ms, Some(12));
    }
}
