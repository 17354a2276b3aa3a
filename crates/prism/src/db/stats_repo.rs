//! Usage metrics: per-day counters keyed by tenant and document type.

use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};

/// One finished report, successful or not.
#[derive(Debug, Clone)]
pub struct UsageSample<'a> {
    pub date: &'a str,
    pub tenant_id: &'a str,
    pub document_type: &'a str,
    pub succeeded: bool,
    pub duration_ms: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Folds one finished report into the daily counters.
///
/// In SQLite's `ON CONFLICT DO UPDATE`, column references on the right side
/// resolve to the pre-update values, so with old count N and old average A
/// the new average is `(A * N + value) / (N + 1)`.
pub fn record_usage(db: &Database, sample: &UsageSample<'_>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let success_val: i64 = if sample.succeeded { 1 } else { 0 };
        let failure_val: i64 = 1 - success_val;

        conn.execute(
            "INSERT INTO usage_stats (date, tenant_id, document_type, total_processed,
             total_succeeded, total_failed, avg_duration_ms, input_tokens, output_tokens)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(date, tenant_id, document_type) DO UPDATE SET
               total_processed = total_processed + 1,
               total_succeeded = total_succeeded + ?4,
               total_failed = total_failed + ?5,
               avg_duration_ms = (avg_duration_ms * total_processed + ?6) / (total_processed + 1),
               input_tokens = input_tokens + ?7,
               output_tokens = output_tokens + ?8",
            params![
                sample.date,
                sample.tenant_id,
                sample.document_type,
                success_val,
                failure_val,
                sample.duration_ms,
                sample.input_tokens,
                sample.output_tokens,
            ],
        )?;
        Ok(())
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTypeStat {
    pub document_type: String,
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
}

/// Aggregate usage for a date range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub documents_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    /// `succeeded / processed`, 0 when nothing was processed.
    pub success_rate: f64,
    pub avg_processing_ms: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub by_document_type: Vec<DocumentTypeStat>,
}

/// Returns an aggregate summary for `[from_date, to_date]` (inclusive,
/// `YYYY-MM-DD`), optionally restricted to one tenant.
pub fn summary(
    db: &Database,
    from_date: &str,
    to_date: &str,
    tenant_id: Option<&str>,
) -> Result<UsageSummary, DatabaseError> {
    db.with_conn(|conn| {
        let (processed, succeeded, failed, avg_ms, input_tokens, output_tokens): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = conn.query_row(
            "SELECT COALESCE(SUM(total_processed), 0), COALESCE(SUM(total_succeeded), 0),
             COALESCE(SUM(total_failed), 0),
             CASE WHEN SUM(total_processed) > 0
                  THEN SUM(avg_duration_ms * total_processed) / SUM(total_processed)
                  ELSE 0 END,
             COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0)
             FROM usage_stats
             WHERE date >= ?1 AND date <= ?2 AND (?3 IS NULL OR tenant_id = ?3)",
            params![from_date, to_date, tenant_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT document_type, SUM(total_processed), SUM(total_succeeded), SUM(total_failed)
             FROM usage_stats
             WHERE date >= ?1 AND date <= ?2 AND (?3 IS NULL OR tenant_id = ?3)
             GROUP BY document_type ORDER BY SUM(total_processed) DESC",
        )?;
        let by_document_type = stmt
            .query_map(params![from_date, to_date, tenant_id], |row| {
                Ok(DocumentTypeStat {
                    document_type: row.get(0)?,
                    total_processed: row.get(1)?,
                    total_succeeded: row.get(2)?,
                    total_failed: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let success_rate = if processed > 0 {
            succeeded as f64 / processed as f64
        } else {
            0.0
        };

        Ok(UsageSummary {
            documents_processed: processed,
            total_succeeded: succeeded,
            total_failed: failed,
            success_rate,
            avg_processing_ms: avg_ms,
            input_tokens,
            output_tokens,
            by_document_type,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>(date: &'a str, doc: &'a str, ok: bool, ms: i64) -> UsageSample<'a> {
        UsageSample {
            date,
            tenant_id: "acme",
            document_type: doc,
            succeeded: ok,
            duration_ms: ms,
            input_tokens: 100,
            output_tokens: 40,
        }
    }

    #[test]
    fn test_running_average_correctness() {
        let db = Database::open_in_memory().unwrap();
        record_usage(&db, &sample("2026-02-01", "financial", true, 100)).unwrap();
        record_usage(&db, &sample("2026-02-01", "financial", true, 200)).unwrap();
        record_usage(&db, &sample("2026-02-01", "financial", true, 300)).unwrap();

        let s = summary(&db, "2026-02-01", "2026-02-01", None).unwrap();
        assert_eq!(s.documents_processed, 3);
        assert_eq!(s.avg_processing_ms, 200);
        assert_eq!(s.input_tokens, 300);
        assert_eq!(s.output_tokens, 120);
    }

    #[test]
    fn test_summary_success_rate_and_breakdown() {
        let db = Database::open_in_memory().unwrap();
        record_usage(&db, &sample("2026-01-01", "financial", true, 1000)).unwrap();
        record_usage(&db, &sample("2026-01-01", "rent_roll", true, 2000)).unwrap();
        record_usage(&db, &sample("2026-01-02", "financial", false, 500)).unwrap();
        record_usage(&db, &sample("2026-01-02", "lease", true, 500)).unwrap();

        let s = summary(&db, "2026-01-01", "2026-01-02", Some("acme")).unwrap();
        assert_eq!(s.documents_processed, 4);
        assert_eq!(s.total_failed, 1);
        assert!((s.success_rate - 0.75).abs() < 1e-9);
        assert_eq!(s.by_document_type.len(), 3);
        assert_eq!(s.by_document_type[0].document_type, "financial");

        let other = summary(&db, "2026-01-01", "2026-01-02", Some("globex")).unwrap();
        assert_eq!(other.documents_processed, 0);
    }

    #[test]
    fn test_summary_empty() {
        let db = Database::open_in_memory().unwrap();
        let s = summary(&db, "2026-01-01", "2026-12-31", None).unwrap();
        assert_eq!(s.documents_processed, 0);
        assert_eq!(s.success_rate, 0.0);
        assert!(s.by_document_type.is_empty());
    }
}
