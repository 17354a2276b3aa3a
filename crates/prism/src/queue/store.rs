//! Durable job rows in the `jobs` table.

use chrono::{DateTime, Duration, Utc};
use log::warn;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::job::{JobRecord, JobState, Lane};
use super::stats::LaneStats;
use crate::db::{get_optional_timestamp, get_parsed, get_timestamp, timestamp, Database, DatabaseError};
use crate::error::QueueError;

fn job_from_row(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let payload: String = row.get("payload")?;
    let attempts: i64 = row.get("attempts")?;
    let max_attempts: i64 = row.get("max_attempts")?;
    let progress: i64 = row.get("progress")?;
    Ok(JobRecord {
        id: row.get("id")?,
        lane: get_parsed(row, "lane")?,
        payload: serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        dedupe_key: row.get("dedupe_key")?,
        state: get_parsed(row, "state")?,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(1) as u32,
        progress: progress.clamp(0, 100) as u8,
        next_retry_at: get_timestamp(row, "next_retry_at")?,
        last_error: row.get("last_error")?,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
        completed_at: get_optional_timestamp(row, "completed_at")?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(String),
    /// A job with the same lane and dedupe key already exists.
    Duplicate(String),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => id,
        }
    }
}

#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a waiting job due immediately. Idempotent on
    /// `(lane, dedupe_key)`.
    pub fn enqueue<T: Serialize>(
        &self,
        lane: Lane,
        payload: &T,
        dedupe_key: Option<&str>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let payload = serde_json::to_string(payload).map_err(QueueError::Encode)?;
        let id = uuid::Uuid::new_v4().to_string();
        let at = timestamp(now);

        let outcome = self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO jobs (id, lane, payload, dedupe_key, state, attempts,
                 max_attempts, progress, next_retry_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'waiting', 0, ?5, 0, ?6, ?6, ?6)",
                params![id, lane.as_str(), payload, dedupe_key, max_attempts.max(1), at],
            )?;
            if inserted == 1 {
                return Ok(EnqueueOutcome::Enqueued(id.clone()));
            }
            let existing: String = conn.query_row(
                "SELECT id FROM jobs WHERE lane = ?1 AND dedupe_key = ?2",
                params![lane.as_str(), dedupe_key],
                |r| r.get(0),
            )?;
            Ok(EnqueueOutcome::Duplicate(existing))
        })?;
        Ok(outcome)
    }

    /// Atomically moves the oldest due waiting job of `lane` to `active`
    /// and counts the attempt.
    pub fn claim(&self, lane: Lane, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        let at = timestamp(now);
        let job = self.db.with_conn(|conn| {
            let job = conn
                .query_row(
                    "UPDATE jobs SET state = 'active', attempts = attempts + 1, updated_at = ?2
                     WHERE id = (
                         SELECT id FROM jobs
                         WHERE lane = ?1 AND state = 'waiting' AND next_retry_at <= ?2
                         ORDER BY next_retry_at, created_at
                         LIMIT 1
                     )
                     RETURNING *",
                    params![lane.as_str(), at],
                    job_from_row,
                )
                .optional()?;
            Ok(job)
        })?;
        Ok(job)
    }

    pub fn set_progress(&self, id: &str, progress: u8, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET progress = MAX(progress, ?2), updated_at = ?3
                 WHERE id = ?1 AND state = 'active'",
                params![id, progress.min(100), timestamp(now)],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// `false` when the job was not active (already finished elsewhere).
    pub fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let at = timestamp(now);
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET state = 'completed', progress = 100, last_error = NULL,
                 completed_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND state = 'active'",
                params![id, at],
            )?)
        })?;
        Ok(changed == 1)
    }

    /// Returns an active job to `waiting`, due at `next_retry_at`.
    pub fn retry(
        &self,
        id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET state = 'waiting', last_error = ?2, next_retry_at = ?3,
                 updated_at = ?4
                 WHERE id = ?1 AND state = 'active'",
                params![id, error, timestamp(next_retry_at), timestamp(now)],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Terminal failure.
    pub fn dead_letter(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        let at = timestamp(now);
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET state = 'failed', last_error = ?2, completed_at = ?3,
                 updated_at = ?3
                 WHERE id = ?1 AND state = 'active'",
                params![id, error, at],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    /// Returns jobs left `active` by a previous process to `waiting`. The
    /// interrupted attempt is not counted.
    pub fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let at = timestamp(now);
        let recovered = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs SET state = 'waiting', attempts = MAX(attempts - 1, 0),
                 next_retry_at = ?1, updated_at = ?1
                 WHERE state = 'active'",
                params![at],
            )?)
        })?;
        if recovered > 0 {
            warn!("Recovered {} interrupted job(s)", recovered);
        }
        Ok(recovered)
    }

    pub fn find(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let job = self.db.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], job_from_row)
                .optional()?)
        })?;
        Ok(job)
    }

    pub fn list(&self, lane: Lane, state: Option<JobState>) -> Result<Vec<JobRecord>, QueueError> {
        let jobs = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM jobs WHERE lane = ?1 AND (?2 IS NULL OR state = ?2)
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map(params![lane.as_str(), state.map(|s| s.as_str())], job_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(jobs)
    }

    /// Earliest `next_retry_at` among waiting jobs of the lane.
    pub fn next_due_at(&self, lane: Lane) -> Result<Option<DateTime<Utc>>, QueueError> {
        let raw: Option<String> = self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT MIN(next_retry_at) FROM jobs WHERE lane = ?1 AND state = 'waiting'",
                params![lane.as_str()],
                |r| r.get(0),
            )?)
        })?;
        raw.as_deref()
            .map(crate::db::parse_timestamp)
            .transpose()
            .map_err(|e| QueueError::Storage(DatabaseError::Sqlite(e)))
    }

    pub fn stats(&self, lane: Lane) -> Result<LaneStats, QueueError> {
        let stats = self.db.with_conn(|conn| {
            let mut stats = LaneStats::default();
            let mut stmt =
                conn.prepare("SELECT state, COUNT(*) FROM jobs WHERE lane = ?1 GROUP BY state")?;
            let mut rows = stmt.query(params![lane.as_str()])?;
            while let Some(row) = rows.next()? {
                let state: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let count = count.max(0) as u64;
                match state.parse::<JobState>() {
                    Ok(JobState::Waiting) => stats.waiting = count,
                    Ok(JobState::Active) => stats.active = count,
                    Ok(JobState::Completed) => stats.completed = count,
                    Ok(JobState::Failed) => stats.failed = count,
                    Err(e) => warn!("Ignoring job rows: {}", e),
                }
            }
            Ok(stats)
        })?;
        Ok(stats)
    }
}
