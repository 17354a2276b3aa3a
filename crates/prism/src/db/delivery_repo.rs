//! Records which recipient groups already received a notification, so a
//! retried notify job only re-sends to the groups that failed.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{timestamp, Database, DatabaseError};

pub fn is_delivered(db: &Database, key: &str, group: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM notification_deliveries
                 WHERE delivery_key = ?1 AND recipient_group = ?2",
                params![key, group],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    })
}

pub fn record_delivery(
    db: &Database,
    key: &str,
    group: &str,
    message_id: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO notification_deliveries
             (delivery_key, recipient_group, message_id, delivered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, group, message_id, timestamp(Utc::now())],
        )?;
        Ok(())
    })
}
