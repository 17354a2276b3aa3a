//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use log::info;
use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_reports_table",
        sql: include_str!("sql/001_create_reports.sql"),
    },
    Migration {
        version: 2,
        description: "create_insights_table",
        sql: include_str!("sql/002_create_insights.sql"),
    },
    Migration {
        version: 3,
        description: "create_tasks_table",
        sql: include_str!("sql/003_create_tasks.sql"),
    },
    Migration {
        version: 4,
        description: "create_processing_logs_table",
        sql: include_str!("sql/004_create_processing_logs.sql"),
    },
    Migration {
        version: 5,
        description: "create_jobs_table",
        sql: include_str!("sql/005_create_jobs.sql"),
    },
    Migration {
        version: 6,
        description: "create_usage_stats_table",
        sql: include_str!("sql/006_create_usage_stats.sql"),
    },
    Migration {
        version: 7,
        description: "create_notification_deliveries_table",
        sql: include_str!("sql/007_create_notification_deliveries.sql"),
    },
    Migration {
        version: 8,
        description: "index_reports_file_path",
        sql: include_str!("sql/008_index_reports_file_path.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |r| r.get::<_, u32>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);

        for table in [
            "reports",
            "insights",
            "tasks",
            "processing_logs",
            "jobs",
            "usage_stats",
            "notification_deliveries",
        ] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_task_constraints_reject_out_of_range_hours() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO reports (id, tenant_id, filename, source, file_type, received_at, file_path)
             VALUES ('r1', 't', 'f.csv', 'watch', 'csv', '2026-01-01', '/tmp/f.csv')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO tasks (id, report_id, title, priority, assigned_role, due_date,
             estimated_hours, created_at)
             VALUES ('t1', 'r1', 'x', 3, 'cfo', '2026-01-02', 90, '2026-01-01')",
            [],
        );
        assert!(result.is_err());
    }
}
