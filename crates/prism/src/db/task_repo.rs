//! Task repository. Tasks are created by the synthesizer and only ever
//! change status afterwards.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use super::{get_optional_timestamp, get_parsed, get_timestamp, timestamp, Database, DatabaseError};
use crate::model::{Task, TaskStatus};

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let due: String = row.get("due_date")?;
    let due_date = NaiveDate::parse_from_str(&due, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let priority: i64 = row.get("priority")?;

    Ok(Task {
        id: row.get("id")?,
        report_id: row.get("report_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority: priority.clamp(1, 5) as u8,
        assigned_role: get_parsed(row, "assigned_role")?,
        due_date,
        estimated_hours: row.get("estimated_hours")?,
        potential_value: row.get("potential_value")?,
        source_insight: row.get("source_insight")?,
        status: get_parsed(row, "status")?,
        created_at: get_timestamp(row, "created_at")?,
        completed_at: get_optional_timestamp(row, "completed_at")?,
    })
}

pub(crate) fn insert_with(conn: &Connection, task: &Task) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO tasks (id, report_id, title, description, priority, assigned_role, due_date,
         estimated_hours, potential_value, source_insight, status, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            task.id,
            task.report_id,
            task.title,
            task.description,
            task.priority,
            task.assigned_role.as_str(),
            task.due_date.format("%Y-%m-%d").to_string(),
            task.estimated_hours,
            task.potential_value,
            task.source_insight,
            task.status.as_str(),
            timestamp(task.created_at),
            task.completed_at.map(timestamp),
        ],
    )?;
    Ok(())
}

fn query_tasks(
    db: &Database,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Task>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let tasks = stmt
            .query_map(params, task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    })
}

pub fn list_by_report(db: &Database, report_id: &str) -> Result<Vec<Task>, DatabaseError> {
    query_tasks(
        db,
        "SELECT * FROM tasks WHERE report_id = ?1 ORDER BY priority ASC, due_date ASC",
        &[&report_id],
    )
}

/// Pending and in-progress tasks, most urgent first.
pub fn list_active(db: &Database) -> Result<Vec<Task>, DatabaseError> {
    query_tasks(
        db,
        "SELECT * FROM tasks WHERE status IN ('pending', 'in_progress')
         ORDER BY priority ASC, due_date ASC",
        &[],
    )
}

/// Active tasks whose due date is before `today`.
pub fn list_overdue(db: &Database, today: NaiveDate) -> Result<Vec<Task>, DatabaseError> {
    let today = today.format("%Y-%m-%d").to_string();
    query_tasks(
        db,
        "SELECT * FROM tasks WHERE status IN ('pending', 'in_progress') AND due_date < ?1
         ORDER BY due_date ASC, priority ASC",
        &[&today],
    )
}

pub fn list_completed_between(
    db: &Database,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<Task>, DatabaseError> {
    let (from, to) = (timestamp(from), timestamp(to));
    query_tasks(
        db,
        "SELECT * FROM tasks WHERE status = 'completed'
         AND completed_at >= ?1 AND completed_at < ?2
         ORDER BY completed_at DESC",
        &[&from, &to],
    )
}

/// Sum of `potential_value` for tasks created within `[from, to)`.
pub fn value_identified_between(
    db: &Database,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<f64, DatabaseError> {
    db.with_conn(|conn| {
        let value = conn.query_row(
            "SELECT COALESCE(SUM(potential_value), 0.0) FROM tasks
             WHERE created_at >= ?1 AND created_at < ?2",
            params![timestamp(from), timestamp(to)],
            |r| r.get(0),
        )?;
        Ok(value)
    })
}

/// Status change made by a user. Sets `completed_at` when completing.
pub fn update_status(db: &Database, id: &str, status: TaskStatus) -> Result<bool, DatabaseError> {
    let completed_at = (status == TaskStatus::Completed).then(|| timestamp(Utc::now()));
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks SET status = ?2, completed_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), completed_at],
        )?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::report_repo;
    use crate::model::{Report, ReportSource, Role};

    fn seed(db: &Database, due_offset_days: i64, priority: u8) -> Task {
        let report = Report::new("acme", "f.csv", ReportSource::Upload, None, 1, "/in/f.csv");
        report_repo::insert(db, &report).unwrap();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            report_id: report.id.clone(),
            title: "Follow up".into(),
            description: "desc".into(),
            priority,
            assigned_role: Role::Leasing,
            due_date: Utc::now().date_naive() + chrono::Duration::days(due_offset_days),
            estimated_hours: 2.0,
            potential_value: 500.0,
            source_insight: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        db.with_conn(|conn| insert_with(conn, &task)).unwrap();
        task
    }

    #[test]
    fn test_insert_and_list_by_report() {
        let db = Database::open_in_memory().unwrap();
        let task = seed(&db, 3, 2);
        let listed = list_by_report(&db, &task.report_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, task.id);
        assert_eq!(listed[0].due_date, task.due_date);
        assert_eq!(listed[0].assigned_role, Role::Leasing);
        assert_eq!(listed[0].priority, 2);
    }

    #[test]
    fn test_overdue_and_active() {
        let db = Database::open_in_memory().unwrap();
        let overdue = seed(&db, -2, 3);
        let _upcoming = seed(&db, 5, 4);

        let today = Utc::now().date_naive();
        let listed = list_overdue(&db, today).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, overdue.id);
        assert_eq!(list_active(&db).unwrap().len(), 2);
    }

    #[test]
    fn test_completion_sets_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let task = seed(&db, 1, 1);
        assert!(update_status(&db, &task.id, TaskStatus::Completed).unwrap());

        let now = Utc::now();
        let done = list_completed_between(
            &db,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        )
        .unwrap();
        assert_eq!(done.len(), 1);
        assert!(done[0].completed_at.is_some());
        assert!(list_active(&db).unwrap().is_empty());
    }

    #[test]
    fn test_value_identified() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 1, 1);
        seed(&db, 2, 2);
        let now = Utc::now();
        let value = value_identified_between(
            &db,
            now - chrono::Duration::days(7),
            now + chrono::Duration::seconds(5),
        )
        .unwrap();
        assert_eq!(value, 1000.0);
    }
}
