//! Rolling-window digest of task activity plus ROI figures.

use std::fmt::Write;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::message::EmailMessage;
use crate::db::{report_repo, task_repo, Database, DatabaseError};
use crate::model::{Role, Task};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub active: Vec<Task>,
    pub overdue: Vec<Task>,
    pub completed: Vec<Task>,
    pub reports_processed: i64,
    /// `reports_processed × manual review hours per report`.
    pub time_saved_hours: f64,
    /// Potential value of tasks created in the window.
    pub value_identified: f64,
}

/// Collects the digest for the `window_days` ending at `now`.
pub fn build_digest(
    db: &Database,
    window_days: i64,
    manual_review_hours: f64,
    now: DateTime<Utc>,
) -> Result<Digest, DatabaseError> {
    let window_start = now - Duration::days(window_days.max(1));
    let reports_processed = report_repo::count_completed_between(db, window_start, now)?;

    Ok(Digest {
        window_start,
        window_end: now,
        active: task_repo::list_active(db)?,
        overdue: task_repo::list_overdue(db, now.date_naive())?,
        completed: task_repo::list_completed_between(db, window_start, now)?,
        reports_processed,
        time_saved_hours: reports_processed as f64 * manual_review_hours.max(0.0),
        value_identified: task_repo::value_identified_between(db, window_start, now)?,
    })
}

impl Digest {
    /// Delivery key; one digest per window end date.
    pub fn delivery_key(&self) -> String {
        format!("digest:{}", self.window_end.format("%Y-%m-%d"))
    }

    fn period_label(&self) -> String {
        match (self.window_end - self.window_start).num_days() {
            1 => "Daily".to_string(),
            7 => "Weekly".to_string(),
            30 => "Monthly".to_string(),
            days => format!("{}-day", days),
        }
    }

    /// One message per role, each listing that role's tasks.
    pub fn messages(&self) -> Vec<(Role, EmailMessage)> {
        Role::ALL
            .iter()
            .map(|role| (*role, self.render(*role)))
            .collect()
    }

    pub fn render(&self, role: Role) -> EmailMessage {
        let of_role = |tasks: &[Task]| -> Vec<Task> {
            tasks
                .iter()
                .filter(|t| t.assigned_role == role)
                .cloned()
                .collect()
        };
        let active = of_role(&self.active);
        let overdue = of_role(&self.overdue);
        let completed = of_role(&self.completed);

        let mut text = String::new();
        let _ = writeln!(
            text,
            "{} digest for {} to {}\n",
            role.display_name(),
            self.window_start.format("%Y-%m-%d"),
            self.window_end.format("%Y-%m-%d")
        );

        let _ = writeln!(text, "Overdue ({}):", overdue.len());
        for t in &overdue {
            let _ = writeln!(text, "- [P{}] {} (due {})", t.priority, t.title, t.due_date);
        }
        let _ = writeln!(text, "\nOpen ({}):", active.len());
        for t in &active {
            let _ = writeln!(text, "- [P{}] {} (due {})", t.priority, t.title, t.due_date);
        }
        let _ = writeln!(text, "\nCompleted this period: {}", completed.len());

        let _ = writeln!(text, "\nAcross all teams:");
        let _ = writeln!(text, "- Reports processed: {}", self.reports_processed);
        let _ = writeln!(text, "- Review time saved: {:.1} h", self.time_saved_hours);
        let _ = writeln!(text, "- Value identified: ${:.2}", self.value_identified);

        let subject = format!(
            "[Prism] {} digest: {} open, {} overdue",
            self.period_label(),
            active.len(),
            overdue.len()
        );
        EmailMessage::new(subject, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::analysis_repo::{self, AnalysisRecord};
    use crate::model::{Classification, DocumentType, InsightBundle, Report, ReportSource, TaskStatus};

    fn task(report_id: &str, role: Role, due_offset: i64, value: f64, now: DateTime<Utc>) -> Task {
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            report_id: report_id.into(),
            title: format!("{} follow-up", role.display_name()),
            description: String::new(),
            priority: 2,
            assigned_role: role,
            due_date: (now + Duration::days(due_offset)).date_naive(),
            estimated_hours: 1.0,
            potential_value: value,
            source_insight: None,
            status: TaskStatus::Pending,
            created_at: now - Duration::minutes(5),
            completed_at: None,
        }
    }

    #[test]
    fn test_digest_aggregates_tasks_and_roi() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let report = Report::new("acme", "pl.csv", ReportSource::Upload, None, 1, "/in/pl.csv");
        report_repo::insert(&db, &report).unwrap();

        let tasks = vec![
            task(&report.id, Role::Cfo, 2, 12500.0, now),
            task(&report.id, Role::Maintenance, -1, 500.0, now),
        ];
        analysis_repo::persist_analysis(
            &db,
            &report.id,
            &AnalysisRecord {
                classification: &Classification::new(DocumentType::Financial, 0.9),
                extracted_summary: &serde_json::json!({}),
                data_quality: 1.0,
                bundle: &InsightBundle::degraded("s", None),
                tasks: &tasks,
            },
        )
        .unwrap();
        report_repo::mark_completed(&db, &report.id, now - Duration::hours(1)).unwrap();

        let digest = build_digest(&db, 7, 2.0, now).unwrap();

        assert_eq!(digest.reports_processed, 1);
        assert_eq!(digest.time_saved_hours, 2.0);
        assert_eq!(digest.value_identified, 13000.0);
        assert_eq!(digest.active.len(), 2);
        assert_eq!(digest.overdue.len(), 1);

        let maintenance = digest.render(Role::Maintenance);
        assert!(maintenance.subject.starts_with("[Prism] Weekly digest"));
        assert!(maintenance.subject.contains("1 overdue"));
        assert!(maintenance.text.contains("Review time saved: 2.0 h"));
        assert_eq!(digest.messages().len(), Role::ALL.len());
    }

    #[test]
    fn test_subject_names_the_window() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let subject = |days| build_digest(&db, days, 1.0, now).unwrap().render(Role::Cfo).subject;

        assert!(subject(1).starts_with("[Prism] Daily digest"));
        assert!(subject(14).starts_with("[Prism] 14-day digest"));
        assert!(subject(30).starts_with("[Prism] Monthly digest"));
    }
}
