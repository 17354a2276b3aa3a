//! Stores the outcome of a report's analysis: classification, extracted
//! summary, insight bundle and synthesized tasks.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{get_timestamp, task_repo, timestamp, Database, DatabaseError};
use crate::model::{Classification, Insight, InsightBundle, Task};

/// Everything written for one report in a single transaction.
pub struct AnalysisRecord<'a> {
    pub classification: &'a Classification,
    pub extracted_summary: &'a serde_json::Value,
    pub data_quality: f64,
    pub bundle: &'a InsightBundle,
    pub tasks: &'a [Task],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    /// An earlier attempt already stored this report's analysis.
    AlreadyPersisted,
}

/// Persists the analysis at most once per report.
///
/// Classification and summary columns on `reports`, the `insights` row and
/// every task are written together. If an insight row already exists the
/// transaction writes nothing, so a retried job never duplicates tasks.
pub fn persist_analysis(
    db: &Database,
    report_id: &str,
    record: &AnalysisRecord<'_>,
) -> Result<PersistOutcome, DatabaseError> {
    let summary_json = serde_json::to_string(record.extracted_summary)?;
    let insight = &record.bundle.insight;
    let key_findings = serde_json::to_string(&insight.key_findings)?;
    let trends = serde_json::to_string(&insight.trends)?;
    let risks = serde_json::to_string(&insight.risks)?;
    let opportunities = serde_json::to_string(&insight.opportunities)?;
    let now = timestamp(Utc::now());

    db.with_transaction(|tx| {
        let existing: Option<String> = tx
            .query_row(
                "SELECT report_id FROM insights WHERE report_id = ?1",
                params![report_id],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(PersistOutcome::AlreadyPersisted);
        }

        let c = record.classification;
        tx.execute(
            "UPDATE reports SET document_type = ?2, confidence = ?3, property_name = ?4,
             report_period = ?5, extracted_summary = ?6, data_quality = ?7
             WHERE id = ?1",
            params![
                report_id,
                c.document_type.as_str(),
                c.confidence,
                c.property_name,
                c.report_period,
                summary_json,
                record.data_quality,
            ],
        )?;

        tx.execute(
            "INSERT INTO insights (report_id, summary, key_findings, trends, risks, opportunities,
             confidence, provider, degraded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report_id,
                insight.summary,
                key_findings,
                trends,
                risks,
                opportunities,
                insight.confidence,
                record.bundle.provider,
                record.bundle.degraded,
                now,
            ],
        )?;

        for task in record.tasks {
            task_repo::insert_with(tx, task)?;
        }

        Ok(PersistOutcome::Inserted)
    })
}

/// Stored insight for a report together with provider metadata.
#[derive(Debug, Clone)]
pub struct StoredInsight {
    pub insight: Insight,
    pub provider: Option<String>,
    pub degraded: bool,
    pub created_at: chrono::DateTime<Utc>,
}

pub fn find_insight(db: &Database, report_id: &str) -> Result<Option<StoredInsight>, DatabaseError> {
    db.with_conn(|conn| {
        let raw = conn
            .query_row(
                "SELECT summary, key_findings, trends, risks, opportunities, confidence,
                 provider, degraded, created_at
                 FROM insights WHERE report_id = ?1",
                params![report_id],
                |row| {
                    Ok((
                        row.get::<_, String>("summary")?,
                        row.get::<_, String>("key_findings")?,
                        row.get::<_, String>("trends")?,
                        row.get::<_, String>("risks")?,
                        row.get::<_, String>("opportunities")?,
                        row.get::<_, f64>("confidence")?,
                        row.get::<_, Option<String>>("provider")?,
                        row.get::<_, bool>("degraded")?,
                        get_timestamp(row, "created_at")?,
                    ))
                },
            )
            .optional()?;

        let Some((summary, findings, trends, risks, opportunities, confidence, provider, degraded, created_at)) =
            raw
        else {
            return Ok(None);
        };

        Ok(Some(StoredInsight {
            insight: Insight {
                summary,
                key_findings: serde_json::from_str(&findings)?,
                trends: serde_json::from_str(&trends)?,
                risks: serde_json::from_str(&risks)?,
                opportunities: serde_json::from_str(&opportunities)?,
                confidence,
            },
            provider,
            degraded,
            created_at,
        }))
    })
}

/// Classification stored for a report, if the analysis was persisted.
pub fn find_classification(
    db: &Database,
    report_id: &str,
) -> Result<Option<Classification>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT document_type, confidence, property_name, report_period
                 FROM reports WHERE id = ?1 AND document_type IS NOT NULL",
                params![report_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(doc_type, confidence, property, period)| {
            let doc_type = doc_type
                .parse()
                .unwrap_or(crate::model::DocumentType::Other);
            Classification::new(doc_type, confidence)
                .with_property(property)
                .with_period(period)
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::report_repo;
    use crate::model::{
        DocumentType, InsightItem, InsightPriority, Report, ReportSource, Role, TaskStatus,
    };

    fn task(report_id: &str, title: &str) -> Task {
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            report_id: report_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            priority: 2,
            assigned_role: Role::Maintenance,
            due_date: Utc::now().date_naive(),
            estimated_hours: 4.0,
            potential_value: 1200.0,
            source_insight: Some("HVAC unit failing".into()),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_persist_is_applied_once() {
        let db = Database::open_in_memory().unwrap();
        let report = Report::new("acme", "wo.csv", ReportSource::Watch, None, 10, "/in/wo.csv");
        report_repo::insert(&db, &report).unwrap();

        let classification = Classification::new(DocumentType::Maintenance, 0.82);
        let summary = serde_json::json!({ "openCount": 3 });
        let bundle = InsightBundle {
            insight: Insight {
                summary: "Three open work orders".into(),
                key_findings: vec![InsightItem::new("HVAC unit failing", InsightPriority::High)],
                trends: vec![],
                risks: vec![],
                opportunities: vec![],
                confidence: 0.8,
            },
            action_items: vec![],
            provider: Some("anthropic".into()),
            degraded: false,
        };
        let tasks = vec![task(&report.id, "Replace HVAC unit")];
        let record = AnalysisRecord {
            classification: &classification,
            extracted_summary: &summary,
            data_quality: 0.9,
            bundle: &bundle,
            tasks: &tasks,
        };

        assert_eq!(
            persist_analysis(&db, &report.id, &record).unwrap(),
            PersistOutcome::Inserted
        );
        let retry_tasks = vec![task(&report.id, "Replace HVAC unit")];
        let retry = AnalysisRecord {
            tasks: &retry_tasks,
            ..record
        };
        assert_eq!(
            persist_analysis(&db, &report.id, &retry).unwrap(),
            PersistOutcome::AlreadyPersisted
        );

        assert_eq!(task_repo::list_by_report(&db, &report.id).unwrap().len(), 1);
        let stored = find_insight(&db, &report.id).unwrap().unwrap();
        assert_eq!(stored.insight.key_findings.len(), 1);
        assert_eq!(stored.provider.as_deref(), Some("anthropic"));

        let stored_class = find_classification(&db, &report.id).unwrap().unwrap();
        assert_eq!(stored_class.document_type, DocumentType::Maintenance);
    }
}
