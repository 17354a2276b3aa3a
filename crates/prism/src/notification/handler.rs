use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use super::digest::build_digest;
use super::dispatcher::{DeliveryOutcome, DispatchReport, Dispatcher};
use super::error::NotificationError;
use super::message::{self, EmailMessage, Rejection};
use crate::db::{analysis_repo, report_repo, task_repo, Database};
use crate::model::{Report, Role, Task};
use crate::queue::{JobContext, JobFailure, JobHandler, JobRecord};
use crate::sanitize::redact_email;

/// Payload of a notify-lane job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifyJob {
    /// Role e-mails for a completed report.
    ReportReady { report_id: String },
    /// Receipt for the sender of an e-mailed report.
    Confirmation { report_id: String },
    /// Terminal failure notice for the sender.
    ReportFailed { report_id: String },
    /// Inbound e-mail turned away at intake; no report exists.
    Rejection {
        reference: String,
        recipient: String,
        subject: Option<String>,
        rejections: Vec<Rejection>,
        accepted: usize,
    },
    Digest { window_days: i64 },
}

impl NotifyJob {
    pub fn dedupe_key(&self) -> Option<String> {
        match self {
            NotifyJob::ReportReady { report_id } => Some(format!("report-ready:{}", report_id)),
            NotifyJob::Confirmation { report_id } => Some(format!("confirmation:{}", report_id)),
            NotifyJob::ReportFailed { report_id } => Some(format!("report-failed:{}", report_id)),
            NotifyJob::Rejection { reference, .. } => Some(format!("rejection:{}", reference)),
            NotifyJob::Digest { .. } => None,
        }
    }
}

const SENDER_GROUP: &str = "sender";

pub struct NotifyHandler {
    db: Database,
    dispatcher: Arc<Dispatcher>,
    manual_review_hours: f64,
}

impl NotifyHandler {
    pub fn new(db: Database, dispatcher: Arc<Dispatcher>, manual_review_hours: f64) -> Self {
        Self {
            db,
            dispatcher,
            manual_review_hours,
        }
    }

    /// Sends whatever `job` describes. Groups that already received it are
    /// skipped, so a resend only reaches the ones that failed.
    pub async fn deliver(&self, job: &NotifyJob) -> Result<DispatchReport, NotificationError> {
        let key = job.dedupe_key();
        match job {
            NotifyJob::ReportReady { report_id } => {
                let key = key.unwrap_or_default();
                let messages = self.role_messages(report_id)?;
                Ok(self.dispatcher.notify_roles(&key, messages).await)
            }
            NotifyJob::Confirmation { report_id } => {
                let report = self.report(report_id)?;
                let classification = analysis_repo::find_classification(&self.db, report_id)?;
                let Some(stored) = analysis_repo::find_insight(&self.db, report_id)? else {
                    return Err(NotificationError::ReportNotFound(report_id.clone()));
                };
                let task_count = task_repo::list_by_report(&self.db, report_id)?.len();
                let msg = message::confirmation(&report, classification.as_ref(), &stored.insight, task_count);
                self.to_sender(&key.unwrap_or_default(), &report, msg).await
            }
            NotifyJob::ReportFailed { report_id } => {
                let report = self.report(report_id)?;
                let msg = message::failure_notice(&report);
                self.to_sender(&key.unwrap_or_default(), &report, msg).await
            }
            NotifyJob::Rejection {
                recipient,
                subject,
                rejections,
                accepted,
                ..
            } => {
                let msg = message::rejection(subject.as_deref(), rejections, *accepted)
                    .addressed_to(vec![recipient.clone()]);
                let result = self
                    .dispatcher
                    .send_to(&key.unwrap_or_default(), SENDER_GROUP, msg)
                    .await;
                Ok(DispatchReport {
                    results: vec![result],
                })
            }
            NotifyJob::Digest { window_days } => {
                let digest = build_digest(&self.db, *window_days, self.manual_review_hours, Utc::now())?;
                Ok(self
                    .dispatcher
                    .notify_roles(&digest.delivery_key(), digest.messages())
                    .await)
            }
        }
    }

    fn report(&self, report_id: &str) -> Result<Report, NotificationError> {
        report_repo::find_by_id(&self.db, report_id)?
            .ok_or_else(|| NotificationError::ReportNotFound(report_id.to_string()))
    }

    /// One message per role with tasks. Without tasks the property manager
    /// still gets the summary.
    fn role_messages(&self, report_id: &str) -> Result<Vec<(Role, EmailMessage)>, NotificationError> {
        let report = self.report(report_id)?;
        let classification = analysis_repo::find_classification(&self.db, report_id)?;
        let Some(stored) = analysis_repo::find_insight(&self.db, report_id)? else {
            return Err(NotificationError::ReportNotFound(report_id.to_string()));
        };

        let mut by_role: BTreeMap<Role, Vec<Task>> = BTreeMap::new();
        for task in task_repo::list_by_report(&self.db, report_id)? {
            by_role.entry(task.assigned_role).or_default().push(task);
        }
        if by_role.is_empty() {
            by_role.insert(Role::PropertyManager, Vec::new());
        }

        Ok(by_role
            .into_iter()
            .map(|(role, tasks)| {
                let msg = message::role_summary(
                    role,
                    &report,
                    classification.as_ref(),
                    &stored.insight,
                    &tasks,
                );
                (role, msg)
            })
            .collect())
    }

    async fn to_sender(
        &self,
        key: &str,
        report: &Report,
        msg: EmailMessage,
    ) -> Result<DispatchReport, NotificationError> {
        let Some(sender) = report.sender.clone() else {
            debug!("Report {} has no sender, nothing to send", report.id);
            return Ok(DispatchReport::default());
        };
        let result = self
            .dispatcher
            .send_to(key, SENDER_GROUP, msg.addressed_to(vec![sender]))
            .await;
        Ok(DispatchReport {
            results: vec![result],
        })
    }
}

#[async_trait]
impl JobHandler for NotifyHandler {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobFailure> {
        let job: NotifyJob = ctx
            .job
            .payload_as()
            .map_err(|e| JobFailure::permanent(e.to_string()))?;

        let report = self.deliver(&job).await.map_err(|e| {
            if e.is_transient() {
                JobFailure::retryable(e.to_string())
            } else {
                JobFailure::permanent(e.to_string())
            }
        })?;

        let permanent: Vec<String> = report
            .failed_groups()
            .into_iter()
            .filter_map(|r| match &r.outcome {
                DeliveryOutcome::Failed {
                    retryable: false,
                    error,
                    ..
                } => Some(format!("{}: {}", r.group, error)),
                _ => None,
            })
            .collect();

        let report = report.into_result().map_err(|e| JobFailure::retryable(e.to_string()))?;
        if !permanent.is_empty() {
            return Err(JobFailure::permanent(permanent.join("; ")));
        }
        info!(
            "Notification job {} delivered to {} group(s)",
            ctx.job.id,
            report.delivered_count()
        );
        Ok(())
    }

    async fn on_exhausted(&self, job: &JobRecord, failure: &JobFailure) {
        let target = match job.payload_as::<NotifyJob>() {
            Ok(NotifyJob::Rejection { recipient, .. }) => redact_email(&recipient),
            Ok(other) => other.dedupe_key().unwrap_or_else(|| "digest".to_string()),
            Err(_) => job.id.clone(),
        };
        // Persisted analysis is left untouched.
        error!(
            "Notification {} abandoned after {} attempt(s): {}",
            target,
            job.attempts,
            failure.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::db::analysis_repo::AnalysisRecord;
    use crate::model::{Classification, DocumentType, InsightBundle, ReportSource, TaskStatus};
    use crate::notification::transport::SandboxTransport;

    fn seeded(db: &Database, sender: Option<&str>, roles: &[Role]) -> Report {
        let report = Report::new(
            "acme",
            "rent roll.xlsx",
            ReportSource::Email,
            sender.map(str::to_string),
            10,
            "/s/x.xlsx",
        );
        report_repo::insert(db, &report).unwrap();
        let tasks: Vec<Task> = roles
            .iter()
            .map(|role| Task {
                id: uuid::Uuid::new_v4().to_string(),
                report_id: report.id.clone(),
                title: "Follow up".into(),
                description: String::new(),
                priority: 3,
                assigned_role: *role,
                due_date: Utc::now().date_naive(),
                estimated_hours: 1.0,
                potential_value: 0.0,
                source_insight: None,
                status: TaskStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
            })
            .collect();
        analysis_repo::persist_analysis(
            db,
            &report.id,
            &AnalysisRecord {
                classification: &Classification::new(DocumentType::RentRoll, 0.8),
                extracted_summary: &serde_json::json!({}),
                data_quality: 1.0,
                bundle: &InsightBundle::degraded("Occupancy is 92%.", None),
                tasks: &tasks,
            },
        )
        .unwrap();
        report
    }

    fn handler(db: &Database, sandbox: Arc<SandboxTransport>) -> NotifyHandler {
        let mut config = NotificationConfig::default();
        for role in Role::ALL {
            config
                .recipients
                .insert(role, vec![format!("{}@acme.com", role.as_str())]);
        }
        let dispatcher = Dispatcher::new(db.clone(), sandbox, &config);
        NotifyHandler::new(db.clone(), Arc::new(dispatcher), 2.0)
    }

    #[tokio::test]
    async fn test_report_ready_groups_by_role() {
        let db = Database::open_in_memory().unwrap();
        let sandbox = Arc::new(SandboxTransport::new());
        let report = seeded(&db, None, &[Role::Leasing, Role::Leasing, Role::Cfo]);

        let result = handler(&db, sandbox.clone())
            .deliver(&NotifyJob::ReportReady {
                report_id: report.id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(result.delivered_count(), 2);
        let sent = sandbox.sent();
        let leasing = sent
            .iter()
            .find(|m| m.to == vec!["leasing@acme.com".to_string()])
            .unwrap();
        assert!(leasing.subject.starts_with("[Prism] 2 task(s) for Leasing"));
    }

    #[tokio::test]
    async fn test_report_without_tasks_goes_to_property_manager() {
        let db = Database::open_in_memory().unwrap();
        let sandbox = Arc::new(SandboxTransport::new());
        let report = seeded(&db, None, &[]);

        handler(&db, sandbox.clone())
            .deliver(&NotifyJob::ReportReady {
                report_id: report.id.clone(),
            })
            .await
            .unwrap();

        let sent = sandbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["property_manager@acme.com".to_string()]);
    }

    #[tokio::test]
    async fn test_confirmation_goes_to_sender_once() {
        let db = Database::open_in_memory().unwrap();
        let sandbox = Arc::new(SandboxTransport::new());
        let report = seeded(&db, Some("owner@example.com"), &[Role::Cfo]);
        let handler = handler(&db, sandbox.clone());
        let job = NotifyJob::Confirmation {
            report_id: report.id.clone(),
        };

        handler.deliver(&job).await.unwrap();
        let again = handler.deliver(&job).await.unwrap();

        assert_eq!(sandbox.sent().len(), 1);
        assert_eq!(again.results[0].outcome, DeliveryOutcome::AlreadyDelivered);
        assert!(sandbox.sent()[0].text.contains("1 follow-up task(s)"));
    }

    #[tokio::test]
    async fn test_missing_report_is_not_transient() {
        let db = Database::open_in_memory().unwrap();
        let err = handler(&db, Arc::new(SandboxTransport::new()))
            .deliver(&NotifyJob::ReportFailed {
                report_id: "missing".into(),
            })
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_payload_tagging() {
        let job = NotifyJob::ReportReady {
            report_id: "r1".into(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "report_ready");
        assert_eq!(job.dedupe_key().as_deref(), Some("report-ready:r1"));
        assert_eq!(NotifyJob::Digest { window_days: 7 }.dedupe_key(), None);
    }
}
