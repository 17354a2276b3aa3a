//! Inbound e-mail webhook.
//!
//! The upstream mail provider only retries on 5xx, so every business-level
//! outcome (accepted, partly rejected, rejected) answers 200 and only
//! infrastructure failures answer 500.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info_span;

use super::tenant::{bare_address, resolve_tenant};
use crate::broadcast::{ReportEvent, ReportEventBroadcaster, ReportPhase};
use crate::config::IntakeConfig;
use crate::db::{report_repo, Database};
use crate::error::PrismError;
use crate::model::{Report, ReportSource};
use crate::notification::{NotifyJob, Rejection};
use crate::pipeline::AnalyzeJob;
use crate::queue::{JobQueue, Lane};
use crate::sanitize::redact_email;
use crate::storage::IntakeStorage;

#[derive(Debug, Clone, Deserialize)]
pub struct InboundEmail {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub attachments: Vec<InboundAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundAttachment {
    #[serde(default, alias = "fileName", alias = "filename")]
    pub file_name: String,
    /// Base64 encoded bytes.
    #[serde(default)]
    pub content: String,
    /// Size declared by the provider; the decoded length is authoritative.
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            body: json!({ "error": message.into() }),
        }
    }

    fn internal(error: &PrismError) -> Self {
        Self {
            status: 500,
            body: json!({ "error": error.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct WebhookIntake {
    db: Database,
    queue: JobQueue,
    storage: IntakeStorage,
    events: ReportEventBroadcaster,
    allowed_extensions: Vec<String>,
    max_attachment_bytes: u64,
    default_tenant: String,
}

impl WebhookIntake {
    pub fn new(
        db: Database,
        queue: JobQueue,
        storage: IntakeStorage,
        events: ReportEventBroadcaster,
        config: &IntakeConfig,
    ) -> Self {
        Self {
            db,
            queue,
            storage,
            events,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_attachment_bytes: config.max_attachment_bytes,
            default_tenant: config.default_tenant.clone(),
        }
    }

    /// Handles a raw webhook body.
    pub fn handle(&self, body: &[u8]) -> WebhookResponse {
        match serde_json::from_slice::<InboundEmail>(body) {
            Ok(email) => self.receive(&email),
            Err(e) => {
                warn!("Rejected unparseable webhook payload: {}", e);
                WebhookResponse::bad_request(format!("invalid payload: {}", e))
            }
        }
    }

    pub fn receive(&self, email: &InboundEmail) -> WebhookResponse {
        let sender = bare_address(&email.from).to_string();
        let tenant = resolve_tenant(&email.to, &self.default_tenant);
        let _span = info_span!(
            "webhook",
            tenant = %tenant,
            sender = %redact_email(&sender),
            attachments = email.attachments.len()
        )
        .entered();

        match self.accept(email, &sender, &tenant) {
            Ok(body) => WebhookResponse::ok(body),
            Err(e) => {
                error!("Webhook intake failed: {}", e);
                WebhookResponse::internal(&e)
            }
        }
    }

    fn accept(&self, email: &InboundEmail, sender: &str, tenant: &str) -> Result<Value, PrismError> {
        let mut rejections = Vec::new();
        let mut report_ids = Vec::new();

        if email.attachments.is_empty() {
            rejections.push(Rejection::new(None, "The e-mail had no attachments."));
        }

        for attachment in &email.attachments {
            let content = match self.validate(attachment) {
                Ok(content) => content,
                Err(reason) => {
                    info!("Rejected attachment '{}': {}", attachment.file_name, reason);
                    rejections.push(Rejection::new(non_empty(&attachment.file_name), reason));
                    continue;
                }
            };
            let report = self.create_report(tenant, sender, &attachment.file_name, &content)?;
            report_ids.push(report.id);
        }

        if !rejections.is_empty() {
            self.notify_rejection(sender, email.subject.as_deref(), &rejections, report_ids.len())?;
        }

        let status = match (report_ids.is_empty(), rejections.is_empty()) {
            (false, true) => "accepted",
            (false, false) => "partial",
            (true, _) => "rejected",
        };
        info!(
            "Webhook for tenant {}: {} accepted, {} rejected",
            tenant,
            report_ids.len(),
            rejections.len()
        );
        Ok(json!({
            "status": status,
            "tenant": tenant,
            "reportIds": report_ids,
            "rejected": rejections,
        }))
    }

    /// Returns the decoded bytes or the reason the attachment is refused.
    fn validate(&self, attachment: &InboundAttachment) -> Result<Vec<u8>, String> {
        let name = attachment.file_name.trim();
        if name.is_empty() {
            return Err("Attachment has no file name.".to_string());
        }

        let extension = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.allowed_extensions.contains(&extension) {
            return Err(if extension.is_empty() {
                "Files without an extension are not supported.".to_string()
            } else {
                format!("Files of type .{} are not supported.", extension)
            });
        }

        let too_large = || {
            format!(
                "File exceeds the {:.0} MB limit.",
                self.max_attachment_bytes as f64 / (1024.0 * 1024.0)
            )
        };
        if attachment.size.is_some_and(|s| s > self.max_attachment_bytes) {
            return Err(too_large());
        }

        let encoded: String = attachment
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let content = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| "Attachment content could not be decoded.".to_string())?;

        if content.is_empty() {
            return Err("File is empty.".to_string());
        }
        if content.len() as u64 > self.max_attachment_bytes {
            return Err(too_large());
        }
        Ok(content)
    }

    fn create_report(
        &self,
        tenant: &str,
        sender: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<Report, PrismError> {
        let mut report = Report::new(
            tenant,
            file_name.trim(),
            ReportSource::Email,
            non_empty(sender).map(str::to_string),
            content.len() as u64,
            String::new(),
        );
        let staged = self.storage.stage(&report.id, &report.filename, content)?;
        report.file_path = staged.to_string_lossy().into_owned();

        report_repo::insert(&self.db, &report)?;
        let job = AnalyzeJob::new(&report.id);
        self.queue
            .enqueue(Lane::Analyze, &job, Some(&job.dedupe_key()))?;
        self.events.send(ReportEvent::new(
            &report.id,
            &report.filename,
            ReportPhase::Queued,
            "Received by e-mail",
        ));
        info!("Queued report {} ({})", report.id, report.filename);
        Ok(report)
    }

    fn notify_rejection(
        &self,
        sender: &str,
        subject: Option<&str>,
        rejections: &[Rejection],
        accepted: usize,
    ) -> Result<(), PrismError> {
        if !sender.contains('@') {
            warn!("Cannot send rejection notice: no usable sender address");
            return Ok(());
        }
        let job = NotifyJob::Rejection {
            reference: uuid::Uuid::new_v4().to_string(),
            recipient: sender.to_string(),
            subject: subject.map(str::to_string),
            rejections: rejections.to_vec(),
            accepted,
        };
        self.queue
            .enqueue(Lane::Notify, &job, job.dedupe_key().as_deref())?;
        Ok(())
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::JobState;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Database,
        queue: JobQueue,
        intake: WebhookIntake,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let queue = JobQueue::new(db.clone(), &QueueConfig::default());
        let mut config = IntakeConfig::default();
        config.max_attachment_bytes = 64;
        let intake = WebhookIntake::new(
            db.clone(),
            queue.clone(),
            IntakeStorage::new(dir.path().join("staging")),
            ReportEventBroadcaster::new(16),
            &config,
        );
        Fixture {
            _dir: dir,
            db,
            queue,
            intake,
        }
    }

    fn payload(attachments: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "to": "reports+acme@prism.io",
            "from": "Jane Owner <jane@owner.com>",
            "subject": "March numbers",
            "attachments": attachments,
        }))
        .unwrap()
    }

    fn waiting(queue: &JobQueue, lane: Lane) -> usize {
        queue.store().list(lane, Some(JobState::Waiting)).unwrap().len()
    }

    #[test]
    fn test_accepts_csv_attachment() {
        let f = fixture();
        let body = payload(json!([{
            "file_name": "pl.csv",
            "content": STANDARD.encode("GL Account,Description\n4000,Rent Income\n"),
            "size": 40
        }]));

        let response = f.intake.handle(&body);

        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "accepted");
        assert_eq!(response.body["tenant"], "acme");
        let id = response.body["reportIds"][0].as_str().unwrap();
        let report = report_repo::find_by_id(&f.db, id).unwrap().unwrap();
        assert_eq!(report.sender.as_deref(), Some("jane@owner.com"));
        assert!(std::path::Path::new(&report.file_path).exists());
        assert_eq!(waiting(&f.queue, Lane::Analyze), 1);
        assert_eq!(waiting(&f.queue, Lane::Notify), 0);
    }

    #[test]
    fn test_no_attachments_answers_200_and_queues_rejection() {
        let f = fixture();

        let response = f.intake.handle(&payload(json!([])));

        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "rejected");
        assert_eq!(waiting(&f.queue, Lane::Analyze), 0);
        let notify = f.queue.store().list(Lane::Notify, None).unwrap();
        assert_eq!(notify.len(), 1);
        let job: NotifyJob = notify[0].payload_as().unwrap();
        assert!(matches!(job, NotifyJob::Rejection { accepted: 0, ref recipient, .. } if recipient == "jane@owner.com"));
    }

    #[test]
    fn test_mixed_attachments_are_partial() {
        let f = fixture();
        let body = payload(json!([
            { "file_name": "notes.txt", "content": STANDARD.encode("hello") },
            { "file_name": "photo.png", "content": STANDARD.encode("png") },
            { "file_name": "big.csv", "content": STANDARD.encode(vec![b'a'; 100]) },
            { "file_name": "bad.csv", "content": "!!not base64!!" }
        ]));

        let response = f.intake.handle(&body);

        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "partial");
        assert_eq!(response.body["rejected"].as_array().unwrap().len(), 3);
        assert_eq!(waiting(&f.queue, Lane::Analyze), 1);
        assert_eq!(waiting(&f.queue, Lane::Notify), 1);
    }

    #[test]
    fn test_unparseable_body_is_400() {
        let f = fixture();
        let response = f.intake.handle(b"{not json");
        assert_eq!(response.status, 400);
        assert_eq!(waiting(&f.queue, Lane::Notify), 0);
    }
}
