//! Shared fixtures for integration tests.
//!
//! `TestHarness` wires a full set of services around an in-memory database,
//! a scripted language model and the sandbox mail transport, with queue
//! delays shrunk to milliseconds.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use prism::app::Services;
use prism::config::{Config, LaneConfig};
use prism::db::Database;
use prism::llm::{Completion, CompletionRequest, LanguageModel, LlmError, TokenUsage};
use prism::model::Role;
use prism::notification::{MailTransport, SandboxTransport};
use prism::queue::QueueRunner;

pub const FINANCIAL_CSV: &str = "GL Account,Description,2024-01\n4000,Rent Income,50000\n6100,HVAC Repairs,4200\n";

pub const FINANCIAL_CLASSIFICATION: &str =
    r#"{"documentType":"financial","confidence":0.92,"propertyName":"Oak Plaza","reportPeriod":"2024-01"}"#;

pub const FINANCIAL_INSIGHT: &str = r#"```json
{
  "summary": "Revenue is on plan; HVAC repair spend is elevated.",
  "keyFindings": [{"text": "HVAC repair costs reached $12,500 this quarter", "priority": "high"}],
  "trends": ["Repair spend rising"],
  "risks": [{"text": "Budget overrun on repairs", "priority": "medium"}],
  "opportunities": [],
  "confidence": 0.8,
  "actionItems": [{
    "title": "Review HVAC contract",
    "description": "Compare vendor quotes for the HVAC service contract",
    "priority": 2,
    "assignedRole": "maintenance",
    "estimatedHours": 90,
    "potentialValue": "-300",
    "sourceInsight": "Budget overrun on repairs"
  }]
}
```"#;

/// Answers classification and insight prompts with fixed JSON.
pub struct ScriptedModel {
    classification: String,
    insight: String,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(classification: &str, insight: &str) -> Self {
        Self {
            classification: classification.to_string(),
            insight: insight.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn financial() -> Self {
        Self::new(FINANCIAL_CLASSIFICATION, FINANCIAL_INSIGHT)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if request.system.contains("You classify") {
            &self.classification
        } else {
            &self.insight
        };
        Ok(Completion {
            text: text.clone(),
            provider: "scripted".to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 40,
            },
        })
    }
}

/// Every call fails, as when all providers are down.
pub struct DownModel;

#[async_trait]
impl LanguageModel for DownModel {
    fn name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
        Err(LlmError::NotConfigured)
    }
}

pub fn fast_lane(max_attempts: u32) -> LaneConfig {
    LaneConfig {
        max_attempts: Some(max_attempts),
        base_delay_ms: Some(10),
        max_delay_ms: Some(40),
        concurrency: Some(2),
    }
}

pub fn recipient(role: Role) -> String {
    format!("{}@acme.test", role.as_str())
}

pub fn test_config(base: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.intake.watch_directories = vec![base.join("input").to_string_lossy().into_owned()];
    config.intake.staging_directory = base.join("staging").to_string_lossy().into_owned();
    config.intake.poll_interval_ms = 20;
    config.intake.max_stability_wait_ms = 2_000;
    config.queue.analyze = fast_lane(3);
    config.queue.notify = fast_lane(5);
    config.notifications.retry_delay_ms = 1;
    for role in Role::ALL {
        config.notifications.recipients.insert(role, vec![recipient(role)]);
    }
    config
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub services: Services,
    pub outbox: Arc<SandboxTransport>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_model(Arc::new(ScriptedModel::financial()))
    }

    pub fn with_model(model: Arc<dyn LanguageModel>) -> Self {
        let outbox = Arc::new(SandboxTransport::new());
        Self::with_parts(model, outbox.clone(), outbox, |_| {})
    }

    /// Full control over the model, the transport and the config.
    pub fn with_parts(
        model: Arc<dyn LanguageModel>,
        transport: Arc<dyn MailTransport>,
        outbox: Arc<SandboxTransport>,
        customize: impl FnOnce(&mut Config),
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input directory");

        let mut config = test_config(temp_dir.path());
        customize(&mut config);
        let db = Database::open_in_memory().expect("Failed to open database");
        let services = Services::with_parts(config, db, model, transport);

        Self {
            temp_dir,
            input_dir,
            services,
            outbox,
        }
    }

    pub fn base(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn write_input(&self, name: &str, body: &str) -> PathBuf {
        let path = self.input_dir.join(name);
        std::fs::write(&path, body).expect("Failed to write input file");
        path
    }

    pub fn start(&self) -> QueueRunner {
        self.services.start_queue().expect("Failed to start queue")
    }

    /// Runs the queue until both lanes are idle.
    pub async fn drain(&self) {
        let runner = self.start();
        let drained = self
            .services
            .queue
            .wait_idle(Duration::from_secs(10))
            .await
            .expect("Queue stats failed");
        runner.shutdown().await;
        assert!(drained, "queues did not drain");
    }

    pub fn sent_to(&self, address: &str) -> Vec<prism::notification::EmailMessage> {
        self.outbox
            .sent()
            .into_iter()
            .filter(|m| m.to.iter().any(|to| to == address))
            .collect()
    }
}
