use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            intake: IntakeConfig::default(),
            queue: QueueConfig::default(),
            providers: Vec::new(),
            analysis: AnalysisConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Cooperative polling loop; safe on network filesystems.
    Poll,
    /// OS change notifications feeding the same stability tracker.
    Notify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub watch_directories: Vec<String>,
    #[serde(default = "default_staging_directory")]
    pub staging_directory: String,
    #[serde(default = "default_watch_mode")]
    pub watch_mode: WatchMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stability_polls")]
    pub stability_polls: u32,
    #[serde(default = "default_max_stability_wait_ms")]
    pub max_stability_wait_ms: u64,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
}

fn default_staging_directory() -> String {
    "~/.prism/staging".to_string()
}

fn default_watch_mode() -> WatchMode {
    WatchMode::Poll
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stability_polls() -> u32 {
    3
}

fn default_max_stability_wait_ms() -> u64 {
    10_000
}

fn default_ignore_patterns() -> Vec<String> {
    [
        "*.tmp",
        "*.part",
        "*.partial",
        "*.crdownload",
        "*.download",
        "*.swp",
        "~$*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_extensions() -> Vec<String> {
    ["csv", "xlsx", "xls", "txt", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_attachment_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_tenant() -> String {
    "default".to_string()
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            watch_directories: Vec::new(),
            staging_directory: default_staging_directory(),
            watch_mode: default_watch_mode(),
            poll_interval_ms: default_poll_interval_ms(),
            stability_polls: default_stability_polls(),
            max_stability_wait_ms: default_max_stability_wait_ms(),
            ignore_patterns: default_ignore_patterns(),
            allowed_extensions: default_allowed_extensions(),
            max_attachment_bytes: default_max_attachment_bytes(),
            default_tenant: default_tenant(),
        }
    }
}

/// Per-lane overrides. Unset fields fall back to the lane's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub analyze: LaneConfig,
    #[serde(default)]
    pub notify: LaneConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Label used in logs and stored with the insight; defaults to the kind.
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    2048
}

impl ProviderConfig {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| match self.kind {
            ProviderKind::Anthropic => "anthropic".to_string(),
            ProviderKind::Openai => "openai".to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_classification_sample_chars")]
    pub classification_sample_chars: usize,
    #[serde(default = "default_insight_sample_rows")]
    pub insight_sample_rows: usize,
    /// Revenue used for percentage value estimates when the document
    /// itself carries no revenue figure.
    #[serde(default)]
    pub base_revenue: Option<f64>,
}

fn default_classification_sample_chars() -> usize {
    4000
}

fn default_insight_sample_rows() -> usize {
    50
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            classification_sample_chars: default_classification_sample_chars(),
            insight_sample_rows: default_insight_sample_rows(),
            base_revenue: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Log full message content instead of sending.
    Sandbox,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_delivery_mode")]
    pub mode: DeliveryMode,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default)]
    pub recipients: BTreeMap<Role, Vec<String>>,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_digest_window_days")]
    pub digest_window_days: i64,
    #[serde(default = "default_manual_review_hours")]
    pub manual_review_hours: f64,
}

fn default_delivery_mode() -> DeliveryMode {
    DeliveryMode::Sandbox
}

fn default_from_address() -> String {
    "reports@prism.local".to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_digest_window_days() -> i64 {
    7
}

fn default_manual_review_hours() -> f64 {
    2.0
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            mode: default_delivery_mode(),
            from_address: default_from_address(),
            api_url: None,
            api_key: None,
            api_key_file: None,
            api_key_env_var: None,
            recipients: BTreeMap::new(),
            attempts: default_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            digest_window_days: default_digest_window_days(),
            manual_review_hours: default_manual_review_hours(),
        }
    }
}

impl NotificationConfig {
    pub fn recipients_for(&self, role: Role) -> &[String] {
        self.recipients
            .get(&role)
            .map(|r| r.as_slice())
            .unwrap_or_default()
    }
}
