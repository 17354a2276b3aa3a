//! Mail transports: a sandbox that only logs, and an HTTP mail API.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use super::error::NotificationError;
use super::message::EmailMessage;
use crate::sanitize::redact_email;

#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Sends one message. Returns the provider's message id when it has one.
    async fn send(&self, from: &str, message: &EmailMessage) -> Result<Option<String>, NotificationError>;
}

/// Recent messages a sandbox keeps for inspection.
pub const SANDBOX_OUTBOX_CAP: usize = 200;

/// Logs full message content instead of delivering. The most recent
/// messages are kept so callers can inspect them.
pub struct SandboxTransport {
    outbox: Mutex<Outbox>,
    cap: usize,
}

#[derive(Default)]
struct Outbox {
    recent: VecDeque<EmailMessage>,
    total: u64,
}

impl SandboxTransport {
    pub fn new() -> Self {
        Self::with_cap(SANDBOX_OUTBOX_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            outbox: Mutex::new(Outbox::default()),
            cap,
        }
    }

    /// Retained messages, oldest first.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.outbox
            .lock()
            .map(|o| o.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages sent since creation, including ones no longer retained.
    pub fn total_sent(&self) -> u64 {
        self.outbox.lock().map(|o| o.total).unwrap_or_default()
    }
}

impl Default for SandboxTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for SandboxTransport {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn send(&self, from: &str, message: &EmailMessage) -> Result<Option<String>, NotificationError> {
        info!(
            "[sandbox] mail from {} to {}\nSubject: {}\n\n{}",
            from,
            message.to.join(", "),
            message.subject,
            message.text
        );
        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| NotificationError::NotConfigured("sandbox outbox poisoned".into()))?;
        outbox.total += 1;
        if self.cap > 0 {
            while outbox.recent.len() >= self.cap {
                outbox.recent.pop_front();
            }
            outbox.recent.push_back(message.clone());
        }
        Ok(Some(format!("sandbox-{}", outbox.total)))
    }
}

/// JSON mail API (`POST {api_url}` with bearer auth).
pub struct HttpMailTransport {
    client: Client,
    api_url: String,
    api_key: SecretString,
}

impl HttpMailTransport {
    pub fn new(api_url: impl Into<String>, api_key: SecretString, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, from: &str, message: &EmailMessage) -> Result<Option<String>, NotificationError> {
        let body = json!({
            "from": from,
            "to": message.to,
            "subject": message.subject,
            "text": message.text,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotificationError::Api {
                status: status.as_u16(),
                message: crate::extractor::truncate_chars(&message, 500),
            });
        }

        let value: serde_json::Value = response.json().await.unwrap_or_default();
        let id = value
            .get("id")
            .or_else(|| value.get("messageId"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        debug!(
            "Delivered '{}' to {} recipient(s), first {}",
            message.subject,
            message.to.len(),
            message.to.first().map(|a| redact_email(a)).unwrap_or_default()
        );
        Ok(id)
    }
}
