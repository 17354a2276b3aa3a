//! Fan-out delivery with independent retry per recipient group.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use tracing::{info_span, Instrument};

use super::error::NotificationError;
use super::message::EmailMessage;
use super::transport::{HttpMailTransport, MailTransport, SandboxTransport};
use crate::config::{DeliveryMode, NotificationConfig};
use crate::db::{delivery_repo, Database};
use crate::error::ConfigError;
use crate::model::Role;
use crate::secrets::resolve_secret;

const MAIL_API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        message_id: Option<String>,
        attempts: u32,
    },
    /// Recorded as delivered by an earlier run.
    AlreadyDelivered,
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
        attempts: u32,
        retryable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupResult {
    pub group: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub results: Vec<GroupResult>,
}

impl DispatchReport {
    pub fn failed_groups(&self) -> Vec<&GroupResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, DeliveryOutcome::Failed { .. }))
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, DeliveryOutcome::Delivered { .. }))
            .count()
    }

    /// `Err` when a group failed and a later resend could still reach it.
    pub fn into_result(self) -> Result<Self, NotificationError> {
        let retryable: Vec<String> = self
            .results
            .iter()
            .filter(|r| matches!(r.outcome, DeliveryOutcome::Failed { retryable: true, .. }))
            .map(|r| r.group.clone())
            .collect();
        if retryable.is_empty() {
            Ok(self)
        } else {
            Err(NotificationError::Undelivered(retryable))
        }
    }
}

pub struct Dispatcher {
    db: Database,
    transport: Arc<dyn MailTransport>,
    from: String,
    recipients: BTreeMap<Role, Vec<String>>,
    attempts: u32,
    retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(db: Database, transport: Arc<dyn MailTransport>, config: &NotificationConfig) -> Self {
        Self {
            db,
            transport,
            from: config.from_address.clone(),
            recipients: config.recipients.clone(),
            attempts: config.attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Picks the transport for the configured delivery mode.
    pub fn from_config(db: Database, config: &NotificationConfig) -> Result<Self, ConfigError> {
        let transport: Arc<dyn MailTransport> = match config.mode {
            DeliveryMode::Sandbox => Arc::new(SandboxTransport::new()),
            DeliveryMode::Live => {
                let api_url = config.api_url.clone().ok_or_else(|| ConfigError::Validation {
                    message: "notifications.api_url is required in live mode".to_string(),
                })?;
                let key = resolve_secret(
                    config.api_key.as_deref(),
                    config.api_key_file.as_deref(),
                    config.api_key_env_var.as_deref(),
                )
                .map_err(|source| ConfigError::Secret {
                    name: "notifications".to_string(),
                    source,
                })?;
                let transport = HttpMailTransport::new(api_url, key, MAIL_API_TIMEOUT).map_err(|e| {
                    ConfigError::Validation {
                        message: format!("mail client could not be built: {}", e),
                    }
                })?;
                Arc::new(transport)
            }
        };
        info!("Notification delivery via {} transport", transport.name());
        Ok(Self::new(db, transport, config))
    }

    pub fn recipients_for(&self, role: Role) -> &[String] {
        self.recipients
            .get(&role)
            .map(|r| r.as_slice())
            .unwrap_or_default()
    }

    /// Sends each role its message concurrently. One role's failure never
    /// holds back another.
    pub async fn notify_roles(&self, key: &str, messages: Vec<(Role, EmailMessage)>) -> DispatchReport {
        let sends = messages.into_iter().map(|(role, message)| {
            let to = self.recipients_for(role).to_vec();
            let span = info_span!("notify_role", role = %role);
            async move {
                if to.is_empty() {
                    warn!("No recipients configured for role {}, skipping", role);
                    return GroupResult {
                        group: role.as_str().to_string(),
                        outcome: DeliveryOutcome::Skipped {
                            reason: "no recipients configured".to_string(),
                        },
                    };
                }
                self.send_to(key, role.as_str(), message.addressed_to(to)).await
            }
            .instrument(span)
        });

        DispatchReport {
            results: join_all(sends).await,
        }
    }

    /// Sends one already-addressed message as recipient group `group`.
    pub async fn send_to(&self, key: &str, group: &str, message: EmailMessage) -> GroupResult {
        GroupResult {
            group: group.to_string(),
            outcome: self.deliver(key, group, &message).await,
        }
    }

    async fn deliver(&self, key: &str, group: &str, message: &EmailMessage) -> DeliveryOutcome {
        match delivery_repo::is_delivered(&self.db, key, group) {
            Ok(true) => {
                debug!("{} already delivered to {}", key, group);
                return DeliveryOutcome::AlreadyDelivered;
            }
            Ok(false) => {}
            Err(e) => {
                return DeliveryOutcome::Failed {
                    error: e.to_string(),
                    attempts: 0,
                    retryable: true,
                }
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(&self.from, message).await {
                Ok(message_id) => {
                    if let Err(e) = delivery_repo::record_delivery(&self.db, key, group, message_id.as_deref()) {
                        warn!("Delivered {} to {} but could not record it: {}", key, group, e);
                    }
                    return DeliveryOutcome::Delivered {
                        message_id,
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        "Sending {} to {} failed (attempt {}/{}), retrying in {:?}: {}",
                        key,
                        group,
                        attempt,
                        self.attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Giving up on {} for {} after {} attempt(s): {}", key, group, attempt, e);
                    return DeliveryOutcome::Failed {
                        error: e.to_string(),
                        attempts: attempt,
                        retryable: e.is_transient(),
                    };
                }
            }
        }
    }
}
