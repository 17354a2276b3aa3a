//! Notification error types.

use thiserror::Error;

use crate::db::DatabaseError;

/// Errors that can occur while rendering or delivering notifications.
#[derive(Error, Debug)]
pub enum NotificationError {
    /// Transport-level HTTP failure (connect, timeout, body).
    #[error("Mail API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The mail API answered with a non-success status.
    #[error("Mail API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Live delivery without an endpoint or key.
    #[error("Mail delivery is not configured: {0}")]
    NotConfigured(String),

    /// The referenced report no longer exists.
    #[error("Report {0} not found")]
    ReportNotFound(String),

    /// Some recipient groups still failed after their retries.
    #[error("Delivery failed for: {}", .0.join(", "))]
    Undelivered(Vec<String>),

    /// Delivery bookkeeping failed.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl NotificationError {
    /// Whether resending could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NotificationError::Http(_)
            | NotificationError::Undelivered(_)
            | NotificationError::Database(_) => true,
            NotificationError::Api { status, .. } => *status == 429 || *status >= 500,
            NotificationError::NotConfigured(_) | NotificationError::ReportNotFound(_) => false,
        }
    }
}
