use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("No language-model provider is configured")]
    NotConfigured,

    #[error("All providers failed: {}", .0.join("; "))]
    AllProvidersFailed(Vec<String>),
}

impl LlmError {
    /// Whether another attempt later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::RateLimited { .. } => true,
            LlmError::AllProvidersFailed(_) => true,
            LlmError::InvalidResponse(_) | LlmError::NotConfigured => false,
        }
    }
}
