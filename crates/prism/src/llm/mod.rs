//! Language-model providers behind a single async trait.
//!
//! Two HTTP backends are available (Anthropic Messages and OpenAI-compatible
//! Chat Completions). [`ProviderChain`] wraps the configured providers and
//! falls over to the next one when a call fails.

mod anthropic;
mod chain;
mod error;
mod http;
pub mod json;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ConfigError;
use crate::secrets::resolve_secret;

pub use anthropic::AnthropicClient;
pub use chain::ProviderChain;
pub use error::LlmError;
pub use json::extract_json;
pub use openai::OpenAiClient;

/// One prompt sent to a provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    /// Overrides the provider's configured `max_tokens` when set.
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Name of the provider that produced the text.
    pub provider: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

/// Builds a client for every configured provider, in order. API keys are
/// resolved here so a missing key fails at start-up rather than per call.
pub fn build_providers(
    configs: &[ProviderConfig],
) -> Result<Vec<Arc<dyn LanguageModel>>, ConfigError> {
    let mut providers: Vec<Arc<dyn LanguageModel>> = Vec::with_capacity(configs.len());

    for config in configs {
        let name = config.display_name();
        let api_key = resolve_secret(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env_var.as_deref(),
        )
        .map_err(|source| ConfigError::Secret {
            name: format!("provider '{}'", name),
            source,
        })?;

        let client: Arc<dyn LanguageModel> = match config.kind {
            ProviderKind::Anthropic => Arc::new(
                AnthropicClient::new(config, api_key).map_err(|e| ConfigError::Validation {
                    message: format!("provider '{}': {}", name, e),
                })?,
            ),
            ProviderKind::Openai => Arc::new(
                OpenAiClient::new(config, api_key).map_err(|e| ConfigError::Validation {
                    message: format!("provider '{}': {}", name, e),
                })?,
            ),
        };
        debug!("Configured provider '{}' ({})", name, config.model);
        providers.push(client);
    }

    Ok(providers)
}
