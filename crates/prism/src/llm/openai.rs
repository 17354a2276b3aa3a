use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{build_client, check_response};
use super::{Completion, CompletionRequest, LanguageModel, LlmError, TokenUsage};
use crate::config::ProviderConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    name: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    api_key: SecretString,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig, api_key: SecretString) -> Result<Self, LlmError> {
        Ok(Self {
            name: config.display_name(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_tokens: config.max_tokens,
            api_key,
            http: build_client(config.timeout_secs)?,
        })
    }
}

fn request_body(model: &str, max_tokens: u32, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": request.temperature,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt }
        ],
    })
}

fn parse_response(body: &Value) -> Result<(String, TokenUsage), LlmError> {
    let text = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?;

    let usage = TokenUsage {
        input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };
    Ok((text.to_string(), usage))
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = request_body(
            &self.model,
            request.max_tokens.unwrap_or(self.max_tokens),
            request,
        );
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let body: Value = resp.json().await?;
        let (text, usage) = parse_response(&body)?;

        Ok(Completion {
            text,
            provider: self.name.clone(),
            usage,
        })
    }
}
