use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{build_client, check_response};
use super::{Completion, CompletionRequest, LanguageModel, LlmError, TokenUsage};
use crate::config::ProviderConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    name: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    api_key: SecretString,
    http: reqwest::Client,
}

impl AnthropicClient {
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

    fn body(&self, request: &CompletionRequest) -> Value {
        request_body(&self.model, request.max_tokens.unwrap_or(self.max_tokens), request)
    }
}

fn request_body(model: &str, max_tokens: u32, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": request.temperature,
        "system": request.system,
        "messages": [
            { "role": "user", "content": request.prompt }
        ],
    })
}

/// Concatenates the text blocks of a Messages response.
fn parse_response(body: &Value) -> Result<(String, TokenUsage), LlmError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::InvalidResponse("missing 'content' array".to_string()))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    let usage = TokenUsage {
        input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };
    Ok((text, usage))
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&self.body(request))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = CompletionRequest::new("be terse", "classify this");
        let body = request_body("claude-test", 512, &request);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "classify this");
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let body = json!({
            "content": [
                { "type": "text", "text": "{\"a\":" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "1}" }
            ],
            "usage": { "input_tokens": 12, "output_tokens": 3 }
        });
        let (text, usage) = parse_response(&body).unwrap();
        assert_eq!(text, "{\"a\":1}");
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 3);
    }

    #[test]
    fn test_parse_response_without_content() {
        let err = parse_response(&json!({ "error": "x" })).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
