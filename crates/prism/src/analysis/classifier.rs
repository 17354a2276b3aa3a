//! First provider call: assign a document type.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use tracing::info_span;
use tracing::Instrument;

use crate::llm::{extract_json, CompletionRequest, LanguageModel, TokenUsage};
use crate::model::{Classification, DocumentType};

const SYSTEM_PROMPT: &str = "You classify property-management documents. \
Answer with a single JSON object and nothing else: \
{\"documentType\": \"financial\" | \"rent_roll\" | \"lease\" | \"maintenance\" | \"other\", \
\"confidence\": number between 0 and 1, \
\"propertyName\": string or null, \"reportPeriod\": string or null}";

/// Confidence ceiling for a type the provider named but we do not know.
const UNKNOWN_TYPE_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub classification: Classification,
    pub provider: Option<String>,
    pub usage: TokenUsage,
    /// Set when the fallback classification was used, with the reason.
    pub fallback_reason: Option<String>,
}

impl ClassificationOutcome {
    fn fallback(reason: String, provider: Option<String>, usage: TokenUsage) -> Self {
        Self {
            classification: Classification::fallback(),
            provider,
            usage,
            fallback_reason: Some(reason),
        }
    }
}

pub struct Classifier {
    model: Arc<dyn LanguageModel>,
    sample_chars: usize,
}

impl Classifier {
    pub fn new(model: Arc<dyn LanguageModel>, sample_chars: usize) -> Self {
        Self {
            model,
            sample_chars,
        }
    }

    /// Never fails: provider errors and unreadable answers yield a
    /// low-confidence `other` classification.
    pub async fn classify(&self, sample: &str, filename: &str) -> ClassificationOutcome {
        let sample = crate::extractor::truncate_chars(sample, self.sample_chars);
        let prompt = format!("Filename: {}\n\nContent sample:\n{}", filename, sample);
        let mut request = CompletionRequest::new(SYSTEM_PROMPT, prompt);
        request.max_tokens = Some(300);

        let completion = match self
            .model
            .complete(&request)
            .instrument(info_span!("classify_call"))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Classification unavailable, using fallback: {}", e);
                return ClassificationOutcome::fallback(e.to_string(), None, TokenUsage::default());
            }
        };

        match parse_classification(&completion.text) {
            Some(classification) => {
                info!(
                    "Classified as {} ({:.2}) by {}",
                    classification.document_type,
                    classification.confidence,
                    completion.provider
                );
                ClassificationOutcome {
                    classification,
                    provider: Some(completion.provider),
                    usage: completion.usage,
                    fallback_reason: None,
                }
            }
            None => {
                warn!(
                    "Provider '{}' returned an unreadable classification",
                    completion.provider
                );
                ClassificationOutcome::fallback(
                    "classification response was not valid JSON".to_string(),
                    Some(completion.provider),
                    completion.usage,
                )
            }
        }
    }
}

fn field<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

/// Reads the provider's JSON answer. `None` when no object with a
/// document type can be recovered.
pub fn parse_classification(text: &str) -> Option<Classification> {
    let obj = extract_json(text)?;
    let raw_type = field(&obj, &["documentType", "document_type", "type"])?.as_str()?;

    let confidence = match field(&obj, &["confidence", "score"]) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().map_or(0.5, |v| {
            if v > 1.0 {
                v / 100.0
            } else {
                v
            }
        }),
        _ => 0.5,
    };

    let classification = match raw_type.parse::<DocumentType>() {
        Ok(doc_type) => Classification::new(doc_type, confidence),
        Err(_) => {
            debug!("Unknown document type '{}', treating as other", raw_type);
            Classification::new(DocumentType::Other, confidence.min(UNKNOWN_TYPE_CONFIDENCE))
        }
    };

    Some(
        classification
            .with_property(non_empty_string(field(&obj, &["propertyName", "property_name", "property"])))
            .with_period(non_empty_string(field(&obj, &["reportPeriod", "report_period", "period"]))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, LlmError};
    use async_trait::async_trait;

    struct Fixed(Result<&'static str, ()>);

    #[async_trait]
    impl LanguageModel for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
            match self.0 {
                Ok(text) => Ok(Completion {
                    text: text.to_string(),
                    provider: "fixed".to_string(),
                    usage: TokenUsage {
                        input_tokens: 10,
                        output_tokens: 5,
                    },
                }),
                Err(()) => Err(LlmError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
            }
        }
    }

    #[test]
    fn test_parse_full_answer() {
        let c = parse_classification(
            r#"```json
{"documentType": "rent_roll", "confidence": 0.92, "propertyName": "Maple Court", "reportPeriod": "2024-03"}
```"#,
        )
        .unwrap();
        assert_eq!(c.document_type, DocumentType::RentRoll);
        assert_eq!(c.confidence, 0.92);
        assert_eq!(c.property_name.as_deref(), Some("Maple Court"));
        assert_eq!(c.report_period.as_deref(), Some("2024-03"));
    }

    #[test]
    fn test_parse_percent_confidence_and_unknown_type() {
        let c = parse_classification(r#"{"type": "brochure", "confidence": "85%"}"#).unwrap();
        assert_eq!(c.document_type, DocumentType::Other);
        assert_eq!(c.confidence, 0.3);
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_classification("It looks like a lease to me.").is_none());
        assert!(parse_classification(r#"{"confidence": 0.4}"#).is_none());
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let classifier = Classifier::new(Arc::new(Fixed(Err(()))), 100);
        let outcome = classifier.classify("a,b\n1,2", "x.csv").await;
        assert_eq!(outcome.classification, Classification::fallback());
        assert!(outcome.fallback_reason.is_some());
        assert!(outcome.provider.is_none());
    }

    #[tokio::test]
    async fn test_malformed_answer_falls_back_but_keeps_usage() {
        let classifier = Classifier::new(Arc::new(Fixed(Ok("not json"))), 100);
        let outcome = classifier.classify("text", "notes.txt").await;
        assert!(outcome.classification.is_degraded());
        assert_eq!(outcome.provider.as_deref(), Some("fixed"));
        assert_eq!(outcome.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn test_successful_classification() {
        let classifier = Classifier::new(
            Arc::new(Fixed(Ok(r#"{"documentType":"financial","confidence":0.8}"#))),
            100,
        );
        let outcome = classifier.classify("GL Account,Description", "pl.csv").await;
        assert_eq!(outcome.classification.document_type, DocumentType::Financial);
        assert!(outcome.fallback_reason.is_none());
    }
}
