//! Second provider call: summary, findings, risks, opportunities and
//! proposed action items.

use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};
use tracing::{info_span, Instrument};

use crate::extractor::{truncate_chars, ExtractedData};
use crate::llm::{extract_json, CompletionRequest, LanguageModel, TokenUsage};
use crate::model::classification::clamp_unit;
use crate::model::{
    Classification, DocumentType, Insight, InsightBundle, InsightItem, InsightPriority,
    ProposedTask,
};

const TEXT_SAMPLE_CHARS: usize = 6000;

const RESPONSE_SHAPE: &str = "Answer with one JSON object and nothing else: \
{\"summary\": string, \
\"keyFindings\": [{\"text\": string, \"priority\": \"high\"|\"medium\"|\"low\"}], \
\"trends\": [string], \
\"risks\": [{\"text\": string, \"priority\": \"high\"|\"medium\"|\"low\"}], \
\"opportunities\": [{\"text\": string, \"priority\": \"high\"|\"medium\"|\"low\"}], \
\"confidence\": number between 0 and 1, \
\"actionItems\": [{\"title\": string, \"description\": string, \"priority\": 1-5, \
\"assignedRole\": \"cfo\"|\"maintenance\"|\"accounting\"|\"leasing\"|\"property_manager\", \
\"dueDate\": \"YYYY-MM-DD\", \"estimatedHours\": number, \"potentialValue\": number or string, \
\"sourceInsight\": text of the finding, risk or opportunity it addresses}]}";

fn focus_for(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Financial => {
            "You review property financial statements. Focus on revenue, expense variances, NOI and budget risk."
        }
        DocumentType::RentRoll => {
            "You review rent rolls. Focus on occupancy, vacancies, below-market rents and lease expirations."
        }
        DocumentType::Lease => {
            "You review commercial and residential leases. Focus on key dates, rent escalations and obligations."
        }
        DocumentType::Maintenance => {
            "You review maintenance logs. Focus on open work orders, recurring issues, cost and response time."
        }
        DocumentType::Other => {
            "You review property-management documents. Summarize what the document contains and anything actionable."
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightOutcome {
    pub bundle: InsightBundle,
    pub usage: TokenUsage,
}

pub struct InsightGenerator {
    model: Arc<dyn LanguageModel>,
    sample_rows: usize,
}

impl InsightGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, sample_rows: usize) -> Self {
        Self { model, sample_rows }
    }

    fn build_prompt(&self, data: &ExtractedData, classification: &Classification) -> String {
        let records: Vec<_> = data.table.records().into_iter().take(self.sample_rows).collect();
        let mut context = json!({
            "documentType": classification.document_type,
            "propertyName": classification.property_name,
            "reportPeriod": classification.report_period,
            "columns": data.table.headers,
            "rowCount": data.table.rows.len(),
            "structured": data.structured,
            "sampleRows": records,
            "dataQuality": data.data_quality,
        });
        if data.table.is_empty() {
            if let Some(text) = &data.text {
                context["text"] = Value::String(truncate_chars(text, TEXT_SAMPLE_CHARS));
            }
            if let Some(note) = &data.metadata.note {
                context["note"] = Value::String(note.clone());
            }
        }
        format!("Document data:\n{}", context)
    }

    /// Never fails: a provider error or unreadable answer yields a single
    /// low-confidence insight carrying whatever text came back.
    pub async fn analyze(
        &self,
        data: &ExtractedData,
        classification: &Classification,
    ) -> InsightOutcome {
        let system = format!("{} {}", focus_for(classification.document_type), RESPONSE_SHAPE);
        let request = CompletionRequest::new(system, self.build_prompt(data, classification));

        let completion = match self
            .model
            .complete(&request)
            .instrument(info_span!("insight_call"))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Insight generation unavailable, degrading: {}", e);
                return InsightOutcome {
                    bundle: InsightBundle::degraded("", None),
                    usage: TokenUsage::default(),
                };
            }
        };

        let bundle = match parse_insight_response(&completion.text) {
            Some((insight, action_items)) => InsightBundle {
                insight,
                action_items,
                provider: Some(completion.provider),
                degraded: false,
            },
            None => {
                warn!(
                    "Provider '{}' returned unreadable insights, keeping raw text",
                    completion.provider
                );
                InsightBundle::degraded(&completion.text, Some(completion.provider))
            }
        };

        InsightOutcome {
            bundle,
            usage: completion.usage,
        }
    }
}

fn field<'a>(obj: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn text_of(value: &Value, names: &[&str]) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => field(value, names)?.as_str()?.to_string(),
        _ => return None,
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn priority_of(value: Option<&Value>) -> InsightPriority {
    match value {
        Some(Value::String(s)) => InsightPriority::parse_lenient(s),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(p) if p <= 1.0 => InsightPriority::High,
            Some(p) if p <= 2.0 => InsightPriority::Medium,
            Some(_) => InsightPriority::Low,
            None => InsightPriority::Medium,
        },
        _ => InsightPriority::Medium,
    }
}

fn items(obj: &Value, names: &[&str]) -> Vec<InsightItem> {
    let Some(Value::Array(values)) = field(obj, names) else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|v| {
            let text = text_of(
                v,
                &["text", "finding", "risk", "opportunity", "description", "title"],
            )?;
            let priority = priority_of(field(v, &["priority", "severity", "impact"]));
            Some(InsightItem::new(text, priority))
        })
        .collect()
}

/// Task priority from a number (`1`..`5`), a numeric string, or a word.
fn task_priority(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_f64().map(|p| p.round() as i64),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            s.parse::<i64>().ok().or(match s.as_str() {
                "critical" | "urgent" => Some(1),
                "high" => Some(2),
                "medium" | "normal" => Some(3),
                "low" => Some(4),
                "minor" => Some(5),
                _ => None,
            })
        }
        _ => None,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => crate::extractor::parse_number(s.trim()),
        _ => None,
    }
}

fn proposed_task(value: &Value) -> Option<ProposedTask> {
    let title = text_of(value, &["title", "task", "name", "action"])?;
    let string_field = |names: &[&str]| {
        field(value, names)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(ProposedTask {
        title,
        description: string_field(&["description", "details"]).unwrap_or_default(),
        priority: task_priority(field(value, &["priority"])),
        assigned_role: string_field(&["assignedRole", "assigned_role", "role"]),
        due_date: string_field(&["dueDate", "due_date", "due"]),
        estimated_hours: number(field(value, &["estimatedHours", "estimated_hours", "hours"])),
        potential_value: field(value, &["potentialValue", "potential_value", "value"]).cloned(),
        source_insight: string_field(&["sourceInsight", "source_insight", "insight"]),
    })
}

/// Reads the provider's JSON answer. Missing arrays become empty lists;
/// `None` when no object with a summary or any findings is present.
pub fn parse_insight_response(text: &str) -> Option<(Insight, Vec<ProposedTask>)> {
    let obj = extract_json(text)?;

    let key_findings = items(&obj, &["keyFindings", "key_findings", "findings"]);
    let risks = items(&obj, &["risks"]);
    let opportunities = items(&obj, &["opportunities"]);
    let trends: Vec<String> = match field(&obj, &["trends"]) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| text_of(v, &["text", "trend", "description"]))
            .collect(),
        _ => Vec::new(),
    };

    let summary = field(&obj, &["summary", "executiveSummary"])
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if summary.is_none() && key_findings.is_empty() && risks.is_empty() && opportunities.is_empty() {
        return None;
    }

    let confidence = number(field(&obj, &["confidence"]))
        .map(|c| if c > 1.0 { c / 100.0 } else { c })
        .map(clamp_unit)
        .unwrap_or(0.7);

    let action_items = match field(&obj, &["actionItems", "action_items", "tasks"]) {
        Some(Value::Array(values)) => values.iter().filter_map(proposed_task).collect(),
        _ => Vec::new(),
    };

    let insight = Insight {
        summary: summary.unwrap_or_else(|| "No summary provided.".to_string()),
        key_findings,
        trends,
        risks,
        opportunities,
        confidence,
    };
    Some((insight, action_items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractorRegistry, FileFormat, FileMetadata, RawContent};
    use crate::llm::{Completion, LlmError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        reply: Option<&'static str>,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LanguageModel for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.prompts.lock().unwrap().push(request.clone());
            match self.reply {
                Some(text) => Ok(Completion {
                    text: text.to_string(),
                    provider: "recording".to_string(),
                    usage: TokenUsage::default(),
                }),
                None => Err(LlmError::NotConfigured),
            }
        }
    }

    fn sample_data() -> ExtractedData {
        let raw = RawContent {
            format: FileFormat::Text,
            table: Default::default(),
            text: Some("Roof leak reported in building B".to_string()),
            metadata: FileMetadata::default(),
        };
        ExtractedData::from_raw(raw, &Classification::new(DocumentType::Maintenance, 0.9))
    }

    #[test]
    fn test_parse_mixed_item_shapes() {
        let (insight, tasks) = parse_insight_response(
            r#"{
                "summary": "Occupancy is slipping",
                "keyFindings": ["Two units vacant", {"text": "Rent below market", "priority": "high"}],
                "trends": null,
                "risks": [{"risk": "Lease expirations cluster in Q3", "severity": "HIGH"}],
                "confidence": 0.8,
                "actionItems": [{"title": "Call tenants", "priority": "high", "estimatedHours": "3"}]
            }"#,
        )
        .unwrap();
        assert_eq!(insight.key_findings.len(), 2);
        assert_eq!(insight.key_findings[0].priority, InsightPriority::Medium);
        assert_eq!(insight.key_findings[1].priority, InsightPriority::High);
        assert_eq!(insight.risks[0].text, "Lease expirations cluster in Q3");
        assert!(insight.trends.is_empty());
        assert!(insight.opportunities.is_empty());
        assert_eq!(tasks[0].priority, Some(2));
        assert_eq!(tasks[0].estimated_hours, Some(3.0));
    }

    #[test]
    fn test_parse_rejects_empty_object() {
        assert!(parse_insight_response("{}").is_none());
        assert!(parse_insight_response("I am unable to help").is_none());
    }

    #[test]
    fn test_confidence_percentages_are_scaled() {
        let (insight, _) = parse_insight_response(r#"{"summary":"s","confidence":85}"#).unwrap();
        assert!((insight.confidence - 0.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unreadable_answer_degrades_with_raw_text() {
        let model = Arc::new(Recording {
            reply: Some("The roof needs work."),
            prompts: Mutex::new(Vec::new()),
        });
        let generator = InsightGenerator::new(model.clone(), 10);
        let data = sample_data();
        let outcome = generator
            .analyze(&data, &Classification::new(DocumentType::Maintenance, 0.9))
            .await;

        assert!(outcome.bundle.degraded);
        assert_eq!(outcome.bundle.insight.summary, "The roof needs work.");
        assert_eq!(outcome.bundle.provider.as_deref(), Some("recording"));

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].system.contains("maintenance logs"));
        assert!(prompts[0].prompt.contains("Roof leak"));
    }

    #[tokio::test]
    async fn test_provider_failure_degrades() {
        let model = Arc::new(Recording {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        });
        let generator = InsightGenerator::new(model, 10);
        let outcome = generator
            .analyze(&sample_data(), &Classification::fallback())
            .await;
        assert!(outcome.bundle.degraded);
        assert!(outcome.bundle.provider.is_none());
        assert!(outcome.bundle.action_items.is_empty());
    }

    #[test]
    fn test_registry_output_feeds_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wo.csv");
        std::fs::write(&path, "Category,Status,Cost\nHVAC,Open,100\n").unwrap();
        let data = ExtractorRegistry::new()
            .extract(&path, &Classification::new(DocumentType::Maintenance, 0.9))
            .unwrap();
        let generator = InsightGenerator::new(
            Arc::new(Recording {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            }),
            5,
        );
        let prompt = generator.build_prompt(&data, &Classification::new(DocumentType::Maintenance, 0.9));
        assert!(prompt.contains("\"sampleRows\""));
        assert!(prompt.contains("HVAC"));
    }
}
