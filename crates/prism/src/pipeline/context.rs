use serde::{Deserialize, Serialize};

use crate::llm::TokenUsage;
use crate::model::{Classification, InsightBundle, Task};

/// Payload of an analyze-lane job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeJob {
    pub report_id: String,
}

impl AnalyzeJob {
    pub fn new(report_id: impl Into<String>) -> Self {
        Self {
            report_id: report_id.into(),
        }
    }

    /// One analyze job per report, however often intake fires.
    pub fn dedupe_key(&self) -> String {
        format!("analyze:{}", self.report_id)
    }
}

/// Result of analysing one report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub report_id: String,
    pub classification: Classification,
    /// Extracted summary; absent when an earlier attempt's rows were reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<serde_json::Value>,
    pub bundle: InsightBundle,
    pub tasks: Vec<Task>,
    pub usage: TokenUsage,
    /// True when a previous attempt had already persisted this analysis.
    pub reused: bool,
}

impl Analysis {
    /// Whether any stage fell back to a low-confidence result.
    pub fn is_degraded(&self) -> bool {
        self.bundle.degraded || self.classification.is_degraded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_is_per_report() {
        assert_eq!(AnalyzeJob::new("r1").dedupe_key(), "analyze:r1");
        assert_ne!(AnalyzeJob::new("r1").dedupe_key(), AnalyzeJob::new("r2").dedupe_key());
    }

    #[test]
    fn test_payload_shape() {
        let value = serde_json::to_value(AnalyzeJob::new("r1")).unwrap();
        assert_eq!(value, serde_json::json!({"reportId": "r1"}));
    }
}
