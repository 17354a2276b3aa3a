use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightPriority {
    High,
    Medium,
    Low,
}

impl InsightPriority {
    /// Lenient parse of provider output; anything unrecognised is `Medium`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" | "urgent" | "1" => InsightPriority::High,
            "low" | "minor" | "3" => InsightPriority::Low,
            _ => InsightPriority::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightPriority::High => "high",
            InsightPriority::Medium => "medium",
            InsightPriority::Low => "low",
        }
    }
}

/// A single finding, risk or opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightItem {
    pub text: String,
    pub priority: InsightPriority,
}

impl InsightItem {
    pub fn new(text: impl Into<String>, priority: InsightPriority) -> Self {
        Self {
            text: text.into(),
            priority,
        }
    }
}

/// Which list of the insight an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightKind {
    Finding,
    Risk,
    Opportunity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<InsightItem>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub risks: Vec<InsightItem>,
    #[serde(default)]
    pub opportunities: Vec<InsightItem>,
    pub confidence: f64,
}

impl Insight {
    /// Single low-confidence insight carrying whatever the provider said.
    pub fn degraded(raw_text: &str) -> Self {
        let trimmed = raw_text.trim();
        let summary = if trimmed.is_empty() {
            "Automated analysis was unavailable for this document.".to_string()
        } else {
            trimmed.chars().take(2000).collect()
        };
        Self {
            summary,
            key_findings: Vec::new(),
            trends: Vec::new(),
            risks: Vec::new(),
            opportunities: Vec::new(),
            confidence: 0.1,
        }
    }

    /// All high-priority items across findings, risks and opportunities.
    pub fn high_priority_items(&self) -> Vec<(InsightKind, &InsightItem)> {
        let findings = self.key_findings.iter().map(|i| (InsightKind::Finding, i));
        let risks = self.risks.iter().map(|i| (InsightKind::Risk, i));
        let opportunities = self
            .opportunities
            .iter()
            .map(|i| (InsightKind::Opportunity, i));

        findings
            .chain(risks)
            .chain(opportunities)
            .filter(|(_, item)| item.priority == InsightPriority::High)
            .collect()
    }
}

/// Action item as proposed by the provider, before clamping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub assigned_role: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    /// Either a number or free text such as `"$12,500"` or `"3% of revenue"`.
    #[serde(default)]
    pub potential_value: Option<serde_json::Value>,
    #[serde(default)]
    pub source_insight: Option<String>,
}

/// Output of the insight generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightBundle {
    pub insight: Insight,
    #[serde(default)]
    pub action_items: Vec<ProposedTask>,
    /// Name of the provider that answered, if any.
    pub provider: Option<String>,
    pub degraded: bool,
}

impl InsightBundle {
    pub fn degraded(raw_text: &str, provider: Option<String>) -> Self {
        Self {
            insight: Insight::degraded(raw_text),
            action_items: Vec::new(),
            provider,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_priority() {
        assert_eq!(InsightPriority::parse_lenient("HIGH"), InsightPriority::High);
        assert_eq!(InsightPriority::parse_lenient(" critical "), InsightPriority::High);
        assert_eq!(InsightPriority::parse_lenient("low"), InsightPriority::Low);
        assert_eq!(InsightPriority::parse_lenient("whatever"), InsightPriority::Medium);
    }

    #[test]
    fn test_high_priority_items_span_all_lists() {
        let insight = Insight {
            summary: "s".into(),
            key_findings: vec![
                InsightItem::new("a", InsightPriority::High),
                InsightItem::new("b", InsightPriority::Low),
            ],
            trends: vec![],
            risks: vec![InsightItem::new("c", InsightPriority::High)],
            opportunities: vec![InsightItem::new("d", InsightPriority::High)],
            confidence: 0.8,
        };
        let items = insight.high_priority_items();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].0, InsightKind::Finding);
        assert_eq!(items[1].0, InsightKind::Risk);
        assert_eq!(items[2].0, InsightKind::Opportunity);
    }

    #[test]
    fn test_degraded_insight_keeps_raw_text() {
        let bundle = InsightBundle::degraded("the provider rambled", Some("anthropic".into()));
        assert!(bundle.degraded);
        assert_eq!(bundle.insight.summary, "the provider rambled");
        assert!(bundle.insight.key_findings.is_empty());
        assert!(bundle.action_items.is_empty());
        assert!(bundle.insight.confidence < 0.3);
    }

    #[test]
    fn test_missing_arrays_deserialize_empty() {
        let insight: Insight =
            serde_json::from_str(r#"{"summary":"ok","confidence":0.5}"#).unwrap();
        assert!(insight.risks.is_empty());
        assert!(insight.trends.is_empty());
    }
}
