//! Turns an insight bundle into clamped, role-assigned tasks.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;

use super::{roles, value};
use crate::extractor::truncate_chars;
use crate::model::{
    max_due_days, InsightBundle, InsightItem, InsightKind, ProposedTask, Task, TaskStatus,
    MAX_TASK_HOURS, MIN_TASK_HOURS,
};

const DEFAULT_PRIORITY: u8 = 3;
const DEFAULT_HOURS: f64 = 2.0;
const TITLE_CHARS: usize = 80;

/// Due-date offset used when the provider's date is missing or unusable.
fn default_due_days(priority: u8) -> i64 {
    match priority {
        0 | 1 => 1,
        2 => 3,
        3 => 7,
        _ => 14,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive()))
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Keeps a provider date only when it lies in `[today, today + max]`.
fn clamp_due_date(raw: Option<&str>, priority: u8, today: NaiveDate) -> NaiveDate {
    let latest = today + Duration::days(max_due_days(priority));
    raw.and_then(parse_due_date)
        .filter(|d| *d >= today && *d <= latest)
        .unwrap_or_else(|| today + Duration::days(default_due_days(priority)))
}

fn clamp_hours(hours: Option<f64>) -> f64 {
    match hours {
        Some(h) if h.is_finite() => h.clamp(MIN_TASK_HOURS, MAX_TASK_HOURS),
        _ => DEFAULT_HOURS,
    }
}

fn clamp_priority(priority: Option<i64>) -> u8 {
    priority.map_or(DEFAULT_PRIORITY, |p| p.clamp(1, 5) as u8)
}

/// Template used when no proposed task covers a high-priority item.
fn template_for(kind: InsightKind, item: &InsightItem) -> (String, u8, f64) {
    let short = truncate_chars(item.text.trim(), TITLE_CHARS);
    match kind {
        InsightKind::Risk => (format!("Mitigate risk: {}", short), 1, 4.0),
        InsightKind::Finding => (format!("Review finding: {}", short), 2, 2.0),
        InsightKind::Opportunity => (format!("Capture opportunity: {}", short), 2, 3.0),
    }
}

pub struct TaskSynthesizer {
    base_revenue: Option<f64>,
}

impl TaskSynthesizer {
    /// `base_revenue` prices percentage values when the document itself
    /// provides no revenue figure.
    pub fn new(base_revenue: Option<f64>) -> Self {
        Self { base_revenue }
    }

    /// Produces the report's tasks. Every high-priority finding, risk and
    /// opportunity ends up referenced by at least one task.
    pub fn synthesize(
        &self,
        report_id: &str,
        bundle: &InsightBundle,
        document_revenue: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<Task> {
        let today = now.date_naive();
        let base_revenue = document_revenue.or(self.base_revenue);
        let high_priority = bundle.insight.high_priority_items();

        let mut tasks: Vec<Task> = bundle
            .action_items
            .iter()
            .filter_map(|proposed| {
                self.from_proposed(report_id, proposed, &bundle.insight, base_revenue, now)
            })
            .collect();

        for (kind, item) in high_priority {
            let key = normalize(&item.text);
            let covered = tasks
                .iter()
                .any(|t| t.source_insight.as_deref().map(normalize).as_deref() == Some(key.as_str()));
            if covered {
                continue;
            }

            let (title, priority, hours) = template_for(kind, item);
            debug!("Generating task for uncovered high-priority item: {}", title);
            tasks.push(Task {
                id: uuid::Uuid::new_v4().to_string(),
                report_id: report_id.to_string(),
                title,
                description: item.text.clone(),
                priority,
                assigned_role: roles::role_for(&item.text),
                due_date: today + Duration::days(default_due_days(priority)),
                estimated_hours: hours,
                potential_value: value::estimate(None, &item.text, priority, base_revenue),
                source_insight: Some(item.text.clone()),
                status: TaskStatus::Pending,
                created_at: now,
                completed_at: None,
            });
        }

        tasks
    }

    fn from_proposed(
        &self,
        report_id: &str,
        proposed: &ProposedTask,
        insight: &crate::model::Insight,
        base_revenue: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        let title = match proposed.title.trim() {
            "" => truncate_chars(proposed.description.trim(), TITLE_CHARS),
            t => t.to_string(),
        };
        if title.is_empty() {
            return None;
        }

        let priority = clamp_priority(proposed.priority);
        let context = format!("{} {}", title, proposed.description);
        // The provider's suggested role is kept on the bundle only; routing
        // always goes through the keyword table.
        let assigned_role = roles::role_for(&context);

        let source_insight = proposed
            .source_insight
            .as_deref()
            .map(|s| canonical_source(s, insight));

        Some(Task {
            id: uuid::Uuid::new_v4().to_string(),
            report_id: report_id.to_string(),
            title,
            description: proposed.description.trim().to_string(),
            priority,
            assigned_role,
            due_date: clamp_due_date(proposed.due_date.as_deref(), priority, now.date_naive()),
            estimated_hours: clamp_hours(proposed.estimated_hours),
            potential_value: value::estimate(
                proposed.potential_value.as_ref(),
                &context,
                priority,
                base_revenue,
            ),
            source_insight,
            status: TaskStatus::Pending,
            created_at: now,
            completed_at: None,
        })
    }
}

/// Maps a provider reference onto the exact item text when it names one,
/// ignoring case and whitespace.
fn canonical_source(reference: &str, insight: &crate::model::Insight) -> String {
    let key = normalize(reference);
    insight
        .key_findings
        .iter()
        .chain(&insight.risks)
        .chain(&insight.opportunities)
        .find(|item| normalize(&item.text) == key)
        .map(|item| item.text.clone())
        .unwrap_or_else(|| reference.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Insight, InsightPriority, Role};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn bundle(insight: Insight, action_items: Vec<ProposedTask>) -> InsightBundle {
        InsightBundle {
            insight,
            action_items,
            provider: Some("test".into()),
            degraded: false,
        }
    }

    fn insight_with(risks: Vec<InsightItem>, opportunities: Vec<InsightItem>) -> Insight {
        Insight {
            summary: "s".into(),
            key_findings: vec![],
            trends: vec![],
            risks,
            opportunities,
            confidence: 0.8,
        }
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let proposed = ProposedTask {
            title: "Fix boiler".into(),
            priority: Some(9),
            due_date: Some("2031-01-01".into()),
            estimated_hours: Some(400.0),
            potential_value: Some(json!(-100)),
            ..Default::default()
        };
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &bundle(insight_with(vec![], vec![]), vec![proposed]),
            None,
            now(),
        );
        let task = &tasks[0];
        assert_eq!(task.priority, 5);
        assert_eq!(task.estimated_hours, MAX_TASK_HOURS);
        assert_eq!(task.potential_value, 0.0);
        assert_eq!(task.assigned_role, Role::Maintenance);
        let today = now().date_naive();
        assert!(task.due_date >= today && task.due_date <= today + Duration::days(30));
    }

    #[test]
    fn test_valid_due_date_is_kept_and_tiny_hours_raised() {
        let proposed = ProposedTask {
            title: "Send invoice".into(),
            priority: Some(3),
            due_date: Some("2024-06-10".into()),
            estimated_hours: Some(0.1),
            ..Default::default()
        };
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &bundle(insight_with(vec![], vec![]), vec![proposed]),
            None,
            now(),
        );
        assert_eq!(tasks[0].due_date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(tasks[0].estimated_hours, MIN_TASK_HOURS);
        assert_eq!(tasks[0].assigned_role, Role::Accounting);
    }

    #[test]
    fn test_keyword_table_decides_role_over_provider_suggestion() {
        let proposed = ProposedTask {
            title: "Patch roof leak over unit 4B".into(),
            assigned_role: Some("cfo".into()),
            ..Default::default()
        };
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &bundle(insight_with(vec![], vec![]), vec![proposed]),
            None,
            now(),
        );
        assert_eq!(tasks[0].assigned_role, Role::Maintenance);
    }

    #[test]
    fn test_past_due_date_is_recomputed() {
        let proposed = ProposedTask {
            title: "Call".into(),
            priority: Some(1),
            due_date: Some("2020-01-01".into()),
            ..Default::default()
        };
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &bundle(insight_with(vec![], vec![]), vec![proposed]),
            None,
            now(),
        );
        let today = now().date_naive();
        assert!(tasks[0].due_date >= today);
        assert!(tasks[0].due_date <= today + Duration::days(3));
    }

    #[test]
    fn test_every_high_priority_item_gets_a_task() {
        let insight = insight_with(
            vec![
                InsightItem::new("HVAC failure risk in building A", InsightPriority::High),
                InsightItem::new("Minor paint wear", InsightPriority::Low),
            ],
            vec![InsightItem::new(
                "Raise below-market rents by 3%",
                InsightPriority::High,
            )],
        );
        let covering = ProposedTask {
            title: "Replace HVAC compressor".into(),
            source_insight: Some("  hvac failure RISK in building a ".into()),
            ..Default::default()
        };
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &bundle(insight, vec![covering]),
            Some(200_000.0),
            now(),
        );

        assert_eq!(tasks.len(), 2);
        assert_eq!(
            tasks[0].source_insight.as_deref(),
            Some("HVAC failure risk in building A")
        );
        let generated = &tasks[1];
        assert_eq!(
            generated.source_insight.as_deref(),
            Some("Raise below-market rents by 3%")
        );
        assert!(generated.title.starts_with("Capture opportunity"));
        assert_eq!(generated.potential_value, 6000.0);
        assert_eq!(generated.assigned_role, Role::PropertyManager);
    }

    #[test]
    fn test_degraded_bundle_yields_no_tasks() {
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &InsightBundle::degraded("raw", None),
            None,
            now(),
        );
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_dollar_value_from_description() {
        let proposed = ProposedTask {
            title: "Collect delinquent rent".into(),
            description: "Outstanding balance is $12,500".into(),
            priority: Some(2),
            ..Default::default()
        };
        let tasks = TaskSynthesizer::new(None).synthesize(
            "r1",
            &bundle(insight_with(vec![], vec![]), vec![proposed]),
            None,
            now(),
        );
        assert_eq!(tasks[0].potential_value, 12500.0);
    }
}
