//! Monetary value estimation for tasks.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::extractor::parse_number;

static RE_DOLLAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(k|mm|m|thousand|million)?\b").unwrap()
});
static RE_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*(?:%|percent\b)").unwrap());

/// First dollar amount in `text`, e.g. `$12,500`, `$1.2M`, `$40k`.
pub fn parse_dollar_amount(text: &str) -> Option<f64> {
    let caps = RE_DOLLAR.captures(text)?;
    let base: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(s) if s == "k" || s == "thousand" => 1_000.0,
        Some(s) if s == "m" || s == "mm" || s == "million" => 1_000_000.0,
        _ => 1.0,
    };
    Some(base * multiplier)
}

/// First percentage in `text` as a fraction (`3%` → `0.03`).
pub fn parse_percentage(text: &str) -> Option<f64> {
    let caps = RE_PERCENT.captures(text)?;
    caps.get(1)?.as_str().parse::<f64>().ok().map(|p| p / 100.0)
}

/// Fallback value when nothing can be parsed; more urgent tasks are
/// assumed to protect more money.
pub fn default_value(priority: u8) -> f64 {
    match priority {
        0 | 1 => 5000.0,
        2 => 2500.0,
        3 => 1000.0,
        4 => 500.0,
        _ => 250.0,
    }
}

fn from_text(text: &str, base_revenue: Option<f64>) -> Option<f64> {
    if let Some(amount) = parse_dollar_amount(text) {
        return Some(amount);
    }
    match (parse_percentage(text), base_revenue) {
        (Some(fraction), Some(base)) if base > 0.0 => Some(fraction * base),
        _ => None,
    }
}

/// Estimates a task's value. The provider's own figure wins when it can be
/// read; then the task text; then the priority default. Never negative.
pub fn estimate(
    provided: Option<&Value>,
    context: &str,
    priority: u8,
    base_revenue: Option<f64>,
) -> f64 {
    let from_provider = match provided {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => from_text(s, base_revenue).or_else(|| {
            if s.contains('%') {
                None
            } else {
                parse_number(s.trim())
            }
        }),
        _ => None,
    };

    let value = from_provider
        .filter(|v| v.is_finite())
        .or_else(|| from_text(context, base_revenue))
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| default_value(priority));

    round_cents(value.max(0.0))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dollar_amounts() {
        assert_eq!(parse_dollar_amount("recover $12,500 in late fees"), Some(12500.0));
        assert_eq!(parse_dollar_amount("about $1.2M annually"), Some(1_200_000.0));
        assert_eq!(parse_dollar_amount("$40k"), Some(40_000.0));
        assert_eq!(parse_dollar_amount("$ 300.50"), Some(300.5));
        assert_eq!(parse_dollar_amount("no money here"), None);
    }

    #[test]
    fn test_insight_text_with_dollar_amount() {
        let value = estimate(None, "Delinquent balance of \"$12,500\" outstanding", 3, None);
        assert_eq!(value, 12500.0);
    }

    #[test]
    fn test_percentage_of_base_revenue() {
        assert_eq!(estimate(Some(&json!("3% of revenue")), "", 3, Some(100_000.0)), 3000.0);
        // Without a base, percentages cannot be priced.
        assert_eq!(estimate(Some(&json!("3% of revenue")), "", 3, None), 1000.0);
    }

    #[test]
    fn test_numeric_and_negative_values() {
        assert_eq!(estimate(Some(&json!(750.257)), "", 2, None), 750.26);
        assert_eq!(estimate(Some(&json!(-50)), "", 2, None), 0.0);
        assert_eq!(estimate(Some(&json!("2,000")), "", 2, None), 2000.0);
    }

    #[test]
    fn test_priority_defaults() {
        assert_eq!(estimate(None, "call the vendor", 1, None), 5000.0);
        assert_eq!(estimate(Some(&json!(null)), "", 5, None), 250.0);
        assert!(default_value(2) > default_value(4));
    }
}
