use serde::{Deserialize, Serialize};

/// A single normalized cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Number(f64),
    Bool(bool),
    Text(String),
}

/// Coarse cell type used for the type-validity part of the quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Number,
    Bool,
    Text,
}

impl CellValue {
    /// Parses a raw textual cell. Accounting notation is understood:
    /// `$1,234.50`, `(500)` for negatives, `12%` as `0.12`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Empty;
        }
        match parse_number(trimmed) {
            Some(n) => CellValue::Number(n),
            None => CellValue::Text(trimmed.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn kind(&self) -> Option<CellKind> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(_) => Some(CellKind::Number),
            CellValue::Bool(_) => Some(CellKind::Bool),
            CellValue::Text(s) if s.trim().is_empty() => None,
            CellValue::Text(_) => Some(CellKind::Text),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_number(s.trim()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parses numbers written the way spreadsheets export them.
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() > 2 {
        negative = true;
        s = &s[1..s.len() - 1];
    }

    let mut percent = false;
    if let Some(stripped) = s.strip_suffix('%') {
        percent = true;
        s = stripped.trim_end();
    }

    if let Some(stripped) = s.strip_prefix('-') {
        negative = !negative;
        s = stripped.trim_start();
    }
    if let Some(stripped) = s.strip_prefix('$') {
        s = stripped.trim_start();
    }
    if let Some(stripped) = s.strip_prefix('-') {
        negative = !negative;
        s = stripped.trim_start();
    }

    if s.is_empty() || !s.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    // Thousands separators must sit between digits.
    let bytes = s.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b',' {
            let before = i > 0 && bytes[i - 1].is_ascii_digit();
            let after = bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit());
            if !before || !after {
                return None;
            }
        }
    }

    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E') {
        return None;
    }

    let mut value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if percent {
        value /= 100.0;
    }
    if negative {
        value = -value;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_currency() {
        assert_eq!(CellValue::parse("50000"), CellValue::Number(50000.0));
        assert_eq!(CellValue::parse(" $1,234.50 "), CellValue::Number(1234.5));
        assert_eq!(CellValue::parse("-$200"), CellValue::Number(-200.0));
    }

    #[test]
    fn test_parse_accounting_negative_and_percent() {
        assert_eq!(CellValue::parse("(500)"), CellValue::Number(-500.0));
        assert_eq!(CellValue::parse("12%"), CellValue::Number(0.12));
    }

    #[test]
    fn test_non_numbers_stay_text() {
        assert_eq!(CellValue::parse("Rent Income"), CellValue::Text("Rent Income".into()));
        assert_eq!(CellValue::parse("2024-01"), CellValue::Text("2024-01".into()));
        assert_eq!(CellValue::parse("1,2,,3"), CellValue::Text("1,2,,3".into()));
        assert_eq!(CellValue::parse("Unit 4B"), CellValue::Text("Unit 4B".into()));
        assert_eq!(CellValue::parse("   "), CellValue::Empty);
    }

    #[test]
    fn test_as_text_formats_integers_without_fraction() {
        assert_eq!(CellValue::Number(4000.0).as_text(), "4000");
        assert_eq!(CellValue::Number(12.5).as_text(), "12.5");
    }
}
