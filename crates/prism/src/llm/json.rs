//! Recovers a JSON object from free-form provider text: bare JSON, fenced
//! code blocks, or an object embedded in prose.

use serde_json::Value;

pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(value);
        }
    }

    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_object_end(&trimmed[start..]) {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..start + end]) {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Byte length of the object starting at `text[0] == '{'`, honoring
/// strings and escapes.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_json() {
        let v = extract_json(r#" {"documentType": "lease"} "#).unwrap();
        assert_eq!(v["documentType"], "lease");
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"confidence\": 0.9}\n```\nThanks";
        assert_eq!(extract_json(text).unwrap()["confidence"], 0.9);
    }

    #[test]
    fn test_object_inside_prose_with_braces_in_strings() {
        let text = r#"Sure! {"summary": "use {curly} braces", "n": 1} hope this helps"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["summary"], "use {curly} braces");
    }

    #[test]
    fn test_skips_broken_candidates() {
        let text = r#"{not json} then {"ok": true}"#;
        assert_eq!(extract_json(text).unwrap()["ok"], true);
    }

    #[test]
    fn test_no_json() {
        assert!(extract_json("I could not analyse this document.").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }
}
