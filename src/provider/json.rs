//! JSON convention for backend replies

use regex::Regex;
use std::sync::OnceLock;

static FENCED_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();

/// Strip the `{"result": "..."}` envelope the Claude CLI wraps replies in
pub fn unwrap_envelope(raw: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ClaudeOutput {
        result: String,
    }

    match serde_json::from_str::<ClaudeOutput>(raw) {
        Ok(out) => out.result,
        Err(_) => raw.to_string(),
    }
}

/// Extract a JSON object or array from text that may contain prose or markdown fences
pub fn extract_json(s: &str) -> Option<String> {
    let trimmed = s.trim();

    // First try: the whole string is valid JSON
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(trimmed.to_string());
    }

    // Second try: extract from markdown code block
    let re = FENCED_BLOCK
        .get_or_init(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()?;
    for cap in re.captures_iter(s) {
        let potential_json = cap.get(1)?.as_str().trim();
        if serde_json::from_str::<serde_json::Value>(potential_json).is_ok() {
            return Some(potential_json.to_string());
        }
    }

    // Third try: first balanced object
    let brace_start = s.find('{')?;
    let mut depth = 0;
    let mut end = brace_start;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[brace_start..].char_indices() {
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
                depth -= 1;
                if depth == 0 {
                    end = brace_start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if depth == 0 && end > brace_start {
        let potential_json = &s[brace_start..end];
        if serde_json::from_str::<serde_json::Value>(potential_json).is_ok() {
            return Some(potential_json.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_direct_json() {
        let json = r#"{"narrative": {"headline": "Tiles and tides"}}"#;
        assert_eq!(extract_json(json).as_deref(), Some(json));
    }

    #[test]
    fn test_extract_markdown_wrapped() {
        let md = "Here you go:\n\n```json\n{\"weather\": {\"summary\": \"mild\"}}\n```\n";
        let json = extract_json(md).unwrap();
        assert!(json.contains("mild"));
    }

    #[test]
    fn test_extract_embedded_object_with_braces_in_strings() {
        let text = r#"Sure! {"logistics": {"tips": ["use the {green} line"]}} Enjoy."#;
        let json = extract_json(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["logistics"]["tips"][0], "use the {green} line");
    }

    #[test]
    fn test_extract_none_without_json() {
        assert!(extract_json("no structured content here").is_none());
    }

    #[test]
    fn test_unwrap_envelope() {
        let raw = r#"{"type": "result", "result": "{\"a\": 1}"}"#;
        assert_eq!(unwrap_envelope(raw), r#"{"a": 1}"#);
        assert_eq!(unwrap_envelope("plain"), "plain");
    }
}
