use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::CompletionError;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid fence regex"));
static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\w*\s*(.*?)\s*```").expect("valid fence regex"));
static OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\})").expect("valid object regex"));
static ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\[.*\])").expect("valid array regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid comma regex"));
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F]").expect("valid control regex"));

/// Pull the JSON payload out of model output and clean it up for parsing.
///
/// Handles code fences, commentary around the payload, trailing commas and
/// raw control characters (including newlines inside string literals).
pub fn normalize_json_text(text: &str) -> String {
    let candidate = [&*FENCED_JSON, &*FENCED, &*OBJECT, &*ARRAY]
        .into_iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    let without_commas = TRAILING_COMMA.replace_all(candidate, "$1");
    CONTROL_CHARS.replace_all(&without_commas, " ").into_owned()
}

/// Parse model output as JSON, recovering from the usual formatting noise.
pub fn parse_lenient(text: &str) -> Result<Value, CompletionError> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }

    let normalized = normalize_json_text(text);
    match serde_json::from_str::<Value>(&normalized) {
        Ok(value) => Ok(value),
        Err(first_error) => first_balanced_object(&normalized)
            .and_then(|object| serde_json::from_str::<Value>(object).ok())
            .ok_or_else(|| CompletionError::Malformed(first_error.to_string())),
    }
}

/// The first `{...}` span whose braces balance, ignoring braces in strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
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
                    return Some(&text[start..start + offset + 1]);
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
    use serde_json::json;

    #[test]
    fn clean_json_passes_through() {
        let value = parse_lenient(r#"{"entities": [], "relationships": []}"#).unwrap();
        assert_eq!(value, json!({"entities": [], "relationships": []}));
    }

    #[test]
    fn strips_code_fences() {
        let text = "```json\n{\"entities\": [{\"mention\": \"NeRF\"}]}\n```";
        assert_eq!(
            parse_lenient(text).unwrap(),
            json!({"entities": [{"mention": "NeRF"}]})
        );

        let bare = "```\n{\"accepted\": []}\n```";
        assert_eq!(parse_lenient(bare).unwrap(), json!({"accepted": []}));
    }

    #[test]
    fn ignores_commentary() {
        let text = "Sure! Here is the JSON you asked for:\n{\"accepted\": [], \"rejected\": []}\nLet me know if you need more.";
        assert_eq!(
            parse_lenient(text).unwrap(),
            json!({"accepted": [], "rejected": []})
        );
    }

    #[test]
    fn removes_trailing_commas() {
        let text = r#"{"entities": [{"mention": "PSNR", "type": "metric",},], "relationships": [],}"#;
        let value = parse_lenient(text).unwrap();
        assert_eq!(value["entities"][0]["mention"], "PSNR");
    }

    #[test]
    fn replaces_control_characters() {
        let text = "{\"evidenceText\": \"line one\nline two\tend\u{7}\"}";
        let value = parse_lenient(text).unwrap();
        assert_eq!(value["evidenceText"], "line one line two end ");
    }

    #[test]
    fn falls_back_to_first_balanced_object() {
        let text = r#"{"entities": [], "relationships": []} and also {"broken": "#;
        assert_eq!(
            parse_lenient(text).unwrap(),
            json!({"entities": [], "relationships": []})
        );
    }

    #[test]
    fn balanced_scan_skips_braces_in_strings() {
        let text = r#"{"evidence": "uses {curly} braces"} trailing"#;
        assert_eq!(first_balanced_object(text), Some(r#"{"evidence": "uses {curly} braces"}"#));
    }

    #[test]
    fn prose_is_malformed() {
        let err = parse_lenient("I could not find any entities.").unwrap_err();
        assert!(matches!(err, CompletionError::Malformed(_)));
    }
}
