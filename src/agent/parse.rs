use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const AGENT_RESPONSE_SOURCE: &str = "agent-response";

/// Terminal unit of an agent response: a piece of markdown text or an image
/// region description, each citing the source id it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub source: String,
}

/// Parse the terminal assistant content into display objects.
///
/// The cascade, in order: strip code fences, parse the whole content as a
/// JSON array or single object, scan for an embedded array, scan for an
/// embedded object. An empty result means the caller should fall back to a
/// single raw-text object.
pub fn parse_display_objects(content: &str) -> Vec<DisplayObject> {
    let stripped = strip_code_fences(content.trim());
    let candidate = stripped.trim();

    if let Ok(value) = serde_json::from_str::<JsonValue>(candidate) {
        let objects = objects_from_value(&value);
        if !objects.is_empty() {
            return objects;
        }
    }

    // Models often wrap the JSON in prose; scan for the first parseable
    // array of display objects, then for a single object.
    for (idx, _) in candidate.match_indices('[') {
        let mut stream =
            serde_json::Deserializer::from_str(&candidate[idx..]).into_iter::<JsonValue>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_array() {
                let objects = objects_from_value(&value);
                if !objects.is_empty() {
                    return objects;
                }
            }
        }
    }

    for (idx, _) in candidate.match_indices('{') {
        let mut stream =
            serde_json::Deserializer::from_str(&candidate[idx..]).into_iter::<JsonValue>();
        if let Some(Ok(value)) = stream.next() {
            if value.is_object() {
                if let Some(object) = extract_display_object(&value) {
                    return vec![object];
                }
            }
        }
    }

    Vec::new()
}

/// Wrap raw assistant content into the fallback display object.
pub fn raw_text_object(content: &str) -> DisplayObject {
    DisplayObject {
        kind: "text".to_string(),
        content: content.to_string(),
        source: AGENT_RESPONSE_SOURCE.to_string(),
    }
}

fn objects_from_value(value: &JsonValue) -> Vec<DisplayObject> {
    match value {
        JsonValue::Array(items) => items.iter().filter_map(extract_display_object).collect(),
        JsonValue::Object(_) => extract_display_object(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn extract_display_object(value: &JsonValue) -> Option<DisplayObject> {
    let obj = value.as_object()?;
    let kind = obj.get("type")?.as_str()?;
    if kind != "text" && kind != "image" {
        return None;
    }
    let content = obj.get("content")?.as_str()?;
    let source = obj
        .get("source")
        .and_then(|s| s.as_str())
        .unwrap_or(AGENT_RESPONSE_SOURCE);
    Some(DisplayObject {
        kind: kind.to_string(),
        content: content.to_string(),
        source: source.to_string(),
    })
}

fn strip_code_fences(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if content.starts_with("```") && content.ends_with("```") {
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() > 2 {
            let start = content.find('\n').map(|i| i + 1).unwrap_or(0);
            let end = content.rfind("```").unwrap_or(content.len());
            if start < end {
                return &content[start..end];
            }
        }
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_obj(content: &str, source: &str) -> DisplayObject {
        DisplayObject {
            kind: "text".to_string(),
            content: content.to_string(),
            source: source.to_string(),
        }
    }

    #[test]
    fn parses_bare_json_array() {
        let input = r#"[{"type":"text","content":"X is Y","source":"docA-chunk1"}]"#;
        assert_eq!(parse_display_objects(input), vec![text_obj("X is Y", "docA-chunk1")]);
    }

    #[test]
    fn parses_fenced_json_array() {
        let input = "```json\n[{\"type\":\"text\",\"content\":\"X is Y\",\"source\":\"docA-chunk1\"}]\n```";
        assert_eq!(parse_display_objects(input), vec![text_obj("X is Y", "docA-chunk1")]);
    }

    #[test]
    fn parses_generic_fenced_block() {
        let input = "```\n[{\"type\":\"text\",\"content\":\"X is Y\",\"source\":\"s1\"}]\n```";
        assert_eq!(parse_display_objects(input), vec![text_obj("X is Y", "s1")]);
    }

    #[test]
    fn parses_single_object() {
        let input = r#"{"type":"text","content":"X is Y","source":"s1"}"#;
        assert_eq!(parse_display_objects(input), vec![text_obj("X is Y", "s1")]);
    }

    #[test]
    fn extracts_array_embedded_in_prose() {
        let input = r#"Here is my answer:
[{"type":"text","content":"X is Y","source":"s1"},{"type":"text","content":"more","source":"s2"}]
Hope that helps."#;
        let parsed = parse_display_objects(input);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].source, "s2");
    }

    #[test]
    fn extracts_object_embedded_in_prose() {
        let input = r#"The result is {"type":"text","content":"X is Y","source":"s1"} as requested."#;
        assert_eq!(parse_display_objects(input), vec![text_obj("X is Y", "s1")]);
    }

    #[test]
    fn missing_source_defaults_to_agent_response() {
        let input = r#"[{"type":"text","content":"X is Y"}]"#;
        assert_eq!(parse_display_objects(input)[0].source, AGENT_RESPONSE_SOURCE);
    }

    #[test]
    fn invalid_kind_is_skipped() {
        let input = r#"[
            {"type":"table","content":"nope","source":"s1"},
            {"type":"image","content":"the bar chart in figure 3","source":"docA-chunk2"}
        ]"#;
        let parsed = parse_display_objects(input);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, "image");
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(parse_display_objects("X is Y, plain and simple.").is_empty());
        let raw = raw_text_object("X is Y, plain and simple.");
        assert_eq!(raw.source, AGENT_RESPONSE_SOURCE);
        assert_eq!(raw.kind, "text");
    }

    #[test]
    fn non_display_json_yields_nothing() {
        assert!(parse_display_objects(r#"{"answer": 42}"#).is_empty());
        assert!(parse_display_objects(r#"[1, 2, 3]"#).is_empty());
    }

    #[test]
    fn roundtrip_preserves_display_objects() {
        let objects = vec![
            json!({"type":"text","content":"## Intro\ndetails","source":"doc123-chunk1"}),
            json!({"type":"image","content":"diagram 2, upper half","source":"doc456-chunk2"}),
        ];
        let fenced = format!("```json\n{}\n```", serde_json::to_string_pretty(&objects).unwrap());
        let parsed = parse_display_objects(&fenced);
        assert_eq!(parsed.len(), 2);
        assert_eq!(serde_json::to_value(&parsed).unwrap(), json!(objects));
    }
}
