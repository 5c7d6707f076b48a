//! Response fix-ups applied after translation: restoring the client's
//! model name and stripping thinking blocks that co-occur with tool use.

use serde_json::Value;

/// JSON paths where a model name may appear in a response body.
const MODEL_PATHS: &[&[&str]] = &[
    &["model"],
    &["modelVersion"],
    &["response", "modelVersion"],
    &["response", "model"],
    &["message", "model"],
];

/// Replace the upstream model name with the client's original name at
/// the known JSON paths. Clients read context-window limits from
/// `model`, and the upstream name may imply a different window.
fn get_leaf_mut<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    match path {
        [] => Some(value),
        [key, rest @ ..] => get_leaf_mut(value.get_mut(*key)?, rest),
    }
}

pub fn restore_model_json(body: &mut Value, upstream_model: &str, original_model: &str) {
    if upstream_model == original_model || upstream_model.is_empty() {
        return;
    }
    for path in MODEL_PATHS {
        let Some(Value::String(s)) = get_leaf_mut(body, path) else {
            continue;
        };
        if s.contains(upstream_model) {
            *s = s.replace(upstream_model, original_model);
        }
    }
}

/// Literal replacement in an SSE frame. Model names are unambiguous
/// tokens, so a byte-level swap is safe here.
pub fn restore_model_sse(frame: &str, upstream_model: &str, original_model: &str) -> String {
    if upstream_model == original_model || upstream_model.is_empty() {
        return frame.to_string();
    }
    frame.replace(upstream_model, original_model)
}

/// Strip `thinking`/`redacted_thinking` blocks from a Claude response
/// that also carries a `tool_use` block. Some clients cannot render the
/// combination.
pub fn suppress_thinking_if_tool_use(body: &mut Value) {
    let Some(content) = body.get_mut("content").and_then(|c| c.as_array_mut()) else {
        return;
    };
    let has_tool_use = content
        .iter()
        .any(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"));
    if !has_tool_use {
        return;
    }
    content.retain(|b| {
        !matches!(
            b.get("type").and_then(|t| t.as_str()),
            Some("thinking") | Some("redacted_thinking")
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_restore_model_paths() {
        let mut body = json!({
            "model": "gpt-4o-mini",
            "message": {"model": "gpt-4o-mini"},
            "other": "gpt-4o-mini",
        });
        restore_model_json(&mut body, "gpt-4o-mini", "my-alias");
        assert_eq!(body["model"], "my-alias");
        assert_eq!(body["message"]["model"], "my-alias");
        // Only known paths are touched.
        assert_eq!(body["other"], "gpt-4o-mini");
    }

    #[test]
    fn test_restore_model_version_suffix() {
        let mut body = json!({"modelVersion": "gemini-2.0-flash-001"});
        restore_model_json(&mut body, "gemini-2.0-flash", "gemini-pro-alias");
        assert_eq!(body["modelVersion"], "gemini-pro-alias-001");
    }

    #[test]
    fn test_restore_model_sse() {
        let frame = r#"{"model":"claude-sonnet-4-20250514","delta":{}}"#;
        let out = restore_model_sse(frame, "claude-sonnet-4-20250514", "sonnet");
        assert_eq!(out, r#"{"model":"sonnet","delta":{}}"#);
    }

    #[test]
    fn test_noop_when_same_model() {
        let mut body = json!({"model": "m"});
        restore_model_json(&mut body, "m", "m");
        assert_eq!(body["model"], "m");
    }

    #[test]
    fn test_suppress_thinking_with_tool_use() {
        let mut body = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "calling"},
                {"type": "redacted_thinking", "data": "x"},
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {}},
            ],
        });
        suppress_thinking_if_tool_use(&mut body);
        let kinds: Vec<&str> = body["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["text", "tool_use"]);
    }

    #[test]
    fn test_thinking_kept_without_tool_use() {
        let mut body = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "answer"},
            ],
        });
        suppress_thinking_if_tool_use(&mut body);
        assert_eq!(body["content"].as_array().unwrap().len(), 2);
    }
}
