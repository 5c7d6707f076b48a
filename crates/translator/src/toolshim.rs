//! The `mcp_` tool-name shim.
//!
//! Requests routed toward a Claude channel get every tool name prefixed
//! with `mcp_` (some Claude clients route tools by this prefix). The
//! reverse map travels with the request and is applied to `tool_use`
//! names on the response path, in both SSE frames and JSON bodies.

use serde_json::Value;
use std::collections::HashMap;

const PREFIX: &str = "mcp_";

/// Prefix tool names in a Claude-dialect request body. Returns the
/// synthetic → original map. Names already prefixed, or whose prefixed
/// form collides with another declared tool, are left alone.
pub fn prefix_tool_names(body: &mut Value) -> HashMap<String, String> {
    let mut map = HashMap::new();

    let declared: Vec<String> = body
        .get("tools")
        .and_then(|t| t.as_array())
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if let Some(tools) = body.get_mut("tools").and_then(|t| t.as_array_mut()) {
        for tool in tools {
            let Some(name) = tool.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            if name.starts_with(PREFIX) {
                continue;
            }
            let prefixed = format!("{PREFIX}{name}");
            if declared.iter().any(|d| d == &prefixed) {
                // Prefixing would collide with an existing tool; skip.
                continue;
            }
            map.insert(prefixed.clone(), name.to_string());
            tool["name"] = Value::String(prefixed);
        }
    }

    // Keep message history consistent with the renamed declarations.
    if !map.is_empty()
        && let Some(messages) = body.get_mut("messages").and_then(|m| m.as_array_mut())
    {
        let forward: HashMap<&str, &str> = map
            .iter()
            .map(|(synthetic, original)| (original.as_str(), synthetic.as_str()))
            .collect();
        for msg in messages {
            let Some(blocks) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for block in blocks {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use")
                    && let Some(name) = block.get("name").and_then(|n| n.as_str())
                    && let Some(renamed) = forward.get(name)
                {
                    block["name"] = Value::String(renamed.to_string());
                }
            }
        }
    }

    map
}

/// Apply the inverse map to tool names in a response body.
pub fn restore_tool_names(body: &mut Value, map: &HashMap<String, String>) {
    if map.is_empty() {
        return;
    }
    restore_in_value(body, map);
}

fn restore_in_value(value: &mut Value, map: &HashMap<String, String>) {
    match value {
        Value::Object(obj) => {
            let is_tool_block = obj
                .get("type")
                .and_then(|t| t.as_str())
                .is_some_and(|t| t == "tool_use" || t == "server_tool_use");
            if is_tool_block
                && let Some(name) = obj.get("name").and_then(|n| n.as_str())
                && let Some(original) = map.get(name)
            {
                obj.insert("name".into(), Value::String(original.clone()));
            }
            for (_, v) in obj.iter_mut() {
                restore_in_value(v, map);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                restore_in_value(v, map);
            }
        }
        _ => {}
    }
}

/// Apply the inverse map to one SSE data payload. Returns `None` when
/// the payload is untouched (not JSON, or no tool names present).
pub fn restore_tool_names_sse(data: &[u8], map: &HashMap<String, String>) -> Option<Vec<u8>> {
    if map.is_empty() || data == b"[DONE]" {
        return None;
    }
    let mut value: Value = serde_json::from_slice(data).ok()?;
    let before = value.to_string();
    restore_in_value(&mut value, map);
    let after = value.to_string();
    if before == after {
        return None;
    }
    Some(after.into_bytes())
}
