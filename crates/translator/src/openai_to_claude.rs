//! OpenAI chat client ↔ Claude channel.
//!
//! Requests travel chat → messages; responses travel messages → chat
//! (streaming and non-streaming).

use crate::{
    RequestInput, ResponseInput, SsePiece, StreamInput, TranslateState, TranslatedRequest,
    thinking, toolshim,
};
use conduit_core::error::ProxyError;
use serde_json::{Value, json};

/// Claude requires max_tokens; applied when the client omits it.
const DEFAULT_MAX_TOKENS: u64 = 4096;

// ─── Request: chat → messages ──────────────────────────────────────────────

pub fn translate_request(input: &RequestInput) -> Result<TranslatedRequest, ProxyError> {
    let req: Value = serde_json::from_slice(input.body)?;

    let system_blocks = extract_system_blocks(&req);
    let messages = convert_messages(&req)?;
    let tools = convert_tools(&req);

    let max_tokens = req
        .get("max_tokens")
        .or_else(|| req.get("max_completion_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut claude_req = json!({
        "model": input.model,
        "messages": messages,
        "max_tokens": max_tokens,
    });

    if !system_blocks.is_empty() {
        claude_req["system"] = Value::Array(system_blocks);
    }
    if let Some(temp) = req.get("temperature") {
        claude_req["temperature"] = temp.clone();
    }
    if let Some(top_p) = req.get("top_p") {
        claude_req["top_p"] = top_p.clone();
    }
    if let Some(tools) = tools {
        claude_req["tools"] = tools;
    }
    if let Some(stop) = convert_stop_sequences(&req) {
        claude_req["stop_sequences"] = stop;
    }
    if input.stream {
        claude_req["stream"] = Value::Bool(true);
    }
    if let Some(tc) = req.get("tool_choice") {
        claude_req["tool_choice"] = convert_tool_choice(tc);
    }

    // reasoning_effort maps onto extended thinking; an explicit thinking
    // object from the client wins.
    if let Some(t) = req.get("thinking") {
        claude_req["thinking"] = t.clone();
    } else if let Some(effort) = input.reasoning_effort
        && effort != "none"
        && let Some(budget) = thinking::effort_to_budget(effort)
        && budget > 0
    {
        claude_req["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
    }

    let tool_names = toolshim::prefix_tool_names(&mut claude_req);

    let body = serde_json::to_vec(&claude_req).map_err(|e| ProxyError::Translation(e.to_string()))?;
    Ok(TranslatedRequest { body, tool_names })
}

fn extract_system_blocks(req: &Value) -> Vec<Value> {
    let mut blocks = Vec::new();
    if let Some(messages) = req.get("messages").and_then(|m| m.as_array()) {
        for msg in messages {
            if msg.get("role").and_then(|r| r.as_str()) != Some("system") {
                continue;
            }
            match msg.get("content") {
                Some(Value::String(s)) => blocks.push(json!({"type": "text", "text": s})),
                Some(Value::Array(parts)) => {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    blocks
}

fn convert_messages(req: &Value) -> Result<Vec<Value>, ProxyError> {
    let messages = req
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ProxyError::Translation("missing messages field".to_string()))?;

    let mut out: Vec<Value> = Vec::new();

    for msg in messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("");

        if role == "system" {
            continue;
        }

        if role == "tool" {
            let tool_result = json!({
                "type": "tool_result",
                "tool_use_id": msg.get("tool_call_id").and_then(|v| v.as_str()).unwrap_or(""),
                "content": msg.get("content").and_then(|c| c.as_str()).unwrap_or(""),
            });

            // Consecutive tool results merge into one user turn.
            if let Some(last) = out.last_mut()
                && last.get("role").and_then(|r: &Value| r.as_str()) == Some("user")
                && let Some(arr) = last.get_mut("content").and_then(|c| c.as_array_mut())
                && arr
                    .first()
                    .and_then(|b| b.get("type"))
                    .and_then(|t| t.as_str())
                    == Some("tool_result")
            {
                arr.push(tool_result);
                continue;
            }

            out.push(json!({"role": "user", "content": [tool_result]}));
            continue;
        }

        if role == "assistant" {
            let mut blocks = Vec::new();

            if let Some(Value::String(s)) = msg.get("content")
                && !s.is_empty()
            {
                blocks.push(json!({"type": "text", "text": s}));
            }

            if let Some(tool_calls) = msg.get("tool_calls").and_then(|tc| tc.as_array()) {
                for tc in tool_calls {
                    let arguments = tc
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        .unwrap_or("{}");
                    let parsed: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                        "name": tc
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .unwrap_or(""),
                        "input": parsed,
                    }));
                }
            }

            if blocks.is_empty() {
                blocks.push(json!({"type": "text", "text": ""}));
            }

            out.push(json!({"role": "assistant", "content": blocks}));
            continue;
        }

        out.push(json!({
            "role": "user",
            "content": convert_user_content(msg.get("content")),
        }));
    }

    Ok(out)
}

fn convert_user_content(content: Option<&Value>) -> Value {
    match content {
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Array(parts)) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text" => {
                        let text = part.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                    "image_url" => {
                        if let Some(url) = part
                            .get("image_url")
                            .and_then(|u| u.get("url"))
                            .and_then(|u| u.as_str())
                            && let Some(image) = convert_image_url(url)
                        {
                            blocks.push(image);
                        }
                    }
                    _ => {}
                }
            }
            Value::Array(blocks)
        }
        _ => Value::String(String::new()),
    }
}

fn convert_image_url(url: &str) -> Option<Value> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (meta, data) = rest.split_once(',')?;
        let media_type = meta.split(';').next().unwrap_or("image/png");
        return Some(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }));
    }
    Some(json!({
        "type": "image",
        "source": {"type": "url", "url": url},
    }))
}

fn convert_tools(req: &Value) -> Option<Value> {
    let tools = req.get("tools")?.as_array()?;
    let claude_tools: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            let func = tool.get("function")?;
            Some(json!({
                "name": func.get("name")?.as_str()?,
                "description": func.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                "input_schema": func
                    .get("parameters")
                    .cloned()
                    .unwrap_or(json!({"type": "object", "properties": {}})),
            }))
        })
        .collect();

    if claude_tools.is_empty() {
        None
    } else {
        Some(Value::Array(claude_tools))
    }
}

fn convert_stop_sequences(req: &Value) -> Option<Value> {
    match req.get("stop")? {
        Value::String(s) => Some(json!([s])),
        stop @ Value::Array(_) => Some(stop.clone()),
        _ => None,
    }
}

fn convert_tool_choice(tc: &Value) -> Value {
    match tc {
        Value::String(s) => match s.as_str() {
            "none" => json!({"type": "none"}),
            "required" => json!({"type": "any"}),
            _ => json!({"type": "auto"}),
        },
        Value::Object(obj) => {
            if let Some(name) = obj
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
            {
                return json!({"type": "tool", "name": name});
            }
            json!({"type": "auto"})
        }
        _ => json!({"type": "auto"}),
    }
}

// ─── Response: messages → chat ─────────────────────────────────────────────

fn map_stop_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        _ => "stop",
    }
}

fn chat_usage(input_tokens: u64, output_tokens: u64, cached: Option<u64>) -> Value {
    let mut usage = json!({
        "prompt_tokens": input_tokens,
        "completion_tokens": output_tokens,
        "total_tokens": input_tokens + output_tokens,
    });
    if let Some(cached) = cached {
        usage["prompt_tokens_details"] = json!({"cached_tokens": cached});
    }
    usage
}

pub fn translate_non_stream_response(input: &ResponseInput) -> Result<Vec<u8>, ProxyError> {
    let mut resp: Value = serde_json::from_slice(input.body)?;
    toolshim::restore_tool_names(&mut resp, input.tool_names);

    let id = format!(
        "chatcmpl-{}",
        resp.get("id").and_then(|v| v.as_str()).unwrap_or("unknown")
    );

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(content) = resp.get("content").and_then(|c| c.as_array()) {
        for block in content {
            match block.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "text" => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        text_parts.push(text.to_string());
                    }
                }
                "tool_use" => {
                    let arguments = block
                        .get("input")
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "{}".to_string());
                    tool_calls.push(json!({
                        "id": block.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                        "type": "function",
                        "function": {
                            "name": block.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                            "arguments": arguments,
                        },
                        "index": tool_calls.len(),
                    }));
                }
                _ => {}
            }
        }
    }

    let content_str = text_parts.join("");
    let content_val = if content_str.is_empty() && !tool_calls.is_empty() {
        Value::Null
    } else {
        Value::String(content_str)
    };

    let mut message = json!({"role": "assistant", "content": content_val});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }

    let finish_reason =
        map_stop_reason(resp.get("stop_reason").and_then(|v| v.as_str()));

    let mut chat_resp = json!({
        "id": id,
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": input.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
    });

    if let Some(u) = resp.get("usage") {
        chat_resp["usage"] = chat_usage(
            u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            u.get("cache_read_input_tokens").and_then(|v| v.as_u64()),
        );
    }

    serde_json::to_vec(&chat_resp).map_err(|e| ProxyError::Translation(e.to_string()))
}

pub fn translate_stream_response(
    input: &StreamInput,
    state: &mut TranslateState,
) -> Result<Vec<SsePiece>, ProxyError> {
    if input.data == b"[DONE]" {
        // Claude upstreams do not send the sentinel; tolerate it anyway.
        return Ok(vec![SsePiece::done()]);
    }
    let mut event_value: Value = serde_json::from_slice(input.data)?;
    toolshim::restore_tool_names(&mut event_value, input.tool_names);
    let event = event_value.get("type").and_then(|t| t.as_str());
    let event = input.event.or(event);
    let mut pieces = Vec::new();

    match event {
        Some("message_start") => {
            if let Some(msg) = event_value.get("message") {
                state.response_id = format!(
                    "chatcmpl-{}",
                    msg.get("id").and_then(|v| v.as_str()).unwrap_or("unknown")
                );
                state.model = input.model.to_string();
                state.created = chrono::Utc::now().timestamp();
                state.current_tool_call_index = -1;
                state.input_tokens = msg
                    .get("usage")
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            }
            state.sent_role = true;
            pieces.push(chat_chunk(state, json!({"role": "assistant", "content": ""}), None));
        }

        Some("content_block_start") => {
            if let Some(cb) = event_value.get("content_block")
                && cb.get("type").and_then(|t| t.as_str()) == Some("tool_use")
            {
                state.current_tool_call_index += 1;
                state.used_tool = true;
                pieces.push(chat_chunk(
                    state,
                    json!({
                        "tool_calls": [{
                            "index": state.current_tool_call_index,
                            "id": cb.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                            "type": "function",
                            "function": {
                                "name": cb.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                                "arguments": "",
                            },
                        }],
                    }),
                    None,
                ));
            }
        }

        Some("content_block_delta") => {
            if let Some(delta) = event_value.get("delta") {
                match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text_delta" => {
                        let text = delta.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        pieces.push(chat_chunk(state, json!({"content": text}), None));
                    }
                    "input_json_delta" => {
                        let partial = delta
                            .get("partial_json")
                            .and_then(|t| t.as_str())
                            .unwrap_or("");
                        pieces.push(chat_chunk(
                            state,
                            json!({
                                "tool_calls": [{
                                    "index": state.current_tool_call_index,
                                    "function": {"arguments": partial},
                                }],
                            }),
                            None,
                        ));
                    }
                    // thinking_delta has no chat equivalent
                    _ => {}
                }
            }
        }

        Some("message_delta") => {
            let finish = map_stop_reason(
                event_value
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|v| v.as_str()),
            );
            let usage = event_value.get("usage").map(|u| {
                chat_usage(
                    state.input_tokens,
                    u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                    u.get("cache_read_input_tokens").and_then(|v| v.as_u64()),
                )
            });
            pieces.push(chat_finish_chunk(state, finish, usage));
        }

        Some("message_stop") => {
            pieces.push(SsePiece::done());
        }

        // ping, content_block_stop, error frames pass silently
        _ => {}
    }

    Ok(pieces)
}

fn chat_chunk(state: &TranslateState, delta: Value, finish: Option<&str>) -> SsePiece {
    let chunk = json!({
        "id": state.response_id,
        "object": "chat.completion.chunk",
        "created": state.created,
        "model": state.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish,
        }],
    });
    SsePiece::data(chunk.to_string())
}

fn chat_finish_chunk(state: &TranslateState, finish: &str, usage: Option<Value>) -> SsePiece {
    let mut chunk = json!({
        "id": state.response_id,
        "object": "chat.completion.chunk",
        "created": state.created,
        "model": state.model,
        "choices": [{
            "index": 0,
            "delta": {},
            "finish_reason": finish,
        }],
    });
    if let Some(usage) = usage {
        chunk["usage"] = usage;
    }
    SsePiece::data(chunk.to_string())
}
