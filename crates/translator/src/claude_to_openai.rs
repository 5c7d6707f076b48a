//! Claude client ↔ OpenAI chat channel.
//!
//! Requests travel messages → chat; responses travel chat → messages.
//! The response side is the Claude-emission state machine: exactly one
//! `message_start`, one `message_delta`, one `message_stop` per stream,
//! with balanced `content_block_start`/`content_block_stop` pairs.

use crate::{
    BlockKind, RequestInput, ResponseInput, SsePiece, StreamInput, TranslateState,
    TranslatedRequest, thinking,
};
use conduit_core::error::ProxyError;
use serde_json::{Value, json};

// ─── Request: messages → chat ──────────────────────────────────────────────

pub fn translate_request(input: &RequestInput) -> Result<TranslatedRequest, ProxyError> {
    let req: Value = serde_json::from_slice(input.body)?;

    let mut messages: Vec<Value> = Vec::new();

    // system collapses into a leading system message.
    match req.get("system") {
        Some(Value::String(s)) if !s.is_empty() => {
            messages.push(json!({"role": "system", "content": s}));
        }
        Some(Value::Array(blocks)) => {
            let text: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            if !text.is_empty() {
                messages.push(json!({"role": "system", "content": text.join("\n\n")}));
            }
        }
        _ => {}
    }

    for msg in req
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ProxyError::Translation("missing messages field".to_string()))?
    {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        convert_claude_message(role, msg.get("content"), &mut messages);
    }

    let mut chat_req = json!({
        "model": input.model,
        "messages": messages,
    });

    if let Some(max) = req.get("max_tokens") {
        chat_req["max_tokens"] = max.clone();
    }
    if let Some(temp) = req.get("temperature") {
        chat_req["temperature"] = temp.clone();
    }
    if let Some(top_p) = req.get("top_p") {
        chat_req["top_p"] = top_p.clone();
    }
    if let Some(stop) = req.get("stop_sequences") {
        chat_req["stop"] = stop.clone();
    }
    if input.stream {
        chat_req["stream"] = Value::Bool(true);
    }
    if let Some(tools) = convert_tools(&req) {
        chat_req["tools"] = tools;
    }
    if let Some(tc) = req.get("tool_choice") {
        chat_req["tool_choice"] = convert_tool_choice(tc);
    }

    // thinking.budget_tokens buckets back to reasoning_effort.
    if let Some(budget) = req
        .get("thinking")
        .and_then(|t| t.get("budget_tokens"))
        .and_then(|b| b.as_i64())
    {
        chat_req["reasoning_effort"] = Value::String(thinking::budget_to_effort(budget).into());
    }

    let body = serde_json::to_vec(&chat_req).map_err(|e| ProxyError::Translation(e.to_string()))?;
    Ok(TranslatedRequest::plain(body))
}

fn convert_claude_message(role: &str, content: Option<&Value>, out: &mut Vec<Value>) {
    match content {
        Some(Value::String(s)) => {
            out.push(json!({"role": role, "content": s}));
        }
        Some(Value::Array(blocks)) => {
            let mut text_parts: Vec<String> = Vec::new();
            let mut tool_calls: Vec<Value> = Vec::new();
            let mut tool_results: Vec<Value> = Vec::new();

            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text" => {
                        if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                            text_parts.push(t.to_string());
                        }
                    }
                    "tool_use" => {
                        let arguments = block
                            .get("input")
                            .map(|i| i.to_string())
                            .unwrap_or_else(|| "{}".into());
                        tool_calls.push(json!({
                            "id": block.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                            "type": "function",
                            "function": {
                                "name": block.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                                "arguments": arguments,
                            },
                        }));
                    }
                    "tool_result" => {
                        let content_text = match block.get("content") {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        tool_results.push(json!({
                            "role": "tool",
                            "tool_call_id": block
                                .get("tool_use_id")
                                .and_then(|v| v.as_str())
                                .unwrap_or(""),
                            "content": content_text,
                        }));
                    }
                    // thinking blocks have no chat request equivalent
                    _ => {}
                }
            }

            if role == "assistant" {
                let content_val = if text_parts.is_empty() && !tool_calls.is_empty() {
                    Value::Null
                } else {
                    Value::String(text_parts.join(""))
                };
                let mut msg = json!({"role": "assistant", "content": content_val});
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = Value::Array(tool_calls);
                }
                out.push(msg);
            } else if !text_parts.is_empty() {
                out.push(json!({"role": role, "content": text_parts.join("")}));
            }

            // tool_result blocks become standalone tool messages.
            out.extend(tool_results);
        }
        _ => {}
    }
}

fn convert_tools(req: &Value) -> Option<Value> {
    let tools = req.get("tools")?.as_array()?;
    let chat_tools: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            Some(json!({
                "type": "function",
                "function": {
                    "name": tool.get("name")?.as_str()?,
                    "description": tool.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                    "parameters": tool
                        .get("input_schema")
                        .cloned()
                        .unwrap_or(json!({"type": "object", "properties": {}})),
                },
            }))
        })
        .collect();
    if chat_tools.is_empty() {
        None
    } else {
        Some(Value::Array(chat_tools))
    }
}

fn convert_tool_choice(tc: &Value) -> Value {
    match tc.get("type").and_then(|t| t.as_str()) {
        Some("none") => json!("none"),
        Some("any") => json!("required"),
        Some("tool") => match tc.get("name").and_then(|n| n.as_str()) {
            Some(name) => json!({"type": "function", "function": {"name": name}}),
            None => json!("auto"),
        },
        _ => json!("auto"),
    }
}

// ─── Response: chat → messages (Claude-emission FSM) ───────────────────────

fn map_finish_reason(finish: &str) -> &'static str {
    match finish {
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        _ => "end_turn",
    }
}

pub fn translate_stream_response(
    input: &StreamInput,
    state: &mut TranslateState,
) -> Result<Vec<SsePiece>, ProxyError> {
    let mut pieces = Vec::new();

    if input.data == b"[DONE]" {
        finalize(state, None, &mut pieces);
        return Ok(pieces);
    }

    let chunk: Value = serde_json::from_slice(input.data)?;

    ensure_message_start(input, state, &chunk, &mut pieces);

    let choice = chunk
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    if let Some(choice) = choice {
        if let Some(delta) = choice.get("delta") {
            // Reasoning deltas surface as thinking blocks.
            if let Some(reasoning) = delta.get("reasoning_content").and_then(|v| v.as_str())
                && !reasoning.is_empty()
            {
                open_block(state, BlockKind::Thinking, json!({"type": "thinking", "thinking": ""}), &mut pieces);
                pieces.push(block_delta(
                    state,
                    json!({"type": "thinking_delta", "thinking": reasoning}),
                ));
            }

            if let Some(text) = delta.get("content").and_then(|v| v.as_str())
                && !text.is_empty()
            {
                open_block(state, BlockKind::Text, json!({"type": "text", "text": ""}), &mut pieces);
                pieces.push(block_delta(state, json!({"type": "text_delta", "text": text})));
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for tc in tool_calls {
                    let has_identity = tc.get("id").and_then(|v| v.as_str()).is_some()
                        || tc
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .is_some();
                    if has_identity {
                        state.used_tool = true;
                        open_block(
                            state,
                            BlockKind::Tool,
                            json!({
                                "type": "tool_use",
                                "id": tc.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                                "name": tc
                                    .get("function")
                                    .and_then(|f| f.get("name"))
                                    .and_then(|n| n.as_str())
                                    .unwrap_or(""),
                                "input": {},
                            }),
                            &mut pieces,
                        );
                    }
                    if let Some(args) = tc
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        && !args.is_empty()
                    {
                        pieces.push(block_delta(
                            state,
                            json!({"type": "input_json_delta", "partial_json": args}),
                        ));
                    }
                }
            }
        }

        if let Some(finish) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            let usage = chunk.get("usage").filter(|u| !u.is_null()).cloned();
            if usage.is_some() {
                finalize_with_reason(state, map_finish_reason(finish), usage, &mut pieces);
            } else {
                // Hold the message_delta until the usage chunk (or [DONE]).
                close_open_block(state, &mut pieces);
                state.pending_stop_reason = Some(map_finish_reason(finish).to_string());
            }
        }
    }

    // A trailing usage-only chunk (stream_options.include_usage).
    if choice.is_none()
        && let Some(usage) = chunk.get("usage").filter(|u| !u.is_null())
    {
        finalize(state, Some(usage.clone()), &mut pieces);
    }

    Ok(pieces)
}

fn ensure_message_start(
    input: &StreamInput,
    state: &mut TranslateState,
    chunk: &Value,
    pieces: &mut Vec<SsePiece>,
) {
    if state.has_first_response {
        return;
    }
    state.has_first_response = true;
    state.response_id = chunk
        .get("id")
        .and_then(|v| v.as_str())
        .map(|id| format!("msg_{id}"))
        .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple()));
    state.response_index = -1;

    let start = json!({
        "type": "message_start",
        "message": {
            "id": state.response_id,
            "type": "message",
            "role": "assistant",
            "model": input.model,
            "content": [],
            "stop_reason": null,
            "usage": {"input_tokens": 0, "output_tokens": 0},
        },
    });
    pieces.push(SsePiece::event("message_start", start.to_string()));
}

/// Open a block of `kind`, closing the previous one first. Switching
/// blocks bumps the content index.
fn open_block(
    state: &mut TranslateState,
    kind: BlockKind,
    content_block: Value,
    pieces: &mut Vec<SsePiece>,
) {
    if state.block == kind && kind != BlockKind::Tool {
        return;
    }
    close_open_block(state, pieces);
    state.response_index += 1;
    state.block = kind;
    let start = json!({
        "type": "content_block_start",
        "index": state.response_index,
        "content_block": content_block,
    });
    pieces.push(SsePiece::event("content_block_start", start.to_string()));
}

fn close_open_block(state: &mut TranslateState, pieces: &mut Vec<SsePiece>) {
    if state.block == BlockKind::None {
        return;
    }
    let stop = json!({"type": "content_block_stop", "index": state.response_index});
    pieces.push(SsePiece::event("content_block_stop", stop.to_string()));
    state.block = BlockKind::None;
}

fn block_delta(state: &TranslateState, delta: Value) -> SsePiece {
    let chunk = json!({
        "type": "content_block_delta",
        "index": state.response_index,
        "delta": delta,
    });
    SsePiece::event("content_block_delta", chunk.to_string())
}

fn finalize(state: &mut TranslateState, usage: Option<Value>, pieces: &mut Vec<SsePiece>) {
    let reason = state.pending_stop_reason.clone().unwrap_or_else(|| {
        if state.used_tool {
            "tool_use".to_string()
        } else {
            "end_turn".to_string()
        }
    });
    finalize_with_reason(state, &reason, usage, pieces);
}

fn finalize_with_reason(
    state: &mut TranslateState,
    reason: &str,
    usage: Option<Value>,
    pieces: &mut Vec<SsePiece>,
) {
    if state.sent_message_delta {
        return;
    }
    close_open_block(state, pieces);
    state.sent_message_delta = true;
    state.finalized = true;

    let claude_usage = usage
        .map(|u| {
            json!({
                "input_tokens": u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                "output_tokens": u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            })
        })
        .unwrap_or_else(|| json!({"output_tokens": 0}));

    let delta = json!({
        "type": "message_delta",
        "delta": {"stop_reason": reason, "stop_sequence": null},
        "usage": claude_usage,
    });
    pieces.push(SsePiece::event("message_delta", delta.to_string()));
    pieces.push(SsePiece::event(
        "message_stop",
        json!({"type": "message_stop"}).to_string(),
    ));
}

// ─── Response: chat → messages (non-stream) ────────────────────────────────

pub fn translate_non_stream_response(input: &ResponseInput) -> Result<Vec<u8>, ProxyError> {
    let resp: Value = serde_json::from_slice(input.body)?;

    let choice = resp
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    let mut content: Vec<Value> = Vec::new();
    let mut stop_reason = "end_turn";

    if let Some(choice) = choice {
        if let Some(message) = choice.get("message") {
            if let Some(text) = message.get("content").and_then(|c| c.as_str())
                && !text.is_empty()
            {
                content.push(json!({"type": "text", "text": text}));
            }
            if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
                for tc in tool_calls {
                    let arguments = tc
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        .unwrap_or("{}");
                    let parsed: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                    content.push(json!({
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
        }
        if let Some(finish) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            stop_reason = map_finish_reason(finish);
        }
    }

    let mut claude_resp = json!({
        "id": format!(
            "msg_{}",
            resp.get("id").and_then(|v| v.as_str()).unwrap_or("unknown")
        ),
        "type": "message",
        "role": "assistant",
        "model": input.model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
    });

    if let Some(u) = resp.get("usage") {
        let mut usage = json!({
            "input_tokens": u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            "output_tokens": u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        });
        if let Some(cached) = u
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_u64())
        {
            usage["cache_read_input_tokens"] = json!(cached);
        }
        claude_resp["usage"] = usage;
    }

    serde_json::to_vec(&claude_resp).map_err(|e| ProxyError::Translation(e.to_string()))
}
