//! Claude client ↔ Gemini channel.
//!
//! Requests travel messages → generateContent; responses travel
//! generateContent → messages through the Claude-emission state machine
//! (thinking, text, and tool blocks with explicit transitions).

use crate::{
    BlockKind, RequestInput, ResponseInput, SsePiece, StreamInput, TranslateState,
    TranslatedRequest, thinking,
};
use conduit_core::error::ProxyError;
use serde_json::{Value, json};
use std::collections::HashMap;

// ─── Request: messages → generateContent ───────────────────────────────────

pub fn translate_request(input: &RequestInput) -> Result<TranslatedRequest, ProxyError> {
    let req: Value = serde_json::from_slice(input.body)?;

    let mut gemini_req = json!({
        "contents": convert_messages(&req)?,
    });

    if let Some(si) = convert_system(&req) {
        gemini_req["systemInstruction"] = si;
    }
    if let Some(tools) = convert_tools(&req) {
        gemini_req["tools"] = tools;
    }

    let mut config = json!({});
    let mut has_config = false;
    if let Some(max) = req.get("max_tokens") {
        config["maxOutputTokens"] = max.clone();
        has_config = true;
    }
    if let Some(temp) = req.get("temperature") {
        config["temperature"] = temp.clone();
        has_config = true;
    }
    if let Some(top_p) = req.get("top_p") {
        config["topP"] = top_p.clone();
        has_config = true;
    }
    if let Some(stop) = req.get("stop_sequences") {
        config["stopSequences"] = stop.clone();
        has_config = true;
    }
    if let Some(budget) = req
        .get("thinking")
        .and_then(|t| t.get("budget_tokens"))
        .and_then(|b| b.as_i64())
    {
        thinking::apply_gemini_thinking(&mut config, input.model, thinking::budget_to_effort(budget));
        has_config = true;
    }
    if has_config {
        gemini_req["generationConfig"] = config;
    }

    let body =
        serde_json::to_vec(&gemini_req).map_err(|e| ProxyError::Translation(e.to_string()))?;
    Ok(TranslatedRequest::plain(body))
}

fn convert_system(req: &Value) -> Option<Value> {
    let mut parts = Vec::new();
    match req.get("system")? {
        Value::String(s) if !s.is_empty() => parts.push(json!({"text": s})),
        Value::Array(blocks) => {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    parts.push(json!({"text": text}));
                }
            }
        }
        _ => {}
    }
    if parts.is_empty() {
        None
    } else {
        Some(json!({"parts": parts}))
    }
}

fn convert_messages(req: &Value) -> Result<Vec<Value>, ProxyError> {
    let messages = req
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ProxyError::Translation("missing messages field".to_string()))?;

    // tool_result blocks carry the tool_use id; Gemini wants the name.
    let mut tool_names_by_id: HashMap<String, String> = HashMap::new();

    let mut contents: Vec<Value> = Vec::new();
    for msg in messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        let gemini_role = if role == "assistant" { "model" } else { "user" };

        let mut parts: Vec<Value> = Vec::new();
        match msg.get("content") {
            Some(Value::String(s)) => parts.push(json!({"text": s})),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    match block.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                        "text" => {
                            let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                            parts.push(json!({"text": text}));
                        }
                        "tool_use" => {
                            let id = block.get("id").and_then(|v| v.as_str()).unwrap_or("");
                            let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("");
                            tool_names_by_id.insert(id.to_string(), name.to_string());
                            parts.push(json!({
                                "functionCall": {
                                    "name": name,
                                    "args": block.get("input").cloned().unwrap_or(json!({})),
                                }
                            }));
                        }
                        "tool_result" => {
                            let id = block
                                .get("tool_use_id")
                                .and_then(|v| v.as_str())
                                .unwrap_or("");
                            let name = tool_names_by_id
                                .get(id)
                                .cloned()
                                .unwrap_or_else(|| "function".to_string());
                            let content_text = match block.get("content") {
                                Some(Value::String(s)) => s.clone(),
                                Some(other) => other.to_string(),
                                None => String::new(),
                            };
                            let response = serde_json::from_str::<Value>(&content_text)
                                .unwrap_or(json!({"result": content_text}));
                            parts.push(json!({
                                "functionResponse": {"name": name, "response": response},
                            }));
                        }
                        "image" => {
                            if let Some(source) = block.get("source")
                                && source.get("type").and_then(|t| t.as_str()) == Some("base64")
                            {
                                parts.push(json!({
                                    "inlineData": {
                                        "mimeType": source
                                            .get("media_type")
                                            .and_then(|m| m.as_str())
                                            .unwrap_or("image/png"),
                                        "data": source
                                            .get("data")
                                            .and_then(|d| d.as_str())
                                            .unwrap_or(""),
                                    }
                                }));
                            }
                        }
                        // thinking blocks are provider-side output, not input
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        if parts.is_empty() {
            continue;
        }

        if let Some(last) = contents.last_mut()
            && last.get("role").and_then(|r: &Value| r.as_str()) == Some(gemini_role)
            && let Some(existing) = last.get_mut("parts").and_then(|p| p.as_array_mut())
        {
            existing.extend(parts);
            continue;
        }
        contents.push(json!({"role": gemini_role, "parts": parts}));
    }

    Ok(contents)
}

fn convert_tools(req: &Value) -> Option<Value> {
    let tools = req.get("tools")?.as_array()?;
    let declarations: Vec<Value> = tools
        .iter()
        .filter_map(|tool| {
            Some(json!({
                "name": tool.get("name")?.as_str()?,
                "description": tool.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                "parameters": tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or(json!({"type": "object", "properties": {}})),
            }))
        })
        .collect();
    if declarations.is_empty() {
        None
    } else {
        Some(json!([{"functionDeclarations": declarations}]))
    }
}

// ─── Response: generateContent → messages ──────────────────────────────────

fn map_finish_reason(finish: &str, used_tool: bool) -> &'static str {
    if used_tool {
        return "tool_use";
    }
    match finish {
        "MAX_TOKENS" => "max_tokens",
        _ => "end_turn",
    }
}

fn claude_usage(meta: Option<&Value>) -> Value {
    let Some(meta) = meta else {
        return json!({"output_tokens": 0});
    };
    let mut usage = json!({
        "input_tokens": meta.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0),
        "output_tokens": meta
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    });
    if let Some(cached) = meta.get("cachedContentTokenCount").and_then(|v| v.as_u64()) {
        usage["cache_read_input_tokens"] = json!(cached);
    }
    usage
}

pub fn translate_non_stream_response(input: &ResponseInput) -> Result<Vec<u8>, ProxyError> {
    let resp: Value = serde_json::from_slice(input.body)?;

    let candidate = resp
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    let mut content: Vec<Value> = Vec::new();
    let mut used_tool = false;
    let mut finish = "STOP";

    if let Some(candidate) = candidate {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                        content.push(json!({"type": "thinking", "thinking": text}));
                    } else {
                        content.push(json!({"type": "text", "text": text}));
                    }
                } else if let Some(fc) = part.get("functionCall") {
                    used_tool = true;
                    content.push(json!({
                        "type": "tool_use",
                        "id": format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                        "name": fc.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                        "input": fc.get("args").cloned().unwrap_or(json!({})),
                    }));
                }
            }
        }
        if let Some(f) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            finish = f;
        }
    }

    let claude_resp = json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": input.model,
        "content": content,
        "stop_reason": map_finish_reason(finish, used_tool),
        "stop_sequence": null,
        "usage": claude_usage(resp.get("usageMetadata")),
    });

    serde_json::to_vec(&claude_resp).map_err(|e| ProxyError::Translation(e.to_string()))
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

    let resp: Value = serde_json::from_slice(input.data)?;

    if !state.has_first_response {
        state.has_first_response = true;
        state.response_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
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
                "usage": claude_usage(resp.get("usageMetadata")),
            },
        });
        pieces.push(SsePiece::event("message_start", start.to_string()));
    }

    let candidate = resp
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    if let Some(candidate) = candidate {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                        open_block(
                            state,
                            BlockKind::Thinking,
                            json!({"type": "thinking", "thinking": ""}),
                            &mut pieces,
                        );
                        pieces.push(block_delta(
                            state,
                            json!({"type": "thinking_delta", "thinking": text}),
                        ));
                    } else {
                        open_block(
                            state,
                            BlockKind::Text,
                            json!({"type": "text", "text": ""}),
                            &mut pieces,
                        );
                        pieces.push(block_delta(
                            state,
                            json!({"type": "text_delta", "text": text}),
                        ));
                    }
                    state.has_content = true;
                } else if let Some(fc) = part.get("functionCall") {
                    state.used_tool = true;
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    open_block(
                        state,
                        BlockKind::Tool,
                        json!({
                            "type": "tool_use",
                            "id": format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                            "name": fc.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                            "input": {},
                        }),
                        &mut pieces,
                    );
                    // Gemini delivers complete arguments in one part.
                    pieces.push(block_delta(
                        state,
                        json!({"type": "input_json_delta", "partial_json": args.to_string()}),
                    ));
                }
            }
        }

        if let Some(finish) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            state.pending_stop_reason =
                Some(map_finish_reason(finish, state.used_tool).to_string());
            finalize(state, resp.get("usageMetadata").cloned(), &mut pieces);
        }
    }

    Ok(pieces)
}

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

fn finalize(state: &mut TranslateState, usage_meta: Option<Value>, pieces: &mut Vec<SsePiece>) {
    if state.sent_message_delta {
        return;
    }
    close_open_block(state, pieces);
    state.sent_message_delta = true;
    state.finalized = true;

    let stop_reason = state
        .pending_stop_reason
        .clone()
        .unwrap_or_else(|| {
            if state.used_tool {
                "tool_use".to_string()
            } else {
                "end_turn".to_string()
            }
        });

    let delta = json!({
        "type": "message_delta",
        "delta": {"stop_reason": stop_reason, "stop_sequence": null},
        "usage": claude_usage(usage_meta.as_ref()),
    });
    pieces.push(SsePiece::event("message_delta", delta.to_string()));
    pieces.push(SsePiece::event(
        "message_stop",
        json!({"type": "message_stop"}).to_string(),
    ));
}
