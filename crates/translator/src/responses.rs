//! OpenAI chat ↔ OpenAI responses: same-platform, lossless in both
//! directions.

use crate::{
    RequestInput, ResponseInput, SsePiece, StreamInput, TranslateState, TranslatedRequest,
};
use conduit_core::error::ProxyError;
use serde_json::{Value, json};

// ─── Requests ──────────────────────────────────────────────────────────────

/// Chat request → responses request.
pub fn chat_request_to_responses(input: &RequestInput) -> Result<TranslatedRequest, ProxyError> {
    let req: Value = serde_json::from_slice(input.body)?;

    let mut instructions: Vec<String> = Vec::new();
    let mut items: Vec<Value> = Vec::new();

    for msg in req
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ProxyError::Translation("missing messages field".to_string()))?
    {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = msg.get("content").and_then(|c| c.as_str()) {
                    instructions.push(text.to_string());
                }
            }
            "tool" => {
                items.push(json!({
                    "type": "function_call_output",
                    "call_id": msg.get("tool_call_id").and_then(|v| v.as_str()).unwrap_or(""),
                    "output": msg.get("content").and_then(|c| c.as_str()).unwrap_or(""),
                }));
            }
            "assistant" => {
                if let Some(text) = msg.get("content").and_then(|c| c.as_str())
                    && !text.is_empty()
                {
                    items.push(json!({
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": text}],
                    }));
                }
                if let Some(tool_calls) = msg.get("tool_calls").and_then(|t| t.as_array()) {
                    for tc in tool_calls {
                        items.push(json!({
                            "type": "function_call",
                            "call_id": tc.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                            "name": tc
                                .get("function")
                                .and_then(|f| f.get("name"))
                                .and_then(|n| n.as_str())
                                .unwrap_or(""),
                            "arguments": tc
                                .get("function")
                                .and_then(|f| f.get("arguments"))
                                .and_then(|a| a.as_str())
                                .unwrap_or("{}"),
                        }));
                    }
                }
            }
            _ => {
                let content = convert_user_content_to_input(msg.get("content"));
                items.push(json!({"role": "user", "content": content}));
            }
        }
    }

    let mut out = json!({
        "model": input.model,
        "input": items,
    });

    if !instructions.is_empty() {
        out["instructions"] = Value::String(instructions.join("\n\n"));
    }
    if let Some(max) = req.get("max_tokens").or(req.get("max_completion_tokens")) {
        out["max_output_tokens"] = max.clone();
    }
    if let Some(temp) = req.get("temperature") {
        out["temperature"] = temp.clone();
    }
    if let Some(top_p) = req.get("top_p") {
        out["top_p"] = top_p.clone();
    }
    if input.stream {
        out["stream"] = Value::Bool(true);
    }
    if let Some(tools) = req.get("tools").and_then(|t| t.as_array()) {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|t| {
                let f = t.get("function")?;
                Some(json!({
                    "type": "function",
                    "name": f.get("name")?.as_str()?,
                    "description": f.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                    "parameters": f.get("parameters").cloned().unwrap_or(json!({})),
                }))
            })
            .collect();
        if !converted.is_empty() {
            out["tools"] = Value::Array(converted);
        }
    }
    if let Some(effort) = input
        .reasoning_effort
        .or_else(|| req.get("reasoning_effort").and_then(|e| e.as_str()))
    {
        out["reasoning"] = json!({"effort": effort});
    }

    let body = serde_json::to_vec(&out).map_err(|e| ProxyError::Translation(e.to_string()))?;
    Ok(TranslatedRequest::plain(body))
}

fn convert_user_content_to_input(content: Option<&Value>) -> Value {
    match content {
        Some(Value::String(s)) => json!([{"type": "input_text", "text": s}]),
        Some(Value::Array(parts)) => {
            let converted: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p.get("type").and_then(|t| t.as_str())? {
                    "text" => Some(json!({
                        "type": "input_text",
                        "text": p.get("text").and_then(|t| t.as_str()).unwrap_or(""),
                    })),
                    "image_url" => Some(json!({
                        "type": "input_image",
                        "image_url": p
                            .get("image_url")
                            .and_then(|u| u.get("url"))
                            .and_then(|u| u.as_str())
                            .unwrap_or(""),
                    })),
                    _ => None,
                })
                .collect();
            Value::Array(converted)
        }
        _ => json!([]),
    }
}

/// Responses request → chat request.
pub fn responses_request_to_chat(input: &RequestInput) -> Result<TranslatedRequest, ProxyError> {
    let req: Value = serde_json::from_slice(input.body)?;

    let mut messages: Vec<Value> = Vec::new();

    if let Some(instructions) = req.get("instructions").and_then(|i| i.as_str())
        && !instructions.is_empty()
    {
        messages.push(json!({"role": "system", "content": instructions}));
    }

    match req.get("input") {
        Some(Value::String(text)) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                convert_input_item(item, &mut messages);
            }
        }
        _ => {}
    }

    let mut out = json!({
        "model": input.model,
        "messages": messages,
    });

    if let Some(max) = req.get("max_output_tokens") {
        out["max_tokens"] = max.clone();
    }
    if let Some(temp) = req.get("temperature") {
        out["temperature"] = temp.clone();
    }
    if let Some(top_p) = req.get("top_p") {
        out["top_p"] = top_p.clone();
    }
    if input.stream {
        out["stream"] = Value::Bool(true);
    }
    if let Some(tools) = req.get("tools").and_then(|t| t.as_array()) {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|t| {
                if t.get("type").and_then(|ty| ty.as_str()) != Some("function") {
                    return None;
                }
                Some(json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name")?.as_str()?,
                        "description": t.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                        "parameters": t.get("parameters").cloned().unwrap_or(json!({})),
                    },
                }))
            })
            .collect();
        if !converted.is_empty() {
            out["tools"] = Value::Array(converted);
        }
    }
    if let Some(effort) = req
        .get("reasoning")
        .and_then(|r| r.get("effort"))
        .and_then(|e| e.as_str())
    {
        out["reasoning_effort"] = Value::String(effort.to_string());
    }

    let body = serde_json::to_vec(&out).map_err(|e| ProxyError::Translation(e.to_string()))?;
    Ok(TranslatedRequest::plain(body))
}

fn convert_input_item(item: &Value, messages: &mut Vec<Value>) {
    match item.get("type").and_then(|t| t.as_str()) {
        Some("function_call") => {
            messages.push(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": item.get("call_id").and_then(|v| v.as_str()).unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": item.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                        "arguments": item.get("arguments").and_then(|a| a.as_str()).unwrap_or("{}"),
                    },
                }],
            }));
        }
        Some("function_call_output") => {
            messages.push(json!({
                "role": "tool",
                "tool_call_id": item.get("call_id").and_then(|v| v.as_str()).unwrap_or(""),
                "content": item.get("output").and_then(|o| o.as_str()).unwrap_or(""),
            }));
        }
        _ => {
            // A message item: {role, content}
            let role = item.get("role").and_then(|r| r.as_str()).unwrap_or("user");
            let content = match item.get("content") {
                Some(Value::String(s)) => Value::String(s.clone()),
                Some(Value::Array(parts)) => {
                    let text: Vec<&str> = parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                        .collect();
                    Value::String(text.join(""))
                }
                _ => Value::String(String::new()),
            };
            messages.push(json!({"role": role, "content": content}));
        }
    }
}

// ─── Non-stream responses ──────────────────────────────────────────────────

/// Responses body → chat completion body.
pub fn responses_body_to_chat(input: &ResponseInput) -> Result<Vec<u8>, ProxyError> {
    let resp: Value = serde_json::from_slice(input.body)?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    if let Some(output) = resp.get("output").and_then(|o| o.as_array()) {
        for item in output {
            match item.get("type").and_then(|t| t.as_str()) {
                Some("message") | None => {
                    if let Some(parts) = item.get("content").and_then(|c| c.as_array()) {
                        for part in parts {
                            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                                text_parts.push(text.to_string());
                            }
                        }
                    }
                }
                Some("function_call") => {
                    tool_calls.push(json!({
                        "id": item.get("call_id").and_then(|v| v.as_str()).unwrap_or(""),
                        "type": "function",
                        "function": {
                            "name": item.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                            "arguments": item
                                .get("arguments")
                                .and_then(|a| a.as_str())
                                .unwrap_or("{}"),
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
    let finish_reason = if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
        "tool_calls"
    } else if resp.get("status").and_then(|s| s.as_str()) == Some("incomplete") {
        "length"
    } else {
        "stop"
    };

    let mut chat = json!({
        "id": format!(
            "chatcmpl-{}",
            resp.get("id").and_then(|v| v.as_str()).unwrap_or("unknown")
        ),
        "object": "chat.completion",
        "created": resp
            .get("created_at")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        "model": input.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
    });

    if let Some(u) = resp.get("usage") {
        let prompt = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let completion = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let mut usage = json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        });
        if let Some(cached) = u
            .get("input_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_u64())
        {
            usage["prompt_tokens_details"] = json!({"cached_tokens": cached});
        }
        chat["usage"] = usage;
    }

    serde_json::to_vec(&chat).map_err(|e| ProxyError::Translation(e.to_string()))
}

/// Chat completion body → responses body.
pub fn chat_body_to_responses(input: &ResponseInput) -> Result<Vec<u8>, ProxyError> {
    let resp: Value = serde_json::from_slice(input.body)?;

    let choice = resp
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    let mut output: Vec<Value> = Vec::new();
    let mut status = "completed";

    if let Some(choice) = choice {
        if let Some(message) = choice.get("message") {
            if let Some(text) = message.get("content").and_then(|c| c.as_str())
                && !text.is_empty()
            {
                output.push(json!({
                    "type": "message",
                    "role": "assistant",
                    "status": "completed",
                    "content": [{"type": "output_text", "text": text, "annotations": []}],
                }));
            }
            if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
                for tc in tool_calls {
                    output.push(json!({
                        "type": "function_call",
                        "status": "completed",
                        "call_id": tc.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                        "name": tc
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|n| n.as_str())
                            .unwrap_or(""),
                        "arguments": tc
                            .get("function")
                            .and_then(|f| f.get("arguments"))
                            .and_then(|a| a.as_str())
                            .unwrap_or("{}"),
                    }));
                }
            }
        }
        if choice.get("finish_reason").and_then(|f| f.as_str()) == Some("length") {
            status = "incomplete";
        }
    }

    let mut out = json!({
        "id": format!(
            "resp_{}",
            resp.get("id").and_then(|v| v.as_str()).unwrap_or("unknown")
        ),
        "object": "response",
        "created_at": resp
            .get("created")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        "status": status,
        "model": input.model,
        "output": output,
    });

    if let Some(u) = resp.get("usage") {
        let input_tokens = u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let output_tokens = u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let mut usage = json!({
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        });
        if let Some(cached) = u
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_u64())
        {
            usage["input_tokens_details"] = json!({"cached_tokens": cached});
        }
        out["usage"] = usage;
    }

    serde_json::to_vec(&out).map_err(|e| ProxyError::Translation(e.to_string()))
}

// ─── Streaming ─────────────────────────────────────────────────────────────

/// Responses SSE → chat chunks.
pub fn responses_stream_to_chat(
    input: &StreamInput,
    state: &mut TranslateState,
) -> Result<Vec<SsePiece>, ProxyError> {
    if input.data == b"[DONE]" {
        if state.finalized {
            return Ok(Vec::new());
        }
        state.finalized = true;
        return Ok(vec![SsePiece::done()]);
    }

    let event_value: Value = serde_json::from_slice(input.data)?;
    let event = input
        .event
        .or_else(|| event_value.get("type").and_then(|t| t.as_str()));
    let mut pieces = Vec::new();

    match event {
        Some("response.created") => {
            let id = event_value
                .get("response")
                .and_then(|r| r.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            state.response_id = format!("chatcmpl-{id}");
            state.created = chrono::Utc::now().timestamp();
            state.model = input.model.to_string();
            state.current_tool_call_index = -1;
            pieces.push(chat_chunk(
                state,
                json!({"role": "assistant", "content": ""}),
                None,
                None,
            ));
        }
        Some("response.output_text.delta") => {
            if let Some(delta) = event_value.get("delta").and_then(|d| d.as_str()) {
                pieces.push(chat_chunk(state, json!({"content": delta}), None, None));
            }
        }
        Some("response.output_item.added") => {
            if let Some(item) = event_value.get("item")
                && item.get("type").and_then(|t| t.as_str()) == Some("function_call")
            {
                state.current_tool_call_index += 1;
                state.used_tool = true;
                pieces.push(chat_chunk(
                    state,
                    json!({
                        "tool_calls": [{
                            "index": state.current_tool_call_index,
                            "id": item.get("call_id").and_then(|v| v.as_str()).unwrap_or(""),
                            "type": "function",
                            "function": {
                                "name": item.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                                "arguments": "",
                            },
                        }],
                    }),
                    None,
                    None,
                ));
            }
        }
        Some("response.function_call_arguments.delta") => {
            if let Some(delta) = event_value.get("delta").and_then(|d| d.as_str()) {
                pieces.push(chat_chunk(
                    state,
                    json!({
                        "tool_calls": [{
                            "index": state.current_tool_call_index,
                            "function": {"arguments": delta},
                        }],
                    }),
                    None,
                    None,
                ));
            }
        }
        Some("response.completed") | Some("response.done") => {
            let finish = if state.used_tool { "tool_calls" } else { "stop" };
            let usage = event_value
                .get("response")
                .and_then(|r| r.get("usage"))
                .map(|u| {
                    let prompt = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    let completion =
                        u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    json!({
                        "prompt_tokens": prompt,
                        "completion_tokens": completion,
                        "total_tokens": prompt + completion,
                    })
                });
            pieces.push(chat_chunk(state, json!({}), Some(finish), usage));
            pieces.push(SsePiece::done());
            state.finalized = true;
        }
        _ => {}
    }

    Ok(pieces)
}

fn chat_chunk(
    state: &TranslateState,
    delta: Value,
    finish: Option<&str>,
    usage: Option<Value>,
) -> SsePiece {
    let mut chunk = json!({
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
    if let Some(usage) = usage {
        chunk["usage"] = usage;
    }
    SsePiece::data(chunk.to_string())
}

/// Chat SSE → responses SSE.
pub fn chat_stream_to_responses(
    input: &StreamInput,
    state: &mut TranslateState,
) -> Result<Vec<SsePiece>, ProxyError> {
    let mut pieces = Vec::new();

    if input.data == b"[DONE]" {
        finalize_responses(state, None, &mut pieces);
        return Ok(pieces);
    }

    let chunk: Value = serde_json::from_slice(input.data)?;

    if !state.has_first_response {
        state.has_first_response = true;
        state.response_id = format!(
            "resp_{}",
            chunk
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        );
        state.created = chrono::Utc::now().timestamp();
        state.model = input.model.to_string();
        let created = json!({
            "type": "response.created",
            "response": {
                "id": state.response_id,
                "object": "response",
                "status": "in_progress",
                "model": state.model,
                "output": [],
            },
        });
        pieces.push(SsePiece::event("response.created", created.to_string()));
    }

    let choice = chunk
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    if let Some(choice) = choice {
        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|v| v.as_str())
                && !text.is_empty()
            {
                let piece = json!({
                    "type": "response.output_text.delta",
                    "delta": text,
                });
                pieces.push(SsePiece::event(
                    "response.output_text.delta",
                    piece.to_string(),
                ));
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                for tc in tool_calls {
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str());
                    if let Some(name) = name {
                        state.used_tool = true;
                        let added = json!({
                            "type": "response.output_item.added",
                            "item": {
                                "type": "function_call",
                                "call_id": tc.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                                "name": name,
                                "arguments": "",
                            },
                        });
                        pieces.push(SsePiece::event(
                            "response.output_item.added",
                            added.to_string(),
                        ));
                    }
                    if let Some(args) = tc
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        && !args.is_empty()
                    {
                        let delta_ev = json!({
                            "type": "response.function_call_arguments.delta",
                            "delta": args,
                        });
                        pieces.push(SsePiece::event(
                            "response.function_call_arguments.delta",
                            delta_ev.to_string(),
                        ));
                    }
                }
            }
        }
        if let Some(finish) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            state.pending_stop_reason = Some(finish.to_string());
            if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
                finalize_responses(state, Some(usage.clone()), &mut pieces);
            }
        }
    }

    if choice.is_none()
        && let Some(usage) = chunk.get("usage").filter(|u| !u.is_null())
    {
        finalize_responses(state, Some(usage.clone()), &mut pieces);
    }

    Ok(pieces)
}

fn finalize_responses(
    state: &mut TranslateState,
    usage: Option<Value>,
    pieces: &mut Vec<SsePiece>,
) {
    if state.finalized {
        return;
    }
    state.finalized = true;

    let status = match state.pending_stop_reason.as_deref() {
        Some("length") => "incomplete",
        _ => "completed",
    };

    let mut response = json!({
        "id": state.response_id,
        "object": "response",
        "status": status,
        "model": state.model,
        "output": [],
    });
    if let Some(u) = usage {
        let input_tokens = u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let output_tokens = u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        response["usage"] = json!({
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        });
    }

    let completed = json!({"type": "response.completed", "response": response});
    pieces.push(SsePiece::event("response.completed", completed.to_string()));
    pieces.push(SsePiece::done());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_chat_to_responses_request() {
        let out = chat_request_to_responses(&RequestInput {
            model: "gpt-5",
            body: br#"{"model":"gpt-4o","max_tokens":64,
                "messages":[
                    {"role":"system","content":"be brief"},
                    {"role":"user","content":"hi"},
                    {"role":"assistant","content":null,"tool_calls":[
                        {"id":"c1","type":"function","function":{"name":"f","arguments":"{}"}}]},
                    {"role":"tool","tool_call_id":"c1","content":"out"}
                ]}"#,
            stream: true,
            reasoning_effort: Some("high"),
        })
        .unwrap();
        let v: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(v["model"], "gpt-5");
        assert_eq!(v["instructions"], "be brief");
        assert_eq!(v["max_output_tokens"], 64);
        assert_eq!(v["stream"], true);
        assert_eq!(v["reasoning"]["effort"], "high");
        assert_eq!(v["input"][0]["role"], "user");
        assert_eq!(v["input"][1]["type"], "function_call");
        assert_eq!(v["input"][2]["type"], "function_call_output");
    }

    #[test]
    fn test_responses_to_chat_request() {
        let out = responses_request_to_chat(&RequestInput {
            model: "gpt-4o",
            body: br#"{"model":"gpt-5","instructions":"sys","max_output_tokens":32,
                "input":[
                    {"role":"user","content":[{"type":"input_text","text":"hello"}]},
                    {"type":"function_call","call_id":"c1","name":"f","arguments":"{\"a\":1}"},
                    {"type":"function_call_output","call_id":"c1","output":"ok"}
                ],
                "reasoning":{"effort":"low"}}"#,
            stream: false,
            reasoning_effort: None,
        })
        .unwrap();
        let v: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hello");
        assert_eq!(v["messages"][2]["tool_calls"][0]["function"]["name"], "f");
        assert_eq!(v["messages"][3]["role"], "tool");
        assert_eq!(v["max_tokens"], 32);
        assert_eq!(v["reasoning_effort"], "low");
    }

    #[test]
    fn test_same_platform_round_trip_preserves_order_and_tools() {
        // chat → responses → chat keeps model, ordering, and tool names.
        let original = br#"{"model":"gpt-4o","messages":[
            {"role":"system","content":"s"},
            {"role":"user","content":"q"},
            {"role":"assistant","content":null,"tool_calls":[
                {"id":"c1","type":"function","function":{"name":"lookup","arguments":"{}"}}]},
            {"role":"tool","tool_call_id":"c1","content":"r"}
        ]}"#;
        let there = chat_request_to_responses(&RequestInput {
            model: "gpt-4o",
            body: original,
            stream: false,
            reasoning_effort: None,
        })
        .unwrap();
        let back = responses_request_to_chat(&RequestInput {
            model: "gpt-4o",
            body: &there.body,
            stream: false,
            reasoning_effort: None,
        })
        .unwrap();
        let v: Value = serde_json::from_slice(&back.body).unwrap();
        let roles: Vec<&str> = v["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_json_diff::assert_json_include!(
            actual: v,
            expected: serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "s"},
                    {"role": "user", "content": "q"},
                    {"tool_calls": [{"function": {"name": "lookup"}}]},
                    {"role": "tool", "tool_call_id": "c1", "content": "r"},
                ],
            })
        );
    }

    #[test]
    fn test_responses_body_to_chat() {
        let out = responses_body_to_chat(&ResponseInput {
            body: br#"{"id":"r1","object":"response","status":"completed","created_at":5,
                "output":[
                    {"type":"message","role":"assistant","content":[
                        {"type":"output_text","text":"hi there"}]},
                    {"type":"function_call","call_id":"c9","name":"f","arguments":"{}"}
                ],
                "usage":{"input_tokens":3,"output_tokens":8,
                         "input_tokens_details":{"cached_tokens":1}}}"#,
            model: "gpt-4o",
            original_request: b"{}",
            tool_names: &HashMap::new(),
        })
        .unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["choices"][0]["message"]["content"], "hi there");
        assert_eq!(v["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(v["usage"]["prompt_tokens"], 3);
        assert_eq!(v["usage"]["prompt_tokens_details"]["cached_tokens"], 1);
    }

    #[test]
    fn test_chat_body_to_responses() {
        let out = chat_body_to_responses(&ResponseInput {
            body: br#"{"id":"cmpl1","created":9,"model":"gpt-4o",
                "choices":[{"index":0,"finish_reason":"stop","message":{
                    "role":"assistant","content":"done"}}],
                "usage":{"prompt_tokens":2,"completion_tokens":5}}"#,
            model: "gpt-5",
            original_request: b"{}",
            tool_names: &HashMap::new(),
        })
        .unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["object"], "response");
        assert_eq!(v["status"], "completed");
        assert_eq!(v["output"][0]["content"][0]["text"], "done");
        assert_eq!(v["usage"]["input_tokens"], 2);
    }

    #[test]
    fn test_responses_stream_to_chat() {
        let map = HashMap::new();
        let mut state = TranslateState::new();
        let feed = |ev: &'static str, data: &str, state: &mut TranslateState| {
            responses_stream_to_chat(
                &StreamInput {
                    event: Some(ev),
                    data: data.as_bytes(),
                    model: "gpt-4o",
                    original_request: b"{}",
                    tool_names: &map,
                },
                state,
            )
            .unwrap()
        };

        let out = feed(
            "response.created",
            r#"{"type":"response.created","response":{"id":"r1"}}"#,
            &mut state,
        );
        assert_eq!(out.len(), 1);

        let out = feed(
            "response.output_text.delta",
            r#"{"type":"response.output_text.delta","delta":"chunk"}"#,
            &mut state,
        );
        let v: Value = serde_json::from_str(&out[0].data).unwrap();
        assert_eq!(v["choices"][0]["delta"]["content"], "chunk");

        let out = feed(
            "response.completed",
            r#"{"type":"response.completed","response":{"id":"r1",
                "usage":{"input_tokens":4,"output_tokens":6}}}"#,
            &mut state,
        );
        assert_eq!(out.len(), 2);
        assert!(out[1].is_done());
        let v: Value = serde_json::from_str(&out[0].data).unwrap();
        assert_eq!(v["usage"]["completion_tokens"], 6);

        // Upstream [DONE] after completion is swallowed.
        let out = responses_stream_to_chat(
            &StreamInput {
                event: None,
                data: b"[DONE]",
                model: "gpt-4o",
                original_request: b"{}",
                tool_names: &map,
            },
            &mut state,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_chat_stream_to_responses() {
        let map = HashMap::new();
        let mut state = TranslateState::new();
        let feed = |data: &str, state: &mut TranslateState| {
            chat_stream_to_responses(
                &StreamInput {
                    event: None,
                    data: data.as_bytes(),
                    model: "gpt-5",
                    original_request: b"{}",
                    tool_names: &map,
                },
                state,
            )
            .unwrap()
        };

        let out = feed(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":"he"}}]}"#,
            &mut state,
        );
        assert_eq!(out[0].event.as_deref(), Some("response.created"));
        assert_eq!(out[1].event.as_deref(), Some("response.output_text.delta"));

        let out = feed(
            r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            &mut state,
        );
        assert!(out.is_empty()); // held until usage or [DONE]

        let out = feed(
            r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":1,"completion_tokens":2}}"#,
            &mut state,
        );
        assert_eq!(out[0].event.as_deref(), Some("response.completed"));
        assert!(out[1].is_done());
        let v: Value = serde_json::from_str(&out[0].data).unwrap();
        assert_eq!(v["response"]["usage"]["output_tokens"], 2);
        assert_eq!(v["response"]["status"], "completed");
    }
}
