//! OpenAI chat client ↔ Gemini channel.
//!
//! Requests travel chat → generateContent; responses travel
//! generateContent → chat.

use crate::{
    RequestInput, ResponseInput, SsePiece, StreamInput, TranslateState, TranslatedRequest,
    thinking,
};
use conduit_core::error::ProxyError;
use serde_json::{Value, json};

// ─── Request: chat → generateContent ───────────────────────────────────────

pub fn translate_request(input: &RequestInput) -> Result<TranslatedRequest, ProxyError> {
    let req: Value = serde_json::from_slice(input.body)?;

    let mut gemini_req = json!({
        "contents": convert_messages(&req)?,
    });

    if let Some(si) = extract_system_instruction(&req) {
        gemini_req["systemInstruction"] = si;
    }
    if let Some(tools) = convert_tools(&req) {
        gemini_req["tools"] = tools;
    }

    let mut generation_config = build_generation_config(&req);
    let effort = input
        .reasoning_effort
        .map(str::to_string)
        .or_else(|| {
            req.get("reasoning_effort")
                .and_then(|e| e.as_str())
                .map(str::to_string)
        });
    if let Some(effort) = effort {
        let cfg = generation_config.get_or_insert_with(|| json!({}));
        thinking::apply_gemini_thinking(cfg, input.model, &effort);
    }
    if let Some(cfg) = generation_config {
        gemini_req["generationConfig"] = cfg;
    }

    // The model rides in the URL for Gemini, not the body.
    let body =
        serde_json::to_vec(&gemini_req).map_err(|e| ProxyError::Translation(e.to_string()))?;
    Ok(TranslatedRequest::plain(body))
}

fn extract_system_instruction(req: &Value) -> Option<Value> {
    let messages = req.get("messages")?.as_array()?;
    let mut parts = Vec::new();

    for msg in messages {
        if msg.get("role").and_then(|r| r.as_str()) != Some("system") {
            continue;
        }
        match msg.get("content") {
            Some(Value::String(s)) => parts.push(json!({"text": s})),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        parts.push(json!({"text": text}));
                    }
                }
            }
            _ => {}
        }
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

    let mut contents: Vec<Value> = Vec::new();

    for msg in messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("");

        if role == "system" {
            continue;
        }

        if role == "tool" {
            let name = msg
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("function");
            let content_text = msg.get("content").and_then(|c| c.as_str()).unwrap_or("");
            let response_val = serde_json::from_str::<Value>(content_text)
                .unwrap_or(json!({"result": content_text}));

            let part = json!({
                "functionResponse": {"name": name, "response": response_val},
            });
            push_part(&mut contents, "user", vec![part]);
            continue;
        }

        let gemini_role = if role == "assistant" { "model" } else { "user" };
        let parts = convert_content_to_parts(msg)?;
        push_part(&mut contents, gemini_role, parts);
    }

    Ok(contents)
}

/// Append parts, merging into the previous turn when the role matches.
fn push_part(contents: &mut Vec<Value>, role: &str, parts: Vec<Value>) {
    if let Some(last) = contents.last_mut()
        && last.get("role").and_then(|r: &Value| r.as_str()) == Some(role)
        && let Some(existing) = last.get_mut("parts").and_then(|p| p.as_array_mut())
    {
        existing.extend(parts);
        return;
    }
    contents.push(json!({"role": role, "parts": parts}));
}

fn convert_content_to_parts(msg: &Value) -> Result<Vec<Value>, ProxyError> {
    let mut parts = Vec::new();

    match msg.get("content") {
        Some(Value::String(s)) => parts.push(json!({"text": s})),
        Some(Value::Array(content_parts)) => {
            for part in content_parts {
                match part.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text" => {
                        let text = part.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        parts.push(json!({"text": text}));
                    }
                    "image_url" => {
                        if let Some(url) = part
                            .get("image_url")
                            .and_then(|u| u.get("url"))
                            .and_then(|u| u.as_str())
                            && let Some(inline) = convert_image_url(url)
                        {
                            parts.push(inline);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    if let Some(tool_calls) = msg.get("tool_calls").and_then(|tc| tc.as_array()) {
        for tc in tool_calls {
            let arguments = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            parts.push(json!({
                "functionCall": {
                    "name": tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or(""),
                    "args": args,
                }
            }));
        }
    }

    if parts.is_empty() {
        parts.push(json!({"text": ""}));
    }

    Ok(parts)
}

fn convert_image_url(url: &str) -> Option<Value> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (meta, data) = rest.split_once(',')?;
        let mime_type = meta.split(';').next().unwrap_or("image/png");
        return Some(json!({
            "inlineData": {"mimeType": mime_type, "data": data},
        }));
    }
    // Remote URLs cannot be inlined; degrade to a text reference.
    Some(json!({"text": format!("[image: {url}]")}))
}

fn convert_tools(req: &Value) -> Option<Value> {
    let tools = req.get("tools")?.as_array()?;
    let mut declarations = Vec::new();

    for tool in tools {
        let Some(func) = tool.get("function") else {
            continue;
        };
        let mut decl = json!({
            "name": func.get("name").and_then(|n| n.as_str()).unwrap_or(""),
            "description": func.get("description").and_then(|d| d.as_str()).unwrap_or(""),
        });
        if let Some(params) = func.get("parameters") {
            decl["parameters"] = params.clone();
        }
        declarations.push(decl);
    }

    if declarations.is_empty() {
        None
    } else {
        Some(json!([{"functionDeclarations": declarations}]))
    }
}

fn build_generation_config(req: &Value) -> Option<Value> {
    let mut config = json!({});
    let mut has_any = false;

    if let Some(temp) = req.get("temperature") {
        config["temperature"] = temp.clone();
        has_any = true;
    }
    if let Some(top_p) = req.get("top_p") {
        config["topP"] = top_p.clone();
        has_any = true;
    }
    if let Some(max) = req.get("max_tokens").or(req.get("max_completion_tokens")) {
        config["maxOutputTokens"] = max.clone();
        has_any = true;
    }
    match req.get("stop") {
        Some(Value::String(s)) => {
            config["stopSequences"] = json!([s]);
            has_any = true;
        }
        Some(stop @ Value::Array(_)) => {
            config["stopSequences"] = stop.clone();
            has_any = true;
        }
        _ => {}
    }

    if has_any { Some(config) } else { None }
}

// ─── Response: generateContent → chat ──────────────────────────────────────

fn map_finish_reason(finish: &str) -> &'static str {
    match finish {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    }
}

fn chat_usage(meta: &Value) -> Value {
    let prompt = meta
        .get("promptTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion = meta
        .get("candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let mut usage = json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion,
        "total_tokens": meta
            .get("totalTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(prompt + completion),
    });
    if let Some(cached) = meta.get("cachedContentTokenCount").and_then(|v| v.as_u64()) {
        usage["prompt_tokens_details"] = json!({"cached_tokens": cached});
    }
    usage
}

pub fn translate_non_stream_response(input: &ResponseInput) -> Result<Vec<u8>, ProxyError> {
    let resp: Value = serde_json::from_slice(input.body)?;

    let candidate = resp
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = "stop";

    if let Some(candidate) = candidate {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(text.to_string());
                } else if let Some(fc) = part.get("functionCall") {
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    tool_calls.push(json!({
                        "id": format!("call_{}", uuid::Uuid::new_v4().simple()),
                        "type": "function",
                        "function": {
                            "name": fc.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                            "arguments": args.to_string(),
                        },
                        "index": tool_calls.len(),
                    }));
                }
            }
        }
        if let Some(finish) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            finish_reason = map_finish_reason(finish);
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
        finish_reason = "tool_calls";
    }

    let mut chat_resp = json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": input.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
    });

    if let Some(meta) = resp.get("usageMetadata") {
        chat_resp["usage"] = chat_usage(meta);
    }

    serde_json::to_vec(&chat_resp).map_err(|e| ProxyError::Translation(e.to_string()))
}

pub fn translate_stream_response(
    input: &StreamInput,
    state: &mut TranslateState,
) -> Result<Vec<SsePiece>, ProxyError> {
    if input.data == b"[DONE]" {
        // Gemini streams end on finishReason; pass the sentinel along
        // only if the terminal chunk never arrived.
        if state.finalized {
            return Ok(Vec::new());
        }
        state.finalized = true;
        return Ok(vec![SsePiece::done()]);
    }

    let resp: Value = serde_json::from_slice(input.data)?;
    let mut pieces = Vec::new();

    if !state.has_first_response {
        state.has_first_response = true;
        state.response_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        state.created = chrono::Utc::now().timestamp();
        state.model = input.model.to_string();
        state.current_tool_call_index = -1;

        pieces.push(chunk_piece(
            state,
            json!({"role": "assistant", "content": ""}),
            None,
            None,
        ));
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
                    // Thought parts have no chat equivalent; skip them.
                    if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                        continue;
                    }
                    pieces.push(chunk_piece(state, json!({"content": text}), None, None));
                } else if let Some(fc) = part.get("functionCall") {
                    state.current_tool_call_index += 1;
                    state.used_tool = true;
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    pieces.push(chunk_piece(
                        state,
                        json!({
                            "tool_calls": [{
                                "index": state.current_tool_call_index,
                                "id": format!("call_{}", uuid::Uuid::new_v4().simple()),
                                "type": "function",
                                "function": {
                                    "name": fc.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                                    "arguments": args.to_string(),
                                },
                            }],
                        }),
                        None,
                        None,
                    ));
                }
            }
        }

        if let Some(finish) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            let finish_reason = if state.used_tool {
                "tool_calls"
            } else {
                map_finish_reason(finish)
            };
            let usage = resp.get("usageMetadata").map(chat_usage);
            pieces.push(chunk_piece(state, json!({}), Some(finish_reason), usage));
            pieces.push(SsePiece::done());
            state.finalized = true;
        }
    }

    Ok(pieces)
}

fn chunk_piece(
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(body: &str, model: &str, effort: Option<&str>) -> Value {
        let out = translate_request(&RequestInput {
            model,
            body: body.as_bytes(),
            stream: false,
            reasoning_effort: effort,
        })
        .unwrap();
        serde_json::from_slice(&out.body).unwrap()
    }

    #[test]
    fn test_roles_and_system() {
        let req = request(
            r#"{"model":"gpt-4o","messages":[
                {"role":"system","content":"rules"},
                {"role":"user","content":"hi"},
                {"role":"assistant","content":"hello"}
            ]}"#,
            "gemini-2.5-flash",
            None,
        );
        assert_eq!(req["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(req["contents"][0]["role"], "user");
        assert_eq!(req["contents"][1]["role"], "model");
        assert!(req.get("model").is_none());
    }

    #[test]
    fn test_tool_round_trip_request() {
        let req = request(
            r#"{"model":"gpt-4o","messages":[
                {"role":"assistant","content":null,"tool_calls":[
                    {"id":"c1","type":"function","function":{"name":"lookup","arguments":"{\"q\":2}"}}]},
                {"role":"tool","name":"lookup","content":"{\"hits\":3}"}
            ]}"#,
            "gemini-2.5-flash",
            None,
        );
        assert_eq!(req["contents"][0]["parts"][0]["functionCall"]["name"], "lookup");
        assert_eq!(req["contents"][0]["parts"][0]["functionCall"]["args"]["q"], 2);
        let fr = &req["contents"][1]["parts"][0]["functionResponse"];
        assert_eq!(fr["name"], "lookup");
        assert_eq!(fr["response"]["hits"], 3);
    }

    #[test]
    fn test_generation_config_and_thinking_budget() {
        let req = request(
            r#"{"model":"gpt-4o","max_tokens":256,"temperature":0.3,
                "messages":[{"role":"user","content":"x"}]}"#,
            "gemini-2.5-flash",
            Some("medium"),
        );
        let cfg = &req["generationConfig"];
        assert_eq!(cfg["maxOutputTokens"], 256);
        assert_eq!(cfg["thinkingConfig"]["thinkingBudget"], 8192);
    }

    #[test]
    fn test_gemini3_gets_thinking_level() {
        let req = request(
            r#"{"model":"gpt-4o","messages":[{"role":"user","content":"x"}]}"#,
            "gemini-3-flash-exp",
            Some("low"),
        );
        assert_eq!(
            req["generationConfig"]["thinkingConfig"]["thinkingLevel"],
            "low"
        );
    }

    #[test]
    fn test_non_stream_response() {
        let body = br#"{
            "candidates":[{"content":{"parts":[{"text":"answer"}],"role":"model"},
                           "finishReason":"STOP"}],
            "usageMetadata":{"promptTokenCount":8,"candidatesTokenCount":2,
                             "cachedContentTokenCount":1},
            "modelVersion":"gemini-2.5-flash-001"
        }"#;
        let out = translate_non_stream_response(&ResponseInput {
            body,
            model: "my-gemini",
            original_request: b"{}",
            tool_names: &HashMap::new(),
        })
        .unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["model"], "my-gemini");
        assert_eq!(v["choices"][0]["message"]["content"], "answer");
        assert_eq!(v["usage"]["prompt_tokens"], 8);
        assert_eq!(v["usage"]["prompt_tokens_details"]["cached_tokens"], 1);
    }

    #[test]
    fn test_stream_text_then_finish() {
        let mut state = TranslateState::new();
        let map = HashMap::new();
        let feed = |data: &str, state: &mut TranslateState| {
            translate_stream_response(
                &StreamInput {
                    event: None,
                    data: data.as_bytes(),
                    model: "my-gemini",
                    original_request: b"{}",
                    tool_names: &map,
                },
                state,
            )
            .unwrap()
        };

        let out = feed(
            r#"{"candidates":[{"content":{"parts":[{"text":"hel"}]}}]}"#,
            &mut state,
        );
        // role chunk + content chunk
        assert_eq!(out.len(), 2);

        let out = feed(
            r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":7}}"#,
            &mut state,
        );
        // content + finish + [DONE]
        assert_eq!(out.len(), 3);
        assert!(out[2].is_done());
        let fin: Value = serde_json::from_str(&out[1].data).unwrap();
        assert_eq!(fin["choices"][0]["finish_reason"], "stop");
        assert_eq!(fin["usage"]["completion_tokens"], 7);
    }

    #[test]
    fn test_stream_thought_parts_skipped() {
        let mut state = TranslateState::new();
        let out = translate_stream_response(
            &StreamInput {
                event: None,
                data: br#"{"candidates":[{"content":{"parts":[
                    {"text":"pondering","thought":true},{"text":"visible"}]}}]}"#,
                model: "m",
                original_request: b"{}",
                tool_names: &HashMap::new(),
            },
            &mut state,
        )
        .unwrap();
        // role chunk + one visible content chunk
        assert_eq!(out.len(), 2);
        let v: Value = serde_json::from_str(&out[1].data).unwrap();
        assert_eq!(v["choices"][0]["delta"]["content"], "visible");
    }
}
