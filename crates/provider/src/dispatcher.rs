//! Channel dispatch: URL synthesis, header hygiene, and the body
//! normalizations that depend on the outgoing dialect.

use crate::transport::UpstreamRequest;
use axum::http::{HeaderMap, HeaderValue, header};
use bytes::Bytes;
use conduit_core::channel::{Channel, ChannelKind};
use conduit_core::context::StreamMode;
use conduit_core::dialect::Dialect;
use conduit_core::error::ProxyError;
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Long-context beta opt-in that must not leak onto aggregator channels:
/// it changes billing on the upstream account.
const CONTEXT_1M_BETA: &str = "context-1m-2025-08-07";

/// A fully-planned upstream call.
pub struct OutboundPlan {
    pub request: UpstreamRequest,
    pub outgoing: Dialect,
    pub stream: StreamMode,
}

/// Build the outbound request for a channel.
///
/// `body` is the (possibly translated) request payload; `direct_upstream`
/// marks the native passthrough path where the long-context beta header
/// may be kept; `cache_ttl_override` forces the prompt-cache TTL on
/// Claude-bound requests.
#[allow(clippy::too_many_arguments)]
pub fn plan_upstream(
    channel: &Channel,
    inbound_headers: &HeaderMap,
    body: Bytes,
    upstream_model: &str,
    stream: StreamMode,
    max_body_bytes: usize,
    direct_upstream: bool,
    cache_ttl_override: Option<&str>,
) -> Result<OutboundPlan, ProxyError> {
    if body.len() > max_body_bytes {
        return Err(ProxyError::BodyTooLarge {
            limit: max_body_bytes,
        });
    }

    let outgoing = channel.outgoing_dialect();
    let (body, stream) = normalize_body(body, outgoing, stream, channel, cache_ttl_override)?;

    let url = synthesize_url(channel, upstream_model, stream.upstream_stream());
    let headers = synthesize_headers(channel, inbound_headers, direct_upstream)?;

    Ok(OutboundPlan {
        request: UpstreamRequest { url, headers, body },
        outgoing,
        stream,
    })
}

/// Rebuild the upstream path from the outgoing dialect, never from the
/// incoming path.
fn synthesize_url(channel: &Channel, model: &str, streaming: bool) -> String {
    let base = channel.base_url_trimmed();
    match channel.outgoing_dialect() {
        Dialect::OpenAIChat => format!("{base}/v1/chat/completions"),
        Dialect::OpenAIResponses => format!("{base}/v1/responses"),
        Dialect::Claude => format!("{base}/v1/messages"),
        Dialect::Gemini => {
            let action = if streaming {
                "streamGenerateContent"
            } else {
                "generateContent"
            };
            let mut url = format!("{base}/v1beta/models/{model}:{action}?key={}", channel.api_key);
            if streaming {
                url.push_str("&alt=sse");
            }
            url
        }
    }
}

fn synthesize_headers(
    channel: &Channel,
    inbound: &HeaderMap,
    direct_upstream: bool,
) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::new();

    // Forward inbound headers minus credentials and hop-by-hop fields.
    for (name, value) in inbound {
        match name.as_str() {
            "authorization" | "x-api-key" | "x-goog-api-key" | "proxy-authorization"
            | "host" | "content-length" | "connection" | "transfer-encoding"
            | "accept-encoding" => continue,
            "anthropic-beta" => {
                if let Some(kept) = scrub_beta_value(value, direct_upstream) {
                    headers.insert(name.clone(), kept);
                }
            }
            _ => {
                headers.insert(name.clone(), value.clone());
            }
        }
    }

    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    // Channel auth replaces whatever the client sent.
    match channel.kind {
        ChannelKind::Openai => {
            let bearer = format!("Bearer {}", channel.api_key);
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&bearer)
                    .map_err(|e| ProxyError::Config(format!("invalid channel api key: {e}")))?,
            );
        }
        ChannelKind::Claude => {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(&channel.api_key)
                    .map_err(|e| ProxyError::Config(format!("invalid channel api key: {e}")))?,
            );
            headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        }
        ChannelKind::Gemini => {
            // Auth rides in the query string.
        }
    }

    for (k, v) in &channel.headers {
        let name: header::HeaderName = k
            .parse()
            .map_err(|_| ProxyError::Config(format!("invalid channel header name: {k}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|_| ProxyError::Config(format!("invalid channel header value for {k}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Drop the 1M-context beta token on channel routes; other beta tokens
/// pass through.
fn scrub_beta_value(value: &HeaderValue, direct_upstream: bool) -> Option<HeaderValue> {
    if direct_upstream {
        return Some(value.clone());
    }
    let text = value.to_str().ok()?;
    let kept: Vec<&str> = text
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty() && *token != CONTEXT_1M_BETA)
        .collect();
    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join(",")).ok()
}

/// Dialect-dependent body rewrites. All of these are idempotent, so a
/// passthrough request normalized twice is identical to once.
fn normalize_body(
    body: Bytes,
    outgoing: Dialect,
    mut stream: StreamMode,
    channel: &Channel,
    cache_ttl_override: Option<&str>,
) -> Result<(Bytes, StreamMode), ProxyError> {
    let needs_forced_stream =
        outgoing == Dialect::OpenAIResponses && !stream.client_wants_stream;
    let needs_stream_options = outgoing == Dialect::OpenAIChat && stream.client_wants_stream;
    let has_custom_params = channel
        .custom_params
        .as_ref()
        .and_then(|p| p.as_object())
        .is_some_and(|o| !o.is_empty());
    let cache_ttl = cache_ttl_override.filter(|t| !t.is_empty() && outgoing == Dialect::Claude);

    if !needs_forced_stream && !needs_stream_options && !has_custom_params && cache_ttl.is_none() {
        return Ok((body, stream));
    }

    let mut value: Value = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::BadRequest(format!("request body is not JSON: {e}")))?;
    let Some(obj) = value.as_object_mut() else {
        return Ok((body, stream));
    };

    if needs_forced_stream {
        // Some upstreams answer /v1/responses only in streaming mode; the
        // response pipeline aggregates the SSE back into one JSON body.
        obj.insert("stream".into(), Value::Bool(true));
        stream.forced_upstream_stream = true;
    }

    if needs_stream_options && obj.get("stream").and_then(|s| s.as_bool()) == Some(true) {
        let opts = obj
            .entry("stream_options")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(opts) = opts.as_object_mut() {
            opts.insert("include_usage".into(), Value::Bool(true));
        }
    }

    if let Some(params) = channel.custom_params.as_ref().and_then(|p| p.as_object()) {
        for (k, v) in params {
            obj.insert(k.clone(), v.clone());
        }
    }

    if let Some(ttl) = cache_ttl {
        apply_cache_ttl(&mut value, ttl);
    }

    let bytes = serde_json::to_vec(&value)?;
    Ok((Bytes::from(bytes), stream))
}

/// Force the prompt-cache TTL on every `cache_control` block in the
/// request (system blocks, message content, tools). Blocks the client
/// never marked cacheable stay untouched.
fn apply_cache_ttl(value: &mut Value, ttl: &str) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::Object(cc)) = obj.get_mut("cache_control") {
                cc.insert("ttl".into(), Value::String(ttl.to_string()));
            }
            for (_, v) in obj.iter_mut() {
                apply_cache_ttl(v, ttl);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                apply_cache_ttl(v, ttl);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::channel::OpenAiEndpoint;
    use std::collections::HashMap;

    fn channel(kind: ChannelKind, endpoint: OpenAiEndpoint) -> Channel {
        Channel {
            id: 7,
            name: "ch".into(),
            kind,
            endpoint,
            base_url: "https://upstream.example".into(),
            api_key: "channel-key".into(),
            headers: HashMap::new(),
            custom_params: None,
            model_globs: vec![],
            disabled: false,
        }
    }

    fn plan(
        channel: &Channel,
        inbound: HeaderMap,
        body: &str,
        stream: bool,
    ) -> OutboundPlan {
        plan_upstream(
            channel,
            &inbound,
            Bytes::from(body.to_string()),
            "model-x",
            StreamMode::passthrough(stream),
            10 * 1024 * 1024,
            false,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_openai_url_and_auth() {
        let ch = channel(ChannelKind::Openai, OpenAiEndpoint::Chat);
        let p = plan(&ch, HeaderMap::new(), r#"{"model":"m"}"#, false);
        assert_eq!(p.request.url, "https://upstream.example/v1/chat/completions");
        assert_eq!(
            p.request.headers.get("authorization").unwrap(),
            "Bearer channel-key"
        );
    }

    #[test]
    fn test_claude_url_and_auth() {
        let ch = channel(ChannelKind::Claude, OpenAiEndpoint::Chat);
        let p = plan(&ch, HeaderMap::new(), r#"{"model":"m"}"#, false);
        assert_eq!(p.request.url, "https://upstream.example/v1/messages");
        assert_eq!(p.request.headers.get("x-api-key").unwrap(), "channel-key");
        assert_eq!(
            p.request.headers.get("anthropic-version").unwrap(),
            ANTHROPIC_VERSION
        );
        assert!(p.request.headers.get("authorization").is_none());
    }

    #[test]
    fn test_gemini_url_embeds_model_and_key() {
        let ch = channel(ChannelKind::Gemini, OpenAiEndpoint::Chat);
        let p = plan(&ch, HeaderMap::new(), r#"{}"#, false);
        assert_eq!(
            p.request.url,
            "https://upstream.example/v1beta/models/model-x:generateContent?key=channel-key"
        );

        let p = plan(&ch, HeaderMap::new(), r#"{}"#, true);
        assert_eq!(
            p.request.url,
            "https://upstream.example/v1beta/models/model-x:streamGenerateContent?key=channel-key&alt=sse"
        );
    }

    #[test]
    fn test_inbound_credentials_stripped() {
        let ch = channel(ChannelKind::Openai, OpenAiEndpoint::Chat);
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer client"));
        inbound.insert("x-api-key", HeaderValue::from_static("client-key"));
        inbound.insert("x-goog-api-key", HeaderValue::from_static("goog"));
        inbound.insert("user-agent", HeaderValue::from_static("test-client"));

        let p = plan(&ch, inbound, r#"{"model":"m"}"#, false);
        assert_eq!(
            p.request.headers.get("authorization").unwrap(),
            "Bearer channel-key"
        );
        assert!(p.request.headers.get("x-goog-api-key").is_none());
        assert_eq!(p.request.headers.get("user-agent").unwrap(), "test-client");
    }

    #[test]
    fn test_context_beta_removed_on_channel_route() {
        let ch = channel(ChannelKind::Claude, OpenAiEndpoint::Chat);
        let mut inbound = HeaderMap::new();
        inbound.insert(
            "anthropic-beta",
            HeaderValue::from_static("context-1m-2025-08-07, output-128k-2025-02-19"),
        );

        let p = plan(&ch, inbound.clone(), r#"{}"#, false);
        assert_eq!(
            p.request.headers.get("anthropic-beta").unwrap(),
            "output-128k-2025-02-19"
        );

        // Direct upstream keeps it.
        let p = plan_upstream(
            &ch,
            &inbound,
            Bytes::from_static(b"{}"),
            "m",
            StreamMode::passthrough(false),
            10 * 1024 * 1024,
            true,
            None,
        )
        .unwrap();
        assert_eq!(
            p.request.headers.get("anthropic-beta").unwrap(),
            "context-1m-2025-08-07, output-128k-2025-02-19"
        );
    }

    #[test]
    fn test_stream_options_injected() {
        let ch = channel(ChannelKind::Openai, OpenAiEndpoint::Chat);
        let p = plan(&ch, HeaderMap::new(), r#"{"model":"m","stream":true}"#, true);
        let body: Value = serde_json::from_slice(&p.request.body).unwrap();
        assert_eq!(body["stream_options"]["include_usage"], Value::Bool(true));

        // Idempotent: normalizing an already-normalized body is a no-op.
        let again = plan(
            &ch,
            HeaderMap::new(),
            std::str::from_utf8(&p.request.body).unwrap(),
            true,
        );
        let body2: Value = serde_json::from_slice(&again.request.body).unwrap();
        assert_eq!(body, body2);
    }

    #[test]
    fn test_forced_stream_for_responses() {
        let ch = channel(ChannelKind::Openai, OpenAiEndpoint::Responses);
        let p = plan(&ch, HeaderMap::new(), r#"{"model":"m","stream":false}"#, false);
        assert!(p.stream.forced_upstream_stream);
        assert!(!p.stream.client_wants_stream);
        assert!(p.stream.needs_aggregation());
        let body: Value = serde_json::from_slice(&p.request.body).unwrap();
        assert_eq!(body["stream"], Value::Bool(true));
    }

    #[test]
    fn test_body_size_boundary() {
        let ch = channel(ChannelKind::Openai, OpenAiEndpoint::Chat);
        let at_limit = plan_upstream(
            &ch,
            &HeaderMap::new(),
            Bytes::from(vec![b'x'; 64]),
            "m",
            StreamMode::passthrough(false),
            64,
            false,
            None,
        );
        assert!(at_limit.is_ok());

        let over = plan_upstream(
            &ch,
            &HeaderMap::new(),
            Bytes::from(vec![b'x'; 65]),
            "m",
            StreamMode::passthrough(false),
            64,
            false,
            None,
        );
        assert!(matches!(over, Err(ProxyError::BodyTooLarge { limit: 64 })));
    }

    #[test]
    fn test_custom_params_merged() {
        let mut ch = channel(ChannelKind::Openai, OpenAiEndpoint::Chat);
        ch.custom_params = Some(serde_json::json!({"temperature": 0.2}));
        let p = plan(&ch, HeaderMap::new(), r#"{"model":"m"}"#, false);
        let body: Value = serde_json::from_slice(&p.request.body).unwrap();
        assert_eq!(body["temperature"], serde_json::json!(0.2));
    }

    #[test]
    fn test_cache_ttl_override_rewrites_cache_control() {
        let ch = channel(ChannelKind::Claude, OpenAiEndpoint::Chat);
        let body = r#"{
            "model": "m",
            "system": [
                {"type": "text", "text": "rules",
                 "cache_control": {"type": "ephemeral", "ttl": "5m"}}
            ],
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "hi",
                     "cache_control": {"type": "ephemeral"}},
                    {"type": "text", "text": "uncached"}
                ]}
            ]
        }"#;
        let p = plan_upstream(
            &ch,
            &HeaderMap::new(),
            Bytes::from(body.to_string()),
            "m",
            StreamMode::passthrough(false),
            10 * 1024 * 1024,
            false,
            Some("1h"),
        )
        .unwrap();
        let v: Value = serde_json::from_slice(&p.request.body).unwrap();
        assert_eq!(v["system"][0]["cache_control"]["ttl"], "1h");
        assert_eq!(
            v["messages"][0]["content"][0]["cache_control"]["ttl"],
            "1h"
        );
        // Unmarked blocks never gain a cache_control.
        assert!(v["messages"][0]["content"][1].get("cache_control").is_none());
    }

    #[test]
    fn test_cache_ttl_override_ignored_off_claude() {
        let ch = channel(ChannelKind::Openai, OpenAiEndpoint::Chat);
        let body = r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#;
        let p = plan_upstream(
            &ch,
            &HeaderMap::new(),
            Bytes::from(body.to_string()),
            "m",
            StreamMode::passthrough(false),
            10 * 1024 * 1024,
            false,
            Some("1h"),
        )
        .unwrap();
        // Non-Claude channels pass through untouched.
        assert_eq!(p.request.body, Bytes::from(body.to_string()));
    }
}
