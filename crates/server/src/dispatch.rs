//! Request orchestration: model mapping, channel selection, request
//! translation, the pending log row, upstream execution, and handoff to
//! the response pipeline.

use crate::AppState;
use crate::model_map::{self, apply_mapping};
use crate::pipeline::{self, PipelineDeps, StreamParams, headers_to_json};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use conduit_core::channel::{Channel, ChannelKind, OpenAiEndpoint};
use conduit_core::context::{ProxyConfig, RequestContext, StreamMode, TranslationInfo};
use conduit_core::dialect::Dialect;
use conduit_core::error::ProxyError;
use conduit_core::trace::RequestTrace;
use conduit_provider::dispatcher::plan_upstream;
use conduit_provider::transport::UpstreamBody;
use conduit_translator::{RequestInput, toolshim};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// An inbound model-invocation request as seen by a handler.
pub struct InboundProxyRequest {
    pub incoming: Dialect,
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Model extracted from the path (Gemini routes).
    pub path_model: Option<String>,
    /// Streaming decided by the path action (Gemini routes).
    pub path_streaming: Option<bool>,
}

/// Entry point used by every model-invocation handler. Errors are
/// turned into OpenAI-shaped responses and still produce a terminal
/// log row.
pub async fn proxy_request(
    state: AppState,
    tenant: Arc<ProxyConfig>,
    ctx: RequestContext,
    req: InboundProxyRequest,
) -> Response {
    let trace = Arc::new(RequestTrace::new(
        &ctx.request_id,
        tenant.tenant_id,
        tenant.api_key_id,
        &req.method,
        &req.path,
    ));

    let deps = PipelineDeps {
        translators: state.translators.clone(),
        prices: state.prices.clone(),
        log_writer: state.log_writer.clone(),
        details: state.details.clone(),
        detail_enabled: state.config.load().request_detail_enabled,
    };

    match run(&state, &tenant, &deps, &trace, req).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(
                request_id = %trace.request_id(),
                error = %e,
                "proxy request failed"
            );
            trace.set_error(e.trace_tag());
            trace.set_response(e.status_code().as_u16());
            pipeline::finalize_trace(&trace, &deps);
            e.into_response()
        }
    }
}

async fn run(
    state: &AppState,
    tenant: &ProxyConfig,
    deps: &PipelineDeps,
    trace: &Arc<RequestTrace>,
    req: InboundProxyRequest,
) -> Result<Response, ProxyError> {
    let cfg = state.config.load();
    let request_id = trace.request_id();

    let body_value: Value = serde_json::from_slice(&req.body)
        .map_err(|e| ProxyError::BadRequest(format!("request body is not JSON: {e}")))?;

    let stream = req.path_streaming.unwrap_or_else(|| {
        body_value
            .get("stream")
            .and_then(|s| s.as_bool())
            .unwrap_or(false)
    });

    let model = match &req.path_model {
        Some(m) => m.clone(),
        None => model_map::model_from_body(&body_value)?,
    };
    let mapped = apply_mapping(tenant, &model);
    let effort = mapped
        .effort
        .clone()
        .or_else(|| model_map::effort_from_body(&body_value));

    trace.set_models(&mapped.original, &mapped.upstream);
    trace.set_streaming(stream);
    if let Some(e) = &effort {
        trace.set_thinking_level(e);
    }

    // Channel selection: the tenant's own upstream in native mode,
    // otherwise the first channel serving the mapped model.
    let (channel, direct_upstream) = select_channel(state, tenant, req.incoming, &mapped.upstream)?;
    let outgoing = channel.outgoing_dialect();

    if !state.translators.supports(req.incoming, outgoing) {
        return Err(ProxyError::UnsupportedConversion {
            from: req.incoming,
            to: outgoing,
        });
    }
    let needs_conversion = req.incoming != outgoing;

    if deps.detail_enabled {
        deps.details.update_request_data(
            &request_id,
            &headers_to_json(&req.headers),
            &String::from_utf8_lossy(&req.body),
        );
    }

    // Pure passthrough with no model rename keeps the client's bytes
    // untouched; everything else goes through the translator.
    let (mut tool_names, mut upstream_body) =
        if !needs_conversion && mapped.original == mapped.upstream {
            (Default::default(), req.body.clone())
        } else {
            let translated = state.translators.translate_request(
                req.incoming,
                outgoing,
                &RequestInput {
                    model: &mapped.upstream,
                    body: &req.body,
                    stream,
                    reasoning_effort: effort.as_deref(),
                },
            )?;
            (translated.tool_names, Bytes::from(translated.body))
        };

    // Claude-bound passthrough also gets the mcp_ tool shim; the
    // cross-dialect translators apply it themselves.
    if outgoing == Dialect::Claude
        && !needs_conversion
        && let Ok(mut value) = serde_json::from_slice::<Value>(&upstream_body)
    {
        let map = toolshim::prefix_tool_names(&mut value);
        if !map.is_empty() {
            tool_names.extend(map);
            upstream_body = Bytes::from(serde_json::to_vec(&value)?);
        }
    }

    let cache_ttl = (!cfg.cache_ttl_override.is_empty()).then_some(cfg.cache_ttl_override.as_str());
    let plan = plan_upstream(
        &channel,
        &req.headers,
        upstream_body,
        &mapped.upstream,
        StreamMode::passthrough(stream),
        cfg.max_request_body_bytes,
        direct_upstream,
        cache_ttl,
    )?;

    let info = TranslationInfo {
        needs_conversion,
        incoming: req.incoming,
        outgoing,
        original_request: req.body.clone(),
        converted_request: plan.request.body.clone(),
        stream: plan.stream,
        original_model: mapped.original.clone(),
        upstream_model: mapped.upstream.clone(),
        reasoning_effort: effort,
        tool_name_map: tool_names,
    };

    if deps.detail_enabled && needs_conversion {
        deps.details.update_translated_request_body(
            &request_id,
            &String::from_utf8_lossy(&info.converted_request),
        );
    }

    trace.set_channel(channel.kind.as_str(), channel.id, endpoint_label(outgoing));
    if info.stream.upstream_stream() {
        trace.set_streaming(true);
    }

    // The pending row lands before dispatch: a crash mid-flight still
    // leaves an audit row for the sweeper.
    state.log_writer.insert_pending(trace.snapshot()).await;

    let upstream = state.transport.execute(plan.request, &request_id).await?;

    match upstream.body {
        UpstreamBody::Buffered(bytes) => Ok(pipeline::finish_buffered(
            deps,
            trace,
            &info,
            upstream.status,
            &upstream.headers,
            bytes,
        )),
        UpstreamBody::Stream(body_stream) => {
            if info.stream.needs_aggregation() {
                // Forced stream: collapse the SSE back into one JSON
                // body with rewritten headers.
                let body = pipeline::aggregate_forced_stream(body_stream).await?;
                Ok(pipeline::finish_buffered(
                    deps,
                    trace,
                    &info,
                    upstream.status,
                    &HeaderMap::new(),
                    body,
                ))
            } else {
                Ok(pipeline::finish_stream(
                    deps,
                    trace.clone(),
                    &info,
                    upstream.status,
                    &upstream.headers,
                    body_stream,
                    StreamParams {
                        keep_alive_interval: Duration::from_secs(cfg.keep_alive_secs),
                        read_idle: Duration::from_millis(cfg.timeout.read_idle_ms),
                    },
                ))
            }
        }
    }
}

fn select_channel(
    state: &AppState,
    tenant: &ProxyConfig,
    incoming: Dialect,
    upstream_model: &str,
) -> Result<(Channel, bool), ProxyError> {
    if tenant.native_mode
        && let (Some(url), Some(key)) = (&tenant.upstream_url, &tenant.upstream_api_key)
    {
        return Ok((direct_channel(incoming, url, key), true));
    }
    let channel = state
        .channels
        .pick(upstream_model)
        .ok_or_else(|| ProxyError::NoChannel {
            model: upstream_model.to_string(),
        })?;
    Ok((channel, false))
}

/// Synthetic channel for the tenant's own upstream: same dialect as the
/// client, no translation.
fn direct_channel(incoming: Dialect, url: &str, key: &str) -> Channel {
    let (kind, endpoint) = match incoming {
        Dialect::OpenAIChat => (ChannelKind::Openai, OpenAiEndpoint::Chat),
        Dialect::OpenAIResponses => (ChannelKind::Openai, OpenAiEndpoint::Responses),
        Dialect::Claude => (ChannelKind::Claude, OpenAiEndpoint::Chat),
        Dialect::Gemini => (ChannelKind::Gemini, OpenAiEndpoint::Chat),
    };
    Channel {
        id: 0,
        name: "tenant-upstream".into(),
        kind,
        endpoint,
        base_url: url.to_string(),
        api_key: key.to_string(),
        headers: Default::default(),
        custom_params: None,
        model_globs: Vec::new(),
        disabled: false,
    }
}

fn endpoint_label(outgoing: Dialect) -> &'static str {
    match outgoing {
        Dialect::OpenAIChat => "/v1/chat/completions",
        Dialect::OpenAIResponses => "/v1/responses",
        Dialect::Claude => "/v1/messages",
        Dialect::Gemini => "generateContent",
    }
}
