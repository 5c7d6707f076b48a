//! Response pipeline.
//!
//! Non-streaming responses pass through decompress → usage extraction →
//! translation → model restore → snapshot capture → trace finalize.
//! Streaming responses are wrapped in layers (inner to outer): idle
//! watchdog, frame processing (usage + translation + capture), logging
//! finalizer, keep-alive. The logging layer guarantees exactly one
//! durable update on close, whether the stream completes, the client
//! disconnects, or the watchdog fires.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use conduit_core::context::TranslationInfo;
use conduit_core::cost::PriceStore;
use conduit_core::dialect::Dialect;
use conduit_core::error::ProxyError;
use conduit_core::sanitize::{mask_secrets, sanitize_header};
use conduit_core::trace::RequestTrace;
use conduit_core::usage::{UsageParser, parser_for};
use conduit_provider::ByteStream;
use conduit_provider::decompress::decode_body;
use conduit_provider::sse::{FrameBuffer, encode_frame, parse_frame};
use conduit_provider::stream_guard::{idle_watchdog, keep_alive};
use conduit_store::detail_store::DetailStore;
use conduit_store::log_writer::LogWriter;
use conduit_translator::rewrite::{
    restore_model_json, restore_model_sse, suppress_thinking_if_tool_use,
};
use conduit_translator::{
    ResponseInput, StreamInput, TranslateState, TranslatorRegistry, toolshim,
};
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Everything the pipeline needs besides the per-request state.
#[derive(Clone)]
pub struct PipelineDeps {
    pub translators: Arc<TranslatorRegistry>,
    pub prices: Arc<PriceStore>,
    pub log_writer: LogWriter,
    pub details: Arc<DetailStore>,
    pub detail_enabled: bool,
}

/// Serialize response headers for the detail store, with credentials
/// masked.
pub fn headers_to_json(headers: &HeaderMap) -> String {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            let text = value.to_str().unwrap_or("<binary>");
            (
                name.as_str().to_string(),
                Value::String(sanitize_header(name.as_str(), text)),
            )
        })
        .collect();
    Value::Object(map).to_string()
}

/// Compute cost from the accumulated usage and write the terminal log
/// row. Idempotent through the trace's first-write-wins setters.
pub fn finalize_trace(trace: &RequestTrace, deps: &PipelineDeps) {
    let snap = trace.snapshot();
    if let Some(model) = snap.mapped_model.as_deref() {
        let usage = conduit_core::usage::Usage {
            input_tokens: snap.input_tokens,
            output_tokens: snap.output_tokens,
            cache_read_tokens: snap.cache_read_tokens,
            cache_creation_tokens: snap.cache_creation_tokens,
        };
        if let Some(cost) = deps.prices.cost_micros(model, &usage) {
            trace.set_cost_micros(cost);
        }
    }
    deps.log_writer.finalize(trace.snapshot());
}

// ─── Non-streaming ─────────────────────────────────────────────────────────

/// Finish a buffered (non-SSE) upstream response.
pub fn finish_buffered(
    deps: &PipelineDeps,
    trace: &Arc<RequestTrace>,
    info: &TranslationInfo,
    status: u16,
    upstream_headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let encoding = upstream_headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // Decode failures are recovered locally: forward compressed bytes.
    let (body, decoded) = match decode_body(encoding.as_deref(), &body) {
        Ok(plain) => (Bytes::from(plain), true),
        Err(e) => {
            tracing::warn!(error = %e, "response decode failed, forwarding as-is");
            (body, false)
        }
    };

    if let Some(result) = parser_for(info.outgoing).parse_response(&body) {
        trace.set_usage(&result);
    }

    if deps.detail_enabled {
        deps.details.update_response_data(
            &trace.request_id(),
            &headers_to_json(upstream_headers),
            &String::from_utf8_lossy(&body),
        );
    }

    // Translate back to the client dialect; a failure falls back to
    // forwarding the upstream bytes with a warning.
    let translated = if info.needs_conversion {
        let input = ResponseInput {
            body: &body,
            model: &info.original_model,
            original_request: &info.original_request,
            tool_names: &info.tool_name_map,
        };
        match deps
            .translators
            .translate_non_stream(info.incoming, info.outgoing, &input)
        {
            Ok(out) => Bytes::from(out),
            Err(e) => {
                tracing::warn!(error = %e, "response translation failed, passing through");
                trace.set_error("translation_failure");
                body.clone()
            }
        }
    } else {
        body.clone()
    };

    let final_body = post_process_json(info, translated);

    if deps.detail_enabled && final_body != body {
        deps.details
            .append_translated_response(&trace.request_id(), &String::from_utf8_lossy(&final_body));
    }

    trace.set_response(status);
    finalize_trace(trace, deps);

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, "application/json");
    if !decoded && let Some(enc) = encoding {
        // Body is still compressed; keep the declaration honest.
        builder = builder.header(header::CONTENT_ENCODING, enc);
    }

    builder.body(Body::from(final_body)).unwrap_or_else(|e| {
        axum::response::IntoResponse::into_response(ProxyError::Internal(format!(
            "failed to build response: {e}"
        )))
    })
}

/// Passthrough fix-ups on the final JSON body: tool-name restore (for
/// passthrough the translators never saw the body), model-name restore,
/// thinking suppression for Claude clients.
fn post_process_json(info: &TranslationInfo, body: Bytes) -> Bytes {
    let needs_toolshim = !info.needs_conversion && !info.tool_name_map.is_empty();
    let needs_model = info.upstream_model != info.original_model;
    let needs_thinking = info.incoming == Dialect::Claude;
    if !needs_toolshim && !needs_model && !needs_thinking {
        return body;
    }

    let Ok(mut value) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    if needs_toolshim {
        toolshim::restore_tool_names(&mut value, &info.tool_name_map);
    }
    if needs_model {
        restore_model_json(&mut value, &info.upstream_model, &info.original_model);
    }
    if needs_thinking {
        suppress_thinking_if_tool_use(&mut value);
    }
    match serde_json::to_vec(&value) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => body,
    }
}

// ─── Streaming ─────────────────────────────────────────────────────────────

pub struct StreamParams {
    pub keep_alive_interval: Duration,
    pub read_idle: Duration,
}

/// Finish a streaming upstream response. The returned response streams
/// SSE to the client in its own dialect.
pub fn finish_stream(
    deps: &PipelineDeps,
    trace: Arc<RequestTrace>,
    info: &TranslationInfo,
    status: u16,
    upstream_headers: &HeaderMap,
    upstream: ByteStream,
    params: StreamParams,
) -> Response {
    trace.set_response(status);

    if deps.detail_enabled {
        deps.details.update_response_data(
            &trace.request_id(),
            &headers_to_json(upstream_headers),
            "",
        );
    }

    let processor = FrameProcessor {
        translators: deps.translators.clone(),
        details: deps.details.clone(),
        detail_enabled: deps.detail_enabled,
        trace: trace.clone(),
        request_id: trace.request_id(),
        incoming: info.incoming,
        outgoing: info.outgoing,
        needs_conversion: info.needs_conversion,
        original_model: info.original_model.clone(),
        upstream_model: info.upstream_model.clone(),
        original_request: info.original_request.clone(),
        tool_names: info.tool_name_map.clone(),
        usage: parser_for(info.outgoing),
        state: TranslateState::new(),
    };

    // Inner to outer: watchdog → frame processing → logging → keep-alive.
    let guarded = idle_watchdog(upstream, params.read_idle);
    let processed = process_frames(guarded, processor);
    let logged = logging_wrap(
        processed,
        Finalizer {
            trace,
            deps: deps.clone(),
            fired: false,
        },
    );
    let kept = keep_alive(logged, params.keep_alive_interval);
    let body_stream = errors_to_frames(kept);

    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|e| {
            axum::response::IntoResponse::into_response(ProxyError::Internal(format!(
                "failed to build response: {e}"
            )))
        })
}

struct FrameProcessor {
    translators: Arc<TranslatorRegistry>,
    details: Arc<DetailStore>,
    detail_enabled: bool,
    trace: Arc<RequestTrace>,
    request_id: String,
    incoming: Dialect,
    outgoing: Dialect,
    needs_conversion: bool,
    original_model: String,
    upstream_model: String,
    original_request: Bytes,
    tool_names: std::collections::HashMap<String, String>,
    usage: Box<dyn UsageParser>,
    state: TranslateState,
}

impl FrameProcessor {
    fn emit(&self, bytes: Bytes, out: &mut VecDeque<Result<Bytes, ProxyError>>) {
        if self.detail_enabled {
            self.details
                .append_translated_response(&self.request_id, &String::from_utf8_lossy(&bytes));
        }
        out.push_back(Ok(bytes));
    }

    fn process_frame(&mut self, frame: Bytes, out: &mut VecDeque<Result<Bytes, ProxyError>>) {
        let Some(parsed) = parse_frame(&frame) else {
            // Comment or fieldless frame: forward untouched.
            self.emit(frame, out);
            return;
        };

        if let Some(result) = self
            .usage
            .consume_sse(parsed.event.as_deref(), parsed.data.as_bytes())
            && let Some(usage) = result.usage
        {
            self.trace.set_usage(&usage);
        }

        if self.needs_conversion {
            let input = StreamInput {
                event: parsed.event.as_deref(),
                data: parsed.data.as_bytes(),
                model: &self.original_model,
                original_request: &self.original_request,
                tool_names: &self.tool_names,
            };
            match self
                .translators
                .translate_stream(self.incoming, self.outgoing, &input, &mut self.state)
            {
                Ok(pieces) => {
                    for piece in pieces {
                        self.emit(Bytes::from(piece.encode()), out);
                    }
                }
                Err(e) => {
                    // Translation failures degrade to forwarding.
                    tracing::warn!(error = %e, "stream translation failed, forwarding frame");
                    self.emit(frame, out);
                }
            }
            return;
        }

        // Passthrough: byte-identical unless a fix-up applies.
        let mut data = parsed.data;
        let mut modified = false;
        if !self.tool_names.is_empty()
            && let Some(restored) = toolshim::restore_tool_names_sse(data.as_bytes(), &self.tool_names)
        {
            data = String::from_utf8_lossy(&restored).to_string();
            modified = true;
        }
        if self.upstream_model != self.original_model {
            let restored = restore_model_sse(&data, &self.upstream_model, &self.original_model);
            if restored != data {
                data = restored;
                modified = true;
            }
        }

        if modified {
            self.emit(
                Bytes::from(encode_frame(parsed.event.as_deref(), &data)),
                out,
            );
        } else {
            self.emit(frame, out);
        }
    }

    /// Flush translator terminal events when the upstream ended without
    /// a sentinel.
    fn flush_end(&mut self, out: &mut VecDeque<Result<Bytes, ProxyError>>) {
        if !self.needs_conversion || self.state.finalized {
            return;
        }
        let input = StreamInput {
            event: None,
            data: b"[DONE]",
            model: &self.original_model,
            original_request: &self.original_request,
            tool_names: &self.tool_names,
        };
        if let Ok(pieces) =
            self.translators
                .translate_stream(self.incoming, self.outgoing, &input, &mut self.state)
        {
            for piece in pieces {
                self.emit(Bytes::from(piece.encode()), out);
            }
        }
    }
}

fn process_frames(upstream: ByteStream, processor: FrameProcessor) -> ByteStream {
    struct St {
        upstream: ByteStream,
        buf: FrameBuffer,
        processor: FrameProcessor,
        pending: VecDeque<Result<Bytes, ProxyError>>,
        finished: bool,
    }

    let st = St {
        upstream,
        buf: FrameBuffer::new(),
        processor,
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(st, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.upstream.next().await {
                Some(Ok(chunk)) => {
                    st.buf.push(&chunk);
                    while let Some(frame) = st.buf.next_frame() {
                        st.processor.process_frame(frame, &mut st.pending);
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(e));
                }
                None => {
                    st.finished = true;
                    if let Some(rest) = st.buf.take_remainder() {
                        st.processor.process_frame(rest, &mut st.pending);
                    }
                    st.processor.flush_end(&mut st.pending);
                }
            }
        }
    }))
}

/// The outermost accounting layer: records error tags as they pass and
/// guarantees exactly one terminal log write, whether the stream ends,
/// errors, or is dropped on client disconnect.
struct Finalizer {
    trace: Arc<RequestTrace>,
    deps: PipelineDeps,
    fired: bool,
}

impl Finalizer {
    fn fire(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;
        finalize_trace(&self.trace, &self.deps);
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        if !self.fired {
            // Dropped mid-stream: the client went away.
            self.trace.set_error("client_disconnect");
            self.fire();
        }
    }
}

fn logging_wrap(stream: ByteStream, finalizer: Finalizer) -> ByteStream {
    Box::pin(futures::stream::unfold(
        (stream, finalizer),
        |(mut stream, mut finalizer)| async move {
            match stream.next().await {
                Some(Ok(bytes)) => Some((Ok(bytes), (stream, finalizer))),
                Some(Err(e)) => {
                    finalizer.trace.set_error(e.trace_tag());
                    Some((Err(e), (stream, finalizer)))
                }
                None => {
                    finalizer.fire();
                    None
                }
            }
        },
    ))
}

/// Convert stream errors into a terminal `event: error` frame. By the
/// time an error can occur, bytes have been sent, so a JSON error
/// response is no longer possible.
fn errors_to_frames(
    stream: ByteStream,
) -> impl futures::Stream<Item = Result<Bytes, std::convert::Infallible>> + Send {
    futures::stream::unfold((stream, false), |(mut stream, done)| async move {
        if done {
            return None;
        }
        match stream.next().await {
            Some(Ok(bytes)) => Some((Ok(bytes), (stream, false))),
            Some(Err(e)) => {
                let payload = serde_json::json!({
                    "error": {
                        "message": mask_secrets(&e.to_string()),
                        "type": e.error_type(),
                    }
                });
                let frame = format!("event: error\ndata: {payload}\n\n");
                Some((Ok(Bytes::from(frame)), (stream, true)))
            }
            None => None,
        }
    })
}

// ─── Forced-stream aggregation ─────────────────────────────────────────────

/// Drain a forced-streaming upstream into the final JSON body.
pub async fn aggregate_forced_stream(mut upstream: ByteStream) -> Result<Bytes, ProxyError> {
    let mut buf = FrameBuffer::new();
    let mut agg = conduit_translator::aggregate::StreamAggregator::new();

    while let Some(chunk) = upstream.next().await {
        let chunk = chunk?;
        buf.push(&chunk);
        while let Some(frame) = buf.next_frame() {
            if let Some(parsed) = parse_frame(&frame) {
                agg.push_frame(parsed.event.as_deref(), parsed.data.as_bytes())?;
            }
        }
    }
    if let Some(rest) = buf.take_remainder()
        && let Some(parsed) = parse_frame(&rest)
    {
        agg.push_frame(parsed.event.as_deref(), parsed.data.as_bytes())?;
    }

    agg.finish().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::config::DetailConfig;
    use conduit_core::context::StreamMode;

    // Minimal fixtures shared by the pipeline tests.
    fn deps() -> PipelineDeps {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conduit_store::schema::init_schema(&conn).unwrap();
        let writer = LogWriter::start(conn);
        PipelineDeps {
            translators: Arc::new(conduit_translator::build_registry()),
            prices: Arc::new(PriceStore::new(&Default::default())),
            log_writer: writer.clone(),
            details: Arc::new(DetailStore::new(DetailConfig::default(), writer)),
            detail_enabled: true,
        }
    }

    fn trace() -> Arc<RequestTrace> {
        Arc::new(RequestTrace::new("req-1", 1, 1, "POST", "/v1/chat/completions"))
    }

    fn passthrough_info(dialect: Dialect) -> TranslationInfo {
        TranslationInfo::passthrough(dialect, Bytes::from_static(b"{}"), "gpt-4o", false)
    }

    fn chunk_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    #[tokio::test]
    async fn test_finish_buffered_passthrough() {
        let deps = deps();
        let trace = trace();
        let info = passthrough_info(Dialect::OpenAIChat);
        let body = Bytes::from_static(
            br#"{"id":"c1","model":"gpt-4o","choices":[],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#,
        );

        let resp = finish_buffered(&deps, &trace, &info, 200, &HeaderMap::new(), body);
        assert_eq!(resp.status(), StatusCode::OK);

        let snap = trace.snapshot();
        assert_eq!(snap.input_tokens, Some(3));
        assert_eq!(snap.status_code, Some(200));

        let row = deps.log_writer.fetch_log("req-1").await.unwrap();
        assert_eq!(row.status, "success");
        assert_eq!(row.input_tokens, Some(3));
    }

    #[tokio::test]
    async fn test_finish_buffered_restores_model() {
        let deps = deps();
        let trace = trace();
        let mut info = passthrough_info(Dialect::OpenAIChat);
        info.original_model = "alias".into();
        info.upstream_model = "gpt-4o".into();

        let body = Bytes::from_static(br#"{"id":"c1","model":"gpt-4o","choices":[]}"#);
        let resp = finish_buffered(&deps, &trace, &info, 200, &HeaderMap::new(), body);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["model"], "alias");
    }

    #[tokio::test]
    async fn test_stream_passthrough_and_finalize() {
        let deps = deps();
        let trace = trace();
        trace.set_models("gpt-4o", "gpt-4o");
        let mut info = passthrough_info(Dialect::OpenAIChat);
        info.stream = StreamMode::passthrough(true);

        let upstream = chunk_stream(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":5}}\n\ndata: [DONE]\n\n",
        ]);

        let resp = finish_stream(
            &deps,
            trace.clone(),
            &info,
            200,
            &HeaderMap::new(),
            upstream,
            StreamParams {
                keep_alive_interval: Duration::from_secs(30),
                read_idle: Duration::from_secs(30),
            },
        );
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("data: [DONE]"));

        // Body fully drained: usage captured and row finalized.
        let row = deps.log_writer.fetch_log("req-1").await.unwrap();
        assert_eq!(row.status, "success");
        assert_eq!(row.output_tokens, Some(5));
    }

    #[tokio::test]
    async fn test_stream_watchdog_emits_error_frame() {
        let deps = deps();
        let trace = trace();
        let info = passthrough_info(Dialect::OpenAIChat);

        let stalled: ByteStream = Box::pin(futures::stream::once(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Bytes::from_static(b"late"))
        }));

        let resp = finish_stream(
            &deps,
            trace.clone(),
            &info,
            200,
            &HeaderMap::new(),
            stalled,
            StreamParams {
                keep_alive_interval: Duration::from_secs(60),
                read_idle: Duration::from_millis(30),
            },
        );
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("event: error"));

        let row = deps.log_writer.fetch_log("req-1").await.unwrap();
        assert_eq!(row.status, "error");
        assert_eq!(row.error_type.as_deref(), Some("stream_timeout"));
    }

    #[tokio::test]
    async fn test_aggregate_forced_stream() {
        let upstream = chunk_stream(vec![
            b"event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"x\"}\n\n",
            b"event: response.completed\ndata: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\",\"object\":\"response\"}}\n\n",
            b"data: [DONE]\n\n",
        ]);
        let body = aggregate_forced_stream(upstream).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["object"], "response");
    }

    #[tokio::test]
    async fn test_aggregate_missing_terminal() {
        let upstream = chunk_stream(vec![b"data: {\"type\":\"response.created\"}\n\n"]);
        let err = aggregate_forced_stream(upstream).await.unwrap_err();
        assert!(err.to_string().contains("missing final response.completed"));
    }
}
