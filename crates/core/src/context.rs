use crate::dialect::Dialect;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Instant;

/// Per-request context carrying metadata for logging and tracing.
/// Injected as an axum `Extension` by the request-context middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier (UUID v4).
    pub request_id: String,
    /// When the request was received.
    pub start_time: Instant,
    /// Client IP address, if available.
    pub client_ip: Option<String>,
}

impl RequestContext {
    pub fn new(client_ip: Option<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            client_ip,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }
}

/// A single model-mapping rule. The pattern may contain `*` wildcards;
/// the target may carry a `:effort` suffix to pin a reasoning-effort
/// level (e.g. `o3:high`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelMappingRule {
    pub pattern: String,
    pub target: String,
}

/// Tenant-scoped proxy configuration resolved once by the auth gate.
/// Read-only for the rest of the request.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub tenant_id: i64,
    pub api_key_id: i64,
    /// Direct upstream for native mode, bypassing channel selection.
    pub upstream_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub model_mappings: Vec<ModelMappingRule>,
    /// Forward to the tenant's own upstream in the client's dialect.
    pub native_mode: bool,
    pub web_search_mode: bool,
}

/// Whether the client asked for a stream, and whether the proxy forced
/// streaming on the upstream leg regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMode {
    pub client_wants_stream: bool,
    pub forced_upstream_stream: bool,
}

impl StreamMode {
    pub fn passthrough(stream: bool) -> Self {
        Self {
            client_wants_stream: stream,
            forced_upstream_stream: false,
        }
    }

    /// True when the upstream leg is streaming.
    pub fn upstream_stream(&self) -> bool {
        self.client_wants_stream || self.forced_upstream_stream
    }

    /// True when upstream SSE must be aggregated into one JSON body.
    pub fn needs_aggregation(&self) -> bool {
        self.forced_upstream_stream && !self.client_wants_stream
    }
}

/// Everything the response pipeline needs to undo what the request
/// pipeline did. Exclusively owned by the request.
#[derive(Debug, Clone)]
pub struct TranslationInfo {
    pub needs_conversion: bool,
    pub incoming: Dialect,
    pub outgoing: Dialect,
    pub original_request: Bytes,
    pub converted_request: Bytes,
    pub stream: StreamMode,
    /// Model name as the client sent it.
    pub original_model: String,
    /// Model name on the upstream wire after mapping.
    pub upstream_model: String,
    /// Reasoning-effort annotation from the request body or mapping rule.
    pub reasoning_effort: Option<String>,
    /// Synthetic tool name → client tool name, built during request
    /// translation and applied in reverse on the response path.
    pub tool_name_map: HashMap<String, String>,
}

impl TranslationInfo {
    pub fn passthrough(dialect: Dialect, body: Bytes, model: &str, stream: bool) -> Self {
        Self {
            needs_conversion: false,
            incoming: dialect,
            outgoing: dialect,
            original_request: body.clone(),
            converted_request: body,
            stream: StreamMode::passthrough(stream),
            original_model: model.to_string(),
            upstream_model: model.to_string(),
            reasoning_effort: None,
            tool_name_map: HashMap::new(),
        }
    }
}
