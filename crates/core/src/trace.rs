use crate::usage::Usage;
use std::sync::Mutex;
use std::time::Instant;

/// Snapshot of everything measured about one request. This is the shape
/// that becomes a durable `request_logs` row.
#[derive(Debug, Clone)]
pub struct TraceData {
    pub request_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub tenant_id: i64,
    pub api_key_id: i64,
    pub method: String,
    pub path: String,
    pub original_model: Option<String>,
    pub mapped_model: Option<String>,
    pub provider: Option<String>,
    pub channel_id: Option<i64>,
    pub endpoint: Option<String>,
    pub is_streaming: bool,
    pub thinking_level: Option<String>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
    pub cost_micros: Option<i64>,
    pub error_type: Option<String>,
}

/// Per-request mutable trace, accumulated through the pipeline and
/// finalized into one log row. All setters take the lock briefly;
/// `snapshot` returns a deep copy so the log writer never races with
/// live updaters.
pub struct RequestTrace {
    start: Instant,
    inner: Mutex<TraceData>,
}

impl RequestTrace {
    pub fn new(request_id: &str, tenant_id: i64, api_key_id: i64, method: &str, path: &str) -> Self {
        Self {
            start: Instant::now(),
            inner: Mutex::new(TraceData {
                request_id: request_id.to_string(),
                created_at: chrono::Utc::now(),
                tenant_id,
                api_key_id,
                method: method.to_string(),
                path: path.to_string(),
                original_model: None,
                mapped_model: None,
                provider: None,
                channel_id: None,
                endpoint: None,
                is_streaming: false,
                thinking_level: None,
                status_code: None,
                latency_ms: None,
                input_tokens: None,
                output_tokens: None,
                cache_read_tokens: None,
                cache_creation_tokens: None,
                cost_micros: None,
                error_type: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TraceData> {
        // A poisoned trace mutex means a panic mid-request; the data is
        // still the best record available.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn request_id(&self) -> String {
        self.lock().request_id.clone()
    }

    pub fn set_models(&self, original: &str, mapped: &str) {
        let mut t = self.lock();
        t.original_model = Some(original.to_string());
        t.mapped_model = Some(mapped.to_string());
    }

    pub fn set_channel(&self, provider: &str, channel_id: i64, endpoint: &str) {
        let mut t = self.lock();
        t.provider = Some(provider.to_string());
        t.channel_id = Some(channel_id);
        t.endpoint = Some(endpoint.to_string());
    }

    pub fn set_thinking_level(&self, level: &str) {
        self.lock().thinking_level = Some(level.to_string());
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.lock().is_streaming = streaming;
    }

    /// Record the response status and compute latency. Idempotent: the
    /// first call wins so close paths cannot overwrite the real status.
    pub fn set_response(&self, status: u16) {
        let mut t = self.lock();
        if t.status_code.is_none() {
            t.status_code = Some(status);
            t.latency_ms = Some(self.start.elapsed().as_millis() as u64);
        }
    }

    pub fn set_usage(&self, usage: &Usage) {
        let mut t = self.lock();
        if usage.input_tokens.is_some() {
            t.input_tokens = usage.input_tokens;
        }
        if let Some(out) = usage.output_tokens {
            // Max-monotonic: out-of-order deltas never shrink the count.
            t.output_tokens = Some(t.output_tokens.unwrap_or(0).max(out));
        }
        if usage.cache_read_tokens.is_some() {
            t.cache_read_tokens = usage.cache_read_tokens;
        }
        if usage.cache_creation_tokens.is_some() {
            t.cache_creation_tokens = usage.cache_creation_tokens;
        }
    }

    /// Monotonic max update of output tokens.
    pub fn update_output_tokens(&self, tokens: u64) {
        let mut t = self.lock();
        t.output_tokens = Some(t.output_tokens.unwrap_or(0).max(tokens));
    }

    pub fn set_cost_micros(&self, cost: i64) {
        self.lock().cost_micros = Some(cost);
    }

    /// Record an error tag. The first error wins.
    pub fn set_error(&self, tag: &str) {
        let mut t = self.lock();
        if t.error_type.is_none() {
            t.error_type = Some(tag.to_string());
        }
    }

    pub fn has_error(&self) -> bool {
        self.lock().error_type.is_some()
    }

    /// Deep snapshot for the log writer.
    pub fn snapshot(&self) -> TraceData {
        self.lock().clone()
    }
}
