//! Retry layer over the shared HTTP client.
//!
//! Buffers the request body for replay, classifies failures, gates on the
//! first byte of SSE responses, and backs off with jitter between
//! attempts. The `Idempotency-Key` header carries the request id on every
//! attempt so upstreams that honor it deduplicate retries.

use crate::ByteStream;
use axum::http::{HeaderMap, HeaderValue, header};
use bytes::Bytes;
use conduit_core::config::RetryConfig;
use conduit_core::error::ProxyError;
use futures::StreamExt;
use std::error::Error as _;
use std::sync::RwLock;
use std::time::Duration;

/// Fully-specified outbound request. The body is already translated and
/// materialized in memory.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub enum UpstreamBody {
    /// Non-streaming responses arrive fully buffered.
    Buffered(Bytes),
    /// SSE responses stream after the first-byte gate passes.
    Stream(ByteStream),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
    /// Number of attempts spent, for tracing.
    pub attempts: u32,
}

/// Network failure classes, mapped from the error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkClass {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    Eof,
    BrokenPipe,
    Dns,
    Tls,
    Canceled,
    Unknown,
}

impl NetworkClass {
    fn retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionReset
                | Self::ConnectionRefused
                | Self::Eof
                | Self::BrokenPipe
        )
    }
}

/// Classify a reqwest error by walking its source chain for io errors.
pub fn classify_network(err: &reqwest::Error) -> NetworkClass {
    if err.is_timeout() {
        return NetworkClass::Timeout;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return match io.kind() {
                ErrorKind::ConnectionReset => NetworkClass::ConnectionReset,
                ErrorKind::ConnectionRefused => NetworkClass::ConnectionRefused,
                ErrorKind::UnexpectedEof => NetworkClass::Eof,
                ErrorKind::BrokenPipe => NetworkClass::BrokenPipe,
                ErrorKind::TimedOut => NetworkClass::Timeout,
                _ => NetworkClass::Unknown,
            };
        }
        let text = cause.to_string();
        if text.contains("dns") || text.contains("resolve") {
            return NetworkClass::Dns;
        }
        if text.contains("tls") || text.contains("certificate") {
            return NetworkClass::Tls;
        }
        source = cause.source();
    }

    if err.is_connect() {
        return NetworkClass::ConnectionRefused;
    }
    NetworkClass::Unknown
}

struct AttemptFailure {
    error: ProxyError,
    retryable: bool,
}

/// Retry transport over the process-wide HTTP client. Config is
/// live-reloadable; in-flight requests keep the snapshot they started
/// with.
pub struct RetryTransport {
    client: reqwest::Client,
    config: RwLock<RetryConfig>,
}

impl RetryTransport {
    pub fn new(client: reqwest::Client, config: RetryConfig) -> Self {
        Self {
            client,
            config: RwLock::new(config),
        }
    }

    /// Swap the retry configuration. O(1); does not interrupt in-flight
    /// requests.
    pub fn update_config(&self, config: RetryConfig) {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }

    pub fn config_snapshot(&self) -> RetryConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Execute with body-replay retry. `request_id` becomes the
    /// idempotency key on every attempt.
    pub async fn execute(
        &self,
        req: UpstreamRequest,
        request_id: &str,
    ) -> Result<UpstreamResponse, ProxyError> {
        let cfg = self.config_snapshot();

        // Bodies above the replay cap get exactly one pass.
        let replayable = req.body.len() <= cfg.max_body_bytes;
        let max_attempts = if cfg.enabled && replayable {
            cfg.max_attempts.max(1)
        } else {
            1
        };
        if !replayable {
            tracing::debug!(
                body_bytes = req.body.len(),
                "request body exceeds replay cap, retries disabled"
            );
        }

        let mut headers = req.headers.clone();
        if let Ok(value) = HeaderValue::from_str(request_id) {
            headers.insert("idempotency-key", value);
        }

        let mut last_error: Option<ProxyError> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.backoff_delay(&cfg, attempt - 1, last_error.as_ref());
                tracing::debug!(attempt, ?delay, "retrying upstream request");
                tokio::time::sleep(delay).await;
            }

            match self
                .attempt(&req.url, &headers, req.body.clone(), attempt, &cfg)
                .await
            {
                Ok(mut resp) => {
                    resp.attempts = attempt;
                    return Ok(resp);
                }
                Err(failure) => {
                    if !failure.retryable || attempt == max_attempts {
                        return Err(failure.error);
                    }
                    tracing::warn!(attempt, error = %failure.error, "upstream attempt failed");
                    last_error = Some(failure.error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProxyError::Internal("retry loop exhausted".into())))
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
        attempt: u32,
        cfg: &RetryConfig,
    ) -> Result<UpstreamResponse, AttemptFailure> {
        let resp = self
            .client
            .post(url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let class = classify_network(&e);
                AttemptFailure {
                    retryable: class.retryable(),
                    error: e.into(),
                }
            })?;

        let status = resp.status().as_u16();
        let resp_headers = resp.headers().clone();

        if status >= 400 {
            let retry_after = parse_retry_after(&resp_headers);
            let body = resp.bytes().await.unwrap_or_default();
            let retryable = (status == 429 && cfg.retry_on_429)
                || (matches!(status, 500 | 502 | 503 | 504) && cfg.retry_on_5xx);
            return Err(AttemptFailure {
                error: ProxyError::Upstream {
                    status,
                    body: String::from_utf8_lossy(&body).to_string(),
                    retry_after_secs: retry_after,
                },
                retryable,
            });
        }

        if is_event_stream(&resp_headers) {
            let gate = Duration::from_millis(cfg.gate_timeout_ms.max(1));
            let body = self.gate_first_byte(resp, gate, attempt).await?;
            return Ok(UpstreamResponse {
                status,
                headers: resp_headers,
                body: UpstreamBody::Stream(body),
                attempts: attempt,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| {
            let class = classify_network(&e);
            AttemptFailure {
                retryable: class.retryable(),
                error: e.into(),
            }
        })?;

        // Empty JSON 2xx bodies are a known upstream failure shape.
        if cfg.retry_on_empty_body
            && is_json(&resp_headers)
            && !matches!(status, 204 | 205)
            && bytes.iter().all(|b| b.is_ascii_whitespace())
        {
            return Err(AttemptFailure {
                error: ProxyError::Protocol("upstream returned empty JSON body".into()),
                retryable: true,
            });
        }

        Ok(UpstreamResponse {
            status,
            headers: resp_headers,
            body: UpstreamBody::Buffered(bytes),
            attempts: attempt,
        })
    }

    /// Wait for exactly one byte of an SSE body. A gate failure retries
    /// only on the first attempt; afterwards the upstream may already be
    /// billing, so it surfaces as a gateway timeout.
    async fn gate_first_byte(
        &self,
        resp: reqwest::Response,
        gate: Duration,
        attempt: u32,
    ) -> Result<ByteStream, AttemptFailure> {
        let mut stream = resp.bytes_stream();

        let first = tokio::time::timeout(gate, stream.next()).await;
        let retryable = attempt == 1;
        match first {
            Ok(Some(Ok(chunk))) => {
                let rest = stream.map(|r| r.map_err(ProxyError::from));
                let chained = futures::stream::iter(vec![Ok(chunk)]).chain(rest);
                Ok(Box::pin(chained))
            }
            Ok(Some(Err(e))) => Err(AttemptFailure {
                error: e.into(),
                retryable,
            }),
            Ok(None) => Err(AttemptFailure {
                error: ProxyError::UpstreamTimeout(
                    "stream closed before the first byte".into(),
                ),
                retryable,
            }),
            Err(_) => Err(AttemptFailure {
                error: ProxyError::UpstreamTimeout(format!(
                    "no first byte within {}ms",
                    gate.as_millis()
                )),
                retryable,
            }),
        }
    }

    /// Exponential backoff with ±25% jitter, overridden by Retry-After
    /// when the config honors it.
    fn backoff_delay(
        &self,
        cfg: &RetryConfig,
        completed_attempts: u32,
        last_error: Option<&ProxyError>,
    ) -> Duration {
        if cfg.respect_retry_after
            && let Some(ProxyError::Upstream {
                retry_after_secs: Some(secs),
                ..
            }) = last_error
        {
            return Duration::from_secs(*secs);
        }

        let exp = completed_attempts.saturating_sub(1).min(20);
        let base = cfg.backoff_base_ms.max(1);
        let raw = base.saturating_mul(1u64 << exp).min(cfg.backoff_max_ms.max(base));
        let jittered = raw as f64 * (0.75 + rand::random::<f64>() * 0.5);
        Duration::from_millis(jittered as u64)
    }
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("text/event-stream"))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
}

/// Parse `Retry-After` as delay-seconds or HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.num_seconds().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: axum::http::HeaderName, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let h = headers_with(header::RETRY_AFTER, "7");
        assert_eq!(parse_retry_after(&h), Some(7));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let when = chrono::Utc::now() + chrono::Duration::seconds(30);
        let h = headers_with(header::RETRY_AFTER, &when.to_rfc2822());
        let parsed = parse_retry_after(&h).unwrap();
        assert!((28..=31).contains(&parsed));
    }

    #[test]
    fn test_parse_retry_after_past_date_clamps_to_zero() {
        let when = chrono::Utc::now() - chrono::Duration::seconds(30);
        let h = headers_with(header::RETRY_AFTER, &when.to_rfc2822());
        assert_eq!(parse_retry_after(&h), Some(0));
    }

    #[test]
    fn test_is_event_stream() {
        let h = headers_with(header::CONTENT_TYPE, "text/event-stream; charset=utf-8");
        assert!(is_event_stream(&h));
        let h = headers_with(header::CONTENT_TYPE, "application/json");
        assert!(!is_event_stream(&h));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let transport = RetryTransport::new(reqwest::Client::new(), RetryConfig::default());
        let cfg = RetryConfig {
            backoff_base_ms: 100,
            backoff_max_ms: 400,
            respect_retry_after: false,
            ..Default::default()
        };
        // attempt 1 failed → base delay with ±25% jitter
        let d1 = transport.backoff_delay(&cfg, 1, None);
        assert!((75..=125).contains(&(d1.as_millis() as u64)));
        // long runs stay capped at backoff_max ±25%
        let d5 = transport.backoff_delay(&cfg, 5, None);
        assert!((300..=500).contains(&(d5.as_millis() as u64)));
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let transport = RetryTransport::new(reqwest::Client::new(), RetryConfig::default());
        let cfg = RetryConfig::default();
        let err = ProxyError::Upstream {
            status: 429,
            body: String::new(),
            retry_after_secs: Some(9),
        };
        let d = transport.backoff_delay(&cfg, 1, Some(&err));
        assert_eq!(d, Duration::from_secs(9));
    }

    #[test]
    fn test_update_config_is_visible() {
        let transport = RetryTransport::new(reqwest::Client::new(), RetryConfig::default());
        let mut cfg = RetryConfig::default();
        cfg.max_attempts = 7;
        transport.update_config(cfg);
        assert_eq!(transport.config_snapshot().max_attempts, 7);
    }

    #[test]
    fn test_network_class_retryability() {
        assert!(NetworkClass::Timeout.retryable());
        assert!(NetworkClass::ConnectionReset.retryable());
        assert!(NetworkClass::Eof.retryable());
        assert!(!NetworkClass::Dns.retryable());
        assert!(!NetworkClass::Canceled.retryable());
        assert!(!NetworkClass::Unknown.retryable());
    }
}
