use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::dialect::Dialect;
use crate::sanitize::mask_secrets;

/// Unified error type for all proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("no channel available for model {model}")]
    NoChannel { model: String },

    #[error("conversion from {from} to {to} is not supported")]
    UnsupportedConversion { from: Dialect, to: Dialect },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error (status {status}): {body}")]
    Upstream {
        status: u16,
        body: String,
        /// Parsed from upstream `Retry-After` header (seconds), if present.
        retry_after_secs: Option<u64>,
    },

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("stream stalled: {0}")]
    StreamTimeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) | Self::Translation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NoChannel { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedConversion { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => {
                // Upstream 5xx surfaces as a gateway failure, 4xx passes through.
                if *status >= 500 {
                    StatusCode::BAD_GATEWAY
                } else {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
            }
            Self::UpstreamTimeout(_) | Self::StreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Network(_) | Self::Protocol(_) => StatusCode::BAD_GATEWAY,
            Self::Canceled => StatusCode::BAD_GATEWAY,
        }
    }

    /// OpenAI-compatible error type, chosen by HTTP status.
    pub fn error_type(&self) -> &'static str {
        match self.status_code().as_u16() {
            401 => "authentication_error",
            403 => "permission_error",
            429 => "rate_limit_error",
            s if (400..500).contains(&s) => "invalid_request_error",
            _ => "server_error",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "invalid_api_key",
            Self::Forbidden(_) => "permission_denied",
            Self::NoChannel { .. } => "no_channel",
            Self::UnsupportedConversion { .. } => "format_conversion_unsupported",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::BadRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::StreamTimeout(_) => "stream_timeout",
            Self::Translation(_) => "translation_error",
            Self::Protocol(_) => "protocol_error",
            _ => "internal_error",
        }
    }

    /// Short tag recorded in the trace `error_type` column.
    pub fn trace_tag(&self) -> &'static str {
        match self {
            Self::Auth(_) | Self::Forbidden(_) => "auth",
            Self::NoChannel { .. } => "no_channel",
            Self::UnsupportedConversion { .. } => "format_conversion_unsupported",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Upstream { status, .. } if *status == 429 => "rate_limited",
            Self::Upstream { .. } => "upstream_error",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::StreamTimeout(_) => "stream_timeout",
            Self::Network(_) => "network",
            Self::Translation(_) => "translation_failure",
            Self::Protocol(_) => "protocol_error",
            Self::Canceled => "client_disconnect",
            Self::Config(_) | Self::Internal(_) => "unknown",
        }
    }

    /// True when a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::UpstreamTimeout(_) => true,
            Self::Upstream { status, .. } => {
                *status == 429 || matches!(status, 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // For upstream errors, pass the original JSON body through verbatim.
        if let Self::Upstream { body, .. } = &self
            && serde_json::from_str::<serde_json::Value>(body).is_ok()
        {
            return (status, [("content-type", "application/json")], body.clone()).into_response();
        }

        let body = json!({
            "error": {
                "message": mask_secrets(&self.to_string()),
                "type": self.error_type(),
                "code": self.error_code(),
            }
        });

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Translation(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::Auth("bad key".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProxyError::BodyTooLarge { limit: 10 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProxyError::UpstreamTimeout("gate".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        // 5xx from upstream surfaces as 502
        let e = ProxyError::Upstream {
            status: 503,
            body: "oops".into(),
            retry_after_secs: None,
        };
        assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);
        // 429 passes through
        let e = ProxyError::Upstream {
            status: 429,
            body: "slow down".into(),
            retry_after_secs: Some(3),
        };
        assert_eq!(e.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(e.error_type(), "rate_limit_error");
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ProxyError::Network("reset".into()).is_retryable());
        assert!(
            ProxyError::Upstream {
                status: 502,
                body: String::new(),
                retry_after_secs: None
            }
            .is_retryable()
        );
        assert!(!ProxyError::BadRequest("nope".into()).is_retryable());
        assert!(!ProxyError::Canceled.is_retryable());
    }

    #[test]
    fn test_trace_tags() {
        assert_eq!(ProxyError::Canceled.trace_tag(), "client_disconnect");
        // A mid-stream stall is distinct from a transport timeout.
        assert_eq!(
            ProxyError::UpstreamTimeout("gate".into()).trace_tag(),
            "upstream_timeout"
        );
        assert_eq!(
            ProxyError::StreamTimeout("idle".into()).trace_tag(),
            "stream_timeout"
        );
        assert_eq!(
            ProxyError::UnsupportedConversion {
                from: Dialect::Gemini,
                to: Dialect::Claude
            }
            .trace_tag(),
            "format_conversion_unsupported"
        );
    }

    #[test]
    fn test_error_message_masked() {
        let e = ProxyError::Internal("leaked sk-ant-supersecret1234".into());
        let resp = e.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
