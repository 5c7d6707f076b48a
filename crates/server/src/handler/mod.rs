pub mod chat_completions;
pub mod gemini;
pub mod health;
pub mod messages;
pub mod models;
pub mod responses;

use crate::dispatch::InboundProxyRequest;
use axum::http::HeaderMap;
use bytes::Bytes;
use conduit_core::dialect::Dialect;

/// Build the dispatch request for a body-addressed route.
pub(crate) fn inbound(
    incoming: Dialect,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> InboundProxyRequest {
    InboundProxyRequest {
        incoming,
        method: "POST".to_string(),
        path: path.to_string(),
        headers,
        body,
        path_model: None,
        path_streaming: None,
    }
}
