use crate::AppState;
use crate::dispatch::proxy_request;
use axum::Extension;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use conduit_core::context::{ProxyConfig, RequestContext};
use conduit_core::dialect::Dialect;
use std::sync::Arc;

/// OpenAI chat completions (/v1/chat/completions).
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = super::inbound(Dialect::OpenAIChat, "/v1/chat/completions", headers, body);
    proxy_request(state, tenant, ctx, req).await
}

/// Legacy completions (/v1/completions), treated as the chat dialect;
/// no cross-dialect translation is registered for this shape.
pub async fn completions(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = super::inbound(Dialect::OpenAIChat, "/v1/completions", headers, body);
    proxy_request(state, tenant, ctx, req).await
}
