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

/// OpenAI responses (/v1/responses).
pub async fn responses(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = super::inbound(Dialect::OpenAIResponses, "/v1/responses", headers, body);
    proxy_request(state, tenant, ctx, req).await
}
