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

/// Claude messages (/v1/messages).
pub async fn messages(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = super::inbound(Dialect::Claude, "/v1/messages", headers, body);
    proxy_request(state, tenant, ctx, req).await
}
