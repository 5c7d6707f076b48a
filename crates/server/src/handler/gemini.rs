use crate::AppState;
use crate::dispatch::{InboundProxyRequest, proxy_request};
use crate::model_map::split_gemini_segment;
use axum::Extension;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use conduit_core::context::{ProxyConfig, RequestContext};
use conduit_core::dialect::Dialect;
use conduit_core::error::ProxyError;
use std::sync::Arc;

/// Gemini generateContent / streamGenerateContent. The path segment
/// carries both the model and the action (`{model}:{action}`).
pub async fn generate_content(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (model, action) = match split_gemini_segment(&model_action) {
        Ok(parts) => parts,
        Err(e) => return e.into_response(),
    };
    let streaming = match action.as_str() {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return ProxyError::BadRequest(format!("unsupported action: {other}"))
                .into_response();
        }
    };

    let req = InboundProxyRequest {
        incoming: Dialect::Gemini,
        method: "POST".to_string(),
        path: format!("/v1beta/models/{model_action}"),
        headers,
        body,
        path_model: Some(model),
        path_streaming: Some(streaming),
    };
    proxy_request(state, tenant, ctx, req).await
}
