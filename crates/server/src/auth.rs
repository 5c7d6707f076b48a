use crate::AppState;
use conduit_core::error::ProxyError;
use conduit_store::repo::AuthRepository;

use axum::{extract::State, http::Request, middleware::Next, response::Response};
use std::sync::Arc;

/// Validate the inbound API key and resolve the tenant's proxy config.
/// The config is attached as an extension for the handlers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ProxyError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ProxyError::Auth("missing API key".to_string()))?;

    let config = state
        .repo
        .resolve_key(&token)?
        .ok_or_else(|| ProxyError::Auth("invalid API key".to_string()))?;

    request.extensions_mut().insert(Arc::new(config));
    Ok(next.run(request).await)
}

/// Pull the key from `Authorization: Bearer`, `X-Api-Key`, or
/// `X-Goog-Api-Key`, in that order.
fn extract_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .or_else(|| headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}
