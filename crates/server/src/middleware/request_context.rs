use axum::extract::ConnectInfo;
use axum::{extract::Request, middleware::Next, response::Response};
use conduit_core::context::RequestContext;
use std::net::SocketAddr;

/// Attach a fresh request context (id, start time, client IP) to every
/// request and echo the id back to the client.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let ctx = RequestContext::new(client_ip);
    let request_id = ctx.request_id.clone();
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
