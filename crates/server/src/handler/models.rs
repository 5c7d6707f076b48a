use crate::AppState;
use axum::Extension;
use axum::Json;
use axum::extract::State;
use conduit_core::context::{ProxyConfig, RequestContext};
use serde_json::{Value, json};
use std::sync::Arc;

/// Concrete (glob-free) model names advertised by the enabled channels,
/// plus the tenant's mapping aliases.
fn visible_models(state: &AppState, tenant: &ProxyConfig) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for channel in state.channels.all() {
        for glob in &channel.model_globs {
            if !glob.contains('*') && !names.contains(glob) {
                names.push(glob.clone());
            }
        }
    }
    for rule in &tenant.model_mappings {
        if !rule.pattern.contains('*') && !names.contains(&rule.pattern) {
            names.push(rule.pattern.clone());
        }
    }
    names.sort();
    names
}

/// Record an introspection request through the batched log path.
fn log_non_model(state: &AppState, tenant: &ProxyConfig, ctx: &RequestContext, path: &str) {
    let trace = conduit_core::trace::RequestTrace::new(
        &ctx.request_id,
        tenant.tenant_id,
        tenant.api_key_id,
        "GET",
        path,
    );
    trace.set_response(200);
    state.log_writer.write_non_model(trace.snapshot());
}

/// GET /v1/models (OpenAI list shape).
pub async fn list_models(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
) -> Json<Value> {
    log_non_model(&state, &tenant, &ctx, "/v1/models");
    let data: Vec<Value> = visible_models(&state, &tenant)
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": "proxy",
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

/// GET /v1beta/models (Gemini list shape).
pub async fn list_models_gemini(
    State(state): State<AppState>,
    Extension(tenant): Extension<Arc<ProxyConfig>>,
    Extension(ctx): Extension<RequestContext>,
) -> Json<Value> {
    log_non_model(&state, &tenant, &ctx, "/v1beta/models");
    let models: Vec<Value> = visible_models(&state, &tenant)
        .into_iter()
        .map(|id| {
            json!({
                "name": format!("models/{id}"),
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();
    Json(json!({"models": models}))
}
