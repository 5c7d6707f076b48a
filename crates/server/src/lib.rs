pub mod auth;
pub mod dispatch;
pub mod handler;
pub mod middleware;
pub mod model_map;
pub mod pipeline;

use arc_swap::ArcSwap;
use axum::{Router, middleware as axum_mw};
use conduit_core::config::Config;
use conduit_core::cost::PriceStore;
use conduit_provider::transport::RetryTransport;
use conduit_store::detail_store::DetailStore;
use conduit_store::log_writer::LogWriter;
use conduit_store::repo::{ChannelCache, SqliteRepo};
use conduit_translator::TranslatorRegistry;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<Config>>,
    pub repo: Arc<SqliteRepo>,
    pub channels: Arc<ChannelCache>,
    pub translators: Arc<TranslatorRegistry>,
    pub transport: Arc<RetryTransport>,
    pub log_writer: LogWriter,
    pub details: Arc<DetailStore>,
    pub prices: Arc<PriceStore>,
    pub start_time: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.load().max_request_body_bytes;

    // Public routes, no auth required
    let public_routes = Router::new().route("/health", axum::routing::get(handler::health::health));

    // Model-invocation and introspection routes, auth required
    let api_routes = Router::new()
        .route(
            "/v1/models",
            axum::routing::get(handler::models::list_models),
        )
        .route(
            "/v1/chat/completions",
            axum::routing::post(handler::chat_completions::chat_completions),
        )
        .route(
            "/v1/completions",
            axum::routing::post(handler::chat_completions::completions),
        )
        .route(
            "/v1/responses",
            axum::routing::post(handler::responses::responses),
        )
        .route(
            "/v1/messages",
            axum::routing::post(handler::messages::messages),
        )
        .route(
            "/v1beta/models",
            axum::routing::get(handler::models::list_models_gemini),
        )
        .route(
            "/v1beta/models/{model_action}",
            axum::routing::post(handler::gemini::generate_content),
        )
        .route(
            "/v1beta1/publishers/google/models/{model_action}",
            axum::routing::post(handler::gemini::generate_content),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(axum_mw::from_fn(
            middleware::request_logging::request_logging_middleware,
        ))
        .layer(axum_mw::from_fn(
            middleware::request_context::request_context_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
