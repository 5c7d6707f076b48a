//! Router-level tests: auth gate, introspection, and the error paths
//! that terminate before an upstream is contacted.

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use conduit_core::config::Config;
use conduit_core::cost::PriceStore;
use conduit_provider::transport::RetryTransport;
use conduit_server::AppState;
use conduit_store::detail_store::DetailStore;
use conduit_store::log_writer::LogWriter;
use conduit_store::repo::{ChannelCache, ChannelRepository, SqliteRepo};
use rusqlite::params;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;

struct Harness {
    state: AppState,
    router: axum::Router,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("conduit.db");

    let repo = Arc::new(SqliteRepo::open(&db_path).unwrap());

    // Seed a tenant, a key with a mapping, and one Claude channel.
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute("insert into tenants(id, name) values (1, 'acme')", [])
            .unwrap();
        conn.execute(
            "insert into api_keys(id, tenant_id, key, model_mappings) values (1, 1, 'ck-live', ?1)",
            params![r#"{"sonnet":"claude-sonnet-4-20250514"}"#],
        )
        .unwrap();
        conn.execute(
            "insert into channels(id, name, kind, endpoint, base_url, api_key, model_globs)
             values (1, 'claude-main', 'claude', 'chat', 'https://upstream.invalid', 'sk-up', ?1)",
            params![r#"["claude-*"]"#],
        )
        .unwrap();
    }

    let writer_conn = rusqlite::Connection::open(&db_path).unwrap();
    conduit_store::schema::init_schema(&writer_conn).unwrap();
    let log_writer = LogWriter::start(writer_conn);

    let config = Config::default();
    let channels = Arc::new(ChannelCache::new());
    channels.refresh(repo.as_ref() as &dyn ChannelRepository);

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(config.clone())),
        repo,
        channels,
        translators: Arc::new(conduit_translator::build_registry()),
        transport: Arc::new(RetryTransport::new(
            conduit_provider::build_http_client(5).unwrap(),
            config.retry.clone(),
        )),
        log_writer: log_writer.clone(),
        details: Arc::new(DetailStore::new(config.detail.clone(), log_writer)),
        prices: Arc::new(PriceStore::new(&config.model_prices)),
        start_time: Instant::now(),
    };

    let router = conduit_server::build_router(state.clone());
    Harness {
        state,
        router,
        _dir: dir,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let h = harness();
    let resp = h
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    assert_eq!(v["status"], "ok");
}

#[tokio::test]
async fn test_missing_key_rejected() {
    let h = harness();
    let resp = h
        .router
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"model":"x","messages":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let v = body_json(resp).await;
    assert_eq!(v["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn test_invalid_key_rejected() {
    let h = harness();
    let resp = h
        .router
        .oneshot(
            Request::post("/v1/messages")
                .header("x-api-key", "nope")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_models() {
    let h = harness();
    let resp = h
        .router
        .oneshot(
            Request::get("/v1/models")
                .header("authorization", "Bearer ck-live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    let ids: Vec<&str> = v["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"sonnet"));
}

#[tokio::test]
async fn test_no_channel_leaves_error_row() {
    let h = harness();
    let resp = h
        .router
        .clone()
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("authorization", "Bearer ck-live")
                .body(Body::from(
                    r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let request_id = resp
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let v = body_json(resp).await;
    assert_eq!(v["error"]["code"], "no_channel");

    let row = h.state.log_writer.fetch_log(&request_id).await.unwrap();
    assert_eq!(row.status, "error");
    assert_eq!(row.error_type.as_deref(), Some("no_channel"));
}

#[tokio::test]
async fn test_unsupported_conversion_rejected() {
    let h = harness();
    // A Gemini-dialect client mapped onto the Claude channel has no
    // registered translator pair.
    let resp = h
        .router
        .oneshot(
            Request::post("/v1beta/models/claude-sonnet-4-20250514:generateContent")
                .header("x-goog-api-key", "ck-live")
                .body(Body::from(
                    r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = body_json(resp).await;
    assert_eq!(v["error"]["code"], "format_conversion_unsupported");
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let h = harness();
    let resp = h
        .router
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("authorization", "Bearer ck-live")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = body_json(resp).await;
    assert_eq!(v["error"]["type"], "invalid_request_error");
}
