//! HTTP API gateway for LearnPath.
//!
//! Exposes the chat endpoint used by the web frontend, plus health, tool
//! catalog and weekly summary lookups. Built on Axum.

mod api;

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use learnpath_agent::TurnOrchestrator;
use learnpath_config::GatewayConfig;
use learnpath_workflow::LatestSummaries;

/// Shared application state for the gateway.
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub summaries: Arc<LatestSummaries>,
}

pub type SharedState = Arc<AppState>;

/// Build the Axum router with all `/api` routes.
///
/// Layers applied:
/// - CORS (any origin when `allowed_origins` is empty)
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/chat", post(api::chat_handler))
        .route("/api/chat/reset", post(api::reset_handler))
        .route("/api/health", get(api::health_handler))
        .route("/api/tools", get(api::list_tools_handler))
        .route("/api/summaries/{user_id}", get(api::summary_handler))
        .route("/api/events", get(api::events_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Bind and serve until `shutdown` resolves.
pub async fn start(
    state: SharedState,
    config: &GatewayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use learnpath_agent::test_support::*;
    use learnpath_conversation::{CompactionPolicy, ConversationStore};
    use learnpath_core::event::{DomainEvent, EventBus};
    use learnpath_core::provider::Provider;
    use learnpath_core::tool::ToolGateway;
    use learnpath_workflow::{BatchSummary, SummarySink};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state_with(provider: Arc<dyn Provider>, gateway: Arc<dyn ToolGateway>) -> SharedState {
        let store = Arc::new(ConversationStore::new(
            "coach {user_id}",
            CompactionPolicy::new(5, Arc::new(StaticSummarizer("s".into()))),
        ));
        let orchestrator = Arc::new(
            TurnOrchestrator::new(provider, gateway, store, Arc::new(EventBus::default()))
                .with_max_rounds(2),
        );
        Arc::new(AppState {
            orchestrator,
            summaries: Arc::new(LatestSummaries::new()),
        })
    }

    fn connected() -> Arc<StubGateway> {
        Arc::new(StubGateway::new(vec![descriptor("saveEntry")]).with_reply("saveEntry", "ok"))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_reply() {
        let state = state_with(Arc::new(ScriptedProvider::single_text("Hello!")), connected());
        let app = build_router(state.clone(), &[]);

        let response = app
            .oneshot(post_json("/api/chat", json!({"userId": 42, "message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"response": "Hello!", "success": true})
        );
        assert_eq!(state.orchestrator.store().snapshot(42).await.len(), 3);
    }

    #[tokio::test]
    async fn chat_missing_fields_is_bad_request() {
        let state = state_with(Arc::new(ScriptedProvider::new(vec![])), connected());

        for body in [json!({"message": "Hi"}), json!({"userId": 1}), json!({"userId": 1, "message": ""})] {
            let response = build_router(state.clone(), &[])
                .oneshot(post_json("/api/chat", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = body_json(response).await;
            assert_eq!(json["error"], "message and userId are required");
            assert_eq!(json["success"], false);
        }
    }

    #[tokio::test]
    async fn chat_malformed_body_is_bad_request() {
        let state = state_with(Arc::new(ScriptedProvider::new(vec![])), connected());
        let response = build_router(state, &[])
            .oneshot(post_json("/api/chat", json!({"userId": "abc", "message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn chat_without_tool_channel_is_unavailable() {
        let state = state_with(
            Arc::new(ScriptedProvider::single_text("unused")),
            Arc::new(StubGateway::disconnected()),
        );
        let response = build_router(state, &[])
            .oneshot(post_json("/api/chat", json!({"userId": 1, "message": "Hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn loop_limit_is_server_error() {
        let state = state_with(Arc::new(LoopingProvider::default()), connected());
        let response = build_router(state.clone(), &[])
            .oneshot(post_json("/api/chat", json!({"userId": 5, "message": "go"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("did not converge"));
        assert_eq!(json["success"], false);
        assert!(state.orchestrator.store().snapshot(5).await.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let state = state_with(Arc::new(ScriptedProvider::single_text("Hi")), connected());
        state
            .orchestrator
            .process_message(8, "hello")
            .await
            .unwrap();

        let response = build_router(state.clone(), &[])
            .oneshot(post_json("/api/chat/reset", json!({"userId": 8})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));
        assert!(state.orchestrator.store().snapshot(8).await.is_empty());
    }

    #[tokio::test]
    async fn health_reports_tool_readiness() {
        let ready = state_with(Arc::new(ScriptedProvider::new(vec![])), connected());
        let response = build_router(ready, &[]).oneshot(get_request("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["tools_ready"], true);

        let down = state_with(
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(StubGateway::disconnected()),
        );
        let json = body_json(build_router(down, &[]).oneshot(get_request("/api/health")).await.unwrap()).await;
        assert_eq!(json["tools_ready"], false);
    }

    #[tokio::test]
    async fn tools_lists_catalog() {
        let state = state_with(Arc::new(ScriptedProvider::new(vec![])), connected());
        let response = build_router(state, &[]).oneshot(get_request("/api/tools")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json[0]["name"], "saveEntry");
        assert!(json[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn summaries_lookup() {
        let state = state_with(Arc::new(ScriptedProvider::new(vec![])), connected());

        let response = build_router(state.clone(), &[])
            .oneshot(get_request("/api/summaries/3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let now = chrono::Utc::now();
        state
            .summaries
            .deliver(&BatchSummary {
                user_id: 3,
                summary: "Solid week of graphs".into(),
                start_date: now - chrono::Duration::days(7),
                end_date: now,
                generated_at: now,
            })
            .await;

        let response = build_router(state, &[])
            .oneshot(get_request("/api/summaries/3"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["summary"], "Solid week of graphs");
    }

    #[tokio::test]
    async fn events_stream_published_domain_events() {
        let state = state_with(Arc::new(ScriptedProvider::single_text("Hi")), connected());
        let response = build_router(state.clone(), &[])
            .oneshot(get_request("/api/events"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        state.orchestrator.event_bus().publish(DomainEvent::ToolExecuted {
            user_id: 6,
            tool_name: "saveEntry".into(),
            success: true,
            duration_ms: 3,
            timestamp: chrono::Utc::now(),
        });

        let mut body = response.into_body();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), body.frame())
            .await
            .expect("no event within 5s")
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: tool_executed"), "{text}");
        assert!(text.contains("\"tool_name\":\"saveEntry\""), "{text}");
    }

    #[tokio::test]
    async fn cors_reflects_origin_by_default() {
        let state = state_with(Arc::new(ScriptedProvider::new(vec![])), connected());
        let request = Request::builder()
            .uri("/api/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state, &[]).oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:5173"
        );
    }
}
