//! HTTP gateway for DeepSearch.
//!
//! Routes:
//! - `POST /api/chat`: admit the caller, run the agent, stream the answer
//! - `GET /health`: liveness, no auth
//!
//! Built on Axum. The chat body is streamed as it is produced, in the wire
//! format chosen by `[gateway] stream_format`.

pub mod access;
pub mod multiplex;

pub use access::{AccessError, AccessGate, BearerTokenIdentity};
pub use multiplex::{GENERIC_ERROR, StreamMultiplexer, WireFormat};

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use deepsearch_agent::{AgentLoop, AgentSettings};
use deepsearch_config::AppConfig;
use deepsearch_core::message::{Conversation, Message};
use deepsearch_core::quota::QuotaStore;
use deepsearch_core::identity::UserDirectory;
use deepsearch_tools::{SearchTool, ToolBox};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub gate: AccessGate,
    pub agent: AgentLoop,
    pub format: WireFormat,
    pub request_timeout: Duration,
    pub body_limit: usize,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire up provider, search, store and identity from configuration.
pub async fn build_state(config: &AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    let provider = deepsearch_providers::build_from_config(&config.provider)?;
    let search = deepsearch_tools::build_search_provider(&config.search)?;
    let store = deepsearch_store::open(&config.store, &config.users).await?;
    let identity = Arc::new(BearerTokenIdentity::from_config(&config.sessions));

    let users: Arc<dyn UserDirectory> = store.clone();
    let quota: Arc<dyn QuotaStore> = store;
    let gate = AccessGate::new(identity, users, quota, config.quota.daily_limit);
    let agent = AgentLoop::new(
        provider,
        ToolBox::new(SearchTool::new(search)),
        AgentSettings::from(&config.agent),
    );

    Ok(Arc::new(GatewayState {
        gate,
        agent,
        format: config.gateway.stream_format.into(),
        request_timeout: Duration::from_secs(config.gateway.request_timeout_secs),
        body_limit: config.gateway.body_limit_bytes,
    }))
}

/// Start the gateway HTTP server and serve until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config).await?;
    let app = build_router(state);

    info!(
        addr = %addr,
        model = %config.agent.model,
        daily_limit = config.quota.daily_limit,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

// --- Handlers ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// `POST /api/chat`
///
/// The caller is authenticated before the body is looked at. Malformed
/// bodies are rejected before admission so they never use quota.
async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let session = match state.gate.authenticate(&headers) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected chat body");
            return bad_request(rejection.body_text());
        }
    };
    if request.messages.is_empty() {
        return bad_request("messages must not be empty");
    }

    let user = match state.gate.admit(&session).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    info!(user_id = %user.id, messages = request.messages.len(), "Chat request started");

    let conversation = Conversation::from_messages(request.messages);
    let cancel = CancellationToken::new();
    let events = state.agent.run(&conversation, cancel.clone());
    let stream = StreamMultiplexer::new(state.format, state.request_timeout)
        .into_body_stream(events, cancel);

    let mut response = Response::new(Body::from_stream(stream));
    let response_headers = response.headers_mut();
    response_headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(state.format.content_type()),
    );
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if state.format == WireFormat::DataStream {
        response_headers.insert(
            HeaderName::from_static(multiplex::DATA_STREAM_HEADER),
            HeaderValue::from_static("v1"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use deepsearch_agent::test_helpers::{
        ScriptedTurn, SequentialMockProvider, StaticSearchProvider, search_call, text_turn,
        tool_turn,
    };
    use deepsearch_core::error::ProviderError;
    use deepsearch_core::identity::UserIdentity;
    use deepsearch_core::provider::Provider;
    use deepsearch_store::InMemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        store: Arc<InMemoryStore>,
        provider: Arc<SequentialMockProvider>,
    }

    fn harness(turns: Vec<ScriptedTurn>, daily_limit: u64, format: WireFormat) -> Harness {
        let search = StaticSearchProvider::new(&["https://www.rust-lang.org/"]);
        harness_with_search(turns, daily_limit, format, search)
    }

    fn harness_with_search(
        turns: Vec<ScriptedTurn>,
        daily_limit: u64,
        format: WireFormat,
        search: StaticSearchProvider,
    ) -> Harness {
        let store = Arc::new(InMemoryStore::with_users([
            UserIdentity::new("alice"),
            UserIdentity::admin("root"),
        ]));
        let provider = Arc::new(SequentialMockProvider::new(turns));
        let identity = BearerTokenIdentity::new([
            ("alice-token".to_string(), "alice".to_string()),
            ("root-token".to_string(), "root".to_string()),
            ("ghost-token".to_string(), "ghost".to_string()),
        ]);
        let search = SearchTool::new(Arc::new(search));
        let state = Arc::new(GatewayState {
            gate: AccessGate::new(Arc::new(identity), store.clone(), store.clone(), daily_limit),
            agent: AgentLoop::new(
                provider.clone() as Arc<dyn Provider>,
                ToolBox::new(search),
                AgentSettings::default(),
            ),
            format,
            request_timeout: Duration::from_secs(60),
            body_limit: 64 * 1024,
        });
        Harness {
            app: build_router(state),
            store,
            provider,
        }
    }

    fn chat(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    const HELLO: &str = r#"{"messages":[{"role":"user","content":"Hello"}]}"#;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn error_of(response: Response) -> String {
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        json["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let h = harness(vec![], 1, WireFormat::DataStream);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn limit_of_one_allows_one_request_per_day() {
        let h = harness(vec![text_turn(&["Hello"])], 1, WireFormat::DataStream);

        let first = h.app.clone().oneshot(chat(Some("alice-token"), HELLO)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-vercel-ai-data-stream"], "v1");
        assert_eq!(first.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(
            body_text(first).await,
            "0:\"Hello\"\nd:{\"finishReason\":\"stop\"}\n"
        );

        let second = h.app.clone().oneshot(chat(Some("alice-token"), HELLO)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            error_of(second).await,
            "Rate limit exceeded. You can make up to 1 requests per day."
        );
        assert_eq!(h.store.request_count().await, 1);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn unauthenticated_and_unknown_user() {
        let h = harness(vec![], 1, WireFormat::DataStream);

        let response = h.app.clone().oneshot(chat(None, HELLO)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(response).await, "Unauthorized");

        let response = h.app.clone().oneshot(chat(Some("ghost-token"), HELLO)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_of(response).await, "User not found");

        assert_eq!(h.store.request_count().await, 0);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_session_wins_over_bad_body() {
        let h = harness(vec![], 1, WireFormat::DataStream);

        let response = h.app.clone().oneshot(chat(None, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(response).await, "Unauthorized");

        let response = h.app.clone().oneshot(chat(None, r#"{"messages":[]}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = h.app.clone().oneshot(chat(Some("ghost-token"), "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(h.store.request_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_mid_search_still_counts_once() {
        let h = harness_with_search(
            vec![
                tool_turn(vec![search_call("call_1", "slow")]),
                text_turn(&["never sent"]),
            ],
            5,
            WireFormat::DataStream,
            StaticSearchProvider::slow(Duration::from_secs(30)),
        );

        let response = h.app.clone().oneshot(chat(Some("alice-token"), HELLO)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        assert!(frame.data_ref().unwrap().starts_with(b"9:"));
        drop(body);

        // Past the search delay: a loop that kept going would call the model again.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.store.request_count().await, 1);
    }

    #[tokio::test]
    async fn admin_is_not_limited() {
        let h = harness(
            vec![text_turn(&["one"]), text_turn(&["two"])],
            1,
            WireFormat::DataStream,
        );

        for expected in ["one", "two"] {
            let response = h.app.clone().oneshot(chat(Some("root-token"), HELLO)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_text(response).await.contains(expected));
        }
        assert_eq!(h.store.request_count().await, 2);
    }

    #[tokio::test]
    async fn provider_failure_is_generic_and_still_counted() {
        let h = harness(
            vec![ScriptedTurn::Reject(ProviderError::AuthenticationFailed(
                "upstream key sk-live-abc rejected".into(),
            ))],
            5,
            WireFormat::DataStream,
        );

        let response = h.app.clone().oneshot(chat(Some("alice-token"), HELLO)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert_eq!(body, "3:\"Oops, an error occurred!\"\n");
        assert!(!body.contains("sk-live-abc"));
        assert_eq!(h.store.request_count().await, 1);
    }

    #[tokio::test]
    async fn research_turn_streams_tool_parts_and_sources() {
        let h = harness(
            vec![
                tool_turn(vec![search_call("call_1", "rust")]),
                text_turn(&["See [Rust](https://www.rust-lang.org/)."]),
            ],
            5,
            WireFormat::DataStream,
        );

        let response = h.app.clone().oneshot(chat(Some("alice-token"), HELLO)).await.unwrap();
        let body = body_text(response).await;
        let prefixes: Vec<&str> = body.lines().map(|l| &l[..2]).collect();
        assert_eq!(prefixes, vec!["9:", "a:", "h:", "0:", "d:"]);
        assert!(body.contains("\"toolCallId\":\"call_1\""));
        assert!(body.contains("https://www.rust-lang.org/"));
    }

    #[tokio::test]
    async fn sse_format_uses_event_stream() {
        let h = harness(vec![text_turn(&["Hello"])], 1, WireFormat::Sse);

        let response = h.app.clone().oneshot(chat(Some("alice-token"), HELLO)).await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert!(response.headers().get("x-vercel-ai-data-stream").is_none());
        let body = body_text(response).await;
        assert!(body.starts_with("event: text_delta\n"));
        assert!(body.contains("event: finished\n"));
    }

    #[tokio::test]
    async fn malformed_or_empty_body_is_bad_request_and_free() {
        let h = harness(vec![], 1, WireFormat::DataStream);

        let response = h.app.clone().oneshot(chat(Some("alice-token"), "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = h
            .app
            .clone()
            .oneshot(chat(Some("alice-token"), r#"{"messages":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_of(response).await, "messages must not be empty");

        assert_eq!(h.store.request_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let h = harness(vec![], 1, WireFormat::DataStream);
        let content = "x".repeat(128 * 1024);
        let body = serde_json::json!({"messages": [{"role": "user", "content": content}]}).to_string();

        let response = h.app.clone().oneshot(chat(Some("alice-token"), &body)).await.unwrap();
        assert!(response.status().is_client_error());
        assert_eq!(h.store.request_count().await, 0);
    }
}
