// HTTP API Server module

use anyhow::Result;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::ledger::CoinLedger;
use crate::proxy::GenerationProxy;

pub mod error;
mod handlers;

static SERVER_HANDLE: OnceCell<RwLock<Option<oneshot::Sender<()>>>> = OnceCell::new();

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<CoinLedger>,
    pub proxy: Arc<GenerationProxy>,
    pub config: Arc<AppConfig>,
}

/// API Key authentication middleware
async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // If no API keys configured, allow all requests
    if state.config.api_keys.is_empty() {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let is_valid = match auth_header {
        Some(auth) => {
            // Support both "Bearer <key>" and raw key
            let key = auth.strip_prefix("Bearer ").unwrap_or(auth).trim();
            state.config.api_keys.iter().any(|k| k == key)
        }
        None => false,
    };

    if is_valid {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            [("Content-Type", "application/json")],
            r#"{"error":{"message":"Invalid API key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        )
            .into_response()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    // Routes that require API key authentication
    let protected_routes = Router::new()
        .route("/api/models", get(handlers::list_models))
        .route(
            "/api/coins/:user_id",
            get(handlers::get_coins)
                .put(handlers::set_coins)
                .post(handlers::set_coins),
        )
        .route("/api/coins/:user_id/increment", post(handlers::increment_coins))
        .route("/api/generate", post(handlers::generate))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Routes that don't require authentication
    let public_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/test", get(handlers::test_endpoint));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: AppState) -> Result<()> {
    let host = if state.config.host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        state.config.host.clone()
    };
    let addr = format!("{}:{}", host, state.config.port);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on {}", addr);

    let (tx, rx) = oneshot::channel::<()>();

    SERVER_HANDLE
        .get_or_init(|| RwLock::new(None))
        .write()
        .replace(tx);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

pub async fn stop_server() -> Result<()> {
    if let Some(lock) = SERVER_HANDLE.get() {
        if let Some(tx) = lock.write().take() {
            let _ = tx.send(());
            tracing::info!("API server stopping");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEntry;
    use crate::ledger::memory::MemoryLedger;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_app(config: AppConfig) -> Router {
        let proxy = GenerationProxy::new(config.providers.clone(), config.generation.clone()).unwrap();
        let state = AppState {
            ledger: Arc::new(CoinLedger::Memory(MemoryLedger::new(config.ledger.default_balance))),
            proxy: Arc::new(proxy),
            config: Arc::new(config),
        };
        build_router(state)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn openai_config(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.openai = ProviderEntry {
            api_key: Some("sk-test".to_string()),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        config.generation.structured_output = false;
        config
    }

    fn openai_reply() -> Value {
        json!({
            "model": "gpt-4.1-nano",
            "choices": [{ "message": { "role": "assistant", "content": "print('hi')" } }],
            "usage": { "prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7 }
        })
    }

    #[tokio::test]
    async fn test_health_and_test_endpoints() {
        let app = test_app(AppConfig::default());

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ledger"], "memory");

        let (status, body) = send(&app, Method::GET, "/api/test", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Backend is working");
    }

    #[tokio::test]
    async fn test_coin_endpoints() {
        let app = test_app(AppConfig::default());

        let (status, body) = send(&app, Method::GET, "/api/coins/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coins"], 100);
        assert_eq!(body["user_id"], "alice");
        assert!(body["last_updated"].is_string());

        let (status, body) = send(&app, Method::PUT, "/api/coins/alice", Some(json!({ "coins": 7 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coins"], 7);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/coins/alice/increment",
            Some(json!({ "amount": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["coins"], 10);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/coins/alice/increment",
            Some(json!({ "delta": -11 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "insufficient_coins");

        let (_, body) = send(&app, Method::GET, "/api/coins/alice", None).await;
        assert_eq!(body["coins"], 10);
    }

    #[tokio::test]
    async fn test_root_lists_service_and_routes() {
        let app = test_app(AppConfig::default());
        let (status, body) = send(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "coin-gen-proxy");

        let endpoints: Vec<&str> = body["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e.as_str())
            .collect();
        assert!(endpoints.contains(&"GET /"));
        assert!(endpoints.contains(&"POST /api/coins/:user_id"));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_json_bad_requests() {
        let app = test_app(AppConfig::default());
        let cases = [
            (
                Method::POST,
                "/api/generate",
                json!({ "type": "audio", "user_prompt": "a beep" }),
            ),
            (Method::PUT, "/api/coins/alice", json!({ "coins": "lots" })),
            (Method::PUT, "/api/coins/alice", json!({ "coins": u64::MAX })),
            (Method::POST, "/api/coins/alice/increment", json!({})),
        ];

        for (method, uri, body) in cases {
            let (status, response) = send(&app, method.clone(), uri, Some(body.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{} {} {}", method, uri, body);
            assert_eq!(response["error"]["code"], "invalid_request");
            assert_eq!(response["error"]["type"], "invalid_request_error");
            assert!(response["error"]["message"].is_string());
        }

        // Not JSON at all
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/api/coins/alice")
            .header("Content-Type", "application/json")
            .body(Body::from("{coins"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_slow_vendor_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(openai_reply())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut config = openai_config(&server);
        config.generation.timeout_secs = 1;
        let app = test_app(config);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({ "type": "script", "user_prompt": "say hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["code"], "upstream_timeout");
    }

    #[tokio::test]
    async fn test_coin_input_validation() {
        let app = test_app(AppConfig::default());

        let (status, body) = send(&app, Method::POST, "/api/coins/bob", Some(json!({ "coins": -1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_request");

        let (status, body) = send(&app, Method::GET, "/api/coins/bad%20id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_user_id");
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let mut config = AppConfig::default();
        config.api_keys = vec!["k1".to_string()];
        let app = test_app(config);

        let (status, body) = send(&app, Method::GET, "/api/coins/carol", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "invalid_api_key");

        let request = Request::builder()
            .uri("/api/coins/carol")
            .header("Authorization", "Bearer k1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, _) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_models_listing() {
        let server = MockServer::start().await;
        let app = test_app(openai_config(&server));

        let (status, body) = send(&app, Method::GET, "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["default_provider"], "openai");
        assert_eq!(body["providers"][0]["provider"], "openai");
        assert_eq!(body["providers"][0]["configured"], true);
        assert_eq!(body["providers"][0]["fallback_model"], "gpt-4.1-mini");
        assert_eq!(body["providers"][1]["configured"], false);
    }

    #[tokio::test]
    async fn test_generate_unconfigured_provider() {
        let app = test_app(AppConfig::default());
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({ "type": "ui", "user_prompt": "a menu", "provider": "gemini" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "provider_not_configured");
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_prompt() {
        let app = test_app(AppConfig::default());
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({ "type": "script", "user_prompt": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metered_generation_debits_coins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply()))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = openai_config(&server);
        config.generation.cost_per_request = 10;
        let app = test_app(config);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({ "type": "script", "userPrompt": "say hi", "userId": "dave" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "print('hi')");
        assert_eq!(body["provider"], "openai");
        assert_eq!(body["usage"]["total_tokens"], 7);
        assert_eq!(body["coins_remaining"], 90);

        let (_, body) = send(&app, Method::GET, "/api/coins/dave", None).await;
        assert_eq!(body["coins"], 90);
    }

    #[tokio::test]
    async fn test_metered_generation_requires_balance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_reply()))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = openai_config(&server);
        config.generation.cost_per_request = 10;
        let app = test_app(config);

        send(&app, Method::PUT, "/api/coins/erin", Some(json!({ "coins": 5 }))).await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({ "type": "script", "user_prompt": "say hi", "user_id": "erin" })),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "insufficient_coins");
    }
}
