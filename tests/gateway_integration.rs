//! End-to-end gateway tests: a real upstream on a loopback port, a real
//! gateway in front of it, plain HTTP between them.

use axum::extract::{Request, State};
use axum::response::IntoResponse;
use axum::Json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use lumen::auth::TokenService;
use lumen::config::Config;
use lumen::gateway::rate_limit::MemoryRateLimitStore;
use lumen::gateway::GatewayServer;
use lumen::models::UserRole;

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    user_id: Option<String>,
    user_role: Option<String>,
}

type Recorder = Arc<Mutex<Vec<RecordedRequest>>>;

async fn record(State(recorder): State<Recorder>, request: Request) -> impl IntoResponse {
    let headers = request.headers();
    let recorded = RecordedRequest {
        path: request.uri().path().to_string(),
        user_id: headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        user_role: headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    recorder
        .lock()
        .expect("recorder lock")
        .push(recorded);
    Json(serde_json::json!({ "ok": true }))
}

async fn spawn_upstream() -> (String, Recorder) {
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let app = axum::Router::new()
        .fallback(record)
        .with_state(recorder.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve upstream");
    });

    (format!("http://{addr}"), recorder)
}

struct TestGateway {
    base: String,
    recorder: Recorder,
    tokens: TokenService,
}

async fn spawn_gateway(rate_limit: u32) -> TestGateway {
    let (upstream, recorder) = spawn_upstream().await;

    let mut config = Config::default();
    config.auth.jwt_secret = "integration-test-secret".to_string();
    config.gateway.rate_limit_per_minute = rate_limit;
    config.gateway.auth_service_url = upstream.clone();
    config.gateway.image_service_url = upstream;

    let limiter = Arc::new(MemoryRateLimitStore::new(rate_limit));
    let state = GatewayServer::build_state(&config, limiter).expect("gateway state");
    let tokens = TokenService::new(&config.auth);
    let router =
        GatewayServer::create_router(state, &config.gateway.cors_origins).expect("router");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve gateway");
    });

    TestGateway {
        base: format!("http://{addr}"),
        recorder,
        tokens,
    }
}

#[tokio::test]
async fn public_paths_skip_auth() {
    let gateway = spawn_gateway(60).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", gateway.base))
        .send()
        .await
        .expect("health request");
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{}/", gateway.base))
        .send()
        .await
        .expect("root request");
    assert_eq!(response.status(), 200);

    // Nothing reached the upstream for gateway-local routes.
    assert!(gateway.recorder.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn identity_headers_reach_upstream() {
    let gateway = spawn_gateway(60).await;
    let user_id = uuid::Uuid::new_v4();
    let token = gateway
        .tokens
        .create_access_token(user_id, UserRole::Admin)
        .expect("token");

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/v1/images/", gateway.base))
        .bearer_auth(&token)
        .send()
        .await
        .expect("proxied request");
    assert_eq!(response.status(), 200);

    let recorded = gateway.recorder.lock().expect("lock").clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].path, "/api/v1/images/");
    assert_eq!(recorded[0].user_id.as_deref(), Some(user_id.to_string().as_str()));
    assert_eq!(recorded[0].user_role.as_deref(), Some("admin"));
}

#[tokio::test]
async fn rejected_tokens_never_contact_upstream() {
    let gateway = spawn_gateway(60).await;
    let client = reqwest::Client::new();

    // Tampered token.
    let response = client
        .get(format!("{}/v1/images/", gateway.base))
        .bearer_auth("tampered")
        .send()
        .await
        .expect("tampered request");
    assert_eq!(response.status(), 401);

    // Missing header entirely.
    let response = client
        .get(format!("{}/v1/images/", gateway.base))
        .send()
        .await
        .expect("anonymous request");
    assert_eq!(response.status(), 401);

    // Refresh tokens are not accepted at the edge.
    let refresh = gateway
        .tokens
        .create_refresh_token(uuid::Uuid::new_v4(), UserRole::User)
        .expect("refresh token");
    let response = client
        .get(format!("{}/v1/images/", gateway.base))
        .bearer_auth(&refresh)
        .send()
        .await
        .expect("refresh-token request");
    assert_eq!(response.status(), 401);

    assert!(gateway.recorder.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn rate_limit_sequence_with_headers() {
    let gateway = spawn_gateway(3).await;
    let token = gateway
        .tokens
        .create_access_token(uuid::Uuid::new_v4(), UserRole::User)
        .expect("token");
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    let mut remaining = Vec::new();
    for _ in 0..4 {
        let response = client
            .get(format!("{}/v1/images/", gateway.base))
            .bearer_auth(&token)
            .header("X-Forwarded-For", "203.0.113.7")
            .send()
            .await
            .expect("rate limited request");

        assert_eq!(
            response
                .headers()
                .get("X-RateLimit-Limit")
                .and_then(|v| v.to_str().ok()),
            Some("3")
        );
        remaining.push(
            response
                .headers()
                .get("X-RateLimit-Remaining")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
        assert!(response.headers().contains_key("X-RateLimit-Reset"));
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 200, 200, 429]);
    let remaining: Vec<_> = remaining.into_iter().flatten().collect();
    assert_eq!(remaining, vec!["2", "1", "0", "0"]);

    // Only the three allowed requests reached the upstream.
    assert_eq!(gateway.recorder.lock().expect("lock").len(), 3);

    // A different client identity is unaffected.
    let response = client
        .get(format!("{}/v1/images/", gateway.base))
        .bearer_auth(&token)
        .header("X-Forwarded-For", "203.0.113.8")
        .send()
        .await
        .expect("other client request");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let gateway = spawn_gateway(60).await;
    let token = gateway
        .tokens
        .create_access_token(uuid::Uuid::new_v4(), UserRole::User)
        .expect("token");

    let response = reqwest::Client::new()
        .get(format!("{}/v1/folders/list", gateway.base))
        .bearer_auth(&token)
        .send()
        .await
        .expect("unknown route request");
    assert_eq!(response.status(), 404);
    assert!(gateway.recorder.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn post_bodies_are_forwarded() {
    let gateway = spawn_gateway(60).await;
    let token = gateway
        .tokens
        .create_access_token(uuid::Uuid::new_v4(), UserRole::User)
        .expect("token");

    let response = reqwest::Client::new()
        .post(format!("{}/v1/images/generate", gateway.base))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "prompt": "a cat" }))
        .send()
        .await
        .expect("post request");
    assert_eq!(response.status(), 200);

    let recorded = gateway.recorder.lock().expect("lock").clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].path, "/api/v1/images/generate");
}
