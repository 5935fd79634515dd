//! Edge router: the single ingress that terminates client traffic.
//!
//! Pipeline order is fixed: CORS, rate limit, auth, then prefix routing
//! into the streaming proxy. Identity extracted from the bearer token is
//! injected into upstream requests as `X-User-ID` / `X-User-Role`.

use anyhow::Result;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::auth::TokenService;
use crate::config::Config;

pub mod auth;
pub mod proxy;
pub mod rate_limit;

pub use rate_limit::RateLimitStore;

#[derive(Clone)]
pub struct GatewayState {
    pub tokens: TokenService,
    pub limiter: Arc<dyn RateLimitStore>,
    pub client: reqwest::Client,
    /// Path-prefix routing table, matched against the path after `/v1`.
    pub routes: Arc<Vec<(String, String)>>,
}

pub struct GatewayServer {
    app: Router,
    addr: SocketAddr,
}

impl GatewayServer {
    pub fn new(config: &Config, limiter: Arc<dyn RateLimitStore>) -> Result<Self> {
        let state = Self::build_state(config, limiter)?;
        let app = Self::create_router(state, &config.gateway.cors_origins)?;
        let addr: SocketAddr =
            format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
        Ok(Self { app, addr })
    }

    pub fn build_state(config: &Config, limiter: Arc<dyn RateLimitStore>) -> Result<GatewayState> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.gateway.proxy_timeout_secs))
            .build()?;

        let image = config.gateway.image_service_url.trim_end_matches('/');
        let auth_url = config.gateway.auth_service_url.trim_end_matches('/');
        let routes = vec![
            ("/auth".to_string(), auth_url.to_string()),
            ("/images".to_string(), image.to_string()),
            ("/tasks".to_string(), image.to_string()),
            ("/gallery".to_string(), image.to_string()),
            ("/stats".to_string(), image.to_string()),
        ];

        Ok(GatewayState {
            tokens: TokenService::new(&config.auth),
            limiter,
            client,
            routes: Arc::new(routes),
        })
    }

    pub fn create_router(state: GatewayState, cors_origins: &[String]) -> Result<Router> {
        let origins = cors_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;

        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request());

        // Layers run top-down for a request: CORS, rate limit, auth.
        Ok(Router::new()
            .route("/", get(index))
            .route("/health", get(health_check))
            .fallback(proxy::proxy_handler)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit::rate_limit_middleware,
            ))
            .layer(cors)
            .with_state(state))
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": "Lumen API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "api-gateway" }))
}
