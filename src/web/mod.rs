//! HTTP interface of the API service: thin handlers over the service
//! layer, one shared `AppState`, routes nested under `/api/v1` the same
//! way the gateway forwards them.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

use crate::{
    auth::TokenService, cache::KvCache, config::Config, database::Database, queue::TaskQueue,
    storage::ObjectStore,
};

pub mod extractors;
pub mod handlers;

pub use extractors::UserContext;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub queue: TaskQueue,
    pub cache: KvCache,
    pub storage: ObjectStore,
    pub tokens: TokenService,
    pub config: Config,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!(
            "{}:{}",
            state.config.web.host, state.config.web.port
        )
        .parse()?;
        let app = Self::create_router(state);
        Ok(Self { app, addr })
    }

    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health::health_check))
            .nest("/api/v1", Self::api_v1_routes())
            // Origin policy is enforced at the gateway; upstreams stay
            // permissive for in-cluster callers.
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        Router::new()
            // Auth
            .route("/auth/register", post(handlers::auth::register))
            .route("/auth/login", post(handlers::auth::login))
            .route("/auth/refresh", post(handlers::auth::refresh))
            .route("/auth/me", get(handlers::auth::me))
            // Generation
            .route("/images/generate", post(handlers::generate::generate_image))
            .route("/tasks/:id", get(handlers::tasks::get_task_status))
            // Inpainting
            .route("/images/inpaint", post(handlers::inpaint::inpaint_image))
            .route(
                "/images/inpaint/tasks/:id",
                get(handlers::inpaint::get_inpaint_task_status),
            )
            // Segmentation
            .route(
                "/images/sam/segment-point",
                post(handlers::sam::segment_by_point),
            )
            .route(
                "/images/sam/segment-box",
                post(handlers::sam::segment_by_box),
            )
            .route("/images/sam/segment-auto", post(handlers::sam::segment_auto))
            .route("/images/sam/tasks/:id", get(handlers::sam::get_sam_task_status))
            // Background
            .route(
                "/images/background/remove",
                post(handlers::background::remove_background),
            )
            .route(
                "/images/background/replace-image",
                post(handlers::background::replace_background_with_image),
            )
            .route(
                "/images/background/replace-color",
                post(handlers::background::replace_background_with_color),
            )
            .route(
                "/images/background/mask",
                post(handlers::background::get_foreground_mask),
            )
            .route(
                "/images/background/tasks/:id",
                get(handlers::background::get_background_task_status),
            )
            // Style transfer
            .route("/images/style/apply", post(handlers::style::apply_style))
            .route("/images/style/presets", get(handlers::style::get_style_presets))
            .route(
                "/images/style/tasks/:id",
                get(handlers::style::get_style_task_status),
            )
            // Edit history and replay
            .route(
                "/images/edit-history",
                get(handlers::edit_history::list_edit_history),
            )
            .route(
                "/images/edit-history/:id",
                get(handlers::edit_history::get_edit_history)
                    .delete(handlers::edit_history::delete_edit_history),
            )
            .route(
                "/images/edit-history/:id/replay",
                post(handlers::edit_history::replay_edit),
            )
            .route(
                "/images/:id/edit-history",
                get(handlers::edit_history::list_edit_history_for_image),
            )
            // Gallery, also reachable at the images root
            .route("/images/", get(handlers::gallery::list_images))
            .route("/gallery/", get(handlers::gallery::list_images))
            .route(
                "/gallery/:id",
                get(handlers::gallery::get_image).delete(handlers::gallery::delete_image),
            )
            .route(
                "/gallery/:id/favorite",
                post(handlers::gallery::toggle_favorite),
            )
            // Stats
            .route("/stats/", get(handlers::stats::gallery_stats))
            .route("/stats/ml/status", get(handlers::stats::ml_status))
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
