//! Profile Sync - single-profile JSON document service with live updates.
//!
//! The server stores one profile document, accepts whole-document writes and
//! pushes every change to connected clients over server-sent events. The
//! [`client`] module is the matching consumer.

pub mod client;
pub mod config;
pub mod logging;
pub mod model;
pub mod routes;
pub mod store;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::store::{DocumentStore, FileStore};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
/// Falls back to the local frontend dev server.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors();
    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/api/create", post(routes::profile::create_profile))
        .route("/api/update", post(routes::profile::update_profile))
        .route("/api/profile", get(routes::profile::get_profile))
        .route("/api/stream", get(routes::stream::stream_profile))
        .route("/health", get(routes::health::health_ping))
        .route("/health/detailed", get(routes::health::health_detailed))
        .route("/health/ready", get(routes::health::health_ready))
        .with_state(state)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        // Event streams are excluded by the default compression predicate
        .layer(CompressionLayer::new())
        // Raise axum's own 2 MB extractor cap to the configured limit
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
}

/// Run the server (used by main).
pub async fn run() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::default();

    let _log_guards = logging::init(&config);

    routes::health::init_start_time();

    let addr: SocketAddr = config.bind_addr()?;
    let store = FileStore::new(config.data_dir.clone());
    tracing::info!(
        data_dir = %store.root().display(),
        profile_key = %config.profile_key,
        "using file store"
    );

    let app = create_app(AppState::new(Arc::new(store), config));

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
