/**
 * Health Routes
 * Endpoints for checking backend health status
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::AppState;

// Track server start time for uptime calculation
lazy_static::lazy_static! {
    static ref SERVER_START: Instant = Instant::now();
}

/// Initialize the server start time
pub fn init_start_time() {
    lazy_static::initialize(&SERVER_START);
}

/// Document store check result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCheck {
    pub status: String,
    pub backend: String,
    /// Whether the profile has been created yet
    pub document_present: bool,
    pub active_streams: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Detailed health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    pub store: StoreCheck,
}

/// Ready check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Simple health response
#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
}

async fn check_store(state: &AppState) -> StoreCheck {
    let start = Instant::now();
    let result = state.store.read(&state.config.profile_key).await;
    let elapsed = start.elapsed().as_millis() as u64;

    let (status, document_present, error) = match result {
        Ok(doc) => ("healthy", doc.is_some(), None),
        Err(e) => ("unhealthy", false, Some(e.to_string())),
    };

    StoreCheck {
        status: status.to_string(),
        backend: state.store.backend().to_string(),
        document_present,
        active_streams: state.store.active_subscriptions(),
        response_time: Some(elapsed),
        error,
    }
}

/// GET /health - Simple health ping
pub async fn health_ping() -> impl IntoResponse {
    Json(SimpleHealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /health/detailed - Uptime plus a read of the profile document
pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = SERVER_START.elapsed().as_secs();
    let store = check_store(&state).await;

    // A malformed document still leaves the server able to take a fresh write.
    let response = DetailedHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime: Some(uptime),
        store,
    };

    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let store = check_store(&state).await;
    let is_ready = store.status == "healthy";

    let response = ReadyResponse {
        status: if is_ready {
            "ready".to_string()
        } else {
            "not ready".to_string()
        },
        timestamp: Utc::now(),
        reason: store.error,
    };

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::{DocumentStore, FileStore, MemoryStore};
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_router(store: Arc<dyn DocumentStore>) -> Router {
        let config = AppConfig {
            profile_key: "ben".to_string(),
            ..AppConfig::default()
        };
        Router::new()
            .route("/health", get(health_ping))
            .route("/health/detailed", get(health_detailed))
            .route("/health/ready", get(health_ready))
            .with_state(AppState::new(store, config))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value: T = serde_json::from_slice(&body).unwrap();
        (status, value)
    }

    #[tokio::test]
    async fn test_health_ping_returns_ok() {
        init_start_time();
        let (status, body) =
            get_json::<SimpleHealthResponse>(test_router(Arc::new(MemoryStore::new())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_health_detailed_reports_store() {
        init_start_time();
        let store = Arc::new(MemoryStore::new());
        store.write("ben", &serde_json::json!({ "username": "ben" })).await.unwrap();
        let _sub = store.subscribe("ben").await.unwrap();

        let (status, body) =
            get_json::<DetailedHealthResponse>(test_router(store), "/health/detailed").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.uptime.is_some());
        assert_eq!(body.store.status, "healthy");
        assert_eq!(body.store.backend, "memory");
        assert!(body.store.document_present);
        assert_eq!(body.store.active_streams, 1);
    }

    #[tokio::test]
    async fn test_health_ready_when_store_readable() {
        let (status, body) =
            get_json::<ReadyResponse>(test_router(Arc::new(MemoryStore::new())), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ready");
    }

    #[tokio::test]
    async fn test_health_ready_fails_on_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        std::fs::write(store.path_for("ben").unwrap(), "{ not json").unwrap();

        let (status, body) =
            get_json::<ReadyResponse>(test_router(Arc::new(store)), "/health/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "not ready");
        assert!(body.reason.is_some());
    }
}
