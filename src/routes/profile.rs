/**
 * Profile Routes
 * Creation, full-document replacement and one-shot reads of the profile
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Profile;
use crate::routes::{ErrorResponse, SuccessResponse};
use crate::store::StoreError;
use crate::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for POST /api/create
#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
}

/// Response for POST /api/create
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProfileResponse {
    pub success: bool,
    pub profile: Profile,
}

// ============================================================================
// Validation
// ============================================================================

lazy_static::lazy_static! {
    /// Handles: letters, digits, dot, underscore and hyphen
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._-]{1,64}$").unwrap();
}

fn is_valid_username(username: &str) -> bool {
    USERNAME_REGEX.is_match(username)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/create
/// Writes the default profile for `username`, once.
pub async fn create_profile(
    State(state): State<AppState>,
    Json(payload): Json<CreateProfileRequest>,
) -> impl IntoResponse {
    let username = payload.username.as_deref().map(str::trim).unwrap_or("");
    if username.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Username required")),
        )
            .into_response();
    }
    if !is_valid_username(username) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_message(
                "Invalid username",
                "Use up to 64 letters, numbers, dots, underscores or hyphens",
            )),
        )
            .into_response();
    }

    let profile = Profile::new_default(username);
    let document = match serde_json::to_value(&profile) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize default profile");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to create profile")),
            )
                .into_response();
        }
    };

    let key = &state.config.profile_key;
    match state.store.create(key, &document).await {
        Ok(()) => {
            tracing::info!(key = %key, username = %username, "profile created");
            (
                StatusCode::OK,
                Json(CreateProfileResponse {
                    success: true,
                    profile,
                }),
            )
                .into_response()
        }
        Err(StoreError::AlreadyExists(_)) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("Profile already exists")),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "error creating profile");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to create profile")),
            )
                .into_response()
        }
    }
}

/// POST /api/update
/// Replaces the stored document with the request body, verbatim.
pub async fn update_profile(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> impl IntoResponse {
    if !document.is_object() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Profile document must be a JSON object")),
        )
            .into_response();
    }

    let key = &state.config.profile_key;
    match state.store.write(key, &document).await {
        Ok(()) => (StatusCode::OK, Json(SuccessResponse { success: true })).into_response(),
        Err(e) => {
            tracing::error!(key = %key, error = %e, "error writing profile");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to write file")),
            )
                .into_response()
        }
    }
}

/// GET /api/profile
/// Current document, or `null` if there is none or it cannot be read.
pub async fn get_profile(State(state): State<AppState>) -> impl IntoResponse {
    let key = &state.config.profile_key;
    let document = match state.store.read(key).await {
        Ok(doc) => doc.unwrap_or(Value::Null),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "profile unreadable, reporting none");
            Value::Null
        }
    };
    (StatusCode::OK, Json(document))
}
