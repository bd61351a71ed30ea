//! Account and API-key endpoints.
//!
//! `/auth/register` and `/auth/login` are the only unauthenticated routes;
//! key listing, issuance and revocation all require a valid key.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use notably_engine::{ApiKeyInfo, IssuedKey, Session};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::AppState;

/// Create auth routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/keys", get(list_keys).post(create_key))
        .route("/auth/keys/{id}", delete(revoke_key))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    name: String,
    /// Lifetime in seconds; absent means the key does not expire.
    duration: Option<i64>,
}

#[derive(Debug, Serialize)]
struct KeysResponse {
    keys: Vec<ApiKeyInfo>,
}

/// POST /auth/register - create an account and its first API key.
async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let session: Session = state
        .binder
        .register(&request.username, &request.email, &request.password)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /auth/login - verify credentials, mint a fresh key.
async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Session>> {
    let session = state
        .binder
        .login(&request.username, &request.password)
        .await?;
    Ok(Json(session))
}

/// GET /auth/keys - list the caller's keys.
async fn list_keys(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<KeysResponse>> {
    let keys = state.binder.list_keys(&auth.user_id).await?;
    Ok(Json(KeysResponse { keys }))
}

/// POST /auth/keys - mint a new key for the caller.
async fn create_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse> {
    let key: IssuedKey = state
        .binder
        .issue_key(&auth.user_id, &request.name, request.duration)
        .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

/// DELETE /auth/keys/{id} - revoke one of the caller's keys.
async fn revoke_key(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.binder.revoke_key(&auth.user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
