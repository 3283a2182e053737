use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RegisterRequest},
        errors::AuthError,
        extractors::AuthUser,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload.map(|Json(v)| v).map_err(|rejection| {
        warn!(error = %rejection, "malformed request body");
        AuthError::validation("Invalid user data")
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let resp = state.sessions.register(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AuthError> {
    let resp = state.sessions.login(body(payload)?).await?;
    Ok(Json(resp))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state
        .sessions
        .store()
        .repo()
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %user_id, "token subject not found");
            AuthError::Unauthorized("User not found".into())
        })?;
    Ok(Json(PublicUser::from(user)))
}
