//! 注册、登录与会话接口。

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use openjudge_api_types::{AuthResponse, Credentials, MeResponse, MessageResponse};
use tracing::info;

use super::error::ApiError;
use super::extract::{CurrentUser, user_view};
use super::state::AppState;
use crate::auth::{clear_cookie, session_cookie, validate_password, validate_username};
use crate::repository::{CreateUserError, NewUser};

pub fn create_auth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/register", post(register))
        .route("/api/v1/login", post(login))
        .route("/api/v1/logout", post(logout))
        .route("/api/v1/me", get(me))
}

/// 注册新用户。
async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    let username = credentials.username.trim().to_string();

    validate_username(&username).map_err(|msg| ApiError::bad_request("invalid_username", msg))?;
    validate_password(&credentials.password)
        .map_err(|msg| ApiError::bad_request("invalid_password", msg))?;

    let password_hash = state.passwords.hash(&credentials.password).await?;
    let user = state
        .users
        .create(NewUser {
            username,
            password_hash,
        })
        .await
        .map_err(|err| match err {
            CreateUserError::UsernameTaken(name) => ApiError::new(
                StatusCode::CONFLICT,
                "username_taken",
                format!("username '{name}' is already registered"),
            ),
            CreateUserError::Backend(err) => err.into(),
        })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "registration successful".to_string(),
            user: user_view(&user),
        }),
    ))
}

/// 校验口令并下发会话 Cookie。
async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    let invalid = || {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid username or password",
        )
    };

    let user = state
        .users
        .find_by_username(credentials.username.trim())
        .await?
        .ok_or_else(invalid)?;
    if !state
        .passwords
        .verify(&credentials.password, &user.password_hash)
        .await?
    {
        return Err(invalid());
    }

    let token = state.tokens.issue(user.id, &user.username)?;
    let cookie = session_cookie(&token)?;

    info!(user_id = %user.id, "user logged in");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            message: "login successful".to_string(),
            user: user_view(&user),
        }),
    ))
}

async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, clear_cookie())],
        Json(MessageResponse {
            message: "logged out".to_string(),
        }),
    )
}

async fn me(CurrentUser(user): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        user: user_view(&user),
    })
}
