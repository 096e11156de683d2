//! API 路由模块。

pub mod auth;
pub mod error;
pub mod extract;
pub mod judge;
pub mod problems;
pub mod state;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use chrono::{DateTime, SecondsFormat, Utc};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

pub use error::ApiError;
pub use extract::CurrentUser;
pub use state::AppState;

/// 组装全部路由。`cors_origins` 为空时不启用跨域。
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let router = Router::new()
        .merge(problems::create_public_router())
        .merge(auth::create_auth_router())
        .merge(judge::create_judge_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return router;
    }

    router.layer(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}

/// 接口中的时间统一为 RFC 3339，精确到秒。
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
