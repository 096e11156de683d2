//! 请求级提取器。

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use openjudge_api_types::UserView;

use super::error::ApiError;
use super::state::AppState;
use crate::auth::token_from_headers;
use crate::repository::UserRecord;

/// 已登录用户。Cookie 缺失、令牌无效或用户已不存在时拒绝为 401。
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or_else(ApiError::unauthorized)?;
        let (user_id, _claims) = state
            .tokens
            .verify(token)
            .ok_or_else(ApiError::unauthorized)?;

        let user = state
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(ApiError::unauthorized)?;
        Ok(CurrentUser(user))
    }
}

pub fn user_view(user: &UserRecord) -> UserView {
    UserView {
        id: user.id.to_string(),
        username: user.username.clone(),
        created_at: super::timestamp(user.created_at),
    }
}
