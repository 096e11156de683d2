//! 统一的应用状态。

use std::sync::Arc;

use judge_runtime::JudgeService;

use crate::auth::{PasswordHasher, TokenService};
use crate::repository::UserRepository;

/// 所有路由共享的数据。
#[derive(Clone)]
pub struct AppState {
    /// 评测服务。
    pub judge: Arc<JudgeService>,
    /// 用户存储。
    pub users: Arc<dyn UserRepository>,
    /// 会话令牌签发与校验。
    pub tokens: TokenService,
    pub passwords: PasswordHasher,
}

impl AppState {
    pub fn new(
        judge: Arc<JudgeService>,
        users: Arc<dyn UserRepository>,
        tokens: TokenService,
        passwords: PasswordHasher,
    ) -> Self {
        Self {
            judge,
            users,
            tokens,
            passwords,
        }
    }
}
