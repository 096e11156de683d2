//! API 错误类型，统一输出 `{code, message}`。

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use judge_runtime::JudgeError;
use openjudge_api_types::ErrorResponse;
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub code: String,
    pub status: StatusCode,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.to_string(),
            status,
        }
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "authentication required")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 内部错误只记录日志，不把细节返回给客户端。
    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!(error = %err, "request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        )
    }
}

impl From<JudgeError> for ApiError {
    fn from(err: JudgeError) -> Self {
        match err {
            JudgeError::Validation(validation) => {
                ApiError::bad_request(validation.code(), validation.to_string())
            }
            JudgeError::Capacity { .. } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "capacity_exceeded",
                err.to_string(),
            ),
            JudgeError::NotFound(_) => ApiError::not_found(err.to_string()),
            JudgeError::Unavailable => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                err.to_string(),
            ),
            other => ApiError::internal(other),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(format!("{err:#}"))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request("invalid_request", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request("invalid_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            code: self.code,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use judge_runtime::ValidationError;

    use super::*;

    #[test]
    fn judge_errors_map_to_status_codes() {
        let cases = [
            (
                JudgeError::Validation(ValidationError::EmptyCode),
                StatusCode::BAD_REQUEST,
                "empty_code",
            ),
            (
                JudgeError::Capacity { capacity: 4 },
                StatusCode::SERVICE_UNAVAILABLE,
                "capacity_exceeded",
            ),
            (
                JudgeError::Unavailable,
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
            ),
        ];

        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }
}
