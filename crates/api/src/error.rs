use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use jobflow_errors::JobFlowError;

/// API错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    JobFlow(#[from] JobFlowError),

    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("不支持的媒体类型")]
    UnsupportedMediaType,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::UnsupportedMediaType => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string())
            }
            ApiError::JobFlow(err) if err.is_not_found() => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::JobFlow(JobFlowError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::JobFlow(JobFlowError::UniqueViolation(_)) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ApiError::JobFlow(JobFlowError::SchedulerClosed) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            // 其余一律脱敏为 500
            ApiError::JobFlow(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

/// API结果类型
pub type ApiResult<T> = Result<T, ApiError>;
