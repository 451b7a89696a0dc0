use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::ApiError;
use crate::routes::AppState;

/// `/api/v1/*` 的认证与内容类型检查
///
/// 要求 `Authorization: Bearer <api-key>`; POST/PUT 额外要求
/// `Content-Type: application/json`。
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("缺少 Bearer 凭证".to_string()))?;

    if !state.api_keys.contains(token) {
        debug!("拒绝无效的 API key");
        return Err(ApiError::Unauthorized("无效的 API key".to_string()));
    }

    if matches!(request.method(), &Method::POST | &Method::PUT) {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("application/json") {
            return Err(ApiError::UnsupportedMediaType);
        }
    }

    Ok(next.run(request).await)
}
