use axum::{extract::{Path, State}, response::IntoResponse, Json};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::routes::AppState;

/// 查询作业配置
pub async fn get_job_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let config = state.scheduler.get_job_config(id).await?;
    Ok(Json(config))
}
