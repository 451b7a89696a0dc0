use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use jobflow_domain::entities::JobSubmission;
use jobflow_domain::pagination::{CursorInput, SortDirection};

use crate::error::ApiResult;
use crate::routes::AppState;

/// 作业列表查询参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListQuery {
    pub after_id: Option<Uuid>,
    pub before_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub sort_field: Option<String>,
    pub sort_dir: Option<String>,
}

impl JobListQuery {
    fn into_cursor(self) -> ApiResult<CursorInput> {
        let sort_dir = match self.sort_dir {
            Some(raw) => raw.parse::<SortDirection>()?,
            None => SortDirection::default(),
        };

        Ok(CursorInput {
            after_id: self.after_id,
            before_id: self.before_id,
            limit: self.limit.unwrap_or(0),
            sort_field: self.sort_field.unwrap_or_default(),
            sort_dir,
        })
    }
}

/// 提交作业
pub async fn submit_job(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> ApiResult<impl IntoResponse> {
    let job = state.scheduler.submit_job(submission).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// 分页列出作业
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> ApiResult<impl IntoResponse> {
    let cursor = query.into_cursor()?;
    let page = state.scheduler.list_jobs(cursor).await?;
    Ok(Json(page))
}

/// 查询单个作业
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let job = state.scheduler.get_job(id).await?;
    Ok(Json(job))
}

/// 查询作业状态快照
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let status = state.scheduler.get_job_status(id).await?;
    Ok(Json(status))
}

/// 查询作业的任务运行实例(按执行顺序)
pub async fn get_job_task_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    // 确认作业存在, 让空作业与未知作业可区分
    state.scheduler.get_job(id).await?;
    let runs = state.scheduler.get_task_runs(id).await?;
    Ok(Json(runs))
}
