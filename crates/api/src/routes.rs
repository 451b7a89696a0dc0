use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::get,
    Router,
};

use jobflow_config::ServerConfig;
use jobflow_scheduler::JobScheduler;

use crate::handlers::{
    configs::get_job_config,
    health::health_check,
    jobs::{get_job, get_job_status, get_job_task_runs, list_jobs, submit_job},
};
use crate::middleware::auth_middleware;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub api_keys: Arc<HashSet<String>>,
}

pub fn create_app(scheduler: Arc<JobScheduler>, config: &ServerConfig) -> Router {
    let state = AppState {
        scheduler,
        api_keys: Arc::new(config.api_keys.iter().cloned().collect()),
    };

    let api = Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/status", get(get_job_status))
        .route("/jobs/{id}/tasks", get(get_job_task_runs))
        .route("/jobs/configs/{id}", get(get_job_config))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(
            config.max_request_size_mb * 1024 * 1024,
        ))
        .with_state(state)
}
