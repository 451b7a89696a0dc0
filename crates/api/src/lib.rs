//! HTTP API
//!
//! `/api/v1` 下的作业提交与查询路由, Bearer API key 认证,
//! 统一的错误到状态码映射。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_app, AppState};
