//! 仓储抽象
//!
//! 数据访问的端口定义, 遵循依赖倒置原则。实现见 jobflow-infrastructure。

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::entities::{Job, JobConfig, TaskRun};
use crate::pagination::{CursorInput, CursorPage};
use jobflow_errors::{JobFlowError, JobFlowResult};

/// 作业仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 插入或更新; `id` 为 nil 时由仓储分配
    async fn save_job(&self, job: Job) -> JobFlowResult<Job>;
    async fn get_job(&self, id: Uuid) -> JobFlowResult<Job>;
    async fn list_jobs(&self, cursor: CursorInput) -> JobFlowResult<CursorPage<Job>>;
}

/// 作业配置仓储
#[async_trait]
pub trait JobConfigRepository: Send + Sync {
    /// 插入新的默认配置时若已存在默认配置, 返回 `UniqueViolation`
    async fn save_job_config(&self, config: JobConfig) -> JobFlowResult<JobConfig>;
    async fn get_job_config(&self, id: Uuid) -> JobFlowResult<JobConfig>;
    async fn get_default_job_config(&self) -> JobFlowResult<Option<JobConfig>>;
    async fn list_job_configs(&self, cursor: CursorInput) -> JobFlowResult<CursorPage<JobConfig>>;

    /// 获取默认配置, 不存在时插入一个
    ///
    /// 并发创建者通过唯一约束竞争, 败者观察到 `UniqueViolation`
    /// 后重读, 至多重试三轮。
    async fn get_or_create_default_job_config(&self) -> JobFlowResult<JobConfig> {
        for _ in 0..3 {
            if let Some(config) = self.get_default_job_config().await? {
                return Ok(config);
            }

            match self.save_job_config(JobConfig::default_config()).await {
                Ok(config) => return Ok(config),
                Err(JobFlowError::UniqueViolation(_)) => {
                    warn!("默认作业配置创建竞争失败, 重读");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(JobFlowError::Internal(
            "多次重试后仍无法获取或创建默认作业配置".to_string(),
        ))
    }
}

/// 任务运行实例仓储
#[async_trait]
pub trait TaskRunRepository: Send + Sync {
    async fn save_task_run(&self, task_run: TaskRun) -> JobFlowResult<TaskRun>;
    /// 批量保存, 整体原子: 要么全部落库要么全部失败
    async fn save_task_runs(&self, task_runs: Vec<TaskRun>) -> JobFlowResult<Vec<TaskRun>>;
    async fn get_task_run(&self, id: Uuid) -> JobFlowResult<TaskRun>;
    /// 按 (start_date ASC, id ASC) 的稳定顺序返回作业的全部任务运行实例
    async fn get_task_runs(&self, job_id: Uuid) -> JobFlowResult<Vec<TaskRun>>;
    async fn list_task_runs(&self, cursor: CursorInput) -> JobFlowResult<CursorPage<TaskRun>>;
}

/// 组合仓储端口, 调度器依赖的完整数据面
#[async_trait]
pub trait Repository: JobRepository + JobConfigRepository + TaskRunRepository {
    async fn close(&self) -> JobFlowResult<()>;
}
