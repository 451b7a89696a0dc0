use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum JobFlowError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("作业未找到: {id}")]
    JobNotFound { id: Uuid },
    #[error("任务运行实例未找到: {id}")]
    TaskRunNotFound { id: Uuid },
    #[error("作业配置未找到: {id}")]
    JobConfigNotFound { id: Uuid },
    #[error("唯一约束冲突: {0}")]
    UniqueViolation(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("任务名称不能为空")]
    InvalidTaskName,
    #[error("任务 '{name}' 已注册")]
    TaskAlreadyRegistered { name: String },
    #[error("依赖类型 {type_name} 已注册")]
    DependencyAlreadyRegistered { type_name: &'static str },
    #[error("任务 '{task}' 缺少依赖 '{field}' (类型 {type_name})")]
    MissingDependency {
        task: String,
        field: &'static str,
        type_name: &'static str,
    },
    #[error("任务 '{task}' 参数解析失败, 期望类型 {expected}: {reason}")]
    ParamDecode {
        task: String,
        expected: &'static str,
        reason: String,
    },
    #[error("任务 '{name}' 未注册")]
    UnknownTask { name: String },
    #[error("作业执行超时")]
    JobTimedOut,
    #[error("任务执行超时")]
    TaskTimedOut,
    #[error("被上游取消中断: {0}")]
    Interrupted(String),
    #[error("任务发生panic: {0}")]
    TaskPanicked(String),
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("调度器已关闭")]
    SchedulerClosed,
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type JobFlowResult<T> = Result<T, JobFlowError>;

impl JobFlowError {
    pub fn job_not_found(id: Uuid) -> Self {
        Self::JobNotFound { id }
    }
    pub fn task_run_not_found(id: Uuid) -> Self {
        Self::TaskRunNotFound { id }
    }
    pub fn job_config_not_found(id: Uuid) -> Self {
        Self::JobConfigNotFound { id }
    }
    pub fn unknown_task<S: Into<String>>(name: S) -> Self {
        Self::UnknownTask { name: name.into() }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn task_execution<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    /// 实体查询未命中
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            JobFlowError::JobNotFound { .. }
                | JobFlowError::TaskRunNotFound { .. }
                | JobFlowError::JobConfigNotFound { .. }
        )
    }

    /// 超时类错误(由取消作用域的cause产生)
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobFlowError::JobTimedOut | JobFlowError::TaskTimedOut)
    }

    /// 注册表错误: 启动期致命, 调度期降级为任务ERROR
    pub fn is_registry_error(&self) -> bool {
        matches!(
            self,
            JobFlowError::InvalidTaskName
                | JobFlowError::TaskAlreadyRegistered { .. }
                | JobFlowError::DependencyAlreadyRegistered { .. }
                | JobFlowError::MissingDependency { .. }
                | JobFlowError::ParamDecode { .. }
                | JobFlowError::UnknownTask { .. }
        )
    }
}

impl From<serde_json::Error> for JobFlowError {
    fn from(err: serde_json::Error) -> Self {
        JobFlowError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for JobFlowError {
    fn from(err: anyhow::Error) -> Self {
        JobFlowError::Internal(err.to_string())
    }
}
