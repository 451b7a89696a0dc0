//! 领域实体
//!
//! 作业(Job)、作业配置(JobConfig)和任务运行实例(TaskRun)的定义。
//! 实体在组件之间按值传递, 仓储持有权威副本。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobflow_errors::JobFlowError;

/// 执行状态
///
/// 作业与任务运行实例共用的生命周期状态。线上表示为大写字符串,
/// 未知字符串解析失败。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "PENDING",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Finished => "FINISHED",
            ExecutionState::Stopped => "STOPPED",
            ExecutionState::Paused => "PAUSED",
            ExecutionState::Warning => "WARNING",
            ExecutionState::Error => "ERROR",
            ExecutionState::Rejected => "REJECTED",
        }
    }

    /// 终态不可再迁出
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Finished
                | ExecutionState::Stopped
                | ExecutionState::Error
                | ExecutionState::Rejected
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = JobFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionState::Pending),
            "RUNNING" => Ok(ExecutionState::Running),
            "FINISHED" => Ok(ExecutionState::Finished),
            "STOPPED" => Ok(ExecutionState::Stopped),
            "PAUSED" => Ok(ExecutionState::Paused),
            "WARNING" => Ok(ExecutionState::Warning),
            "ERROR" => Ok(ExecutionState::Error),
            "REJECTED" => Ok(ExecutionState::Rejected),
            other => Err(JobFlowError::Validation(format!(
                "无效的执行状态: {other}"
            ))),
        }
    }
}

/// 状态快照: 状态 + 进度([0.0, 1.0])
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub state: ExecutionState,
    pub progress: f32,
}

/// 作业
///
/// 一次提交的工作单元, 由有序的任务运行实例组成。
/// `id` 为 `Uuid::nil()` 表示尚未由仓储分配。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
    #[serde(default)]
    pub state: ExecutionState,
    #[serde(default)]
    pub progress: f32,
    pub submit_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Job {
    /// 创建处于 PENDING 状态的新作业, 提交时间取当前时刻
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            name: name.into(),
            description: description.into(),
            config_id: None,
            config_version: None,
            state: ExecutionState::Pending,
            progress: 0.0,
            submit_date: Utc::now(),
            start_date: None,
            end_date: None,
        }
    }

    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            progress: self.progress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 状态迁移
    ///
    /// 首次离开 PENDING 时写入 start_date, 进入终态时写入 end_date。
    /// 终态吸收: 已处于终态的作业忽略后续迁移。
    pub fn update_state(&mut self, state: ExecutionState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        if state != ExecutionState::Pending && self.start_date.is_none() {
            self.start_date = Some(Utc::now());
        }
        if state.is_terminal() && self.end_date.is_none() {
            self.end_date = Some(Utc::now());
        }
    }
}

/// 作业配置明细: 超时与并行度旋钮
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigDetails {
    /// 作业级超时(秒), 0 表示使用默认值
    pub job_timeout_sec: i64,
    /// 单个任务运行实例的超时(秒), 0 表示使用默认值
    pub task_timeout_sec: i64,
    pub enable_parallel_tasks: bool,
    pub max_parallel_tasks: usize,
}

impl Default for JobConfigDetails {
    fn default() -> Self {
        Self {
            job_timeout_sec: 300,
            task_timeout_sec: 60,
            enable_parallel_tasks: true,
            max_parallel_tasks: 4,
        }
    }
}

/// 作业配置
///
/// `(id, version)` 一经写入即不可变, 更新需要新的 version。
/// 全库最多存在一个 `is_default = true` 的配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(default)]
    pub id: Uuid,
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    pub details: JobConfigDetails,
}

impl JobConfig {
    /// 首次访问时插入的默认配置
    pub fn default_config() -> Self {
        Self {
            id: Uuid::nil(),
            version: "1".to_string(),
            name: "default".to_string(),
            description: "系统默认作业配置".to_string(),
            is_default: true,
            details: JobConfigDetails::default(),
        }
    }

    pub fn validate(&self) -> Result<(), JobFlowError> {
        if self.details.job_timeout_sec < 0 || self.details.task_timeout_sec < 0 {
            return Err(JobFlowError::Validation("超时时间不能为负".to_string()));
        }
        if self.details.max_parallel_tasks < 1 {
            return Err(JobFlowError::Validation(
                "max_parallel_tasks 必须至少为 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// 任务运行实例明细, 持久化为不透明 JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunDetails {
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub progress: f32,
}

/// 任务运行实例
///
/// 作业内的一次有序调用, 将注册表中的任务名绑定到具体参数,
/// 并记录其状态与结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub job_id: Uuid,
    pub task_name: String,
    #[serde(default)]
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub details: TaskRunDetails,
}

impl TaskRun {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 状态迁移, 日期语义与 [`Job::update_state`] 一致
    pub fn update_state(&mut self, state: ExecutionState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        if state != ExecutionState::Pending && self.start_date.is_none() {
            self.start_date = Some(Utc::now());
        }
        if state.is_terminal() && self.end_date.is_none() {
            self.end_date = Some(Utc::now());
        }
    }
}

/// 作业提交请求(线上类型, 不是实体)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config_id: Option<Uuid>,
    #[serde(default)]
    pub task_runs: Vec<TaskRunSubmission>,
}

/// 提交请求中的单个任务运行
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSubmission {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

impl TaskRunSubmission {
    /// 展开为归属于 `job_id` 的 PENDING 任务运行实例
    pub fn into_task_run(self, job_id: Uuid) -> TaskRun {
        TaskRun {
            id: Uuid::nil(),
            name: self.name,
            description: self.description,
            job_id,
            task_name: self.task_name,
            state: ExecutionState::Pending,
            start_date: None,
            end_date: None,
            details: TaskRunDetails {
                parallel: self.parallel,
                params: self.params,
                result: None,
                progress: 0.0,
            },
        }
    }
}
