//! 领域层
//!
//! 作业、作业配置与任务运行实例的核心业务模型, 以及数据访问抽象。
//! 不依赖任何具体的存储或传输实现。

pub mod cancel;
pub mod entities;
pub mod pagination;
pub mod repositories;
pub mod task;

pub use cancel::{cancel_scope, CancelCause, CancelHandle, CancelScope};
pub use entities::{
    ExecutionState, Job, JobConfig, JobConfigDetails, JobSubmission, Status, TaskRun,
    TaskRunDetails, TaskRunSubmission,
};
pub use pagination::{CursorInput, CursorPage, SortDirection};
pub use repositories::{JobConfigRepository, JobRepository, Repository, TaskRunRepository};
pub use task::Task;
