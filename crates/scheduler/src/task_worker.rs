//! 任务工作者
//!
//! 从共享任务通道消费执行请求直到通道关闭。每个请求在带类型化
//! 原因的超时作用域内运行: 自身超时记 TaskTimedOut, 作业级取消
//! 透传上游原因。用户任务代码的 panic 被 spawn 边界转换为 ERROR,
//! 工作者本身绝不 panic。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinError;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use jobflow_domain::cancel::{cancel_scope, CancelCause, CancelScope};
use jobflow_domain::entities::{ExecutionState, TaskRun};
use jobflow_errors::{JobFlowError, JobFlowResult};

use crate::service::WorkerContext;
use crate::DEFAULT_TASK_TIMEOUT_SECS;

/// 任务执行请求
///
/// `reply` 为一次性通道, 每个请求恰好收到一条回执。
pub(crate) struct TaskRunRequest {
    pub task_run: TaskRun,
    pub timeout_sec: i64,
    pub job_scope: CancelScope,
    pub reply: oneshot::Sender<JobFlowResult<()>>,
}

pub(crate) struct TaskWorker {
    pub context: Arc<WorkerContext>,
    pub task_rx: Arc<Mutex<mpsc::Receiver<TaskRunRequest>>>,
}

enum Outcome {
    Success(Option<serde_json::Value>),
    Failed(JobFlowError),
    Panicked(String),
    Cancelled(CancelCause),
}

impl TaskWorker {
    pub async fn run(self) {
        loop {
            let request = { self.task_rx.lock().await.recv().await };
            match request {
                Some(request) => self.handle_request(request).await,
                None => break,
            }
        }
        debug!("任务工作者退出");
    }

    async fn handle_request(&self, request: TaskRunRequest) {
        let TaskRunRequest {
            mut task_run,
            timeout_sec,
            job_scope,
            reply,
        } = request;

        let timeout = if timeout_sec <= 0 {
            DEFAULT_TASK_TIMEOUT_SECS
        } else {
            timeout_sec as u64
        };

        debug!(
            task_run_id = %task_run.id,
            task = %task_run.task_name,
            timeout_sec = timeout,
            "开始执行任务运行实例"
        );

        task_run.update_state(ExecutionState::Running);
        task_run = self.persist(task_run).await;

        // 用户代码的作用域: 自身超时与作业级取消都会触发
        let (task_handle, task_scope) = cancel_scope();

        let registry = Arc::clone(&self.context.registry);
        let task_name = task_run.task_name.clone();
        let params = task_run.details.params.clone();
        let mut inner = tokio::spawn(async move {
            let task = registry.create_task(&task_name, params)?;
            task.execute(task_scope).await
        });

        let outcome = tokio::select! {
            biased;

            cause = job_scope.cancelled() => {
                task_handle.cancel(cause);
                inner.abort();
                Outcome::Cancelled(cause)
            }
            _ = sleep(Duration::from_secs(timeout)) => {
                task_handle.cancel(CancelCause::TaskTimedOut);
                inner.abort();
                Outcome::Cancelled(CancelCause::TaskTimedOut)
            }
            joined = &mut inner => match joined {
                Ok(Ok(result)) => Outcome::Success(result),
                Ok(Err(err)) => Outcome::Failed(err),
                Err(join_err) => Outcome::Panicked(panic_message(join_err)),
            },
        };

        let result = match outcome {
            Outcome::Success(value) => {
                // 结果仅在成功时记录
                task_run.details.result = value;
                task_run.details.progress = 1.0;
                task_run.update_state(ExecutionState::Finished);
                Ok(())
            }
            Outcome::Failed(err) => {
                error!(
                    task_run_id = %task_run.id,
                    task = %task_run.task_name,
                    error = %err,
                    "任务执行失败"
                );
                task_run.update_state(ExecutionState::Error);
                Err(err)
            }
            Outcome::Panicked(reason) => {
                error!(
                    task_run_id = %task_run.id,
                    task = %task_run.task_name,
                    reason = %reason,
                    "任务发生panic, 降级为ERROR"
                );
                task_run.update_state(ExecutionState::Error);
                Err(JobFlowError::TaskPanicked(reason))
            }
            Outcome::Cancelled(cause) => {
                warn!(
                    task_run_id = %task_run.id,
                    task = %task_run.task_name,
                    cause = %cause,
                    "任务运行实例被取消"
                );
                task_run.update_state(ExecutionState::Stopped);
                Err(cause.as_error())
            }
        };

        // 每条退出路径都写入 end_date 并持久化
        self.persist(task_run).await;

        // 回执端可能已随作业超时消失
        let _ = reply.send(result);
    }

    async fn persist(&self, task_run: TaskRun) -> TaskRun {
        match self.context.repository.save_task_run(task_run.clone()).await {
            Ok(saved) => saved,
            Err(err) => {
                error!(
                    task_run_id = %task_run.id,
                    error = %err,
                    "任务运行实例持久化失败"
                );
                task_run
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "未知panic".to_string()),
        Err(_) => "任务被中止".to_string(),
    }
}
