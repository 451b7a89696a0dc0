//! 作业工作者
//!
//! 从作业通道消费作业 ID, 加载作业与配置, 在作业级超时作用域内
//! 按准入策略迭代任务运行实例。并行批次的准入规则:
//!
//! - 仅当配置启用并行且该实例声明 `parallel` 时才可与他人同批;
//! - 批内在途数量达到 `max_parallel_tasks` 时, 先汇合整批再继续;
//! - 串行实例前后都汇合, 它独占运行, 是天然的批次屏障。
//!
//! 单个任务运行实例失败只记录不中断, 作业收尾时有任一失败则置 ERROR。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use jobflow_domain::cancel::{cancel_scope, CancelCause, CancelScope};
use jobflow_domain::entities::{ExecutionState, Job, JobConfig};
use jobflow_errors::{JobFlowError, JobFlowResult};

use crate::service::WorkerContext;
use crate::task_worker::TaskRunRequest;
use crate::DEFAULT_JOB_TIMEOUT_SECS;

pub(crate) struct JobWorker {
    pub context: Arc<WorkerContext>,
    pub job_rx: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    pub task_tx: mpsc::Sender<TaskRunRequest>,
    pub shutdown: CancelScope,
}

/// 一次批次汇合/收尾的累计量
#[derive(Default)]
struct BatchProgress {
    in_flight: usize,
    completed: usize,
    failed: usize,
}

impl JobWorker {
    pub async fn run(self) {
        loop {
            let job_id = { self.job_rx.lock().await.recv().await };
            let Some(job_id) = job_id else { break };

            if let Err(err) = self.process_job(job_id).await {
                error!(job_id = %job_id, error = %err, "作业执行失败");
            }
        }
        debug!("作业工作者退出");
    }

    async fn process_job(&self, job_id: Uuid) -> JobFlowResult<()> {
        let mut job = match self.context.repository.get_job(job_id).await {
            Ok(job) => job,
            Err(err) => {
                error!(job_id = %job_id, error = %err, "无法加载作业");
                return Err(err);
            }
        };

        let config = match self.load_config(&job).await {
            Ok(config) => config,
            Err(err) => {
                error!(job_id = %job_id, error = %err, "无法加载作业配置");
                job.update_state(ExecutionState::Error);
                self.persist_job(job).await;
                return Err(err);
            }
        };

        // 解析到的配置回写到作业上, 默认配置的场景也能追溯
        job.config_id = Some(config.id);
        job.config_version = Some(config.version.clone());

        let timeout = if config.details.job_timeout_sec <= 0 {
            DEFAULT_JOB_TIMEOUT_SECS
        } else {
            config.details.job_timeout_sec as u64
        };

        job.update_state(ExecutionState::Running);
        job = self.persist_job(job).await;
        info!(job_id = %job_id, job = %job.name, config_id = %config.id, "作业开始执行");

        // 超时/停机路径会丢弃执行未来, 留一份副本做 STOPPED 迁移
        let job_snapshot = job.clone();
        let (job_handle, job_scope) = cancel_scope();

        tokio::select! {
            biased;

            cause = self.shutdown.cancelled() => {
                job_handle.cancel(cause);
                warn!(job_id = %job_id, cause = %cause, "作业被上游取消");
                let mut job = job_snapshot;
                job.update_state(ExecutionState::Stopped);
                self.persist_job(job).await;
                Err(cause.as_error())
            }
            _ = sleep(Duration::from_secs(timeout)) => {
                job_handle.cancel(CancelCause::JobTimedOut);
                warn!(job_id = %job_id, timeout_sec = timeout, "作业执行超时");
                let mut job = job_snapshot;
                job.update_state(ExecutionState::Stopped);
                self.persist_job(job).await;
                Err(JobFlowError::JobTimedOut)
            }
            result = self.execute_task_runs(job, &config, &job_scope) => match result {
                Ok((mut job, any_failed)) => {
                    if any_failed {
                        job.update_state(ExecutionState::Error);
                    } else {
                        job.progress = 1.0;
                        job.update_state(ExecutionState::Finished);
                    }
                    info!(job_id = %job_id, state = %job.state, "作业执行结束");
                    self.persist_job(job).await;
                    Ok(())
                }
                Err(err) => {
                    let mut job = job_snapshot;
                    job.update_state(ExecutionState::Error);
                    self.persist_job(job).await;
                    Err(err)
                }
            },
        }
    }

    /// 迭代任务运行实例并执行准入策略
    ///
    /// 返回更新了进度的作业与"是否有失败"标志。仓储错误直接上抛,
    /// 由调用方把作业置为 ERROR。
    async fn execute_task_runs(
        &self,
        mut job: Job,
        config: &JobConfig,
        job_scope: &CancelScope,
    ) -> JobFlowResult<(Job, bool)> {
        let task_runs = self.context.repository.get_task_runs(job.id).await?;
        let total = task_runs.len();
        if total == 0 {
            return Ok((job, false));
        }

        let max_parallel = config.details.max_parallel_tasks.max(1);
        let mut watchers: JoinSet<JobFlowResult<()>> = JoinSet::new();
        let mut progress = BatchProgress::default();

        for task_run in task_runs {
            let parallel_ok = config.details.enable_parallel_tasks && task_run.details.parallel;

            if progress.in_flight > 0 && (!parallel_ok || progress.in_flight == max_parallel) {
                self.join_batch(&mut watchers, &mut progress, &mut job, total)
                    .await;
            }

            debug!(
                job_id = %job.id,
                task_run_id = %task_run.id,
                task = %task_run.task_name,
                parallel = parallel_ok,
                "派发任务运行实例"
            );

            let (reply_tx, reply_rx) = oneshot::channel();
            let request = TaskRunRequest {
                task_run,
                timeout_sec: config.details.task_timeout_sec,
                job_scope: job_scope.clone(),
                reply: reply_tx,
            };

            // 无缓冲交接: 没有空闲任务工作者时在此阻塞
            if self.task_tx.send(request).await.is_err() {
                return Err(JobFlowError::SchedulerClosed);
            }
            progress.in_flight += 1;

            watchers.spawn(async move {
                match reply_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(JobFlowError::Internal(
                        "任务运行实例回执通道关闭".to_string(),
                    )),
                }
            });

            if !parallel_ok {
                // 串行实例独占运行到完成
                self.join_batch(&mut watchers, &mut progress, &mut job, total)
                    .await;
            }
        }

        self.join_batch(&mut watchers, &mut progress, &mut job, total)
            .await;

        Ok((job, progress.failed > 0))
    }

    /// 汇合当前批次的全部在途实例, 更新并持久化作业进度
    async fn join_batch(
        &self,
        watchers: &mut JoinSet<JobFlowResult<()>>,
        progress: &mut BatchProgress,
        job: &mut Job,
        total: usize,
    ) {
        while let Some(joined) = watchers.join_next().await {
            progress.in_flight = progress.in_flight.saturating_sub(1);
            progress.completed += 1;

            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    progress.failed += 1;
                    warn!(job_id = %job.id, error = %err, "任务运行实例失败, 作业继续");
                }
                Err(join_err) => {
                    progress.failed += 1;
                    error!(job_id = %job.id, error = %join_err, "回执监视任务异常");
                }
            }
        }

        job.progress = progress.completed as f32 / total as f32;
        *job = self.persist_job(job.clone()).await;
    }

    async fn load_config(&self, job: &Job) -> JobFlowResult<JobConfig> {
        match job.config_id {
            Some(config_id) => self.context.repository.get_job_config(config_id).await,
            // 未指定配置时使用默认配置
            None => {
                self.context
                    .repository
                    .get_or_create_default_job_config()
                    .await
            }
        }
    }

    async fn persist_job(&self, job: Job) -> Job {
        match self.context.repository.save_job(job.clone()).await {
            Ok(saved) => saved,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "作业持久化失败");
                job
            }
        }
    }
}
