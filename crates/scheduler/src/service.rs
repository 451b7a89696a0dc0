//! 调度器门面
//!
//! 接收作业提交, 原子地持久化作业与任务运行实例, 将作业 ID 推入
//! 有界作业通道, 并对外暴露读查询。通道与两级工作池的生命周期由
//! 本门面独占管理: 关闭时先关上游通道并汇合作业工作者, 再关下游
//! 任务通道并汇合任务工作者。

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use jobflow_config::WorkerConfig;
use jobflow_domain::cancel::{cancel_scope, CancelCause, CancelHandle};
use jobflow_domain::entities::{Job, JobConfig, JobSubmission, Status, TaskRun};
use jobflow_domain::pagination::{CursorInput, CursorPage};
use jobflow_domain::repositories::Repository;
use jobflow_errors::{JobFlowError, JobFlowResult};
use jobflow_registry::TaskRegistry;

use crate::job_worker::JobWorker;
use crate::task_worker::{TaskRunRequest, TaskWorker};

/// 工作者共享的依赖集合
pub(crate) struct WorkerContext {
    pub repository: Arc<dyn Repository>,
    pub registry: Arc<TaskRegistry>,
}

pub struct JobScheduler {
    context: Arc<WorkerContext>,
    config: WorkerConfig,
    job_tx: Mutex<Option<mpsc::Sender<Uuid>>>,
    task_tx: Mutex<Option<mpsc::Sender<TaskRunRequest>>>,
    job_rx: Mutex<Option<mpsc::Receiver<Uuid>>>,
    task_rx: Mutex<Option<mpsc::Receiver<TaskRunRequest>>>,
    shutdown: CancelHandle,
    job_handles: Mutex<Vec<JoinHandle<()>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// 创建调度器
    ///
    /// 作业通道容量取 `job_buffer_capacity`(至少 1), 写满后提交方
    /// 阻塞形成背压; 任务通道容量固定为 1, 近似同步交接, 作业工作者
    /// 在没有空闲任务工作者时阻塞。
    pub fn new(
        config: WorkerConfig,
        repository: Arc<dyn Repository>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.job_buffer_capacity.max(1));
        let (task_tx, task_rx) = mpsc::channel(1);
        let (shutdown, _) = cancel_scope();

        Self {
            context: Arc::new(WorkerContext {
                repository,
                registry,
            }),
            config,
            job_tx: Mutex::new(Some(job_tx)),
            task_tx: Mutex::new(Some(task_tx)),
            job_rx: Mutex::new(Some(job_rx)),
            task_rx: Mutex::new(Some(task_rx)),
            shutdown,
            job_handles: Mutex::new(Vec::new()),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// 启动两级工作池, 重复调用是编程错误
    pub fn start_workers(&self) -> JobFlowResult<()> {
        let job_rx = self
            .job_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| JobFlowError::Internal("工作池已启动".to_string()))?;
        let task_rx = self
            .task_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| JobFlowError::Internal("工作池已启动".to_string()))?;

        let task_tx = self
            .task_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(JobFlowError::SchedulerClosed)?;

        let job_rx = Arc::new(AsyncMutex::new(job_rx));
        let task_rx = Arc::new(AsyncMutex::new(task_rx));

        let mut task_handles = self.task_handles.lock().unwrap();
        for _ in 0..self.config.task_worker_count {
            let worker = TaskWorker {
                context: Arc::clone(&self.context),
                task_rx: Arc::clone(&task_rx),
            };
            task_handles.push(tokio::spawn(worker.run()));
        }

        let mut job_handles = self.job_handles.lock().unwrap();
        for _ in 0..self.config.job_worker_count {
            let worker = JobWorker {
                context: Arc::clone(&self.context),
                job_rx: Arc::clone(&job_rx),
                task_tx: task_tx.clone(),
                shutdown: self.shutdown.scope(),
            };
            job_handles.push(tokio::spawn(worker.run()));
        }

        info!(
            job_workers = self.config.job_worker_count,
            task_workers = self.config.task_worker_count,
            job_buffer = self.config.job_buffer_capacity,
            "工作池已启动"
        );
        Ok(())
    }

    /// 提交作业
    ///
    /// 校验提交内容, 持久化 PENDING 作业, 把作业 ID 写入每个任务
    /// 运行实例后整体原子落库, 最后推入作业通道。通道写满时在此
    /// 阻塞, 把背压传导回调用方。
    pub async fn submit_job(&self, submission: JobSubmission) -> JobFlowResult<Job> {
        if submission.name.trim().is_empty() {
            return Err(JobFlowError::Validation("作业名称不能为空".to_string()));
        }
        for task_run in &submission.task_runs {
            if task_run.task_name.trim().is_empty() {
                return Err(JobFlowError::Validation(
                    "任务运行实例缺少任务名".to_string(),
                ));
            }
        }

        let mut job = Job::new(submission.name, submission.description);
        job.config_id = submission.config_id;
        let job = self.context.repository.save_job(job).await?;

        let task_runs: Vec<TaskRun> = submission
            .task_runs
            .into_iter()
            .map(|task_run| task_run.into_task_run(job.id))
            .collect();
        self.context.repository.save_task_runs(task_runs).await?;

        let job_tx = self
            .job_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(JobFlowError::SchedulerClosed)?;
        job_tx
            .send(job.id)
            .await
            .map_err(|_| JobFlowError::SchedulerClosed)?;

        info!(job_id = %job.id, job = %job.name, "作业已提交入队");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> JobFlowResult<Job> {
        self.context.repository.get_job(id).await
    }

    pub async fn get_job_status(&self, id: Uuid) -> JobFlowResult<Status> {
        Ok(self.context.repository.get_job(id).await?.status())
    }

    pub async fn list_jobs(&self, cursor: CursorInput) -> JobFlowResult<CursorPage<Job>> {
        self.context.repository.list_jobs(cursor).await
    }

    pub async fn get_job_config(&self, id: Uuid) -> JobFlowResult<JobConfig> {
        self.context.repository.get_job_config(id).await
    }

    pub async fn get_task_runs(&self, job_id: Uuid) -> JobFlowResult<Vec<TaskRun>> {
        self.context.repository.get_task_runs(job_id).await
    }

    /// 优雅关闭
    ///
    /// 先关上游作业通道并等作业工作者排空退出, 任务发送端随之全部
    /// 释放, 再等任务工作者退出。对已关闭的调度器调用是无操作。
    pub async fn close(&self) {
        info!("关闭调度器");

        drop(self.job_tx.lock().unwrap().take());
        let job_handles: Vec<_> = std::mem::take(&mut *self.job_handles.lock().unwrap());
        for handle in job_handles {
            let _ = handle.await;
        }
        debug!("作业工作者已全部退出");

        drop(self.task_tx.lock().unwrap().take());
        let task_handles: Vec<_> = std::mem::take(&mut *self.task_handles.lock().unwrap());
        for handle in task_handles {
            let _ = handle.await;
        }

        info!("调度器已关闭");
    }

    /// 取消调度器作用域后关闭
    ///
    /// 在途作业观察到 Shutdown 原因并转入 STOPPED, 供停机信号
    /// 处理器调用。
    pub async fn shutdown(&self) {
        self.shutdown.cancel(CancelCause::Shutdown);
        self.close().await;
    }
}
