use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use jobflow_api::create_app;
use jobflow_config::AppConfig;
use jobflow_domain::repositories::Repository;
use jobflow_infrastructure::SqliteRepository;
use jobflow_scheduler::JobScheduler;

use crate::tasks;

/// 主应用程序: 仓储、注册表、调度器与 HTTP 服务的装配
pub struct Application {
    config: AppConfig,
    repository: Arc<dyn Repository>,
    scheduler: Arc<JobScheduler>,
}

impl Application {
    /// 创建应用实例并启动工作池
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(environment = %config.environment, "初始化应用程序");

        let repository = create_repository(&config).await?;

        // 引导任务注册表: 注册错误属于编程错误, 直接中止启动
        let registry = tasks::build_registry().context("引导任务注册表失败")?;
        info!(tasks = ?registry.names(), "任务注册表就绪");

        let scheduler = Arc::new(JobScheduler::new(
            config.worker.clone(),
            Arc::clone(&repository),
            registry,
        ));
        scheduler.start_workers().context("启动工作池失败")?;

        Ok(Self {
            config,
            repository,
            scheduler,
        })
    }

    /// 运行 HTTP 服务直到收到关闭信号, 然后关停调度器与仓储
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let app = create_app(Arc::clone(&self.scheduler), &self.config.server);

        let listener = TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.server.bind_address))?;

        info!("API服务器启动在 http://{}", self.config.server.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        // 先停调度器(在途作业转入 STOPPED), 再关仓储
        self.scheduler.shutdown().await;
        self.repository.close().await?;

        info!("应用组件已全部停止");
        Ok(())
    }
}

/// 创建仓储并确保模式就绪
async fn create_repository(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    info!("连接数据库: {}", config.database.url);

    let repository =
        SqliteRepository::connect(&config.database.url, config.database.max_connections)
            .await
            .context("连接数据库失败")?;
    repository.migrate().await.context("初始化数据库模式失败")?;

    info!("数据库连接成功");
    Ok(Arc::new(repository))
}
