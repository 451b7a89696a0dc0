//! 内置任务与注册表引导
//!
//! sleep 用于演示与联调, email.send 演示依赖注入的协作方。
//! 注册发生在进程启动引导阶段, 任何注册错误都会中止启动。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::info;

use jobflow_domain::cancel::CancelScope;
use jobflow_domain::Task;
use jobflow_errors::{JobFlowError, JobFlowResult};
use jobflow_registry::{task_dependencies, TaskRegistry};

/// 邮件发送协作方(日志占位实现)
pub struct Mailer;

impl Mailer {
    pub async fn send(&self, recipient: &str, subject: &str, message: &str) -> JobFlowResult<()> {
        info!(
            recipient = %recipient,
            subject = %subject,
            bytes = message.len(),
            "发送邮件"
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SleepParams {
    pub millis: u64,
}

/// 睡眠任务, 在取消作用域上让出
struct SleepTask {
    millis: u64,
}

#[async_trait]
impl Task for SleepTask {
    async fn execute(&self, scope: CancelScope) -> JobFlowResult<Option<serde_json::Value>> {
        let started = Instant::now();
        tokio::select! {
            _ = sleep(Duration::from_millis(self.millis)) => {
                Ok(Some(serde_json::json!({
                    "sleptMillis": started.elapsed().as_millis() as u64,
                })))
            }
            cause = scope.cancelled() => Err(cause.as_error()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailParams {
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

task_dependencies! {
    pub struct EmailTaskDeps {
        pub mailer: Arc<Mailer>,
    }
}

struct EmailSendTask {
    params: EmailParams,
    mailer: Arc<Mailer>,
}

#[async_trait]
impl Task for EmailSendTask {
    async fn execute(&self, _scope: CancelScope) -> JobFlowResult<Option<serde_json::Value>> {
        self.mailer
            .send(
                &self.params.recipient,
                &self.params.subject,
                &self.params.message,
            )
            .await?;
        Ok(Some(serde_json::json!({ "delivered": true })))
    }
}

/// 引导任务注册表
pub fn build_registry() -> JobFlowResult<Arc<TaskRegistry>> {
    let registry = TaskRegistry::new();

    registry.register_dependency(Arc::new(Mailer))?;

    registry.register("sleep", |params: SleepParams, _: ()| {
        Ok(Box::new(SleepTask {
            millis: params.millis,
        }) as Box<dyn Task>)
    })?;

    registry.register("email.send", |params: EmailParams, deps: EmailTaskDeps| {
        if params.recipient.is_empty() {
            return Err(JobFlowError::validation_error("收件人不能为空"));
        }
        Ok(Box::new(EmailSendTask {
            params,
            mailer: deps.mailer,
        }) as Box<dyn Task>)
    })?;

    Ok(Arc::new(registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_bootstrap() {
        let registry = build_registry().unwrap();
        assert_eq!(registry.count(), 2);
        assert!(registry.is_registered("sleep"));
        assert!(registry.is_registered("email.send"));
    }

    #[tokio::test]
    async fn test_sleep_task_reports_elapsed() {
        let registry = build_registry().unwrap();
        let task = registry
            .create_task("sleep", Some(serde_json::json!({ "millis": 5 })))
            .unwrap();

        let result = task.execute(CancelScope::detached()).await.unwrap().unwrap();
        assert!(result["sleptMillis"].as_u64().unwrap() >= 5);
    }

    #[test]
    fn test_email_requires_recipient() {
        let registry = build_registry().unwrap();
        let result = registry.create_task(
            "email.send",
            Some(serde_json::json!({ "recipient": "" })),
        );
        let err = match result {
            Ok(_) => panic!("expected validation error"),
            Err(e) => e,
        };
        assert!(matches!(err, JobFlowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_email_send_succeeds() {
        let registry = build_registry().unwrap();
        let task = registry
            .create_task(
                "email.send",
                Some(serde_json::json!({
                    "recipient": "ops@example.com",
                    "subject": "hi",
                    "message": "正文",
                })),
            )
            .unwrap();

        let result = task.execute(CancelScope::detached()).await.unwrap().unwrap();
        assert_eq!(result["delivered"], true);
    }
}
