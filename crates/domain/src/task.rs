//! 任务契约
//!
//! 任务是注册表中按名称登记的一段可执行逻辑, 每个任务运行实例
//! 携带类型化参数与依赖实例化一次。

use async_trait::async_trait;

use crate::cancel::CancelScope;
use jobflow_errors::JobFlowResult;

/// 可执行任务
///
/// `execute` 始终在一个带截止时间的取消作用域内被调用。长耗时任务
/// 应在合适的挂起点观察 `scope`, 以便超时或停机时尽快让出。
/// 返回值作为任务运行实例的不透明结果持久化, 仅在成功时记录。
#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, scope: CancelScope) -> JobFlowResult<Option<serde_json::Value>>;
}
