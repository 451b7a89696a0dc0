//! 带类型化原因的取消作用域
//!
//! 每个作业与每个任务运行实例都在一个携带截止时间的作用域内执行。
//! 作用域取消时记录一个 [`CancelCause`], 读取方据此区分自身超时
//! 与上游传播的取消。父作用域取消会级联到子作用域:
//! 调度器 → 作业 → 任务运行实例。

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use jobflow_errors::JobFlowError;

/// 取消原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// 作业级截止时间到期
    JobTimedOut,
    /// 任务级截止时间到期
    TaskTimedOut,
    /// 上游关闭(进程停机等)
    Shutdown,
}

impl CancelCause {
    pub fn as_error(self) -> JobFlowError {
        match self {
            CancelCause::JobTimedOut => JobFlowError::JobTimedOut,
            CancelCause::TaskTimedOut => JobFlowError::TaskTimedOut,
            CancelCause::Shutdown => JobFlowError::Interrupted("调度器关闭".to_string()),
        }
    }
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::JobTimedOut => f.write_str("job timed out"),
            CancelCause::TaskTimedOut => f.write_str("task timed out"),
            CancelCause::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// 作用域的取消端, 由作用域的所有者持有
///
/// 所有者析构而未显式取消时, 订阅方观察到 [`CancelCause::Shutdown`]。
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<CancelCause>>,
}

impl CancelHandle {
    /// 以给定原因取消作用域。只有第一个原因生效。
    pub fn cancel(&self, cause: CancelCause) {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(cause);
                true
            } else {
                false
            }
        });
    }

    /// 派生一个观察此作用域的只读端
    pub fn scope(&self) -> CancelScope {
        CancelScope {
            rx: self.tx.subscribe(),
            _keep_alive: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// 作用域的观察端, 可廉价克隆并跨任务传递
#[derive(Debug, Clone)]
pub struct CancelScope {
    rx: watch::Receiver<Option<CancelCause>>,
    // detached 作用域自持发送端, 保证永不触发
    _keep_alive: Option<Arc<watch::Sender<Option<CancelCause>>>>,
}

impl CancelScope {
    /// 永不取消的作用域, 供测试与独立执行使用
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            rx,
            _keep_alive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn cause(&self) -> Option<CancelCause> {
        *self.rx.borrow()
    }

    /// 挂起直到作用域被取消, 返回取消原因
    pub async fn cancelled(&self) -> CancelCause {
        let mut rx = self.rx.clone();
        loop {
            if let Some(cause) = *rx.borrow_and_update() {
                return cause;
            }
            if rx.changed().await.is_err() {
                // 所有者析构而未给出原因, 视为上游关闭
                return CancelCause::Shutdown;
            }
        }
    }
}

/// 创建一对取消端/观察端
pub fn cancel_scope() -> (CancelHandle, CancelScope) {
    let (tx, rx) = watch::channel(None);
    (
        CancelHandle { tx },
        CancelScope {
            rx,
            _keep_alive: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cancel_delivers_cause() {
        let (handle, scope) = cancel_scope();
        assert!(!scope.is_cancelled());

        handle.cancel(CancelCause::TaskTimedOut);
        let cause = timeout(Duration::from_millis(100), scope.cancelled())
            .await
            .unwrap();
        assert_eq!(cause, CancelCause::TaskTimedOut);
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_first_cause_wins() {
        let (handle, scope) = cancel_scope();
        handle.cancel(CancelCause::JobTimedOut);
        handle.cancel(CancelCause::Shutdown);
        assert_eq!(scope.cause(), Some(CancelCause::JobTimedOut));
    }

    #[tokio::test]
    async fn test_dropped_handle_reads_as_shutdown() {
        let (handle, scope) = cancel_scope();
        drop(handle);
        let cause = timeout(Duration::from_millis(100), scope.cancelled())
            .await
            .unwrap();
        assert_eq!(cause, CancelCause::Shutdown);
    }

    #[tokio::test]
    async fn test_detached_scope_never_fires() {
        let scope = CancelScope::detached();
        let result = timeout(Duration::from_millis(50), scope.cancelled()).await;
        assert!(result.is_err(), "detached 作用域不应被取消");
    }

    #[tokio::test]
    async fn test_scope_observed_after_cancel() {
        let (handle, _) = cancel_scope();
        handle.cancel(CancelCause::Shutdown);
        // 取消后派生的作用域立即观察到原因
        let scope = handle.scope();
        assert_eq!(scope.cause(), Some(CancelCause::Shutdown));
    }
}
