//! 任务注册表
//!
//! 启动期登记命名的任务构造器, 运行期将任务名 + JSON 参数解析为
//! 可执行的 [`Task`](jobflow_domain::Task) 实例。构造器声明的依赖
//! 从类型索引的依赖容器中解析注入。
//!
//! 注册发生在启动引导阶段(单写者), 之后查找可并发进行; 两张表都
//! 由读写锁保护, 晚注册也不会破坏查找安全。注册错误属于编程错误,
//! 应使进程启动失败; 调度期的查找/解析错误作为结构化错误返回,
//! 使调用方的任务运行实例进入 ERROR, 绝不panic工作者。

mod dependencies;
mod registry;

pub use dependencies::{Dep, DependencyContainer, FromDependencies};
pub use registry::TaskRegistry;

#[doc(hidden)]
pub use jobflow_errors as _errors;
