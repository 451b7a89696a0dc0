//! 类型索引的依赖容器
//!
//! 依赖按其类型注册一次, 任务构造器按类型取回。共享依赖通常以
//! `Arc<T>` 注册, `get` 返回克隆。

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::RwLock;

use jobflow_errors::{JobFlowError, JobFlowResult};

/// 依赖容器
#[derive(Default)]
pub struct DependencyContainer {
    values: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl DependencyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个依赖实例, 同类型重复注册失败
    pub fn register<D>(&self, value: D) -> JobFlowResult<()>
    where
        D: Clone + Send + Sync + 'static,
    {
        let mut values = self.values.write().unwrap();
        if values.contains_key(&TypeId::of::<D>()) {
            return Err(JobFlowError::DependencyAlreadyRegistered {
                type_name: type_name::<D>(),
            });
        }
        values.insert(TypeId::of::<D>(), Box::new(value));
        Ok(())
    }

    /// 按类型取回依赖的克隆
    pub fn get<D>(&self) -> Option<D>
    where
        D: Clone + Send + Sync + 'static,
    {
        self.values
            .read()
            .unwrap()
            .get(&TypeId::of::<D>())
            .and_then(|value| value.downcast_ref::<D>())
            .cloned()
    }

    /// 为任务 `task` 解析字段 `field` 的依赖, 未注册时返回结构化错误
    pub fn resolve<D>(&self, task: &str, field: &'static str) -> JobFlowResult<D>
    where
        D: Clone + Send + Sync + 'static,
    {
        self.get::<D>().ok_or_else(|| JobFlowError::MissingDependency {
            task: task.to_string(),
            field,
            type_name: type_name::<D>(),
        })
    }

    pub fn contains<D: 'static>(&self) -> bool {
        self.values.read().unwrap().contains_key(&TypeId::of::<D>())
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 构造器依赖集合的解析契约
///
/// 结构体形式的依赖集合用 [`task_dependencies!`](crate::task_dependencies)
/// 宏生成实现, 逐字段按类型解析; 单值依赖用 [`Dep<T>`]; 无依赖用 `()`。
pub trait FromDependencies: Sized {
    fn resolve(container: &DependencyContainer, task: &str) -> JobFlowResult<Self>;
}

impl FromDependencies for () {
    fn resolve(_container: &DependencyContainer, _task: &str) -> JobFlowResult<Self> {
        Ok(())
    }
}

/// 单值依赖: 直接按类型查找
pub struct Dep<T>(pub T);

impl<T> FromDependencies for Dep<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn resolve(container: &DependencyContainer, task: &str) -> JobFlowResult<Self> {
        Ok(Dep(container.resolve::<T>(task, "value")?))
    }
}

/// 定义结构体形式的任务依赖集合并生成逐字段解析实现
///
/// ```ignore
/// task_dependencies! {
///     pub struct EmailTaskDeps {
///         pub mailer: Arc<Mailer>,
///     }
/// }
/// ```
#[macro_export]
macro_rules! task_dependencies {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field : $ty, )*
        }

        impl $crate::FromDependencies for $name {
            fn resolve(
                container: &$crate::DependencyContainer,
                task: &str,
            ) -> $crate::_errors::JobFlowResult<Self> {
                Ok(Self {
                    $( $field: container.resolve::<$ty>(task, stringify!($field))?, )*
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, PartialEq, Debug)]
    struct Greeting(String);

    #[test]
    fn test_register_and_get() {
        let container = DependencyContainer::new();
        container.register(Greeting("你好".into())).unwrap();

        let value: Greeting = container.get().unwrap();
        assert_eq!(value, Greeting("你好".into()));
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let container = DependencyContainer::new();
        container.register(Greeting("a".into())).unwrap();
        let err = container.register(Greeting("b".into())).unwrap_err();
        assert!(matches!(
            err,
            JobFlowError::DependencyAlreadyRegistered { .. }
        ));
    }

    #[test]
    fn test_resolve_missing_reports_field() {
        let container = DependencyContainer::new();
        let err = container
            .resolve::<Greeting>("email.send", "greeting")
            .unwrap_err();
        match err {
            JobFlowError::MissingDependency { task, field, .. } => {
                assert_eq!(task, "email.send");
                assert_eq!(field, "greeting");
            }
            other => panic!("意外的错误: {other}"),
        }
    }

    task_dependencies! {
        #[derive(Debug)]
        struct TestDeps {
            greeting: Greeting,
            shared: Arc<u64>,
        }
    }

    #[test]
    fn test_struct_dependencies_resolve_each_field() {
        let container = DependencyContainer::new();
        container.register(Greeting("hi".into())).unwrap();
        container.register(Arc::new(42u64)).unwrap();

        let deps = TestDeps::resolve(&container, "t").unwrap();
        assert_eq!(deps.greeting, Greeting("hi".into()));
        assert_eq!(*deps.shared, 42);
    }

    #[test]
    fn test_struct_dependencies_missing_field_fails() {
        let container = DependencyContainer::new();
        container.register(Greeting("hi".into())).unwrap();

        let err = TestDeps::resolve(&container, "t").unwrap_err();
        assert!(matches!(err, JobFlowError::MissingDependency { field, .. } if field == "shared"));
    }

    #[test]
    fn test_single_dep_wrapper() {
        let container = DependencyContainer::new();
        container.register(Arc::new(7i32)).unwrap();

        let Dep(value) = Dep::<Arc<i32>>::resolve(&container, "t").unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_unit_deps_always_resolve() {
        let container = DependencyContainer::new();
        <()>::resolve(&container, "t").unwrap();
    }
}
