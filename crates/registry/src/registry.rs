//! 任务名到类型化构造器的映射

use std::any::type_name;
use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use tracing::debug;

use jobflow_domain::Task;
use jobflow_errors::{JobFlowError, JobFlowResult};

use crate::dependencies::{DependencyContainer, FromDependencies};

type Constructor = Box<
    dyn Fn(Option<serde_json::Value>, &DependencyContainer) -> JobFlowResult<Box<dyn Task>>
        + Send
        + Sync,
>;

struct Registration {
    constructor: Constructor,
    /// 构造器声明的参数类型, 仅用于日志与诊断
    param_type: &'static str,
}

/// 任务注册表
///
/// 登记 `name → (参数类型 P, 依赖类型 D, 构造器)` 三元组。
/// `create_task` 把原始 JSON 参数反序列化为 `P`, 从依赖容器解析 `D`,
/// 调用构造器得到可执行任务。
pub struct TaskRegistry {
    constructors: RwLock<HashMap<String, Registration>>,
    dependencies: DependencyContainer,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
            dependencies: DependencyContainer::new(),
        }
    }

    /// 注册可注入任务的依赖实例
    pub fn register_dependency<D>(&self, value: D) -> JobFlowResult<()>
    where
        D: Clone + Send + Sync + 'static,
    {
        self.dependencies.register(value)
    }

    pub fn dependencies(&self) -> &DependencyContainer {
        &self.dependencies
    }

    /// 注册任务构造器
    ///
    /// `P` 是参数类型(从 TaskRun 的 JSON 参数反序列化), `D` 是依赖类型。
    /// 空名称与重名注册失败; 构造器无法为空, 类型系统已排除该情形。
    pub fn register<P, D, F>(&self, name: &str, constructor: F) -> JobFlowResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        D: FromDependencies + 'static,
        F: Fn(P, D) -> JobFlowResult<Box<dyn Task>> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(JobFlowError::InvalidTaskName);
        }

        let mut constructors = self.constructors.write().unwrap();
        if constructors.contains_key(name) {
            return Err(JobFlowError::TaskAlreadyRegistered {
                name: name.to_string(),
            });
        }

        let task_name = name.to_string();
        let wrapper = {
            let task_name = task_name.clone();
            move |params: Option<serde_json::Value>,
                  deps: &DependencyContainer|
                  -> JobFlowResult<Box<dyn Task>> {
                // 缺失/null 参数按 JSON null 解码, 只有允许空值的 P
                // (Option、unit、集合)能通过
                let raw = params.unwrap_or(serde_json::Value::Null);
                let typed: P = serde_json::from_value(raw).map_err(|err| {
                    JobFlowError::ParamDecode {
                        task: task_name.clone(),
                        expected: type_name::<P>(),
                        reason: err.to_string(),
                    }
                })?;

                let resolved = D::resolve(deps, &task_name)?;
                constructor(typed, resolved)
            }
        };

        debug!(task = %task_name, params = type_name::<P>(), "注册任务构造器");
        constructors.insert(
            task_name,
            Registration {
                constructor: Box::new(wrapper),
                param_type: type_name::<P>(),
            },
        );
        Ok(())
    }

    /// 按名称实例化任务
    pub fn create_task(
        &self,
        name: &str,
        params: Option<serde_json::Value>,
    ) -> JobFlowResult<Box<dyn Task>> {
        if name.is_empty() {
            return Err(JobFlowError::InvalidTaskName);
        }

        let constructors = self.constructors.read().unwrap();
        let registration = constructors
            .get(name)
            .ok_or_else(|| JobFlowError::unknown_task(name))?;

        debug!(task = %name, params = registration.param_type, "实例化任务");
        (registration.constructor)(params, &self.dependencies)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.read().unwrap().contains_key(name)
    }

    /// 已注册的任务名, 排序后返回
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.constructors.read().unwrap().len()
    }
}
