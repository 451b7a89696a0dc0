//! 仓储分配的实体 ID
//!
//! v7 UUID, 进程内经由共享时钟上下文保证单调递增。任务运行实例
//! 按 (start_date, id) 排序执行, 未开始时 start_date 皆空, id 的
//! 创建顺序就是提交顺序。

use std::sync::{LazyLock, Mutex};

use uuid::timestamp::context::ContextV7;
use uuid::{Timestamp, Uuid};

static CONTEXT: LazyLock<Mutex<ContextV7>> = LazyLock::new(|| Mutex::new(ContextV7::new()));

pub(crate) fn next_id() -> Uuid {
    let context = CONTEXT.lock().unwrap();
    Uuid::new_v7(Timestamp::now(&*context))
}
