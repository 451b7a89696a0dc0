//! 键集分页的共享收尾逻辑
//!
//! 查询方多取一行以探测后续页, 本模块负责裁掉多余行、恢复自然顺序
//! 并计算 next/prev 游标。约定的输入顺序:
//! - 向后翻页(after / 无游标): 自然顺序;
//! - 向前翻页(before): 反向查询结果, 即离边界最近的条目在前。

use uuid::Uuid;

use jobflow_domain::pagination::{CursorInput, CursorPage};

/// 把 limit+1 探测窗口收尾为一页
pub fn build_page<T>(
    mut items: Vec<T>,
    cursor: &CursorInput,
    id_of: impl Fn(&T) -> Uuid,
) -> CursorPage<T> {
    let has_more = items.len() > cursor.limit;
    if has_more {
        // 多取的一行永远在窗口末尾(离边界最远), 先裁再反转
        items.truncate(cursor.limit);
    }

    if cursor.has_before() {
        items.reverse();
    }

    let mut page = CursorPage {
        data: Vec::new(),
        next_cursor: None,
        prev_cursor: None,
        limit: cursor.limit,
    };

    if !items.is_empty() {
        if cursor.has_before() {
            page.next_cursor = cursor.before_id;
            if has_more {
                page.prev_cursor = items.first().map(&id_of);
            }
        } else {
            page.prev_cursor = cursor.after_id;
            if has_more {
                page.next_cursor = items.last().map(&id_of);
            }
        }
    }

    page.data = items;
    page
}

/// 内存实现的排序键, 同一次查询内各条目的变体一致
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    Id(Uuid),
    Text(String),
    /// None 排在最前, 与 SQLite 的 NULLS FIRST(ASC)一致
    OptTime(Option<chrono::DateTime<chrono::Utc>>),
}
