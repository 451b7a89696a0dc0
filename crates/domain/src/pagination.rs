//! 基于键集(keyset)的游标分页类型
//!
//! 游标由边界条目的 ID 加排序规格构成, 翻页不重不漏。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobflow_errors::{JobFlowError, JobFlowResult};

pub const DEFAULT_SORT_LIMIT: usize = 20;
pub const MAX_SORT_LIMIT: usize = 100;

/// 排序方向
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn reverse(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for SortDirection {
    type Err = JobFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortDirection::Asc),
            "DESC" => Ok(SortDirection::Desc),
            other => Err(JobFlowError::Validation(format!(
                "无效的排序方向: {other}"
            ))),
        }
    }
}

/// 请求下一页/上一页所需的游标输入
#[derive(Debug, Clone, Default)]
pub struct CursorInput {
    /// 上次收到的最后一条的 ID(向后翻页)
    pub after_id: Option<Uuid>,
    /// 上次收到的第一条的 ID(向前翻页)
    pub before_id: Option<Uuid>,
    pub limit: usize,
    pub sort_field: String,
    pub sort_dir: SortDirection,
}

impl CursorInput {
    /// 填充缺省值: limit 限制在 [1, 100], 排序字段默认 "id"
    pub fn set_defaults(&mut self) {
        if self.limit == 0 || self.limit > MAX_SORT_LIMIT {
            self.limit = DEFAULT_SORT_LIMIT;
        }
        if self.sort_field.is_empty() {
            self.sort_field = "id".to_string();
        }
    }

    /// after 和 before 至多设置其一
    pub fn validate(&self) -> JobFlowResult<()> {
        if self.after_id.is_some() && self.before_id.is_some() {
            return Err(JobFlowError::Validation(
                "afterId 与 beforeId 不能同时设置".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_after(&self) -> bool {
        self.after_id.is_some()
    }

    pub fn has_before(&self) -> bool {
        self.before_id.is_some()
    }
}

/// 分页结果, 携带下一页/上一页游标
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage<T> {
    pub data: Vec<T>,
    /// 无下一页时为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Uuid>,
    /// 第一页时为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<Uuid>,
    pub limit: usize,
}

impl<T> CursorPage<T> {
    pub fn empty(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            next_cursor: None,
            prev_cursor: None,
            limit,
        }
    }
}
