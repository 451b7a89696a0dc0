//! 仓储实现
//!
//! [`MemoryRepository`] 是参考实现, 供测试与零依赖运行使用;
//! [`database::SqliteRepository`] 通过 sqlx 提供持久化存储。
//! 两者共用同一套键集分页语义(见 [`pagination`])。

pub mod database;
mod ids;
pub mod memory;
pub mod pagination;

pub use database::SqliteRepository;
pub use memory::MemoryRepository;
