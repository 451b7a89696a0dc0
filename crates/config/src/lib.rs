//! 应用配置
//!
//! 加载顺序: 代码内默认值 ← TOML 配置文件 ← `APP_` 前缀环境变量。
//! 所有配置段在加载后统一校验。

pub mod models;
pub mod validation;

pub use models::{AppConfig, DatabaseConfig, LogConfig, ServerConfig, WorkerConfig};
pub use validation::ConfigValidator;

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("配置校验失败: {0}")]
    Validation(String),

    #[error("配置文件错误: {0}")]
    File(String),

    #[error("配置解析错误: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
