use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::validation::ConfigValidator;
use crate::{ConfigError, ConfigResult};

/// 环境变量统一前缀, 例如 `APP_WORKER_TASK_WORKER_COUNT`
pub const ENV_PREFIX: &str = "APP";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub service_name: String,
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
    pub logger: LogConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// `/api/v1/*` 的 Bearer API key 集合; 为空时拒绝所有请求
    pub api_keys: Vec<String>,
    pub request_timeout_seconds: u64,
    pub max_request_size_mb: usize,
}

/// 工作池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 作业通道容量, 写满后提交方阻塞(有界背压)
    pub job_buffer_capacity: usize,
    pub job_worker_count: usize,
    pub task_worker_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlite 连接串, `sqlite::memory:` 表示内存库
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    /// "json" 或 "pretty"
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            service_name: "jobflow".to_string(),
            server: ServerConfig {
                bind_address: "0.0.0.0:8080".to_string(),
                api_keys: Vec::new(),
                request_timeout_seconds: 30,
                max_request_size_mb: 10,
            },
            worker: WorkerConfig {
                job_buffer_capacity: 128,
                job_worker_count: 2,
                task_worker_count: 4,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 10,
                connect_timeout_seconds: 30,
            },
            logger: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 从文件与环境变量加载配置
    ///
    /// 指定路径的文件必须存在; 未指定时依次探测默认路径,
    /// 都不存在就只用默认值。环境变量永远优先于文件。
    pub fn load(config_path: Option<&str>) -> ConfigResult<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("environment", "development")?
            .set_default("service_name", "jobflow")?
            .set_default("server.bind_address", "0.0.0.0:8080")?
            .set_default("server.api_keys", Vec::<String>::new())?
            .set_default("server.request_timeout_seconds", 30)?
            .set_default("server.max_request_size_mb", 10)?
            .set_default("worker.job_buffer_capacity", 128)?
            .set_default("worker.job_worker_count", 2)?
            .set_default("worker.task_worker_count", 4)?
            .set_default("database.url", "sqlite::memory:")?
            .set_default("database.max_connections", 10)?
            .set_default("database.connect_timeout_seconds", 30)?
            .set_default("logger.level", "info")?
            .set_default("logger.format", "pretty")?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(ConfigError::File(format!("配置文件不存在: {path}")));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/jobflow.toml", "jobflow.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        // APP_SERVER__BIND_ADDRESS 形式的通用覆盖
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        // 文档化的扁平旋钮, 显式绑定
        for (env, key) in [
            ("APP_WORKER_JOB_BUFFER_CAPACITY", "worker.job_buffer_capacity"),
            ("APP_WORKER_JOB_WORKER_COUNT", "worker.job_worker_count"),
            ("APP_WORKER_TASK_WORKER_COUNT", "worker.task_worker_count"),
        ] {
            if let Ok(value) = std::env::var(env) {
                let parsed: i64 = value.parse().map_err(|_| {
                    ConfigError::Parse(format!("环境变量 {env} 不是整数: {value}"))
                })?;
                builder = builder.set_override(key, parsed)?;
            }
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.server.validate()?;
        self.worker.validate()?;
        self.database.validate()?;
        self.logger.validate()?;
        Ok(())
    }
}

impl ConfigValidator for ServerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.bind_address.is_empty() {
            return Err(ConfigError::Validation(
                "server.bind_address 不能为空".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "server.request_timeout_seconds 必须大于 0".to_string(),
            ));
        }
        if self.max_request_size_mb == 0 {
            return Err(ConfigError::Validation(
                "server.max_request_size_mb 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.job_worker_count < 1 {
            return Err(ConfigError::Validation(
                "worker.job_worker_count 必须至少为 1".to_string(),
            ));
        }
        if self.task_worker_count < 1 {
            return Err(ConfigError::Validation(
                "worker.task_worker_count 必须至少为 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("database.url 不能为空".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigValidator for LogConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !["json", "pretty"].contains(&self.format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "不支持的日志格式: {}",
                self.format
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.job_buffer_capacity, 128);
        assert_eq!(config.worker.job_worker_count, 2);
        assert_eq!(config.worker.task_worker_count, 4);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.service_name, "jobflow");
        assert_eq!(config.database.url, "sqlite::memory:");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/jobflow.toml")).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
environment = "production"

[worker]
job_buffer_capacity = 16
job_worker_count = 3
task_worker_count = 8

[server]
api_keys = ["secret-key"]
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.worker.job_buffer_capacity, 16);
        assert_eq!(config.worker.job_worker_count, 3);
        assert_eq!(config.worker.task_worker_count, 8);
        assert_eq!(config.server.api_keys, vec!["secret-key".to_string()]);
        // 未覆盖的段保持默认
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_worker_validation() {
        let mut config = AppConfig::default();
        config.worker.job_worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.task_worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_validation() {
        let mut config = AppConfig::default();
        config.logger.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
