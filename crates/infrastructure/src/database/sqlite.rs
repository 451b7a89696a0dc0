//! SQLite 仓储
//!
//! 运行期 sqlx 查询, 不依赖离线宏。日期统一以定长 RFC3339 文本存储,
//! 保证键集分页下的字典序与时间序一致; ID 以带连字符的 uuid 文本存储。

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use jobflow_domain::entities::{ExecutionState, Job, JobConfig, JobConfigDetails, TaskRun, TaskRunDetails};
use jobflow_domain::pagination::{CursorInput, CursorPage, SortDirection};
use jobflow_domain::repositories::{
    JobConfigRepository, JobRepository, Repository, TaskRunRepository,
};
use jobflow_errors::{JobFlowError, JobFlowResult};

use crate::pagination::build_page;

const SCHEMA_SQL: &str = include_str!("../../../../migrations/0001_init.sql");

const JOB_COLUMNS: &str = "id, name, description, config_id, config_version, state, progress, \
                           submit_date, start_date, end_date";
const CONFIG_COLUMNS: &str = "id, version, name, description, is_default, details_json";
const TASK_RUN_COLUMNS: &str =
    "id, job_id, name, description, task_name, state, start_date, end_date, details_json";

const JOB_SORT_FIELDS: &[&str] = &["id", "name", "state", "submit_date", "start_date", "end_date"];
const CONFIG_SORT_FIELDS: &[&str] = &["id", "name", "version"];
const TASK_RUN_SORT_FIELDS: &[&str] =
    &["id", "name", "task_name", "state", "start_date", "end_date"];

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 打开连接池; 不存在的数据库文件自动创建
    pub async fn connect(url: &str, max_connections: u32) -> JobFlowResult<Self> {
        // 内存库的每个连接各自独立, 必须收敛到单连接
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let options = SqliteConnectOptions::from_str(url)
            .map_err(JobFlowError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// 执行内嵌的初始化模式
    pub async fn migrate(&self) -> JobFlowResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        debug!("数据库模式初始化完成");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// 行映射
// ---------------------------------------------------------------------------

fn format_date(date: &DateTime<Utc>) -> String {
    // 定长纳秒格式: 无损往返, 文本序即时间序
    date.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_date(text: &str) -> JobFlowResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| JobFlowError::database_error(format!("无法解析日期 '{text}': {err}")))
}

fn parse_opt_date(text: Option<String>) -> JobFlowResult<Option<DateTime<Utc>>> {
    text.as_deref().map(parse_date).transpose()
}

fn parse_uuid(text: &str) -> JobFlowResult<Uuid> {
    Uuid::parse_str(text)
        .map_err(|err| JobFlowError::database_error(format!("无法解析 ID '{text}': {err}")))
}

fn parse_opt_uuid(text: Option<String>) -> JobFlowResult<Option<Uuid>> {
    text.as_deref().map(parse_uuid).transpose()
}

fn parse_state(text: &str) -> JobFlowResult<ExecutionState> {
    text.parse::<ExecutionState>()
        .map_err(|_| JobFlowError::database_error(format!("无法解析执行状态 '{text}'")))
}

fn row_to_job(row: &SqliteRow) -> JobFlowResult<Job> {
    Ok(Job {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        config_id: parse_opt_uuid(row.try_get("config_id")?)?,
        config_version: row.try_get("config_version")?,
        state: parse_state(&row.try_get::<String, _>("state")?)?,
        progress: row.try_get::<f64, _>("progress")? as f32,
        submit_date: parse_date(&row.try_get::<String, _>("submit_date")?)?,
        start_date: parse_opt_date(row.try_get("start_date")?)?,
        end_date: parse_opt_date(row.try_get("end_date")?)?,
    })
}

fn row_to_config(row: &SqliteRow) -> JobFlowResult<JobConfig> {
    let details: JobConfigDetails =
        serde_json::from_str(&row.try_get::<String, _>("details_json")?)?;
    Ok(JobConfig {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        version: row.try_get("version")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_default: row.try_get("is_default")?,
        details,
    })
}

fn row_to_task_run(row: &SqliteRow) -> JobFlowResult<TaskRun> {
    let details: TaskRunDetails =
        serde_json::from_str(&row.try_get::<String, _>("details_json")?)?;
    Ok(TaskRun {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        job_id: parse_uuid(&row.try_get::<String, _>("job_id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        task_name: row.try_get("task_name")?,
        state: parse_state(&row.try_get::<String, _>("state")?)?,
        start_date: parse_opt_date(row.try_get("start_date")?)?,
        end_date: parse_opt_date(row.try_get("end_date")?)?,
        details,
    })
}

fn map_save_error(err: sqlx::Error) -> JobFlowError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return JobFlowError::UniqueViolation(db_err.message().to_string());
        }
    }
    JobFlowError::Database(err)
}

// ---------------------------------------------------------------------------
// 键集分页 SQL
// ---------------------------------------------------------------------------

/// 构造键集分页查询
///
/// 键永远是 (sort_field, id)。边界值通过子查询按游标 ID 取回,
/// 游标 ID 不存在时子查询为 NULL, 比较恒假, 返回空页。
fn keyset_query(
    table: &str,
    columns: &str,
    base_where: Option<&str>,
    allowed: &[&str],
    cursor: &CursorInput,
) -> JobFlowResult<(String, Vec<String>)> {
    if !allowed.contains(&cursor.sort_field.as_str()) {
        return Err(JobFlowError::Validation(format!(
            "不支持的排序字段: {}",
            cursor.sort_field
        )));
    }

    let sort = cursor.sort_field.as_str();
    // before 翻页按反向查询, 结果由收尾逻辑恢复自然顺序
    let dir = if cursor.has_before() {
        cursor.sort_dir.reverse()
    } else {
        cursor.sort_dir
    };
    let gt = match dir {
        SortDirection::Asc => ">",
        SortDirection::Desc => "<",
    };

    let mut sql = format!("SELECT {columns} FROM {table}");
    let mut conditions: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if let Some(base) = base_where {
        conditions.push(base.to_string());
    }

    if let Some(boundary) = cursor.after_id.or(cursor.before_id) {
        conditions.push(format!(
            "({sort} {gt} (SELECT {sort} FROM {table} WHERE id = ?) \
             OR ({sort} = (SELECT {sort} FROM {table} WHERE id = ?) AND id {gt} ?))"
        ));
        let id_text = boundary.to_string();
        binds.push(id_text.clone());
        binds.push(id_text.clone());
        binds.push(id_text);
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(&format!(
        " ORDER BY {sort} {dir}, id {dir} LIMIT {}",
        cursor.limit + 1,
        dir = dir.as_sql(),
    ));

    Ok((sql, binds))
}

async fn fetch_keyset_rows(
    pool: &SqlitePool,
    sql: &str,
    binds: &[String],
) -> JobFlowResult<Vec<SqliteRow>> {
    let mut query = sqlx::query(sql);
    for bind in binds {
        query = query.bind(bind);
    }
    Ok(query.fetch_all(pool).await?)
}

// ---------------------------------------------------------------------------
// 仓储实现
// ---------------------------------------------------------------------------

#[async_trait]
impl JobRepository for SqliteRepository {
    async fn save_job(&self, mut job: Job) -> JobFlowResult<Job> {
        if job.id.is_nil() {
            job.id = crate::ids::next_id();
        }

        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, description, config_id, config_version, state, progress,
                              submit_date, start_date, end_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                config_id = excluded.config_id,
                config_version = excluded.config_version,
                state = excluded.state,
                progress = excluded.progress,
                submit_date = excluded.submit_date,
                start_date = excluded.start_date,
                end_date = excluded.end_date
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.description)
        .bind(job.config_id.map(|id| id.to_string()))
        .bind(&job.config_version)
        .bind(job.state.as_str())
        .bind(job.progress as f64)
        .bind(format_date(&job.submit_date))
        .bind(job.start_date.as_ref().map(format_date))
        .bind(job.end_date.as_ref().map(format_date))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> JobFlowResult<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_job(&row),
            None => Err(JobFlowError::JobNotFound { id }),
        }
    }

    async fn list_jobs(&self, mut cursor: CursorInput) -> JobFlowResult<CursorPage<Job>> {
        cursor.set_defaults();
        cursor.validate()?;

        let (sql, binds) = keyset_query("jobs", JOB_COLUMNS, None, JOB_SORT_FIELDS, &cursor)?;
        let rows = fetch_keyset_rows(&self.pool, &sql, &binds).await?;
        let jobs: JobFlowResult<Vec<Job>> = rows.iter().map(row_to_job).collect();
        Ok(build_page(jobs?, &cursor, |job| job.id))
    }
}

#[async_trait]
impl JobConfigRepository for SqliteRepository {
    async fn save_job_config(&self, mut config: JobConfig) -> JobFlowResult<JobConfig> {
        config.validate()?;
        if config.id.is_nil() {
            config.id = crate::ids::next_id();
        }

        // (id, version) 不可变: 主键冲突时保持原行不动;
        // 第二个默认配置会撞上部分唯一索引, 映射为 UniqueViolation
        let result = sqlx::query(
            r#"
            INSERT INTO job_configs (id, version, name, description, is_default, details_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id, version) DO NOTHING
            "#,
        )
        .bind(config.id.to_string())
        .bind(&config.version)
        .bind(&config.name)
        .bind(&config.description)
        .bind(config.is_default)
        .bind(serde_json::to_string(&config.details)?)
        .execute(&self.pool)
        .await
        .map_err(map_save_error)?;

        if result.rows_affected() == 0 {
            // 已存在的 (id, version), 返回存量副本
            return self.get_job_config_version(config.id, &config.version).await;
        }
        Ok(config)
    }

    async fn get_job_config(&self, id: Uuid) -> JobFlowResult<JobConfig> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM job_configs WHERE id = ? ORDER BY version DESC LIMIT 1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_config(&row),
            None => Err(JobFlowError::JobConfigNotFound { id }),
        }
    }

    async fn get_default_job_config(&self) -> JobFlowResult<Option<JobConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM job_configs WHERE is_default = 1 LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_config(&row)).transpose()
    }

    async fn list_job_configs(
        &self,
        mut cursor: CursorInput,
    ) -> JobFlowResult<CursorPage<JobConfig>> {
        cursor.set_defaults();
        cursor.validate()?;

        // 每个 id 只取最新版本参与分页
        let (sql, binds) = keyset_query(
            "job_configs",
            CONFIG_COLUMNS,
            Some("version = (SELECT MAX(version) FROM job_configs inner_jc WHERE inner_jc.id = job_configs.id)"),
            CONFIG_SORT_FIELDS,
            &cursor,
        )?;
        let rows = fetch_keyset_rows(&self.pool, &sql, &binds).await?;
        let configs: JobFlowResult<Vec<JobConfig>> = rows.iter().map(row_to_config).collect();
        Ok(build_page(configs?, &cursor, |config| config.id))
    }
}

impl SqliteRepository {
    async fn get_job_config_version(&self, id: Uuid, version: &str) -> JobFlowResult<JobConfig> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM job_configs WHERE id = ? AND version = ?"
        ))
        .bind(id.to_string())
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_config(&row),
            None => Err(JobFlowError::JobConfigNotFound { id }),
        }
    }
}

const TASK_RUN_UPSERT: &str = r#"
    INSERT INTO task_runs (id, job_id, name, description, task_name, state,
                           start_date, end_date, details_json)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        job_id = excluded.job_id,
        name = excluded.name,
        description = excluded.description,
        task_name = excluded.task_name,
        state = excluded.state,
        start_date = excluded.start_date,
        end_date = excluded.end_date,
        details_json = excluded.details_json
"#;

#[async_trait]
impl TaskRunRepository for SqliteRepository {
    async fn save_task_run(&self, mut task_run: TaskRun) -> JobFlowResult<TaskRun> {
        if task_run.id.is_nil() {
            task_run.id = crate::ids::next_id();
        }

        sqlx::query(TASK_RUN_UPSERT)
            .bind(task_run.id.to_string())
            .bind(task_run.job_id.to_string())
            .bind(&task_run.name)
            .bind(&task_run.description)
            .bind(&task_run.task_name)
            .bind(task_run.state.as_str())
            .bind(task_run.start_date.as_ref().map(format_date))
            .bind(task_run.end_date.as_ref().map(format_date))
            .bind(serde_json::to_string(&task_run.details)?)
            .execute(&self.pool)
            .await?;

        Ok(task_run)
    }

    async fn save_task_runs(&self, task_runs: Vec<TaskRun>) -> JobFlowResult<Vec<TaskRun>> {
        // 单事务内完成, 整体原子
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(task_runs.len());

        for mut task_run in task_runs {
            if task_run.id.is_nil() {
                task_run.id = crate::ids::next_id();
            }

            sqlx::query(TASK_RUN_UPSERT)
                .bind(task_run.id.to_string())
                .bind(task_run.job_id.to_string())
                .bind(&task_run.name)
                .bind(&task_run.description)
                .bind(&task_run.task_name)
                .bind(task_run.state.as_str())
                .bind(task_run.start_date.as_ref().map(format_date))
                .bind(task_run.end_date.as_ref().map(format_date))
                .bind(serde_json::to_string(&task_run.details)?)
                .execute(&mut *tx)
                .await?;

            saved.push(task_run);
        }

        tx.commit().await?;
        Ok(saved)
    }

    async fn get_task_run(&self, id: Uuid) -> JobFlowResult<TaskRun> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_RUN_COLUMNS} FROM task_runs WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_task_run(&row),
            None => Err(JobFlowError::TaskRunNotFound { id }),
        }
    }

    async fn get_task_runs(&self, job_id: Uuid) -> JobFlowResult<Vec<TaskRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_RUN_COLUMNS} FROM task_runs WHERE job_id = ? \
             ORDER BY start_date ASC, id ASC"
        ))
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task_run).collect()
    }

    async fn list_task_runs(&self, mut cursor: CursorInput) -> JobFlowResult<CursorPage<TaskRun>> {
        cursor.set_defaults();
        cursor.validate()?;

        let (sql, binds) = keyset_query(
            "task_runs",
            TASK_RUN_COLUMNS,
            None,
            TASK_RUN_SORT_FIELDS,
            &cursor,
        )?;
        let rows = fetch_keyset_rows(&self.pool, &sql, &binds).await?;
        let runs: JobFlowResult<Vec<TaskRun>> = rows.iter().map(row_to_task_run).collect();
        Ok(build_page(runs?, &cursor, |run| run.id))
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn close(&self) -> JobFlowResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
