//! 内存仓储
//!
//! 零依赖的参考实现, 语义与 SQLite 实现对齐: 同样的键集分页、
//! 同样的默认配置唯一性与 `(id, version)` 不可变规则。
//! 供测试与 `sqlite::memory:` 之外的快速启动场景使用。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use jobflow_domain::entities::{Job, JobConfig, TaskRun};
use jobflow_domain::pagination::{CursorInput, CursorPage, SortDirection};
use jobflow_domain::repositories::{
    JobConfigRepository, JobRepository, Repository, TaskRunRepository,
};
use jobflow_errors::{JobFlowError, JobFlowResult};

use crate::pagination::{build_page, SortKey};

#[derive(Default)]
pub struct MemoryRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
    // 每个 id 下的版本按写入顺序保存, 末位为最新
    configs: Mutex<HashMap<Uuid, Vec<JobConfig>>>,
    task_runs: Mutex<HashMap<Uuid, TaskRun>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn paginate<T: Clone>(
        items: Vec<T>,
        mut cursor: CursorInput,
        id_of: impl Fn(&T) -> Uuid + Copy,
        key_of: impl Fn(&T, &str) -> JobFlowResult<SortKey>,
    ) -> JobFlowResult<CursorPage<T>> {
        cursor.set_defaults();
        cursor.validate()?;

        let mut keyed: Vec<(SortKey, Uuid, T)> = Vec::with_capacity(items.len());
        for item in items {
            let key = key_of(&item, &cursor.sort_field)?;
            keyed.push((key, id_of(&item), item));
        }
        keyed.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        if cursor.sort_dir == SortDirection::Desc {
            keyed.reverse();
        }

        let window: Vec<T> = if let Some(after) = cursor.after_id {
            let boundary = keyed.iter().position(|(_, item_id, _)| *item_id == after);
            match boundary {
                // 边界之后的 limit+1 条, 自然顺序
                Some(pos) => keyed
                    .into_iter()
                    .skip(pos + 1)
                    .take(cursor.limit + 1)
                    .map(|(_, _, item)| item)
                    .collect(),
                None => Vec::new(),
            }
        } else if let Some(before) = cursor.before_id {
            let boundary = keyed.iter().position(|(_, item_id, _)| *item_id == before);
            match boundary {
                // 边界之前的 limit+1 条, 离边界最近的在前
                Some(pos) => {
                    let start = pos.saturating_sub(cursor.limit + 1);
                    let mut slice: Vec<T> = keyed[start..pos]
                        .iter()
                        .map(|(_, _, item)| item.clone())
                        .collect();
                    slice.reverse();
                    slice
                }
                None => Vec::new(),
            }
        } else {
            keyed
                .into_iter()
                .take(cursor.limit + 1)
                .map(|(_, _, item)| item)
                .collect()
        };

        Ok(build_page(window, &cursor, id_of))
    }

    fn job_sort_key(job: &Job, field: &str) -> JobFlowResult<SortKey> {
        match field {
            "id" => Ok(SortKey::Id(job.id)),
            "name" => Ok(SortKey::Text(job.name.clone())),
            "state" => Ok(SortKey::Text(job.state.to_string())),
            "submit_date" => Ok(SortKey::OptTime(Some(job.submit_date))),
            "start_date" => Ok(SortKey::OptTime(job.start_date)),
            "end_date" => Ok(SortKey::OptTime(job.end_date)),
            other => Err(JobFlowError::Validation(format!(
                "不支持的排序字段: {other}"
            ))),
        }
    }

    fn config_sort_key(config: &JobConfig, field: &str) -> JobFlowResult<SortKey> {
        match field {
            "id" => Ok(SortKey::Id(config.id)),
            "name" => Ok(SortKey::Text(config.name.clone())),
            "version" => Ok(SortKey::Text(config.version.clone())),
            other => Err(JobFlowError::Validation(format!(
                "不支持的排序字段: {other}"
            ))),
        }
    }

    fn task_run_sort_key(run: &TaskRun, field: &str) -> JobFlowResult<SortKey> {
        match field {
            "id" => Ok(SortKey::Id(run.id)),
            "name" => Ok(SortKey::Text(run.name.clone())),
            "task_name" => Ok(SortKey::Text(run.task_name.clone())),
            "state" => Ok(SortKey::Text(run.state.to_string())),
            "start_date" => Ok(SortKey::OptTime(run.start_date)),
            "end_date" => Ok(SortKey::OptTime(run.end_date)),
            other => Err(JobFlowError::Validation(format!(
                "不支持的排序字段: {other}"
            ))),
        }
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn save_job(&self, mut job: Job) -> JobFlowResult<Job> {
        if job.id.is_nil() {
            job.id = crate::ids::next_id();
        }
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> JobFlowResult<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(JobFlowError::JobNotFound { id })
    }

    async fn list_jobs(&self, cursor: CursorInput) -> JobFlowResult<CursorPage<Job>> {
        let jobs: Vec<Job> = self.jobs.lock().unwrap().values().cloned().collect();
        Self::paginate(jobs, cursor, |job| job.id, Self::job_sort_key)
    }
}

#[async_trait]
impl JobConfigRepository for MemoryRepository {
    async fn save_job_config(&self, mut config: JobConfig) -> JobFlowResult<JobConfig> {
        config.validate()?;
        if config.id.is_nil() {
            config.id = crate::ids::next_id();
        }

        let mut configs = self.configs.lock().unwrap();

        if config.is_default {
            let default_taken = configs
                .values()
                .flatten()
                .any(|existing| existing.is_default && existing.id != config.id);
            if default_taken {
                return Err(JobFlowError::UniqueViolation(
                    "默认作业配置已存在".to_string(),
                ));
            }
        }

        let versions = configs.entry(config.id).or_default();
        // (id, version) 不可变: 首次写入生效, 重复写入返回已存副本
        if let Some(existing) = versions.iter().find(|c| c.version == config.version) {
            return Ok(existing.clone());
        }
        versions.push(config.clone());
        Ok(config)
    }

    async fn get_job_config(&self, id: Uuid) -> JobFlowResult<JobConfig> {
        self.configs
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or(JobFlowError::JobConfigNotFound { id })
    }

    async fn get_default_job_config(&self) -> JobFlowResult<Option<JobConfig>> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|config| config.is_default)
            .cloned())
    }

    async fn list_job_configs(
        &self,
        cursor: CursorInput,
    ) -> JobFlowResult<CursorPage<JobConfig>> {
        let configs: Vec<JobConfig> = self
            .configs
            .lock()
            .unwrap()
            .values()
            .filter_map(|versions| versions.last().cloned())
            .collect();
        Self::paginate(configs, cursor, |config| config.id, Self::config_sort_key)
    }
}

#[async_trait]
impl TaskRunRepository for MemoryRepository {
    async fn save_task_run(&self, mut task_run: TaskRun) -> JobFlowResult<TaskRun> {
        if task_run.id.is_nil() {
            task_run.id = crate::ids::next_id();
        }
        self.task_runs
            .lock()
            .unwrap()
            .insert(task_run.id, task_run.clone());
        Ok(task_run)
    }

    async fn save_task_runs(&self, task_runs: Vec<TaskRun>) -> JobFlowResult<Vec<TaskRun>> {
        // 单锁内完成全部写入, 整体原子
        let mut table = self.task_runs.lock().unwrap();
        let mut saved = Vec::with_capacity(task_runs.len());
        for mut task_run in task_runs {
            if task_run.id.is_nil() {
                task_run.id = crate::ids::next_id();
            }
            table.insert(task_run.id, task_run.clone());
            saved.push(task_run);
        }
        Ok(saved)
    }

    async fn get_task_run(&self, id: Uuid) -> JobFlowResult<TaskRun> {
        self.task_runs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(JobFlowError::TaskRunNotFound { id })
    }

    async fn get_task_runs(&self, job_id: Uuid) -> JobFlowResult<Vec<TaskRun>> {
        let mut runs: Vec<TaskRun> = self
            .task_runs
            .lock()
            .unwrap()
            .values()
            .filter(|run| run.job_id == job_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| (a.start_date, a.id).cmp(&(b.start_date, b.id)));
        Ok(runs)
    }

    async fn list_task_runs(&self, cursor: CursorInput) -> JobFlowResult<CursorPage<TaskRun>> {
        let runs: Vec<TaskRun> = self.task_runs.lock().unwrap().values().cloned().collect();
        Self::paginate(runs, cursor, |run| run.id, Self::task_run_sort_key)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn close(&self) -> JobFlowResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_domain::entities::{ExecutionState, TaskRunDetails};

    fn sample_job(name: &str) -> Job {
        Job::new(name, "")
    }

    fn sample_run(job_id: Uuid, name: &str) -> TaskRun {
        TaskRun {
            id: Uuid::nil(),
            name: name.to_string(),
            description: String::new(),
            job_id,
            task_name: "sleep".to_string(),
            state: ExecutionState::Pending,
            start_date: None,
            end_date: None,
            details: TaskRunDetails::default(),
        }
    }

    #[tokio::test]
    async fn test_save_job_assigns_id_and_round_trips() {
        let repo = MemoryRepository::new();
        let saved = repo.save_job(sample_job("a")).await.unwrap();
        assert!(!saved.id.is_nil());

        let fetched = repo.get_job(saved.id).await.unwrap();
        assert_eq!(fetched.name, "a");
        assert_eq!(fetched.submit_date, saved.submit_date);

        // 保存读取结果应得到逐字段相等的作业
        let resaved = repo.save_job(fetched.clone()).await.unwrap();
        assert_eq!(resaved.id, fetched.id);
        assert_eq!(resaved.state, fetched.state);
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let repo = MemoryRepository::new();
        let err = repo.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobFlowError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cursor_walk_visits_every_job_once() {
        let repo = MemoryRepository::new();
        for i in 0..25 {
            repo.save_job(sample_job(&format!("job-{i:02}"))).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut after: Option<Uuid> = None;
        loop {
            let page = repo
                .list_jobs(CursorInput {
                    after_id: after,
                    limit: 10,
                    ..Default::default()
                })
                .await
                .unwrap();
            seen.extend(page.data.iter().map(|job| job.id));
            match page.next_cursor {
                Some(next) => after = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 25);
        let mut sorted = seen.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 25, "翻页不应重复或遗漏");
        // id 升序严格单调
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_backward_pagination_returns_natural_order() {
        let repo = MemoryRepository::new();
        for i in 0..10 {
            repo.save_job(sample_job(&format!("job-{i}"))).await.unwrap();
        }
        let all = repo
            .list_jobs(CursorInput {
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap()
            .data;

        let boundary = all[6].id;
        let page = repo
            .list_jobs(CursorInput {
                before_id: Some(boundary),
                limit: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        let expected: Vec<Uuid> = all[3..6].iter().map(|j| j.id).collect();
        let got: Vec<Uuid> = page.data.iter().map(|j| j.id).collect();
        assert_eq!(got, expected);
        assert_eq!(page.next_cursor, Some(boundary));
        assert_eq!(page.prev_cursor, Some(all[3].id));
    }

    #[tokio::test]
    async fn test_list_jobs_sort_by_name_desc() {
        let repo = MemoryRepository::new();
        for name in ["b", "a", "c"] {
            repo.save_job(sample_job(name)).await.unwrap();
        }

        let page = repo
            .list_jobs(CursorInput {
                sort_field: "name".to_string(),
                sort_dir: SortDirection::Desc,
                ..Default::default()
            })
            .await
            .unwrap();
        let names: Vec<&str> = page.data.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_unknown_sort_field_rejected() {
        let repo = MemoryRepository::new();
        let err = repo
            .list_jobs(CursorInput {
                sort_field: "progress; DROP TABLE jobs".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JobFlowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_double_cursor_rejected() {
        let repo = MemoryRepository::new();
        let err = repo
            .list_jobs(CursorInput {
                after_id: Some(Uuid::new_v4()),
                before_id: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JobFlowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_single_default_config() {
        let repo = MemoryRepository::new();
        let first = repo
            .save_job_config(JobConfig::default_config())
            .await
            .unwrap();
        assert!(first.is_default);

        let err = repo
            .save_job_config(JobConfig::default_config())
            .await
            .unwrap_err();
        assert!(matches!(err, JobFlowError::UniqueViolation(_)));

        let found = repo.get_default_job_config().await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_get_or_create_default_is_idempotent() {
        let repo = MemoryRepository::new();
        let a = repo.get_or_create_default_job_config().await.unwrap();
        let b = repo.get_or_create_default_job_config().await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.version, b.version);
    }

    #[tokio::test]
    async fn test_config_version_immutable() {
        let repo = MemoryRepository::new();
        let mut config = JobConfig::default_config();
        config.is_default = false;
        config.name = "original".to_string();
        let saved = repo.save_job_config(config.clone()).await.unwrap();

        // 相同 (id, version) 的重复写入不覆盖
        let mut mutated = saved.clone();
        mutated.name = "mutated".to_string();
        let result = repo.save_job_config(mutated).await.unwrap();
        assert_eq!(result.name, "original");

        // 新 version 生效并成为最新
        let mut next = saved.clone();
        next.version = "2".to_string();
        next.name = "second".to_string();
        repo.save_job_config(next).await.unwrap();
        let latest = repo.get_job_config(saved.id).await.unwrap();
        assert_eq!(latest.version, "2");
        assert_eq!(latest.name, "second");
    }

    #[tokio::test]
    async fn test_bulk_save_task_runs() {
        let repo = MemoryRepository::new();
        let job = repo.save_job(sample_job("j")).await.unwrap();

        let runs = vec![
            sample_run(job.id, "a"),
            sample_run(job.id, "b"),
            sample_run(job.id, "c"),
        ];
        let saved = repo.save_task_runs(runs).await.unwrap();
        assert_eq!(saved.len(), 3);
        assert!(saved.iter().all(|run| !run.id.is_nil()));

        let fetched = repo.get_task_runs(job.id).await.unwrap();
        assert_eq!(fetched.len(), 3);
    }

    #[tokio::test]
    async fn test_list_task_runs_paginates() {
        let repo = MemoryRepository::new();
        let job = repo.save_job(sample_job("j")).await.unwrap();
        let runs: Vec<TaskRun> = (0..7).map(|i| sample_run(job.id, &format!("r{i}"))).collect();
        repo.save_task_runs(runs).await.unwrap();

        let page = repo
            .list_task_runs(CursorInput {
                limit: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.data.len(), 4);
        let next = page.next_cursor.unwrap();

        let rest = repo
            .list_task_runs(CursorInput {
                after_id: Some(next),
                limit: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rest.data.len(), 3);
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_job_configs_returns_latest_versions() {
        let repo = MemoryRepository::new();
        let mut config = JobConfig::default_config();
        config.is_default = false;
        let saved = repo.save_job_config(config).await.unwrap();

        let mut next = saved.clone();
        next.version = "2".to_string();
        repo.save_job_config(next).await.unwrap();

        let page = repo
            .list_job_configs(CursorInput::default())
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1, "每个 id 只列最新版本");
        assert_eq!(page.data[0].version, "2");
    }

    #[tokio::test]
    async fn test_task_run_ordering_by_start_date_then_id() {
        use chrono::{Duration, Utc};

        let repo = MemoryRepository::new();
        let job = repo.save_job(sample_job("j")).await.unwrap();

        let mut early = sample_run(job.id, "early");
        early.start_date = Some(Utc::now() - Duration::seconds(10));
        let mut late = sample_run(job.id, "late");
        late.start_date = Some(Utc::now());
        let unstarted = sample_run(job.id, "unstarted");

        repo.save_task_runs(vec![late, unstarted, early])
            .await
            .unwrap();

        let ordered = repo.get_task_runs(job.id).await.unwrap();
        let names: Vec<&str> = ordered.iter().map(|r| r.name.as_str()).collect();
        // start_date 为空的排最前, 其余按开始时间升序
        assert_eq!(names, vec!["unstarted", "early", "late"]);
    }
}
