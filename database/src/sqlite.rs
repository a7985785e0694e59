use async_trait::async_trait;
use chrono::Utc;
use eval_core::{
    error::{EvalError, Result},
    models::{Benchmark, ExistingRun, Language, NewRun, Run, RunAggregate, Task, TaskMetrics},
    store::Store,
};
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};

use crate::common::{
    duplicate_step_error, language_to_string, row_to_benchmark, row_to_run, row_to_task,
    row_to_task_metrics, sqlx_error_to_eval_error,
};

/// SQLite-backed [`Store`] implementation for the evaluation harness.
///
/// Connection pooling mirrors the orchestrator's expected load: one
/// connection per concurrently in-flight task plus headroom for the
/// aggregation and health-check paths, with WAL mode so the `SpanIngestor`'s
/// writes don't serialize behind a reader.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a SQLite database, creating the file (or in-memory
    /// database) if it does not already exist.
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_url = if database_url.starts_with(":memory:") {
            database_url.to_string()
        } else if database_url.starts_with("sqlite://") {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };

        if !db_url.contains(":memory:") && !Sqlite::database_exists(&db_url).await.unwrap_or(false)
        {
            Sqlite::create_database(&db_url)
                .await
                .map_err(|e| EvalError::Configuration(format!("failed to create database: {e}")))?;
        }

        let connect_options = if db_url.contains(":memory:") {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_url)
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        } else {
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(db_url.replace("sqlite://", ""))
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
        };

        let pool = SqlitePool::connect_with(connect_options)
            .await
            .map_err(sqlx_error_to_eval_error)?;

        Ok(Self { pool })
    }

    /// Apply all pending migrations. Must be called once before first use.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| EvalError::Internal(format!("migration failed: {e}")))?;

        tracing::info!("database migrations completed successfully");
        Ok(())
    }

    /// Access to the underlying pool, primarily for test setup.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_run(&self, spec: NewRun) -> Result<i64> {
        let now = Utc::now();
        let settings_str = serde_json::to_string(&spec.settings)
            .map_err(|e| EvalError::Validation(format!("invalid settings JSON: {e}")))?;

        let row = sqlx::query(
            r#"
            INSERT INTO runs (model, concurrency, socket_path, settings, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&spec.model)
        .bind(spec.concurrency as i64)
        .bind(&spec.socket_path)
        .bind(&settings_str)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        Ok(row.get("id"))
    }

    async fn create_task(&self, run_id: i64, language: Language, exercise: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (run_id, language, exercise)
            VALUES (?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(language_to_string(language))
        .bind(exercise)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match sqlx_error_to_eval_error(e) {
            EvalError::Internal(msg) if msg.contains("constraint") => EvalError::Validation(
                format!("task already exists for run {run_id}, {language} {exercise}"),
            ),
            other => other,
        })?;

        Ok(row.get("id"))
    }

    async fn start_task(&self, task_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query("UPDATE tasks SET started_at = ? WHERE id = ?")
            .bind(now)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_eval_error)?;
        Ok(())
    }

    async fn finish_task(&self, task_id: i64, passed: bool, metrics: &TaskMetrics) -> Result<()> {
        let now = Utc::now();
        let tool_usage_str = serde_json::to_string(&metrics.tool_usage)
            .map_err(|e| EvalError::Internal(format!("failed to serialize tool_usage: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(sqlx_error_to_eval_error)?;

        sqlx::query("UPDATE tasks SET passed = ?, finished_at = ? WHERE id = ?")
            .bind(passed)
            .bind(now)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(sqlx_error_to_eval_error)?;

        sqlx::query(
            r#"
            INSERT INTO task_metrics
                (task_id, tokens_in, tokens_out, tokens_context, cache_reads, cache_writes, cost, duration_ms, tool_usage)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                tokens_in = excluded.tokens_in,
                tokens_out = excluded.tokens_out,
                tokens_context = excluded.tokens_context,
                cache_reads = excluded.cache_reads,
                cache_writes = excluded.cache_writes,
                cost = excluded.cost,
                duration_ms = excluded.duration_ms,
                tool_usage = excluded.tool_usage
            "#,
        )
        .bind(task_id)
        .bind(metrics.tokens_in as i64)
        .bind(metrics.tokens_out as i64)
        .bind(metrics.tokens_context as i64)
        .bind(metrics.cache_reads as i64)
        .bind(metrics.cache_writes as i64)
        .bind(metrics.cost)
        .bind(metrics.duration_ms as i64)
        .bind(&tool_usage_str)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        tx.commit().await.map_err(sqlx_error_to_eval_error)?;
        Ok(())
    }

    async fn create_benchmark(
        &self,
        run_id: i64,
        task_id: i64,
        mcp_server_name: &str,
        user_intent: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO benchmarks (run_id, task_id, mcp_server_name, user_intent)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(task_id)
        .bind(mcp_server_name)
        .bind(user_intent)
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        Ok(row.get("id"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_step(
        &self,
        benchmark_id: i64,
        step_number: u32,
        request: Value,
        response: Value,
        response_size_bytes: u64,
        duration_ms: u64,
        error_message: Option<String>,
        source: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<()> {
        let request_str = serde_json::to_string(&request)
            .map_err(|e| EvalError::Internal(format!("failed to serialize step request: {e}")))?;
        let response_str = serde_json::to_string(&response)
            .map_err(|e| EvalError::Internal(format!("failed to serialize step response: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO steps
                (benchmark_id, step_number, request, response, response_size_bytes, duration_ms, error_message, source, timeout_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(benchmark_id)
        .bind(step_number as i64)
        .bind(&request_str)
        .bind(&response_str)
        .bind(response_size_bytes as i64)
        .bind(duration_ms as i64)
        .bind(&error_message)
        .bind(&source)
        .bind(timeout_ms.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_step_error(benchmark_id, step_number, e))?;

        Ok(())
    }

    async fn finish_benchmark(
        &self,
        benchmark_id: i64,
        total_steps: u32,
        code_execution_success: Option<bool>,
        error_count: u32,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE benchmarks
            SET total_steps = ?, code_execution_success = ?, error_count = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_steps as i64)
        .bind(code_execution_success)
        .bind(error_count as i64)
        .bind(now)
        .bind(benchmark_id)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        Ok(())
    }

    async fn record_tool_error(
        &self,
        run_id: i64,
        task_id: i64,
        tool_name: &str,
        error: &str,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tool_errors (run_id, task_id, tool_name, error, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(task_id)
        .bind(tool_name)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        Ok(())
    }

    async fn aggregate_run(&self, run_id: i64) -> Result<RunAggregate> {
        let now = Utc::now();

        let task_rows = sqlx::query(
            "SELECT id, passed FROM tasks WHERE run_id = ? AND passed IS NOT NULL",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        let mut aggregate = RunAggregate::default();
        for row in &task_rows {
            let passed: bool = row.get("passed");
            if passed {
                aggregate.passed += 1;
            } else {
                aggregate.failed += 1;
            }

            let task_id: i64 = row.get("id");
            if let Some(metrics_row) = sqlx::query(
                r#"
                SELECT tokens_in, tokens_out, tokens_context, cache_reads, cache_writes, cost,
                       duration_ms, tool_usage
                FROM task_metrics WHERE task_id = ?
                "#,
            )
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_error_to_eval_error)?
            {
                aggregate.metrics.merge(&row_to_task_metrics(&metrics_row)?);
            }
        }

        sqlx::query("UPDATE runs SET passed = ?, failed = ?, finalized_at = ? WHERE id = ?")
            .bind(aggregate.passed as i64)
            .bind(aggregate.failed as i64)
            .bind(now)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(sqlx_error_to_eval_error)?;

        Ok(aggregate)
    }

    async fn list_existing_run(&self, run_id: i64) -> Result<ExistingRun> {
        let run = self
            .get_run(run_id)
            .await?
            .ok_or_else(|| EvalError::run_not_found(run_id))?;

        let rows = sqlx::query(
            "SELECT id, run_id, language, exercise, passed, started_at, finished_at FROM tasks WHERE run_id = ? AND passed IS NULL",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        let mut outstanding_tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            outstanding_tasks.push(row_to_task(row)?);
        }

        Ok(ExistingRun { run, outstanding_tasks })
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        let result = sqlx::query(
            "SELECT id, model, concurrency, socket_path, settings, created_at, finalized_at, passed, failed FROM runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        match result {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        let result = sqlx::query(
            "SELECT id, run_id, language, exercise, passed, started_at, finished_at FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        match result {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_benchmark(&self, benchmark_id: i64) -> Result<Option<Benchmark>> {
        let result = sqlx::query(
            r#"
            SELECT id, run_id, task_id, mcp_server_name, user_intent, total_steps,
                   code_execution_success, error_count, finished_at
            FROM benchmarks WHERE id = ?
            "#,
        )
        .bind(benchmark_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_error_to_eval_error)?;

        match result {
            Some(row) => Ok(Some(row_to_benchmark(&row)?)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_error_to_eval_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eval_core::models::NewRun;
    use serde_json::json;

    async fn store() -> SqliteStore {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let db_name = format!(":memory:test_{timestamp}");
        let store = SqliteStore::new(&db_name).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn new_run() -> NewRun {
        NewRun {
            model: "claude-sonnet".to_string(),
            concurrency: 4,
            socket_path: "/tmp/eval.sock".to_string(),
            settings: json!({"retries": 2}),
        }
    }

    #[tokio::test]
    async fn health_check_passes_on_fresh_database() {
        let store = store().await;
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn run_and_task_lifecycle_round_trips() {
        let store = store().await;
        let run_id = store.create_run(new_run()).await.unwrap();

        let task_id = store
            .create_task(run_id, Language::Rust, "two-fer")
            .await
            .unwrap();

        store.start_task(task_id).await.unwrap();
        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert!(task.started_at.is_some());
        assert_eq!(task.passed, None);

        let mut metrics = TaskMetrics::default();
        metrics.tokens_in = 100;
        metrics.tool_usage.insert("read_file".to_string(), 3);
        store.finish_task(task_id, true, &metrics).await.unwrap();

        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.passed, Some(true));
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_task_for_same_exercise_is_rejected() {
        let store = store().await;
        let run_id = store.create_run(new_run()).await.unwrap();
        store.create_task(run_id, Language::Rust, "two-fer").await.unwrap();

        let err = store
            .create_task(run_id, Language::Rust, "two-fer")
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Validation(_)));
    }

    #[tokio::test]
    async fn append_step_rejects_duplicate_step_number() {
        let store = store().await;
        let run_id = store.create_run(new_run()).await.unwrap();
        let task_id = store.create_task(run_id, Language::Go, "leap").await.unwrap();
        let benchmark_id = store
            .create_benchmark(run_id, task_id, "filesystem", "solve leap")
            .await
            .unwrap();

        store
            .append_step(benchmark_id, 1, json!({}), json!({}), 10, 5, None, None, None)
            .await
            .unwrap();

        let err = store
            .append_step(benchmark_id, 1, json!({}), json!({}), 10, 5, None, None, None)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn aggregate_run_sums_metrics_and_outcomes() {
        let store = store().await;
        let run_id = store.create_run(new_run()).await.unwrap();

        let passing = store.create_task(run_id, Language::Rust, "two-fer").await.unwrap();
        let mut m1 = TaskMetrics::default();
        m1.tokens_in = 10;
        store.finish_task(passing, true, &m1).await.unwrap();

        let failing = store.create_task(run_id, Language::Rust, "leap").await.unwrap();
        let mut m2 = TaskMetrics::default();
        m2.tokens_in = 20;
        store.finish_task(failing, false, &m2).await.unwrap();

        let aggregate = store.aggregate_run(run_id).await.unwrap();
        assert_eq!(aggregate.passed, 1);
        assert_eq!(aggregate.failed, 1);
        assert_eq!(aggregate.metrics.tokens_in, 30);

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.passed, 1);
        assert_eq!(run.failed, 1);
        assert!(run.finalized_at.is_some());
    }

    #[tokio::test]
    async fn list_existing_run_returns_only_outstanding_tasks() {
        let store = store().await;
        let run_id = store.create_run(new_run()).await.unwrap();

        let finished = store.create_task(run_id, Language::Rust, "two-fer").await.unwrap();
        store.finish_task(finished, true, &TaskMetrics::default()).await.unwrap();

        let pending = store.create_task(run_id, Language::Rust, "leap").await.unwrap();

        let existing = store.list_existing_run(run_id).await.unwrap();
        assert_eq!(existing.run.id, run_id);
        assert_eq!(existing.outstanding_tasks.len(), 1);
        assert_eq!(existing.outstanding_tasks[0].id, pending);
    }

    #[tokio::test]
    async fn get_run_returns_none_for_unknown_id() {
        let store = store().await;
        assert!(store.get_run(99999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_tool_error_does_not_fail_task_flow() {
        let store = store().await;
        let run_id = store.create_run(new_run()).await.unwrap();
        let task_id = store.create_task(run_id, Language::Python, "diamond").await.unwrap();

        store
            .record_tool_error(run_id, task_id, "write_file", "permission denied")
            .await
            .unwrap();
    }
}
