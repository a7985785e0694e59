use std::collections::HashMap;

use chrono::{DateTime, Utc};
use eval_core::{
    error::{EvalError, Result},
    models::{Benchmark, Language, Run, Task, TaskMetrics},
};
use sqlx::{sqlite::SqliteRow, Row};

/// Convert a [`Language`] to the string stored in `tasks.language`.
pub fn language_to_string(language: Language) -> &'static str {
    language.as_str()
}

/// Convert a stored language string back to a [`Language`], failing loudly
/// rather than silently coercing an unrecognized value.
pub fn string_to_language(s: &str) -> Result<Language> {
    Language::parse(s).ok_or_else(|| EvalError::Internal(format!("invalid language in database: {s}")))
}

pub fn row_to_run(row: &SqliteRow) -> Result<Run> {
    let settings_str: String = row.get("settings");
    let settings = serde_json::from_str(&settings_str)
        .map_err(|e| EvalError::Internal(format!("corrupt run settings JSON: {e}")))?;

    Ok(Run {
        id: row.get("id"),
        model: row.get("model"),
        concurrency: row.get::<i64, _>("concurrency") as u32,
        socket_path: row.get("socket_path"),
        settings,
        created_at: row.get("created_at"),
        finalized_at: row.try_get("finalized_at").ok().flatten(),
        passed: row.get::<i64, _>("passed") as u32,
        failed: row.get::<i64, _>("failed") as u32,
    })
}

pub fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let language_str: String = row.get("language");
    let language = string_to_language(&language_str)?;

    Ok(Task {
        id: row.get("id"),
        run_id: row.get("run_id"),
        language,
        exercise: row.get("exercise"),
        passed: row.try_get::<Option<i64>, _>("passed").ok().flatten().map(|v| v != 0),
        started_at: row.try_get("started_at").ok().flatten(),
        finished_at: row.try_get("finished_at").ok().flatten(),
    })
}

pub fn row_to_benchmark(row: &SqliteRow) -> Result<Benchmark> {
    Ok(Benchmark {
        id: row.get("id"),
        run_id: row.get("run_id"),
        task_id: row.get("task_id"),
        mcp_server_name: row.get("mcp_server_name"),
        user_intent: row.get("user_intent"),
        total_steps: row.get::<i64, _>("total_steps") as u32,
        code_execution_success: row
            .try_get::<Option<i64>, _>("code_execution_success")
            .ok()
            .flatten()
            .map(|v| v != 0),
        error_count: row.get::<i64, _>("error_count") as u32,
        finished_at: row.try_get("finished_at").ok().flatten(),
    })
}

pub fn row_to_task_metrics(row: &SqliteRow) -> Result<TaskMetrics> {
    let tool_usage_str: String = row.get("tool_usage");
    let tool_usage: HashMap<String, u64> = serde_json::from_str(&tool_usage_str)
        .map_err(|e| EvalError::Internal(format!("corrupt tool_usage JSON: {e}")))?;

    Ok(TaskMetrics {
        tokens_in: row.get::<i64, _>("tokens_in") as u64,
        tokens_out: row.get::<i64, _>("tokens_out") as u64,
        tokens_context: row.get::<i64, _>("tokens_context") as u64,
        cache_reads: row.get::<i64, _>("cache_reads") as u64,
        cache_writes: row.get::<i64, _>("cache_writes") as u64,
        cost: row.get("cost"),
        duration_ms: row.get::<i64, _>("duration_ms") as u64,
        tool_usage,
    })
}

/// Convert a [`sqlx::Error`] into the store's error taxonomy, classifying
/// unique-constraint violations on `steps` as [`EvalError::DuplicateStep`]
/// so callers can treat a replayed write as idempotent success.
pub fn sqlx_error_to_eval_error(err: sqlx::Error) -> EvalError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            if message.contains("UNIQUE constraint failed") && message.contains("steps.") {
                EvalError::DuplicateStep {
                    benchmark_id: 0,
                    step_number: 0,
                }
            } else {
                EvalError::Internal(format!("database constraint error: {message}"))
            }
        }
        sqlx::Error::RowNotFound => EvalError::Internal("unexpected RowNotFound".to_string()),
        sqlx::Error::PoolTimedOut => EvalError::Transient("connection pool timeout".to_string()),
        sqlx::Error::Io(io_err) => EvalError::Transient(format!("database I/O error: {io_err}")),
        _ => EvalError::Internal(format!("database operation failed: {err}")),
    }
}

/// Map a duplicate-step conflict to carry the caller's actual ids, since
/// [`sqlx_error_to_eval_error`] cannot recover them from the driver error.
pub fn duplicate_step_error(benchmark_id: i64, step_number: u32, err: sqlx::Error) -> EvalError {
    match sqlx_error_to_eval_error(err) {
        EvalError::DuplicateStep { .. } => EvalError::duplicate_step(benchmark_id, step_number),
        other => other,
    }
}

#[allow(dead_code)]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
