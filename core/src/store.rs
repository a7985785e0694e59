use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::Result,
    models::{Benchmark, ExistingRun, Language, NewRun, RunAggregate, Run, Task, TaskMetrics},
};

/// Persistence trait for the evaluation harness.
///
/// Implementations must be thread-safe and support concurrent access from
/// every in-flight task's `SessionDriver` plus the `SpanIngestor`. All
/// multi-row mutations that touch related entities (e.g. creating a task and
/// its run-scoped uniqueness check) happen inside a single atomic unit.
///
/// Uniqueness violations on `append_step` surface as
/// [`crate::error::EvalError::DuplicateStep`]; callers re-attempting their
/// own write should treat that as idempotent success rather than an error.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a new run and return its store-assigned id.
    async fn create_run(&self, spec: NewRun) -> Result<i64>;

    /// Create a new task under a run.
    ///
    /// # Errors
    /// * [`crate::error::EvalError::Validation`] if `(run_id, language,
    ///   exercise)` already exists for another task.
    async fn create_task(&self, run_id: i64, language: Language, exercise: &str) -> Result<i64>;

    /// Mark a task as started, recording `started_at`.
    async fn start_task(&self, task_id: i64) -> Result<()>;

    /// Mark a task as finished with a final pass/fail outcome and its
    /// accumulated metrics, recording `finished_at`.
    async fn finish_task(&self, task_id: i64, passed: bool, metrics: &TaskMetrics) -> Result<()>;

    /// Create the benchmark header for a task. At most one per
    /// `(run_id, task_id)`.
    async fn create_benchmark(
        &self,
        run_id: i64,
        task_id: i64,
        mcp_server_name: &str,
        user_intent: &str,
    ) -> Result<i64>;

    /// Append one sequenced MCP call to a benchmark.
    ///
    /// # Errors
    /// * [`crate::error::EvalError::DuplicateStep`] if `(benchmark_id,
    ///   step_number)` already exists. Callers replaying their own write
    ///   should treat this as success.
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
    ) -> Result<()>;

    /// Finalize a benchmark with its terminal step count and error tally.
    async fn finish_benchmark(
        &self,
        benchmark_id: i64,
        total_steps: u32,
        code_execution_success: Option<bool>,
        error_count: u32,
    ) -> Result<()>;

    /// Append-only record of a tool failure reported by the agent.
    async fn record_tool_error(&self, run_id: i64, task_id: i64, tool_name: &str, error: &str) -> Result<()>;

    /// Sum every task's metrics and pass/fail outcome into its run, marking
    /// the run finalized. Called once after the scheduler drains.
    async fn aggregate_run(&self, run_id: i64) -> Result<RunAggregate>;

    /// Look up a previously created run along with any tasks that have not
    /// yet reached a terminal outcome, to resume a pre-created run instead
    /// of double-creating it.
    async fn list_existing_run(&self, run_id: i64) -> Result<ExistingRun>;

    /// Fetch a single run by id.
    async fn get_run(&self, run_id: i64) -> Result<Option<Run>>;

    /// Fetch a single task by id.
    async fn get_task(&self, task_id: i64) -> Result<Option<Task>>;

    /// Fetch a single benchmark by id.
    async fn get_benchmark(&self, benchmark_id: i64) -> Result<Option<Benchmark>>;

    /// Health check for monitoring; `Ok(())` iff the store is reachable.
    async fn health_check(&self) -> Result<()>;
}
