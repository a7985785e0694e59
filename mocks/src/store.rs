//! In-memory mock implementation of the [`Store`] trait.
//!
//! Provides a thread-safe mock with:
//! - error injection for exercising failure paths
//! - call history tracking for verification
//! - the same uniqueness/ordering behavior the real SQLite store guarantees

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use eval_core::{
    error::{EvalError, Result},
    models::{Benchmark, ExistingRun, Language, NewRun, Run, RunAggregate, Step, Task, TaskMetrics},
    store::Store,
};

/// Mock implementation of [`Store`] for testing.
pub struct MockStore {
    runs: Arc<Mutex<HashMap<i64, Run>>>,
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    benchmarks: Arc<Mutex<HashMap<i64, Benchmark>>>,
    steps: Arc<Mutex<HashMap<i64, Vec<Step>>>>,
    metrics: Arc<Mutex<HashMap<i64, TaskMetrics>>>,
    next_run_id: Arc<AtomicI64>,
    next_task_id: Arc<AtomicI64>,
    next_benchmark_id: Arc<AtomicI64>,
    error_injection: Arc<Mutex<Option<EvalError>>>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    /// Create a new, empty mock store.
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            benchmarks: Arc::new(Mutex::new(HashMap::new())),
            steps: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(HashMap::new())),
            next_run_id: Arc::new(AtomicI64::new(1)),
            next_task_id: Arc::new(AtomicI64::new(1)),
            next_benchmark_id: Arc::new(AtomicI64::new(1)),
            error_injection: Arc::new(Mutex::new(None)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock store pre-populated with the given run.
    pub fn with_run(run: Run) -> Self {
        let store = Self::new();
        store.next_run_id.store(run.id + 1, Ordering::SeqCst);
        store.runs.lock().insert(run.id, run);
        store
    }

    /// Inject an error to be returned (and consumed) by the next call.
    pub fn inject_error(&self, error: EvalError) {
        *self.error_injection.lock() = Some(error);
    }

    /// Clear a previously injected error.
    pub fn clear_error(&self) {
        *self.error_injection.lock() = None;
    }

    /// Full history of method calls, in order.
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    /// Clear the call history.
    pub fn clear_history(&self) {
        self.call_history.lock().clear();
    }

    /// Assert that a method appears in the call history.
    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call.contains(method)),
            "method '{}' was not called. Call history: {:?}",
            method,
            *history
        );
    }

    fn check_error_injection(&self) -> Result<()> {
        let mut error_opt = self.error_injection.lock();
        if let Some(error) = error_opt.take() {
            return Err(error);
        }
        Ok(())
    }

    fn record_call(&self, method: &str) {
        self.call_history.lock().push(format!("{method}()"));
    }

    fn record_call_with_params(&self, method: &str, params: &str) {
        self.call_history.lock().push(format!("{method}({params})"));
    }
}

#[async_trait]
impl Store for MockStore {
    async fn create_run(&self, spec: NewRun) -> Result<i64> {
        self.record_call_with_params("create_run", &format!("model={}", spec.model));
        self.check_error_injection()?;

        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let run = Run {
            id,
            model: spec.model,
            concurrency: spec.concurrency,
            socket_path: spec.socket_path,
            settings: spec.settings,
            created_at: Utc::now(),
            finalized_at: None,
            passed: 0,
            failed: 0,
        };
        self.runs.lock().insert(id, run);
        Ok(id)
    }

    async fn create_task(&self, run_id: i64, language: Language, exercise: &str) -> Result<i64> {
        self.record_call_with_params("create_task", &format!("run_id={run_id}, exercise={exercise}"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        if tasks
            .values()
            .any(|t| t.run_id == run_id && t.language == language && t.exercise == exercise)
        {
            return Err(EvalError::Validation(format!(
                "task ({run_id}, {}, {exercise}) already exists",
                language.as_str()
            )));
        }

        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        tasks.insert(
            id,
            Task {
                id,
                run_id,
                language,
                exercise: exercise.to_string(),
                passed: None,
                started_at: None,
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn start_task(&self, task_id: i64) -> Result<()> {
        self.record_call_with_params("start_task", &format!("task_id={task_id}"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&task_id).ok_or_else(|| EvalError::task_not_found(task_id))?;
        task.started_at = Some(Utc::now());
        Ok(())
    }

    async fn finish_task(&self, task_id: i64, passed: bool, metrics: &TaskMetrics) -> Result<()> {
        self.record_call_with_params("finish_task", &format!("task_id={task_id}, passed={passed}"));
        self.check_error_injection()?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&task_id).ok_or_else(|| EvalError::task_not_found(task_id))?;
        task.passed = Some(passed);
        task.finished_at = Some(Utc::now());
        drop(tasks);

        self.metrics.lock().insert(task_id, metrics.clone());
        Ok(())
    }

    async fn create_benchmark(&self, run_id: i64, task_id: i64, mcp_server_name: &str, user_intent: &str) -> Result<i64> {
        self.record_call_with_params("create_benchmark", &format!("task_id={task_id}"));
        self.check_error_injection()?;

        let id = self.next_benchmark_id.fetch_add(1, Ordering::SeqCst);
        self.benchmarks.lock().insert(
            id,
            Benchmark {
                id,
                run_id,
                task_id,
                mcp_server_name: mcp_server_name.to_string(),
                user_intent: user_intent.to_string(),
                total_steps: 0,
                code_execution_success: None,
                error_count: 0,
                finished_at: None,
            },
        );
        Ok(id)
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
        self.record_call_with_params("append_step", &format!("benchmark_id={benchmark_id}, step_number={step_number}"));
        self.check_error_injection()?;

        let mut steps = self.steps.lock();
        let entry = steps.entry(benchmark_id).or_default();
        if entry.iter().any(|s| s.step_number == step_number) {
            return Err(EvalError::duplicate_step(benchmark_id, step_number));
        }
        entry.push(Step {
            benchmark_id,
            step_number,
            request,
            response,
            response_size_bytes,
            duration_ms,
            error_message,
            source,
            timeout_ms,
        });
        Ok(())
    }

    async fn finish_benchmark(&self, benchmark_id: i64, total_steps: u32, code_execution_success: Option<bool>, error_count: u32) -> Result<()> {
        self.record_call_with_params("finish_benchmark", &format!("benchmark_id={benchmark_id}"));
        self.check_error_injection()?;

        let mut benchmarks = self.benchmarks.lock();
        let benchmark = benchmarks
            .get_mut(&benchmark_id)
            .ok_or_else(|| EvalError::benchmark_not_found(benchmark_id))?;
        benchmark.total_steps = total_steps;
        benchmark.code_execution_success = code_execution_success;
        benchmark.error_count = error_count;
        benchmark.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn record_tool_error(&self, _run_id: i64, task_id: i64, tool_name: &str, error: &str) -> Result<()> {
        self.record_call_with_params("record_tool_error", &format!("task_id={task_id}, tool={tool_name}, error={error}"));
        self.check_error_injection()?;
        Ok(())
    }

    async fn aggregate_run(&self, run_id: i64) -> Result<RunAggregate> {
        self.record_call_with_params("aggregate_run", &format!("run_id={run_id}"));
        self.check_error_injection()?;

        let tasks = self.tasks.lock();
        let metrics_by_task = self.metrics.lock();

        let mut aggregate = RunAggregate::default();
        for task in tasks.values().filter(|t| t.run_id == run_id) {
            match task.passed {
                Some(true) => aggregate.passed += 1,
                Some(false) => aggregate.failed += 1,
                None => {}
            }
            if let Some(task_metrics) = metrics_by_task.get(&task.id) {
                aggregate.metrics.merge(task_metrics);
            }
        }
        drop(tasks);
        drop(metrics_by_task);

        let mut runs = self.runs.lock();
        let run = runs.get_mut(&run_id).ok_or_else(|| EvalError::run_not_found(run_id))?;
        run.passed = aggregate.passed;
        run.failed = aggregate.failed;
        run.finalized_at = Some(Utc::now());

        Ok(aggregate)
    }

    async fn list_existing_run(&self, run_id: i64) -> Result<ExistingRun> {
        self.record_call_with_params("list_existing_run", &format!("run_id={run_id}"));
        self.check_error_injection()?;

        let runs = self.runs.lock();
        let run = runs.get(&run_id).cloned().ok_or_else(|| EvalError::run_not_found(run_id))?;
        drop(runs);

        let tasks = self.tasks.lock();
        let outstanding_tasks = tasks
            .values()
            .filter(|t| t.run_id == run_id && t.passed.is_none())
            .cloned()
            .collect();

        Ok(ExistingRun { run, outstanding_tasks })
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        self.record_call_with_params("get_run", &format!("run_id={run_id}"));
        self.check_error_injection()?;
        Ok(self.runs.lock().get(&run_id).cloned())
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        self.record_call_with_params("get_task", &format!("task_id={task_id}"));
        self.check_error_injection()?;
        Ok(self.tasks.lock().get(&task_id).cloned())
    }

    async fn get_benchmark(&self, benchmark_id: i64) -> Result<Option<Benchmark>> {
        self.record_call_with_params("get_benchmark", &format!("benchmark_id={benchmark_id}"));
        self.check_error_injection()?;
        Ok(self.benchmarks.lock().get(&benchmark_id).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        self.record_call("health_check");
        self.check_error_injection()?;
        Ok(())
    }
}
