//! Fluent builders for constructing store entities in tests.

use chrono::Utc;
use serde_json::{json, Value};

use eval_core::models::{Benchmark, Language, NewRun, Run, Step, Task, TaskMetrics};

/// Builder for [`NewRun`].
pub struct NewRunBuilder {
    new_run: NewRun,
}

impl Default for NewRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NewRunBuilder {
    pub fn new() -> Self {
        Self {
            new_run: NewRun {
                model: "test-model".to_string(),
                concurrency: 4,
                socket_path: "/tmp/eval-test.sock".to_string(),
                settings: json!({}),
            },
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.new_run.model = model.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.new_run.concurrency = concurrency;
        self
    }

    pub fn with_socket_path(mut self, socket_path: impl Into<String>) -> Self {
        self.new_run.socket_path = socket_path.into();
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.new_run.settings = settings;
        self
    }

    pub fn build(self) -> NewRun {
        self.new_run
    }
}

/// Builder for a fully materialized [`Run`] (as returned by the store, not
/// what a caller submits to create one).
pub struct RunBuilder {
    run: Run,
}

impl Default for RunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunBuilder {
    pub fn new() -> Self {
        Self {
            run: Run {
                id: 1,
                model: "test-model".to_string(),
                concurrency: 4,
                socket_path: "/tmp/eval-test.sock".to_string(),
                settings: json!({}),
                created_at: Utc::now(),
                finalized_at: None,
                passed: 0,
                failed: 0,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.run.id = id;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.run.model = model.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.run.concurrency = concurrency;
        self
    }

    pub fn finalized(mut self, passed: u32, failed: u32) -> Self {
        self.run.passed = passed;
        self.run.failed = failed;
        self.run.finalized_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> Run {
        self.run
    }
}

/// Builder for [`Task`].
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task {
                id: 1,
                run_id: 1,
                language: Language::Rust,
                exercise: "leap".to_string(),
                passed: None,
                started_at: None,
                finished_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_run_id(mut self, run_id: i64) -> Self {
        self.task.run_id = run_id;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.task.language = language;
        self
    }

    pub fn with_exercise(mut self, exercise: impl Into<String>) -> Self {
        self.task.exercise = exercise.into();
        self
    }

    /// Mark the task started and, if `passed` is given, finished with that
    /// outcome.
    pub fn with_outcome(mut self, passed: Option<bool>) -> Self {
        let now = Utc::now();
        self.task.started_at = Some(now);
        self.task.passed = passed;
        if passed.is_some() {
            self.task.finished_at = Some(now);
        }
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Builder for [`Benchmark`].
pub struct BenchmarkBuilder {
    benchmark: Benchmark,
}

impl BenchmarkBuilder {
    pub fn new(run_id: i64, task_id: i64) -> Self {
        Self {
            benchmark: Benchmark {
                id: 1,
                run_id,
                task_id,
                mcp_server_name: "filesystem".to_string(),
                user_intent: "Solve the exercise.".to_string(),
                total_steps: 0,
                code_execution_success: None,
                error_count: 0,
                finished_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.benchmark.id = id;
        self
    }

    pub fn with_mcp_server_name(mut self, name: impl Into<String>) -> Self {
        self.benchmark.mcp_server_name = name.into();
        self
    }

    pub fn finished(mut self, total_steps: u32, code_execution_success: Option<bool>, error_count: u32) -> Self {
        self.benchmark.total_steps = total_steps;
        self.benchmark.code_execution_success = code_execution_success;
        self.benchmark.error_count = error_count;
        self.benchmark.finished_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> Benchmark {
        self.benchmark
    }
}

/// Builder for [`Step`].
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    pub fn new(benchmark_id: i64, step_number: u32) -> Self {
        Self {
            step: Step {
                benchmark_id,
                step_number,
                request: json!({ "method": "tools/call" }),
                response: json!({ "result": "ok" }),
                response_size_bytes: 128,
                duration_ms: 10,
                error_message: None,
                source: None,
                timeout_ms: None,
            },
        }
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.step.request = request;
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.step.response = response;
        self
    }

    pub fn with_error(mut self, error_message: impl Into<String>) -> Self {
        self.step.error_message = Some(error_message.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.step.source = Some(source.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.step.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn build(self) -> Step {
        self.step
    }
}

/// Builder for [`TaskMetrics`].
pub struct TaskMetricsBuilder {
    metrics: TaskMetrics,
}

impl Default for TaskMetricsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMetricsBuilder {
    pub fn new() -> Self {
        Self { metrics: TaskMetrics::default() }
    }

    pub fn with_tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.metrics.tokens_in = tokens_in;
        self.metrics.tokens_out = tokens_out;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.metrics.cost = cost;
        self
    }

    pub fn with_tool_usage(mut self, tool: impl Into<String>, count: u64) -> Self {
        self.metrics.tool_usage.insert(tool.into(), count);
        self
    }

    pub fn build(self) -> TaskMetrics {
        self.metrics
    }
}
