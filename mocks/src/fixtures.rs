//! Standard test fixtures for consistent testing.

use eval_core::models::{Benchmark, Language, NewRun, Step, Task, TaskMetrics};

use crate::builders::{BenchmarkBuilder, NewRunBuilder, StepBuilder, TaskBuilder, TaskMetricsBuilder};

/// A basic new-run spec with sensible defaults.
pub fn create_test_run() -> NewRun {
    NewRunBuilder::new().with_model("claude-3-5-sonnet").build()
}

/// A single task under `run_id`, not yet started.
pub fn create_test_task(run_id: i64) -> Task {
    TaskBuilder::new().with_run_id(run_id).build()
}

/// One task per supported language, all under the same run.
pub fn create_tasks_in_all_languages(run_id: i64) -> Vec<Task> {
    [Language::Go, Language::Java, Language::Javascript, Language::Python, Language::Rust]
        .into_iter()
        .enumerate()
        .map(|(i, language)| {
            TaskBuilder::new()
                .with_id(i as i64 + 1)
                .with_run_id(run_id)
                .with_language(language)
                .with_exercise(format!("exercise-{}", language.as_str()))
                .build()
        })
        .collect()
}

/// A fresh, unfinished benchmark for `task_id`.
pub fn create_test_benchmark(run_id: i64, task_id: i64) -> Benchmark {
    BenchmarkBuilder::new(run_id, task_id).build()
}

/// A single well-formed MCP step at `step_number`.
pub fn create_test_step(benchmark_id: i64, step_number: u32) -> Step {
    StepBuilder::new(benchmark_id, step_number).build()
}

/// A contiguous run of steps `1..=count` for `benchmark_id`.
pub fn create_test_steps(benchmark_id: i64, count: u32) -> Vec<Step> {
    (1..=count).map(|n| create_test_step(benchmark_id, n)).collect()
}

/// Token/cost metrics with non-zero values across every field.
pub fn create_test_metrics() -> TaskMetrics {
    TaskMetricsBuilder::new()
        .with_tokens(1_200, 340)
        .with_cost(0.015)
        .with_tool_usage("read_file", 3)
        .with_tool_usage("write_file", 1)
        .build()
}
