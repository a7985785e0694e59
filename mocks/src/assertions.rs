//! Custom assertion helpers for testing.

use eval_core::models::{Benchmark, Step, Task};

/// Assert tasks are equal ignoring timestamps.
pub fn assert_task_equals(actual: &Task, expected: &Task) {
    assert_eq!(actual.id, expected.id, "task IDs don't match");
    assert_eq!(actual.run_id, expected.run_id, "task run IDs don't match");
    assert_eq!(actual.language, expected.language, "task languages don't match");
    assert_eq!(actual.exercise, expected.exercise, "task exercises don't match");
    assert_eq!(actual.passed, expected.passed, "task outcomes don't match");
}

/// Assert a task reached the given terminal outcome.
pub fn assert_task_outcome(task: &Task, expected: Option<bool>) {
    assert_eq!(task.passed, expected, "task {} outcome mismatch", task.id);
    if expected.is_some() {
        assert!(task.finished_at.is_some(), "task {} has a terminal outcome but no finished_at", task.id);
    }
}

/// Assert a task list contains a task for the given (language, exercise) pair.
pub fn assert_contains_task_for_exercise(tasks: &[Task], language: eval_core::models::Language, exercise: &str) {
    assert!(
        tasks.iter().any(|t| t.language == language && t.exercise == exercise),
        "expected a task for ({language}, {exercise}) but found none among {:?}",
        tasks.iter().map(|t| (t.language, &t.exercise)).collect::<Vec<_>>()
    );
}

/// Assert a benchmark has been finalized (has a `finished_at` and a
/// `total_steps` consistent with the number of steps actually recorded).
pub fn assert_benchmark_finalized(benchmark: &Benchmark, expected_steps: u32) {
    assert!(benchmark.finished_at.is_some(), "benchmark {} was not finalized", benchmark.id);
    assert_eq!(benchmark.total_steps, expected_steps, "benchmark {} has unexpected total_steps", benchmark.id);
}

/// Assert a benchmark's steps form a dense, contiguous `1..=len` sequence
/// (per-benchmark step numbering starts at 1, not 0).
pub fn assert_steps_contiguous(steps: &[Step]) {
    let mut numbers: Vec<u32> = steps.iter().map(|s| s.step_number).collect();
    numbers.sort_unstable();
    for (expected, actual) in (1u32..).zip(numbers.iter()) {
        assert_eq!(
            expected, *actual,
            "step numbers are not dense/contiguous from 1: expected {expected}, found {actual} in {numbers:?}"
        );
    }
}
