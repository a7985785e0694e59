//! Contract test helpers for validating [`Store`] implementations.
//!
//! Running this suite against both [`crate::MockStore`] and the real SQLite
//! store keeps their observable behavior in lockstep.

use eval_core::models::{Language, TaskMetrics};
use eval_core::store::Store;

use crate::builders::NewRunBuilder;

/// Run every contract test against a [`Store`] implementation.
pub async fn test_store_contract<S: Store>(store: &S) {
    test_run_and_task_lifecycle(store).await;
    test_benchmark_and_step_contract(store).await;
    test_aggregate_contract(store).await;
    test_resume_contract(store).await;
    test_not_found_contract(store).await;
    test_health_check_contract(store).await;
}

async fn test_run_and_task_lifecycle<S: Store>(store: &S) {
    let run_id = store
        .create_run(NewRunBuilder::new().with_model("contract-model").build())
        .await
        .expect("create_run should succeed");
    assert!(run_id > 0, "created run should have a positive id");

    let run = store.get_run(run_id).await.expect("get_run should succeed").expect("run should exist");
    assert_eq!(run.model, "contract-model");
    assert!(run.finalized_at.is_none(), "a fresh run is not finalized");

    let task_id = store
        .create_task(run_id, Language::Rust, "leap")
        .await
        .expect("create_task should succeed");

    let duplicate = store.create_task(run_id, Language::Rust, "leap").await;
    assert!(duplicate.is_err(), "should reject duplicate (run, language, exercise)");

    store.start_task(task_id).await.expect("start_task should succeed");
    let task = store.get_task(task_id).await.expect("get_task should succeed").expect("task should exist");
    assert!(task.started_at.is_some(), "started task should have started_at");
    assert!(task.passed.is_none(), "a running task has no outcome yet");
}

async fn test_benchmark_and_step_contract<S: Store>(store: &S) {
    let run_id = store.create_run(NewRunBuilder::new().build()).await.unwrap();
    let task_id = store.create_task(run_id, Language::Python, "acronym").await.unwrap();
    let benchmark_id = store
        .create_benchmark(run_id, task_id, "filesystem", "Solve acronym")
        .await
        .expect("create_benchmark should succeed");

    for step_number in 1..=3u32 {
        store
            .append_step(
                benchmark_id,
                step_number,
                serde_json::json!({ "method": "tools/call" }),
                serde_json::json!({ "result": "ok" }),
                64,
                5,
                None,
                None,
                None,
            )
            .await
            .expect("append_step should succeed");
    }

    let duplicate = store
        .append_step(benchmark_id, 1, serde_json::json!({}), serde_json::json!({}), 0, 0, None, None, None)
        .await;
    assert!(duplicate.is_err(), "should reject a duplicate step_number");
    assert!(duplicate.unwrap_err().is_duplicate());

    store
        .finish_benchmark(benchmark_id, 3, Some(true), 0)
        .await
        .expect("finish_benchmark should succeed");

    let benchmark = store
        .get_benchmark(benchmark_id)
        .await
        .expect("get_benchmark should succeed")
        .expect("benchmark should exist");
    assert_eq!(benchmark.total_steps, 3);
    assert_eq!(benchmark.code_execution_success, Some(true));
    assert!(benchmark.finished_at.is_some());
}

async fn test_aggregate_contract<S: Store>(store: &S) {
    let run_id = store.create_run(NewRunBuilder::new().build()).await.unwrap();
    let passing = store.create_task(run_id, Language::Go, "pass-me").await.unwrap();
    let failing = store.create_task(run_id, Language::Go, "fail-me").await.unwrap();

    store
        .finish_task(passing, true, &TaskMetrics { tokens_in: 100, ..Default::default() })
        .await
        .expect("finish_task should succeed");
    store
        .finish_task(failing, false, &TaskMetrics { tokens_in: 50, ..Default::default() })
        .await
        .expect("finish_task should succeed");

    let aggregate = store.aggregate_run(run_id).await.expect("aggregate_run should succeed");
    assert_eq!(aggregate.passed, 1);
    assert_eq!(aggregate.failed, 1);
    assert_eq!(aggregate.metrics.tokens_in, 150);

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert!(run.finalized_at.is_some(), "aggregate_run should finalize the run");
}

async fn test_resume_contract<S: Store>(store: &S) {
    let run_id = store.create_run(NewRunBuilder::new().build()).await.unwrap();
    let done = store.create_task(run_id, Language::Java, "done-task").await.unwrap();
    let outstanding = store.create_task(run_id, Language::Java, "outstanding-task").await.unwrap();

    store.finish_task(done, true, &TaskMetrics::default()).await.unwrap();

    let existing = store.list_existing_run(run_id).await.expect("list_existing_run should succeed");
    assert_eq!(existing.run.id, run_id);
    assert_eq!(existing.outstanding_tasks.len(), 1);
    assert_eq!(existing.outstanding_tasks[0].id, outstanding);
}

async fn test_not_found_contract<S: Store>(store: &S) {
    assert!(store.get_run(i64::MAX).await.unwrap().is_none());
    assert!(store.get_task(i64::MAX).await.unwrap().is_none());
    assert!(store.get_benchmark(i64::MAX).await.unwrap().is_none());

    let err = store.start_task(i64::MAX).await.unwrap_err();
    assert!(err.is_not_found());

    let err = store.list_existing_run(i64::MAX).await.unwrap_err();
    assert!(err.is_not_found());
}

async fn test_health_check_contract<S: Store>(store: &S) {
    store.health_check().await.expect("health_check should succeed for a working store");
}
