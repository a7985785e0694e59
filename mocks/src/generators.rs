//! Random test data generators and `proptest` strategies.

use fake::faker::lorem::en::{Sentence, Word};
use fake::Fake;
use proptest::prelude::*;
use rand::Rng;
use serde_json::{json, Value};

use eval_core::models::{Language, Step, TaskMetrics};

/// Generate a plausible exercise name (e.g. "leap", "acronym-42").
pub fn generate_exercise_name() -> String {
    let base: String = Word().fake();
    if rand::thread_rng().gen_bool(0.2) {
        let suffix: u32 = (1..99).fake();
        format!("{base}-{suffix}")
    } else {
        base
    }
}

/// Generate a plausible model identifier.
pub fn generate_model_name() -> String {
    let models = [
        "claude-3-5-sonnet",
        "claude-3-opus",
        "gpt-4o",
        "gpt-4o-mini",
        "gemini-1.5-pro",
    ];
    models[rand::thread_rng().gen_range(0..models.len())].to_string()
}

/// Generate a plausible MCP server name from the allowlist domain.
pub fn generate_mcp_server_name() -> String {
    let servers = ["filesystem", "git", "sqlite", "fetch", "memory"];
    servers[rand::thread_rng().gen_range(0..servers.len())].to_string()
}

/// Generate a random [`Language`].
pub fn generate_random_language() -> Language {
    let languages = [Language::Go, Language::Java, Language::Javascript, Language::Python, Language::Rust];
    languages[rand::thread_rng().gen_range(0..languages.len())]
}

/// Generate a plausible MCP request/response pair with a short description.
pub fn generate_step_payload() -> (Value, Value) {
    let description: String = Sentence(3..8).fake();
    (
        json!({ "method": "tools/call", "params": { "name": "read_file" } }),
        json!({ "result": { "content": description } }),
    )
}

/// Proptest strategy for a random [`Language`].
pub fn language_strategy() -> impl Strategy<Value = Language> {
    prop_oneof![
        Just(Language::Go),
        Just(Language::Java),
        Just(Language::Javascript),
        Just(Language::Python),
        Just(Language::Rust),
    ]
}

/// Proptest strategy for a well-formed [`Step`] at a given `step_number`.
pub fn step_strategy(benchmark_id: i64, step_number: u32) -> impl Strategy<Value = Step> {
    (0u64..50_000, 0u64..5_000, proptest::option::of("[a-z_]{3,20}")).prop_map(
        move |(response_size_bytes, duration_ms, error_message)| Step {
            benchmark_id,
            step_number,
            request: json!({ "method": "tools/call" }),
            response: json!({ "result": "ok" }),
            response_size_bytes,
            duration_ms,
            error_message,
            source: None,
            timeout_ms: None,
        },
    )
}

/// Proptest strategy for a [`TaskMetrics`] with independently varying counters.
pub fn task_metrics_strategy() -> impl Strategy<Value = TaskMetrics> {
    (0u64..100_000, 0u64..100_000, 0.0f64..50.0).prop_map(|(tokens_in, tokens_out, cost)| TaskMetrics {
        tokens_in,
        tokens_out,
        cost,
        ..Default::default()
    })
}
