use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Programming language an exercise is written in.
///
/// Determines which command sequence the `TestRunner` uses to grade a
/// task's workspace.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Java,
    Javascript,
    Python,
    Rust,
}

impl Language {
    /// Parse a language from the string used in exercise directory names.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "javascript" | "js" => Some(Self::Javascript),
            "python" | "py" => Some(Self::Python),
            "rust" | "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    /// Directory-name form, as used under `{exercisesRoot}/{language}/{exercise}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Java => "java",
            Self::Javascript => "javascript",
            Self::Python => "python",
            Self::Rust => "rust",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One evaluation batch: a set of (language, exercise) tasks run against a
/// single model under a shared concurrency and IPC configuration.
///
/// `passed`/`failed` are running tallies mutated as tasks settle; they are
/// only authoritative once `finalized_at` is set, at which point
/// `aggregate_run` has summed every task's outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    /// Store-assigned, monotonically increasing identifier.
    pub id: i64,
    /// Name of the model under evaluation, forwarded to the agent.
    pub model: String,
    /// Maximum number of tasks admitted concurrently by the `Scheduler`.
    pub concurrency: u32,
    /// Filesystem path of the IPC rendezvous socket for this run.
    pub socket_path: String,
    /// Opaque JSON forwarded verbatim to each agent session.
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub passed: u32,
    pub failed: u32,
}

/// Caller-supplied description used to create a [`Run`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRun {
    pub model: String,
    pub concurrency: u32,
    pub socket_path: String,
    #[serde(default = "default_settings")]
    pub settings: Value,
}

fn default_settings() -> Value {
    Value::Object(Default::default())
}

/// Tri-state outcome of a task: unresolved while running, then a final
/// pass/fail once the `SessionDriver` reaches a terminal state.
pub type TaskOutcome = Option<bool>;

/// One (language, exercise) attempt within a [`Run`].
///
/// Invariant: `(run_id, language, exercise)` is unique — enforced by the
/// `Store`, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub run_id: i64,
    pub language: Language,
    pub exercise: String,
    pub passed: TaskOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Token/cost/tool-usage telemetry attached to a [`Task`] and summed into its
/// [`Run`] on finalization.
///
/// `tool_usage` counts MCP tool invocations by tool name, independent of the
/// per-step detail kept in the benchmark/step tables — it is a cheap summary
/// kept alongside the task row for fast run-level aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskMetrics {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_context: u64,
    pub cache_reads: u64,
    pub cache_writes: u64,
    pub cost: f64,
    pub duration_ms: u64,
    pub tool_usage: HashMap<String, u64>,
}

impl TaskMetrics {
    /// Fold another task's metrics into this one, summing every field and
    /// merging `tool_usage` counts by tool name. Used by `aggregate_run`.
    pub fn merge(&mut self, other: &TaskMetrics) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.tokens_context += other.tokens_context;
        self.cache_reads += other.cache_reads;
        self.cache_writes += other.cache_writes;
        self.cost += other.cost;
        self.duration_ms += other.duration_ms;
        for (tool, count) in &other.tool_usage {
            *self.tool_usage.entry(tool.clone()).or_insert(0) += count;
        }
    }
}

/// Per-task MCP benchmark header. Exactly one exists per `(run_id, task_id)`
/// once a session reaches `HANDSHAKE` successfully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Benchmark {
    pub id: i64,
    pub run_id: i64,
    pub task_id: i64,
    pub mcp_server_name: String,
    pub user_intent: String,
    /// Finalized step count; monotonic until `finish_benchmark` is called.
    pub total_steps: u32,
    pub code_execution_success: Option<bool>,
    pub error_count: u32,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A single MCP call captured from a completed span and sequenced within its
/// benchmark. `(benchmark_id, step_number)` is unique and numbering is dense
/// and contiguous — the `SpanIngestor` is the only writer that can produce
/// `step_number` values, guaranteeing this by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub benchmark_id: i64,
    pub step_number: u32,
    pub request: Value,
    pub response: Value,
    pub response_size_bytes: u64,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub source: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Append-only record of a tool failure reported by the agent
/// (`TaskToolFailed`) during a `RUNNING` session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolError {
    pub run_id: i64,
    pub task_id: i64,
    pub tool_name: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory-only context for a task currently in flight, owned by the
/// `TaskContextRegistry`. Never persisted; created at a successful
/// handshake and dropped when the task reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskContext {
    pub task_id: i64,
    pub run_id: i64,
    pub mcp_server: String,
    pub user_intent: String,
    pub start_time: DateTime<Utc>,
    pub current_step: u32,
    pub total_steps: u32,
}

/// Aggregated counters produced by `Store::aggregate_run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunAggregate {
    pub passed: u32,
    pub failed: u32,
    pub metrics: TaskMetrics,
}

/// A run plus the tasks still outstanding (no terminal `passed` value yet),
/// returned by `Store::list_existing_run` so a crashed orchestrator process
/// can resume a pre-created run instead of double-creating it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExistingRun {
    pub run: Run,
    pub outstanding_tasks: Vec<Task>,
}
