use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the orchestrator sends to an agent over the IPC session.
///
/// Serialized as a JSON object with a `"type"` discriminant matching the
/// variant name, e.g. `{"type": "StartNewTask", "configuration": ..., ...}`.
/// Unknown fields on a recognized type are ignored by `serde`'s default
/// behavior; an unrecognized `"type"` fails to deserialize and the session
/// is closed with a protocol error (see [`crate::error::EvalError::Protocol`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TaskCommand {
    /// Establishes the numeric/agent id mapping and per-task MCP context
    /// for a freshly accepted session. Expects a `TaskContextConfirmation`
    /// reply.
    SetTaskContext {
        #[serde(rename = "taskId")]
        task_id: i64,
        #[serde(rename = "rooTaskId")]
        roo_task_id: String,
        #[serde(rename = "runId")]
        run_id: i64,
        #[serde(rename = "mcpServer")]
        mcp_server: String,
        #[serde(rename = "userIntent")]
        user_intent: String,
        #[serde(rename = "otlpEndpoint")]
        otlp_endpoint: String,
    },
    /// Begins work on the exercise. `configuration` is opaque JSON
    /// passthrough, never interpreted inside the core.
    StartNewTask {
        configuration: Value,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        images: Option<Vec<String>>,
        #[serde(rename = "newTab", default)]
        new_tab: bool,
    },
    /// Cooperative cancellation request.
    CancelTask {},
    /// Orderly shutdown request; always sent exactly once per session as
    /// part of terminal teardown.
    CloseTask {},
}

/// Messages an agent sends to the orchestrator over the IPC session.
///
/// Only the subset named in the protocol design is required to be produced
/// by a conforming agent; the orchestrator tolerates any other well-formed
/// `TaskEvent` variant by matching against this enum and otherwise ignoring
/// unrecognized events of a *known* shape (unknown `"type"` values still
/// close the session, per the wire contract).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// Reply to `SetTaskContext`.
    TaskContextConfirmation {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Emitted once work begins; carries the agent's own opaque task id.
    TaskStarted {
        #[serde(rename = "rooTaskId")]
        roo_task_id: String,
    },
    /// Cumulative token-usage snapshot. Treated as last-writer-wins unless
    /// a future protocol revision adds an explicit delta flag (see design
    /// notes on token-usage reporting).
    TaskTokenUsageUpdated {
        #[serde(rename = "tokensIn")]
        tokens_in: u64,
        #[serde(rename = "tokensOut")]
        tokens_out: u64,
        #[serde(rename = "tokensContext")]
        tokens_context: u64,
        #[serde(rename = "cacheReads")]
        cache_reads: u64,
        #[serde(rename = "cacheWrites")]
        cache_writes: u64,
        cost: f64,
    },
    /// A single tool invocation failed; appended as a `ToolError`.
    TaskToolFailed {
        #[serde(rename = "toolName")]
        tool_name: String,
        error: String,
    },
    /// Work finished normally; the driver transitions to `TESTING`.
    TaskCompleted {},
    /// Work ended abnormally; the driver transitions to `FAILED`.
    TaskAborted { reason: String },
    /// Optional pre-test verdict from the agent itself. Informational only
    /// — the `TestRunner`'s exit status is always authoritative for
    /// `Task::passed`.
    EvalPass {},
    /// Optional pre-test verdict from the agent itself.
    EvalFail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl TaskEvent {
    /// `true` for events that terminate the `RUNNING` state (successfully
    /// or not); used by the session driver's event loop to know when to
    /// stop consuming.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::TaskCompleted {} | TaskEvent::TaskAborted { .. })
    }
}
