use thiserror::Error;

/// Result type alias for evaluation-harness operations.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Error taxonomy for the evaluation harness, covering the failure modes
/// enumerated by the error-handling design: transient I/O, protocol
/// violations, timeouts, agent crashes, store duplicates and configuration
/// problems. Each variant carries enough context to reconstruct the failure
/// in a log line without re-deriving it from caller state.
///
/// # Examples
///
/// ```rust
/// use eval_core::error::EvalError;
///
/// let err = EvalError::handshake_timeout(42);
/// assert!(err.is_timeout());
///
/// let dup = EvalError::duplicate_step(7, 3);
/// assert!(dup.is_duplicate());
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A transient I/O failure (socket accept dropped, database deadlock)
    /// that was retried and still did not succeed.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// A protocol violation: schema validation failure, unknown message
    /// kind, or a confirmation carrying `success=false`. Fatal for the
    /// session that produced it.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A timeout: handshake, task, or test-command deadline exceeded.
    #[error("timeout waiting for task {task_id}: {detail}")]
    Timeout { task_id: i64, detail: String },

    /// The agent process exited without a terminal event (non-zero exit,
    /// killed, or crashed).
    #[error("agent for task {task_id} exited abnormally: {detail}")]
    AgentCrash { task_id: i64, detail: String },

    /// `appendStep` hit a uniqueness conflict on `(benchmark_id,
    /// step_number)`. Callers re-attempting their own write should treat
    /// this as idempotent success.
    #[error("duplicate step {step_number} for benchmark {benchmark_id}")]
    DuplicateStep {
        benchmark_id: i64,
        step_number: u32,
    },

    /// A required entity was not found (run, task, benchmark, context).
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad configuration detected at task creation (missing exercise
    /// directory, unknown language) — tasks are marked failed before any
    /// agent is launched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Validation failure on caller-supplied data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Catch-all for failures that do not fit another category.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EvalError {
    /// Build a handshake/task timeout error for the given task.
    pub fn handshake_timeout(task_id: i64) -> Self {
        Self::Timeout {
            task_id,
            detail: "handshake timed out waiting for TaskContextConfirmation".to_string(),
        }
    }

    /// Build a task-level timeout error for the given task.
    pub fn task_timeout(task_id: i64) -> Self {
        Self::Timeout {
            task_id,
            detail: "task exceeded its upper time bound".to_string(),
        }
    }

    /// Build a duplicate-step error for idempotency checks.
    pub fn duplicate_step(benchmark_id: i64, step_number: u32) -> Self {
        Self::DuplicateStep {
            benchmark_id,
            step_number,
        }
    }

    /// Build a not-found error for a run id.
    pub fn run_not_found(run_id: i64) -> Self {
        Self::NotFound(format!("run {run_id} not found"))
    }

    /// Build a not-found error for a task id.
    pub fn task_not_found(task_id: i64) -> Self {
        Self::NotFound(format!("task {task_id} not found"))
    }

    /// Build a not-found error for a benchmark id.
    pub fn benchmark_not_found(benchmark_id: i64) -> Self {
        Self::NotFound(format!("benchmark {benchmark_id} not found"))
    }

    /// Build a protocol error for an unknown top-level message type.
    pub fn unknown_message_type(type_name: &str) -> Self {
        Self::Protocol(format!("unknown top-level message type: {type_name}"))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EvalError::Transient(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, EvalError::Protocol(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EvalError::Timeout { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EvalError::DuplicateStep { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EvalError::NotFound(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, EvalError::Configuration(_))
    }
}
