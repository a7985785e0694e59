use std::sync::Arc;
use std::time::{Duration, Instant};

use eval_core::{
    error::{EvalError, Result},
    ipc_messages::{TaskCommand, TaskEvent},
    models::{Language, TaskContext, TaskMetrics},
    registry::TaskContextRegistry,
    store::Store,
};
use ipc_protocol::IpcTransport;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::agent_supervisor::{AgentLauncher, ExitCause};
use crate::span_ingestor::SpanIngestor;
use crate::test_runner::TestRunner;
use crate::workspace::Workspace;

/// Everything a [`SessionDriver`] needs that is shared across every task in
/// a run, handed out by the `Scheduler` as it launches each driver. Cheap to
/// clone: every shared piece of state is an `Arc`, the rest is small
/// `Copy`/`String` configuration.
#[derive(Clone)]
pub struct SessionDependencies {
    pub store: Arc<dyn Store>,
    pub registry: TaskContextRegistry,
    pub ingestor: Arc<SpanIngestor>,
    pub launcher: Arc<dyn AgentLauncher>,
    pub transport: Arc<IpcTransport>,
    pub workspace: Arc<Workspace>,
    pub test_runner: Arc<TestRunner>,
    pub mcp_server: String,
    pub socket_path: String,
    pub otlp_endpoint: String,
    pub handshake_timeout: Duration,
    pub task_timeout: Duration,
    pub cancel_grace: Duration,
    /// Whether a rejected handshake still leaves behind a finalized
    /// `total_steps=0` benchmark row rather than none at all. The source
    /// this was distilled from does this inconsistently; both behaviors are
    /// exposed here rather than guessed at.
    pub create_empty_benchmark: bool,
}

/// One task's description as seen by its driver: enough to launch an agent,
/// run its prompt and grade the result. Deliberately narrower than
/// [`eval_core::models::Task`] — the driver does not need the task's
/// pass/fail history.
pub struct DriverTask {
    pub task_id: i64,
    pub run_id: i64,
    pub language: Language,
    pub exercise: String,
    pub base_branch: String,
    pub user_intent: String,
    pub configuration: Value,
}

/// What a driver reports back to the `Scheduler` once it reaches a terminal
/// state. Never carries an `Err` — every internal failure is folded into
/// `passed = false` so one task's trouble can never propagate into the
/// scheduler's own control flow.
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub task_id: i64,
    pub passed: bool,
    pub failure_reason: Option<String>,
}

/// Owns one task's end-to-end lifetime: launch the agent, hand off the
/// rendezvous handshake, drive the `RUNNING` event stream, grade the
/// workspace, and tear everything down exactly once regardless of how the
/// task ended.
///
/// `NEW → AWAITING_CONN → HANDSHAKE → RUNNING → TESTING → DONE/FAILED`, with
/// a `CANCELLING` branch reachable from any non-terminal state. See the
/// state machine in the session-lifecycle design notes for the full
/// transition table; this type is a straight-line implementation of it
/// rather than an explicit state enum, since every state has exactly one
/// successor path worth naming.
pub struct SessionDriver {
    deps: SessionDependencies,
}

impl SessionDriver {
    pub fn new(deps: SessionDependencies) -> Self {
        Self { deps }
    }

    /// Drive `task` to a terminal outcome. `cancel` is watched throughout
    /// `RUNNING`; once it flips to `true` the driver issues `CancelTask`,
    /// waits `cancel_grace` for the agent to exit on its own, then kills it.
    ///
    /// Never returns early on an internal error — every failure branch still
    /// runs terminal teardown and reports `passed = false`.
    pub async fn run(mut self, task: DriverTask, cancel: watch::Receiver<bool>) -> DriverOutcome {
        let task_id = task.task_id;
        let deadline = Instant::now() + self.deps.task_timeout;

        match self.drive(&task, cancel, deadline).await {
            Ok(passed) => DriverOutcome { task_id, passed, failure_reason: None },
            Err(err) => {
                tracing::warn!(task_id, error = %err, "task driver ended in failure");
                DriverOutcome { task_id, passed: false, failure_reason: Some(err.to_string()) }
            }
        }
    }

    async fn drive(&mut self, task: &DriverTask, mut cancel: watch::Receiver<bool>, deadline: Instant) -> Result<bool> {
        let task_id = task.task_id;
        let _span = crate::task_span!(task_id).entered();

        let branch = match self
            .deps
            .workspace
            .prepare(task.run_id, task.language, &task.exercise, &task.base_branch)
            .await
        {
            Ok(branch) => branch,
            Err(err) => return Err(self.fail_task(task_id, err).await),
        };
        tracing::info!(task_id, branch = %branch, "workspace prepared");

        if let Err(err) = self.deps.store.start_task(task_id).await {
            return Err(self.fail_task(task_id, err).await);
        }

        // AWAITING_CONN: launch the agent and accept its rendezvous connection.
        let mut handle = match self
            .deps
            .launcher
            .launch(task_id, &self.deps.socket_path, &self.deps.otlp_endpoint)
            .await
        {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail_task(task_id, err).await),
        };

        let mut session = match timeout(self.deps.handshake_timeout, self.deps.transport.accept()).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                let _ = handle.kill().await;
                return Err(self.fail_task(task_id, err).await);
            }
            Err(_) => {
                let _ = handle.kill().await;
                return Err(self.fail_task(task_id, EvalError::handshake_timeout(task_id)).await);
            }
        };

        // HANDSHAKE
        let benchmark_id = match self.handshake(task, &mut session, task_id).await {
            Ok(id) => id,
            Err(err) => {
                let _ = session.send(&TaskCommand::CloseTask {}).await;
                let _ = session.close().await;
                let _ = handle.kill().await;
                return Err(self.fail_task(task_id, err).await);
            }
        };
        self.deps.ingestor.register_benchmark(task_id, benchmark_id);

        let outcome = self.run_and_test(task, &mut session, &mut handle, &mut cancel, deadline).await;

        // Terminal teardown: idempotent regardless of which branch produced
        // the outcome. `run_and_test` has already persisted `tasks.passed`
        // for every path through it, success or failure.
        let total_steps = self.deps.registry.get_context(task_id).map(|c| c.current_step).unwrap_or(0);
        let code_execution_success = outcome.as_ref().ok().copied();
        if let Err(err) = self
            .deps
            .store
            .finish_benchmark(benchmark_id, total_steps, code_execution_success, 0)
            .await
        {
            tracing::warn!(task_id, error = %err, "failed to finalize benchmark during teardown");
        }

        self.deps.registry.drop_task(&format!("task-{task_id}"), task_id);
        self.deps.ingestor.forget_task(task_id);
        let _ = session.send(&TaskCommand::CloseTask {}).await;
        let _ = session.close().await;
        let _ = handle.kill().await;

        outcome
    }

    /// Persist `passed = false` for a task that never reached
    /// `run_and_test`'s own teardown, then hand the triggering error back so
    /// the caller can still propagate it. Best-effort: a failure to persist
    /// here is logged, not escalated, since the original error is what the
    /// caller actually needs to see.
    async fn fail_task(&self, task_id: i64, err: EvalError) -> EvalError {
        if let Err(persist_err) = self.deps.store.finish_task(task_id, false, &TaskMetrics::default()).await {
            tracing::warn!(task_id, error = %persist_err, "failed to persist failed task during teardown");
        }
        err
    }

    async fn handshake(
        &self,
        task: &DriverTask,
        session: &mut ipc_protocol::Session,
        task_id: i64,
    ) -> Result<i64> {
        session
            .send(&TaskCommand::SetTaskContext {
                task_id,
                roo_task_id: format!("task-{task_id}"),
                run_id: task.run_id,
                mcp_server: self.deps.mcp_server.clone(),
                user_intent: task.user_intent.clone(),
                otlp_endpoint: self.deps.otlp_endpoint.clone(),
            })
            .await?;

        let event = match timeout(self.deps.handshake_timeout, session.receive()).await {
            Ok(Ok(Some(event))) => event,
            Ok(Ok(None)) => return Err(EvalError::Protocol("session closed before handshake confirmation".to_string())),
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(EvalError::handshake_timeout(task_id)),
        };

        match event {
            TaskEvent::TaskContextConfirmation { success: true, .. } => {}
            TaskEvent::TaskContextConfirmation { success: false, error } => {
                let reason = error.unwrap_or_else(|| "no reason given".to_string());
                if self.deps.create_empty_benchmark {
                    if let Ok(benchmark_id) = self
                        .deps
                        .store
                        .create_benchmark(task.run_id, task_id, "rejected", &task.user_intent)
                        .await
                    {
                        if let Err(err) = self.deps.store.finish_benchmark(benchmark_id, 0, Some(false), 0).await {
                            tracing::warn!(task_id, error = %err, "failed to finalize placeholder benchmark for rejected handshake");
                        }
                    }
                }
                return Err(EvalError::Protocol(format!("agent rejected task context: {reason}")));
            }
            other => return Err(EvalError::Protocol(format!("expected TaskContextConfirmation, got {other:?}"))),
        }

        self.deps.registry.register(format!("task-{task_id}"), task_id);
        self.deps.registry.set_context(
            task_id,
            TaskContext {
                task_id,
                run_id: task.run_id,
                mcp_server: self.deps.mcp_server.clone(),
                user_intent: task.user_intent.clone(),
                start_time: chrono::Utc::now(),
                current_step: 0,
                total_steps: 0,
            },
        );

        self.deps
            .store
            .create_benchmark(task.run_id, task_id, &self.deps.mcp_server, &task.user_intent)
            .await
    }

    /// Run the `RUNNING`/`TESTING` stages to a terminal verdict. Every exit
    /// path — success, timeout, cancellation, a crashed/aborted agent, or a
    /// grading failure — persists `tasks.passed` exactly once before
    /// returning, so a task can never finish this stage leaving `passed`
    /// unset in the store.
    #[allow(clippy::too_many_arguments)]
    async fn run_and_test(
        &self,
        task: &DriverTask,
        session: &mut ipc_protocol::Session,
        handle: &mut Box<dyn crate::agent_supervisor::AgentProcessHandle>,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<bool> {
        let task_id = task.task_id;
        let mut metrics = TaskMetrics::default();

        let result = self.run_to_verdict(task, session, handle, cancel, deadline, &mut metrics).await;

        match &result {
            Ok(passed) => self.deps.store.finish_task(task_id, *passed, &metrics).await?,
            Err(_) => {
                if let Err(persist_err) = self.deps.store.finish_task(task_id, false, &metrics).await {
                    tracing::warn!(task_id, error = %persist_err, "failed to persist failed task during teardown");
                }
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_to_verdict(
        &self,
        task: &DriverTask,
        session: &mut ipc_protocol::Session,
        handle: &mut Box<dyn crate::agent_supervisor::AgentProcessHandle>,
        cancel: &mut watch::Receiver<bool>,
        deadline: Instant,
        metrics: &mut TaskMetrics,
    ) -> Result<bool> {
        let task_id = task.task_id;

        session
            .send(&TaskCommand::StartNewTask {
                configuration: task.configuration.clone(),
                text: task.user_intent.clone(),
                images: None,
                new_tab: false,
            })
            .await?;

        let started_at = Instant::now();
        // Once the cancel sender is dropped, `changed()` resolves instantly
        // forever; stop polling it so the select doesn't spin.
        let mut cancel_closed = false;

        // RUNNING: consume events until a terminal one arrives, the task
        // deadline elapses, or a cancellation is requested. Whichever fires
        // first wins; the others are simply never observed.
        let completed = loop {
            if Instant::now() >= deadline {
                return Err(EvalError::task_timeout(task_id));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());

            tokio::select! {
                biased;

                changed = cancel.changed(), if !cancel_closed => {
                    if changed.is_err() {
                        cancel_closed = true;
                    } else if *cancel.borrow() {
                        self.cancel_in_flight(session, handle, task_id).await;
                        return Err(EvalError::Internal(format!("task {task_id} cancelled")));
                    }
                }
                event = timeout(remaining, session.receive()) => {
                    match event {
                        Ok(Ok(Some(event))) => {
                            if let Some(done) = self.apply_event(task_id, task.run_id, metrics, event).await? {
                                break done;
                            }
                        }
                        Ok(Ok(None)) => {
                            return Err(EvalError::AgentCrash {
                                task_id,
                                detail: "session closed before TaskCompleted/TaskAborted".to_string(),
                            });
                        }
                        Ok(Err(err)) => return Err(err),
                        Err(_) => return Err(EvalError::task_timeout(task_id)),
                    }
                }
            }
        };

        metrics.duration_ms = started_at.elapsed().as_millis() as u64;

        if !completed {
            return Ok(false);
        }

        // TESTING
        let workspace_path = self.deps.workspace.exercise_path(task.language, &task.exercise);
        let outcome = self.deps.test_runner.run(&workspace_path, task.language).await?;
        self.deps.workspace.commit(task.language, &task.exercise, task.run_id).await?;

        Ok(outcome.passed)
    }

    /// Apply one `RUNNING`-phase event. Returns `Some(passed_stage)` once a
    /// terminal event (`TaskCompleted`/`TaskAborted`) has been seen.
    async fn apply_event(
        &self,
        task_id: i64,
        run_id: i64,
        metrics: &mut TaskMetrics,
        event: TaskEvent,
    ) -> Result<Option<bool>> {
        match event {
            TaskEvent::TaskTokenUsageUpdated { tokens_in, tokens_out, tokens_context, cache_reads, cache_writes, cost } => {
                metrics.tokens_in = tokens_in;
                metrics.tokens_out = tokens_out;
                metrics.tokens_context = tokens_context;
                metrics.cache_reads = cache_reads;
                metrics.cache_writes = cache_writes;
                metrics.cost = cost;
                Ok(None)
            }
            TaskEvent::TaskToolFailed { tool_name, error } => {
                *metrics.tool_usage.entry(tool_name.clone()).or_insert(0) += 1;
                if let Err(err) = self.deps.store.record_tool_error(run_id, task_id, &tool_name, &error).await {
                    tracing::warn!(task_id, error = %err, "failed to record tool error");
                }
                Ok(None)
            }
            TaskEvent::TaskCompleted {} => Ok(Some(true)),
            TaskEvent::TaskAborted { reason } => {
                Err(EvalError::AgentCrash { task_id, detail: format!("agent aborted: {reason}") })
            }
            TaskEvent::TaskStarted { .. } | TaskEvent::EvalPass {} | TaskEvent::EvalFail { .. } => Ok(None),
            TaskEvent::TaskContextConfirmation { .. } => Ok(None),
        }
    }

    async fn cancel_in_flight(
        &self,
        session: &mut ipc_protocol::Session,
        handle: &mut Box<dyn crate::agent_supervisor::AgentProcessHandle>,
        task_id: i64,
    ) {
        tracing::info!(task_id, "cancellation requested, issuing CancelTask");
        let _ = session.send(&TaskCommand::CancelTask {}).await;

        match handle.wait(self.deps.cancel_grace).await {
            Ok(ExitCause::Normal | ExitCause::Crash) => {}
            _ => {
                tracing::info!(task_id, "agent did not exit within grace period, killing");
                let _ = handle.kill().await;
            }
        }
    }
}
