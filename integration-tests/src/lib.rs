//! Shared scaffolding for the evaluation harness's end-to-end tests.
//!
//! Each `tests/*.rs` file drives the real [`orchestrator`] components
//! (`Scheduler`, `SessionDriver`, `SpanIngestor`) against scripted agents
//! that speak the wire protocol directly over a Unix socket, the same
//! pattern `orchestrator`'s own `session_driver`/`scheduler` test modules
//! use, just promoted out of `#[cfg(test)]` so every scenario file can
//! reuse it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eval_core::error::Result;
use eval_core::ipc_messages::{TaskCommand, TaskEvent};
use eval_core::models::Language;
use eval_core::registry::TaskContextRegistry;
use eval_core::store::Store;
use ipc_protocol::{read_frame, write_frame, IpcTransport};
use orchestrator::{AgentLauncher, AgentProcessHandle, DriverTask, ExitCause, SessionDependencies, SpanIngestor, TestRunner, Workspace};
use tokio::net::UnixStream;

/// A unique socket path under a freshly created temp directory. The
/// directory is leaked deliberately (mirroring the teacher's own test
/// helper) so the path stays valid for the rest of the test.
pub fn socket_path() -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eval-test.sock");
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

/// Seed a bare git repository at `{root}/rust/{exercise}` with one commit on
/// `main`, the minimum `Workspace::prepare` needs to check out a branch.
pub async fn seeded_exercise(root: &Path, exercise: &str) {
    let dir = root.join("rust").join(exercise);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.name", "seed"],
        vec!["config", "user.email", "seed@localhost"],
    ] {
        tokio::process::Command::new("git").args(&args).current_dir(&dir).output().await.unwrap();
    }
    tokio::fs::write(dir.join("README.md"), b"seed").await.unwrap();
    tokio::process::Command::new("git").args(["add", "-A"]).current_dir(&dir).output().await.unwrap();
    tokio::process::Command::new("git").args(["commit", "-m", "seed"]).current_dir(&dir).output().await.unwrap();
}

/// Like [`seeded_exercise`], but the seeded commit is a real minimal crate
/// whose `cargo test` passes, so a full `SessionDriver` run can reach a
/// genuine `passed=true` `TESTING` verdict instead of failing on a missing
/// `Cargo.toml`.
pub async fn seeded_passing_rust_exercise(root: &Path, exercise: &str) {
    let dir = root.join("rust").join(exercise);
    tokio::fs::create_dir_all(dir.join("src")).await.unwrap();
    for args in [
        vec!["init", "-b", "main"],
        vec!["config", "user.name", "seed"],
        vec!["config", "user.email", "seed@localhost"],
    ] {
        tokio::process::Command::new("git").args(&args).current_dir(&dir).output().await.unwrap();
    }
    tokio::fs::write(
        dir.join("Cargo.toml"),
        format!("[package]\nname = \"{exercise}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n"),
    )
    .await
    .unwrap();
    tokio::fs::write(
        dir.join("src/lib.rs"),
        b"pub fn solve() -> bool { true }\n\n#[test]\nfn it_solves() { assert!(solve()); }\n",
    )
    .await
    .unwrap();
    tokio::process::Command::new("git").args(["add", "-A"]).current_dir(&dir).output().await.unwrap();
    tokio::process::Command::new("git").args(["commit", "-m", "seed"]).current_dir(&dir).output().await.unwrap();
}

pub fn driver_task(task_id: i64, run_id: i64, exercise: &str) -> DriverTask {
    DriverTask {
        task_id,
        run_id,
        language: Language::Rust,
        exercise: exercise.to_string(),
        base_branch: "main".to_string(),
        user_intent: format!("solve {exercise}"),
        configuration: serde_json::Value::Null,
    }
}

/// Build [`SessionDependencies`] wired to `store`/`launcher` over a fresh
/// socket bound at `socket_path`, with short timeouts suited to tests.
pub fn test_deps(
    store: Arc<dyn Store>,
    launcher: Arc<dyn AgentLauncher>,
    root: &Path,
    socket_path: &str,
) -> SessionDependencies {
    let registry = TaskContextRegistry::new();
    SessionDependencies {
        store: store.clone(),
        registry: registry.clone(),
        ingestor: Arc::new(SpanIngestor::new(store, registry, vec!["filesystem".to_string()])),
        launcher,
        transport: Arc::new(IpcTransport::bind(socket_path).unwrap()),
        workspace: Arc::new(Workspace::new(root)),
        test_runner: Arc::new(TestRunner::new()),
        mcp_server: "filesystem".to_string(),
        socket_path: socket_path.to_string(),
        otlp_endpoint: "http://127.0.0.1:4318".to_string(),
        handshake_timeout: Duration::from_millis(200),
        task_timeout: Duration::from_secs(10),
        cancel_grace: Duration::from_millis(100),
        create_empty_benchmark: false,
    }
}

/// A handle that reports `Normal` exit immediately — every scripted agent
/// below runs as a spawned task rather than a real subprocess, so there is
/// nothing for `AgentProcessHandle` to actually wait on or kill.
pub struct NoopHandle {
    pub task_id: i64,
}

#[async_trait]
impl AgentProcessHandle for NoopHandle {
    async fn wait(&mut self, _timeout: Duration) -> Result<ExitCause> {
        Ok(ExitCause::Normal)
    }
    async fn kill(&mut self) -> Result<()> {
        Ok(())
    }
    fn task_id(&self) -> i64 {
        self.task_id
    }
}

/// Connects back to the orchestrator's rendezvous socket and plays a single
/// scripted exchange: confirm the handshake (successfully or not, per
/// `confirm`), then, only if confirmation succeeded, emit `events` in order.
pub struct ScriptedAgentLauncher {
    pub socket_path: String,
    /// `None` confirms the handshake; `Some(reason)` rejects it.
    pub reject_with: Option<String>,
    pub events: Vec<TaskEvent>,
}

#[async_trait]
impl AgentLauncher for ScriptedAgentLauncher {
    async fn launch(&self, task_id: i64, _socket_path: &str, _otlp_endpoint: &str) -> Result<Box<dyn AgentProcessHandle>> {
        let path = self.socket_path.clone();
        let reject_with = self.reject_with.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let stream = UnixStream::connect(&path).await.unwrap();
            let (read_half, write_half) = tokio::io::split(stream);
            let mut writer = write_half;
            let mut reader = read_half;

            let payload = read_frame(&mut reader).await.unwrap().unwrap();
            let _: TaskCommand = serde_json::from_slice(&payload).unwrap();

            let confirmation = match &reject_with {
                None => TaskEvent::TaskContextConfirmation { success: true, error: None },
                Some(reason) => TaskEvent::TaskContextConfirmation { success: false, error: Some(reason.clone()) },
            };
            write_frame(&mut writer, &serde_json::to_vec(&confirmation).unwrap()).await.unwrap();
            if reject_with.is_some() {
                return;
            }

            // StartNewTask
            let payload = read_frame(&mut reader).await.unwrap().unwrap();
            let _: TaskCommand = serde_json::from_slice(&payload).unwrap();

            for event in &events {
                write_frame(&mut writer, &serde_json::to_vec(event).unwrap()).await.unwrap();
            }

            // Drain whatever teardown message follows (CloseTask or CancelTask).
            let _ = read_frame(&mut reader).await;
        });

        Ok(Box::new(NoopHandle { task_id }))
    }
}

/// Connects, confirms the handshake, then never sends anything else —
/// models an agent that hangs mid-`RUNNING`.
pub struct HangingAgentLauncher {
    pub socket_path: String,
}

#[async_trait]
impl AgentLauncher for HangingAgentLauncher {
    async fn launch(&self, task_id: i64, _socket_path: &str, _otlp_endpoint: &str) -> Result<Box<dyn AgentProcessHandle>> {
        let path = self.socket_path.clone();
        tokio::spawn(async move {
            let stream = UnixStream::connect(&path).await.unwrap();
            let (read_half, write_half) = tokio::io::split(stream);
            let mut writer = write_half;
            let mut reader = read_half;

            let payload = read_frame(&mut reader).await.unwrap().unwrap();
            let _: TaskCommand = serde_json::from_slice(&payload).unwrap();
            let confirmation = TaskEvent::TaskContextConfirmation { success: true, error: None };
            write_frame(&mut writer, &serde_json::to_vec(&confirmation).unwrap()).await.unwrap();

            // Block forever instead of ever answering StartNewTask.
            std::future::pending::<()>().await;
        });

        Ok(Box::new(NoopHandle { task_id }))
    }
}

/// Never connects at all — models handshake timeout with no agent present.
pub struct NeverConnectsLauncher;

#[async_trait]
impl AgentLauncher for NeverConnectsLauncher {
    async fn launch(&self, task_id: i64, _socket_path: &str, _otlp_endpoint: &str) -> Result<Box<dyn AgentProcessHandle>> {
        Ok(Box::new(NoopHandle { task_id }))
    }
}
