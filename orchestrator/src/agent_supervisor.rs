use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use eval_core::error::{EvalError, Result};
use tokio::process::{Child, Command};
use tokio::time;

/// How an agent process ended, reported without ever parsing its stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// Exited with status 0 before any wait deadline.
    Normal,
    /// Exited with a non-zero status.
    Crash,
    /// `wait()` was given a deadline and it elapsed before exit.
    Timeout,
    /// `kill()` was called on the handle.
    Killed,
}

/// Launches one agent process per task. Implemented by [`AgentSupervisor`]
/// for production use; the `SessionDriver`'s tests substitute a fake that
/// connects directly to the rendezvous socket instead of spawning a real
/// process, the same way the `Store` trait is swapped for a `MockStore`.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, task_id: i64, socket_path: &str, otlp_endpoint: &str) -> Result<Box<dyn AgentProcessHandle>>;
}

/// A running (or already-reaped) agent process, abstracted over the
/// concrete `Child` type so tests can substitute a fake.
#[async_trait]
pub trait AgentProcessHandle: Send {
    async fn wait(&mut self, timeout: Duration) -> Result<ExitCause>;
    async fn kill(&mut self) -> Result<()>;
    fn task_id(&self) -> i64;
}

/// Spawns and reaps one agent subprocess per task.
///
/// Grounded on the subprocess-manager pattern of spawning via
/// `tokio::process::Command` with `kill_on_drop(true)` and reaping through
/// non-blocking `try_wait()`/`wait()`, rather than stdout parsing: the
/// supervisor only cares about the rendezvous socket and exit status, never
/// the agent's own output.
pub struct AgentSupervisor {
    /// Command template used to invoke the agent, e.g. `["claude-code"]`.
    /// The socket path and OTLP endpoint are appended as trailing
    /// environment variables, never as parsed stdout contracts.
    command_template: Vec<String>,
}

impl AgentSupervisor {
    pub fn new(command_template: Vec<String>) -> Self {
        Self { command_template }
    }

    /// Launch one agent process for `task_id`, wiring the IPC rendezvous
    /// socket path and OTLP traces endpoint into its environment.
    pub fn run_agent(&self, task_id: i64, socket_path: &str, otlp_endpoint: &str) -> Result<AgentHandle> {
        let (program, args) = self
            .command_template
            .split_first()
            .ok_or_else(|| EvalError::Configuration("agent command template is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("EVAL_SOCKET_PATH", socket_path)
            .env("OTEL_EXPORTER_OTLP_ENDPOINT", otlp_endpoint)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // New process group so `kill()` can reap the whole tree, not
            // just the directly spawned process.
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|err| EvalError::AgentCrash { task_id, detail: format!("failed to spawn agent: {err}") })?;

        Ok(AgentHandle { task_id, child: Some(child) })
    }
}

#[async_trait]
impl AgentLauncher for AgentSupervisor {
    async fn launch(&self, task_id: i64, socket_path: &str, otlp_endpoint: &str) -> Result<Box<dyn AgentProcessHandle>> {
        let handle = self.run_agent(task_id, socket_path, otlp_endpoint)?;
        Ok(Box::new(handle))
    }
}

#[async_trait]
impl AgentProcessHandle for AgentHandle {
    async fn wait(&mut self, timeout: Duration) -> Result<ExitCause> {
        AgentHandle::wait(self, timeout).await
    }

    async fn kill(&mut self) -> Result<()> {
        AgentHandle::kill(self).await
    }

    fn task_id(&self) -> i64 {
        AgentHandle::task_id(self)
    }
}

/// Handle to one running (or already-reaped) agent process.
pub struct AgentHandle {
    task_id: i64,
    child: Option<Child>,
}

impl AgentHandle {
    /// Block until the process exits or `timeout` elapses, whichever comes
    /// first. Calling this again after a prior call returned is a logic
    /// error in the caller (the driver owns exactly one wait per handle).
    pub async fn wait(&mut self, timeout: Duration) -> Result<ExitCause> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| EvalError::Internal(format!("agent handle for task {} already consumed", self.task_id)))?;

        match time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                self.child = None;
                if status.success() {
                    Ok(ExitCause::Normal)
                } else {
                    Ok(ExitCause::Crash)
                }
            }
            Ok(Err(err)) => {
                self.child = None;
                Err(EvalError::AgentCrash {
                    task_id: self.task_id,
                    detail: format!("error waiting on agent process: {err}"),
                })
            }
            Err(_) => Ok(ExitCause::Timeout),
        }
    }

    /// Kill the entire process tree rooted at the agent. Idempotent — safe
    /// to call on an already-reaped handle.
    pub async fn kill(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: killpg with a valid process-group id is a plain
                // syscall; failure (e.g. ESRCH if already exited) is not
                // fatal here, we still fall through to reaping the child.
                unsafe {
                    libc::killpg(pid as libc::pid_t, libc::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        let _ = child.wait().await;
        self.child = None;
        Ok(())
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn normal_exit_is_reported() {
        let supervisor = AgentSupervisor::new(vec!["true".to_string()]);
        let mut handle = supervisor.run_agent(1, "/tmp/eval-test.sock", "http://127.0.0.1:4318").unwrap();
        let cause = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(cause, ExitCause::Normal);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_crash() {
        let supervisor = AgentSupervisor::new(vec!["false".to_string()]);
        let mut handle = supervisor.run_agent(1, "/tmp/eval-test.sock", "http://127.0.0.1:4318").unwrap();
        let cause = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(cause, ExitCause::Crash);
    }

    #[tokio::test]
    async fn wait_deadline_reports_timeout_without_killing() {
        let supervisor = AgentSupervisor::new(vec!["sleep".to_string(), "5".to_string()]);
        let mut handle = supervisor.run_agent(1, "/tmp/eval-test.sock", "http://127.0.0.1:4318").unwrap();
        let cause = handle.wait(Duration::from_millis(50)).await.unwrap();
        assert_eq!(cause, ExitCause::Timeout);
        handle.kill().await.unwrap();
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let supervisor = AgentSupervisor::new(vec!["sleep".to_string(), "5".to_string()]);
        let mut handle = supervisor.run_agent(1, "/tmp/eval-test.sock", "http://127.0.0.1:4318").unwrap();
        handle.kill().await.unwrap();
        handle.kill().await.unwrap();
    }

    #[test]
    fn empty_command_template_is_a_configuration_error() {
        let supervisor = AgentSupervisor::new(vec![]);
        let err = supervisor.run_agent(1, "/tmp/eval-test.sock", "http://127.0.0.1:4318").unwrap_err();
        assert!(err.is_configuration());
    }
}
