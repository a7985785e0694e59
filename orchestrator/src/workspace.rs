use std::path::{Path, PathBuf};
use std::process::Stdio;

use eval_core::{error::EvalError, error::Result, models::Language};
use tokio::process::Command;
use uuid::Uuid;

const AUTHOR_NAME: &str = "eval-orchestrator";
const AUTHOR_EMAIL: &str = "eval-orchestrator@localhost";

/// Produces a clean, isolated working tree per task on a run-scoped branch,
/// rooted at `{exercisesRoot}/{language}/{exercise}`.
///
/// Grounded on the `git`-subprocess style of a `GitService`: every operation
/// is a `tokio::process::Command` invocation, checked for exit status rather
/// than parsed from stdout.
pub struct Workspace {
    exercises_root: PathBuf,
}

impl Workspace {
    pub fn new(exercises_root: impl Into<PathBuf>) -> Self {
        Self { exercises_root: exercises_root.into() }
    }

    /// Resolve and validate the exercise directory for a task, without
    /// mutating it. Callers should check this exists before scheduling the
    /// task at all (§7's "configuration error" class).
    pub fn exercise_path(&self, language: Language, exercise: &str) -> PathBuf {
        self.exercises_root.join(language.as_str()).join(exercise)
    }

    /// Prepare a clean checkout of `base` on a fresh run-scoped branch
    /// `runs/{run_id}-{uuid}`. Returns the branch name actually created.
    pub async fn prepare(&self, run_id: i64, language: Language, exercise: &str, base: &str) -> Result<String> {
        let path = self.exercise_path(language, exercise);
        if !path.is_dir() {
            return Err(EvalError::Configuration(format!(
                "exercise directory does not exist: {}",
                path.display()
            )));
        }

        run_git(&path, &["config", "user.name", AUTHOR_NAME]).await?;
        run_git(&path, &["config", "user.email", AUTHOR_EMAIL]).await?;
        run_git(&path, &["checkout", "-f", base]).await?;
        run_git(&path, &["clean", "-fd"]).await?;

        let branch = format!("runs/{run_id}-{}", Uuid::new_v4());
        run_git(&path, &["checkout", "-b", &branch, base]).await?;

        Ok(branch)
    }

    /// Stage and commit everything in the workspace. A no-op diff is not an
    /// error — the task's outcome must never hinge on whether the agent
    /// happened to change any files.
    pub async fn commit(&self, language: Language, exercise: &str, run_id: i64) -> Result<()> {
        let path = self.exercise_path(language, exercise);
        run_git(&path, &["add", "-A"]).await?;

        let message = format!("Run #{run_id}");
        match run_git(&path, &["commit", "-m", &message]).await {
            Ok(()) => Ok(()),
            Err(EvalError::Internal(detail)) if detail.contains("nothing to commit") => Ok(()),
            Err(other) => Err(other),
        }
    }
}

async fn run_git(workdir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| EvalError::Transient(format!("failed to spawn git {args:?}: {err}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(EvalError::Internal(format!(
        "git {args:?} failed ({}): {stderr}{stdout}",
        output.status
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn init_exercise(root: &Path, language: Language, exercise: &str) -> PathBuf {
        let dir = root.join(language.as_str()).join(exercise);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        run_git(&dir, &["init", "-b", "main"]).await.unwrap();
        run_git(&dir, &["config", "user.name", "seed"]).await.unwrap();
        run_git(&dir, &["config", "user.email", "seed@localhost"]).await.unwrap();
        tokio::fs::write(dir.join("README.md"), b"seed").await.unwrap();
        run_git(&dir, &["add", "-A"]).await.unwrap();
        run_git(&dir, &["commit", "-m", "seed"]).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn prepare_creates_run_scoped_branch() {
        let root = tempdir().unwrap();
        init_exercise(root.path(), Language::Rust, "two-fer").await;

        let workspace = Workspace::new(root.path());
        let branch = workspace.prepare(7, Language::Rust, "two-fer", "main").await.unwrap();
        assert!(branch.starts_with("runs/7-"));
    }

    #[tokio::test]
    async fn prepare_rejects_missing_exercise_directory() {
        let root = tempdir().unwrap();
        let workspace = Workspace::new(root.path());
        let err = workspace.prepare(1, Language::Rust, "missing", "main").await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn commit_with_no_changes_does_not_fail() {
        let root = tempdir().unwrap();
        init_exercise(root.path(), Language::Rust, "two-fer").await;

        let workspace = Workspace::new(root.path());
        workspace.prepare(1, Language::Rust, "two-fer", "main").await.unwrap();
        workspace.commit(Language::Rust, "two-fer", 1).await.unwrap();
    }

    #[tokio::test]
    async fn commit_picks_up_new_files() {
        let root = tempdir().unwrap();
        let path = init_exercise(root.path(), Language::Rust, "two-fer").await;

        let workspace = Workspace::new(root.path());
        workspace.prepare(2, Language::Rust, "two-fer", "main").await.unwrap();
        tokio::fs::write(path.join("solution.rs"), b"fn main() {}").await.unwrap();
        workspace.commit(Language::Rust, "two-fer", 2).await.unwrap();

        let log = Command::new("git")
            .args(["log", "--oneline", "-1"])
            .current_dir(&path)
            .output()
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&log.stdout).contains("Run #2"));
    }
}
