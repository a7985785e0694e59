use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use eval_core::{error::Result, models::Language};
use tokio::process::Command;
use tokio::time;

const TEST_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of running a task's test commands: pass/fail plus combined
/// stdout/stderr for diagnostics. `passed` is derived purely from exit
/// status; `output` is never consulted to flip it.
pub struct TestOutcome {
    pub passed: bool,
    pub output: String,
}

/// Executes a language's fixed, ordered test-command sequence in a task's
/// workspace. The first failing command short-circuits the rest.
///
/// Grounded on the `RunTestsTool::run_command` pattern (spawn a shell,
/// capture combined stdout/stderr, judge pass/fail by exit status alone),
/// generalized from a single ad hoc command to the per-language ordered
/// tables in §4.7.
pub struct TestRunner;

impl TestRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run the command sequence for `language` inside `workspace`. An
    /// unknown language (there is none, since `Language` is a closed enum
    /// here) would report `passed=false`; each concrete variant always has
    /// a command table.
    pub async fn run(&self, workspace: &Path, language: Language) -> Result<TestOutcome> {
        let commands = command_table(language);
        let mut combined_output = String::new();

        for command in commands {
            let result = run_one(workspace, command).await?;
            combined_output.push_str(&format!("$ {}\n{}\n", command.join(" "), result.output));

            if !result.passed {
                return Ok(TestOutcome { passed: false, output: combined_output });
            }
        }

        Ok(TestOutcome { passed: true, output: combined_output })
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn command_table(language: Language) -> &'static [&'static [&'static str]] {
    match language {
        Language::Go => &[&["go", "test", "./..."]],
        Language::Javascript => &[&["pnpm", "install", "--ignore-workspace"], &["pnpm", "test"]],
        Language::Python => &[&["pytest", "-o", "markers=task", "*_test.py"]],
        Language::Rust => &[&["cargo", "test"]],
        Language::Java => &[&["./gradlew", "test"]],
    }
}

struct CommandResult {
    passed: bool,
    output: String,
}

async fn run_one(workspace: &Path, command: &[&str]) -> Result<CommandResult> {
    let (program, args) = command.split_first().expect("command tables are never empty");

    let spawn = Command::new(program)
        .args(args)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match time::timeout(TEST_COMMAND_TIMEOUT, spawn).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Ok(CommandResult {
                passed: false,
                output: format!("failed to spawn {program}: {err}"),
            })
        }
        Err(_) => {
            return Ok(CommandResult {
                passed: false,
                output: format!("{program} timed out after {TEST_COMMAND_TIMEOUT:?}"),
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = if stderr.is_empty() { stdout.to_string() } else { format!("{stdout}\nSTDERR:\n{stderr}") };

    Ok(CommandResult { passed: output.status.success(), output: combined })
}
