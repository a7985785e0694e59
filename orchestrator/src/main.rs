use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};

use eval_core::models::{Language, NewRun};
use eval_core::registry::TaskContextRegistry;
use eval_core::store::Store;
use eval_store::SqliteStore;
use ipc_protocol::IpcTransport;

use orchestrator::config::Config;
use orchestrator::session_driver::{DriverTask, SessionDependencies};
use orchestrator::span_ingestor::SpanIngestor;
use orchestrator::telemetry::{init_telemetry, log_config_validation, log_shutdown_info, log_startup_info};
use orchestrator::{AgentSupervisor, Scheduler, TelemetryGuard, TestRunner, Workspace};

#[derive(Parser)]
#[command(name = "eval-orchestrator")]
#[command(about = "Benchmarks how a coding agent uses MCP tool-server integrations")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Resume a pre-created run instead of starting a new one.
    #[arg(long, env = "EVAL_RUN_ID")]
    run_id: Option<i64>,

    /// Model identifier recorded on the run. Required for a new run.
    #[arg(long, env = "EVAL_MODEL")]
    model: Option<String>,

    /// Only schedule exercises whose name contains one of these substrings.
    #[arg(long, env = "EVAL_INCLUDE", value_delimiter = ',')]
    include: Vec<String>,

    /// Skip exercises whose name contains one of these substrings.
    #[arg(long, env = "EVAL_EXCLUDE", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Explicit `language:exercise` pairs to schedule, bypassing directory
    /// discovery. May be repeated.
    #[arg(long = "exercise", env = "EVAL_EXERCISE", value_delimiter = ',')]
    exercises: Vec<String>,

    /// Override the configured admission bound (K).
    #[arg(long, env = "EVAL_CONCURRENT")]
    concurrent: Option<u32>,

    /// Free-text description stored in the run's settings.
    #[arg(long, env = "EVAL_DESCRIPTION")]
    description: Option<String>,

    /// Root of the read-only exercises tree.
    #[arg(long, env = "EVAL_EXERCISES_ROOT")]
    exercises_root: Option<String>,

    /// Agent command template, e.g. "claude-code --mcp filesystem".
    #[arg(long, env = "EVAL_AGENT_COMMAND")]
    agent_command: String,

    /// Configuration file path, layered over the embedded defaults.
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            info!(path = %path, "loading configuration from file");
            Config::from_file(path)?
        }
        None => {
            info!("loading configuration from environment");
            Config::from_env()?
        }
    };

    if let Some(ref root) = cli.exercises_root {
        config.exercises_root = root.clone();
    }
    if let Some(concurrent) = cli.concurrent {
        config.scheduler.concurrency = concurrent;
    }

    Ok(config)
}

/// Discover every `{root}/{language}/{exercise}` directory, then apply the
/// CLI's `--exercise`, `--include` and `--exclude` filters. `--exercise`
/// (one or more explicit `language:exercise` pairs) takes priority over
/// discovery; `--include`/`--exclude` only apply when it is empty.
fn discover_exercises(cli: &Cli, exercises_root: &str) -> Result<Vec<(Language, String)>> {
    if !cli.exercises.is_empty() {
        return cli
            .exercises
            .iter()
            .map(|pair| {
                let (lang, name) = pair
                    .split_once(':')
                    .with_context(|| format!("--exercise {pair:?} is not in `language:exercise` form"))?;
                let language = Language::parse(lang)
                    .with_context(|| format!("unknown language in --exercise {pair:?}"))?;
                Ok((language, name.to_string()))
            })
            .collect();
    }

    let root = Path::new(exercises_root);
    let mut found = Vec::new();
    for lang_entry in std::fs::read_dir(root).with_context(|| format!("reading exercises root {exercises_root}"))? {
        let lang_entry = lang_entry?;
        if !lang_entry.file_type()?.is_dir() {
            continue;
        }
        let Some(language) = lang_entry.file_name().to_str().and_then(Language::parse) else {
            continue;
        };
        for exercise_entry in std::fs::read_dir(lang_entry.path())? {
            let exercise_entry = exercise_entry?;
            if !exercise_entry.file_type()?.is_dir() {
                continue;
            }
            let name = exercise_entry.file_name().to_string_lossy().into_owned();

            if !cli.include.is_empty() && !cli.include.iter().any(|needle| name.contains(needle.as_str())) {
                continue;
            }
            if cli.exclude.iter().any(|needle| name.contains(needle.as_str())) {
                continue;
            }
            found.push((language, name));
        }
    }
    found.sort_by(|a, b| (a.0.as_str(), &a.1).cmp(&(b.0.as_str(), &b.1)));
    Ok(found)
}

fn user_intent_for(language: Language, exercise: &str) -> String {
    format!("Solve the {exercise} exercise in {}.", language.as_str())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli).context("failed to load configuration")?;

    init_telemetry(&config.logging).context("failed to initialize telemetry")?;
    log_config_validation(&config);
    if let Err(err) = config.validate() {
        error!(error = %err, "configuration validation failed");
        std::process::exit(1);
    }
    log_startup_info(&config);

    let store: Arc<dyn Store> = {
        let sqlite = SqliteStore::new(&config.database_url()?).await.context("failed to open store")?;
        sqlite.migrate().await.context("failed to run migrations")?;
        sqlite.health_check().await.context("store health check failed")?;
        Arc::new(sqlite)
    };

    let (run_id, tasks) = match cli.run_id {
        Some(run_id) => {
            let existing = store.list_existing_run(run_id).await.context("failed to resume run")?;
            info!(run_id, outstanding = existing.outstanding_tasks.len(), "resuming existing run");
            let tasks = existing
                .outstanding_tasks
                .into_iter()
                .map(|task| DriverTask {
                    task_id: task.id,
                    run_id,
                    language: task.language,
                    user_intent: user_intent_for(task.language, &task.exercise),
                    exercise: task.exercise,
                    base_branch: "main".to_string(),
                    configuration: existing.run.settings.clone(),
                })
                .collect();
            (run_id, tasks)
        }
        None => {
            let model = cli.model.clone().context("--model is required when starting a new run")?;
            let settings = json!({ "description": cli.description });
            let run_id = store
                .create_run(NewRun {
                    model,
                    concurrency: config.scheduler.concurrency,
                    socket_path: config.ipc.socket_path.clone(),
                    settings: settings.clone(),
                })
                .await
                .context("failed to create run")?;

            let exercises = discover_exercises(&cli, &config.exercises_root)?;
            info!(run_id, count = exercises.len(), "scheduling exercises");

            let mut tasks = Vec::with_capacity(exercises.len());
            for (language, exercise) in exercises {
                let task_id = store.create_task(run_id, language, &exercise).await.context("failed to create task")?;
                tasks.push(DriverTask {
                    task_id,
                    run_id,
                    language,
                    user_intent: user_intent_for(language, &exercise),
                    exercise,
                    base_branch: "main".to_string(),
                    configuration: settings.clone(),
                });
            }
            (run_id, tasks)
        }
    };

    let registry = TaskContextRegistry::new();
    let mcp_server = config
        .telemetry
        .mcp_server_allowlist
        .first()
        .cloned()
        .unwrap_or_else(|| "filesystem".to_string());
    let ingestor = Arc::new(SpanIngestor::new(store.clone(), registry.clone(), config.telemetry.mcp_server_allowlist.clone()));
    let _telemetry_guard = TelemetryGuard::new((*ingestor).clone());

    let transport = Arc::new(IpcTransport::bind(&config.ipc.socket_path).context("failed to bind IPC socket")?);
    let launcher = Arc::new(AgentSupervisor::new(cli.agent_command.split_whitespace().map(str::to_string).collect()));
    let workspace = Arc::new(Workspace::new(config.exercises_root.clone()));
    let test_runner = Arc::new(TestRunner::new());

    let deps = SessionDependencies {
        store: store.clone(),
        registry,
        ingestor,
        launcher,
        transport,
        workspace,
        test_runner,
        mcp_server,
        socket_path: config.ipc.socket_path.clone(),
        otlp_endpoint: format!("http://{}:{}", config.telemetry.otlp_listen_addr, config.telemetry.otlp_base_port),
        handshake_timeout: Duration::from_secs(config.ipc.handshake_timeout_secs),
        task_timeout: Duration::from_secs(config.scheduler.task_timeout_secs),
        cancel_grace: Duration::from_secs(config.scheduler.cancel_grace_secs),
        create_empty_benchmark: config.telemetry.create_empty_benchmark,
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
            let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("failed to register SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, cancelling run"),
                _ = sigint.recv() => info!("received SIGINT, cancelling run"),
            }
        }
        #[cfg(windows)]
        {
            tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
            info!("received Ctrl+C, cancelling run");
        }

        let _ = cancel_tx.send(true);
    });

    let scheduler = Scheduler::new(config.scheduler.concurrency, Duration::from_secs(config.scheduler.inter_start_delay_secs));
    let outcomes = scheduler.schedule(tasks, deps, cancel_rx).await;

    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = outcomes.len() - passed;
    info!(run_id, passed, failed, "run drained");

    let aggregate = store.aggregate_run(run_id).await.context("failed to finalize run")?;
    info!(run_id, passed = aggregate.passed, failed = aggregate.failed, "run finalized");

    log_shutdown_info();
    Ok(())
}
