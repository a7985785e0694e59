use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level, layered configuration: built-in defaults, then an optional
/// TOML file, then `EVAL_`-prefixed environment variables, then CLI flags
/// applied by the binary after loading. Each layer overrides the previous.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ipc: IpcConfig,
    pub scheduler: SchedulerConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
    /// Read-only root of the exercises tree, `{root}/{language}/{exercise}`.
    pub exercises_root: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite database URL. No default — must be set via file, env, or CLI.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IpcConfig {
    /// Filesystem path of the IPC rendezvous socket.
    pub socket_path: String,
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of in-flight tasks (K in §4.8).
    pub concurrency: u32,
    /// Minimum gap between launches during the cold-start ramp (D).
    pub inter_start_delay_secs: u64,
    /// Task-level upper time bound before a forced kill.
    pub task_timeout_secs: u64,
    /// Per test-command timeout.
    pub test_timeout_secs: u64,
    /// Grace period between `CancelTask` and a forced kill.
    pub cancel_grace_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelemetryConfig {
    /// Address the OTLP/HTTP traces ingress binds to.
    pub otlp_listen_addr: String,
    /// First port tried for the OTLP listener; the server auto-selects
    /// upward from here if it's taken.
    pub otlp_base_port: u16,
    /// MCP server names the `SpanIngestor` accepts spans from.
    pub mcp_server_allowlist: Vec<String>,
    /// Policy flag resolving an ambiguity in the source system: whether a
    /// benchmark row is created even if no spans ever arrive for a task.
    pub create_empty_benchmark: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl Config {
    /// Load configuration from the built-in defaults, overridden by
    /// `EVAL_`-prefixed environment variables.
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("EVAL")
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build().context("failed to build configuration")?;
        let mut result: Config = built
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        Self::apply_standard_env_vars(&mut result);
        Ok(result)
    }

    /// Load configuration from a specific TOML file, still subject to
    /// `EVAL_`-prefixed environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("EVAL")
                    .separator("_")
                    .try_parsing(true),
            );

        let built = builder
            .build()
            .context("failed to build configuration from file")?;
        built
            .try_deserialize()
            .context("failed to deserialize configuration from file")
    }

    /// Apply the handful of un-prefixed environment variables conventional
    /// deployments set directly.
    fn apply_standard_env_vars(config: &mut Config) {
        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = Some(database_url);
        }
        if let Ok(socket_path) = env::var("EVAL_SOCKET_PATH") {
            config.ipc.socket_path = socket_path;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }

    pub fn database_url(&self) -> Result<String> {
        self.database
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("database URL must be set via config, EVAL_DATABASE__URL, or DATABASE_URL"))
    }

    /// Validate cross-field invariants not already enforced by the type
    /// system. Called once at startup before any task is scheduled.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(anyhow::anyhow!(
                    "invalid log level: {other}. Must be one of: trace, debug, info, warn, error"
                ));
            }
        }

        if self.scheduler.concurrency == 0 {
            return Err(anyhow::anyhow!("scheduler.concurrency must be at least 1"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("database.max_connections must be greater than 0"));
        }
        if self.ipc.socket_path.trim().is_empty() {
            return Err(anyhow::anyhow!("ipc.socket_path must not be empty"));
        }
        if self.exercises_root.trim().is_empty() {
            return Err(anyhow::anyhow!("exercises_root must not be empty"));
        }

        Ok(())
    }
}
