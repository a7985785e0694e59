use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{Config, LogFormat, LoggingConfig};
use crate::span_ingestor::SpanIngestor;

/// Initialize the tracing subscriber used for the orchestrator's own logs.
/// Independent of the OpenTelemetry trace pipeline the `SpanIngestor`
/// ingests from agents; this is the orchestrator's own stderr/stdout logging.
pub fn init_telemetry(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid log level configuration")?;

    let registry = Registry::default().with(env_filter);

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);

            registry.with(fmt_layer).init();
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_list(true)
                .flatten_event(true);

            registry.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false);

            registry.with(fmt_layer).init();
        }
    }

    tracing::info!(
        log_level = %config.level,
        log_format = ?config.format,
        "telemetry initialized"
    );

    Ok(())
}

/// Owns the OpenTelemetry SDK tracer provider wired to the run's
/// [`SpanIngestor`]. Dropping this (or calling [`TelemetryGuard::shutdown`])
/// flushes and tears down the provider; one is created per run, not per
/// process, since the ingestor's span history and sequencing state are
/// run-scoped.
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

impl TelemetryGuard {
    /// Build an SDK tracer provider whose span processor drains into
    /// `ingestor`. The orchestrator itself does not emit spans through this
    /// provider; it exists purely to host the OTLP/HTTP ingress that agents'
    /// MCP spans arrive on.
    pub fn new(ingestor: SpanIngestor) -> Self {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(ingestor)
            .build();
        // Registering a no-op tracer keeps the provider's background work
        // (if any) alive without the orchestrator emitting its own spans.
        let _tracer = provider.tracer("eval-orchestrator");
        Self { provider }
    }

    /// Flush and shut down the tracer provider. Idempotent; safe to call
    /// before drop.
    pub fn shutdown(&self) {
        if let Err(err) = self.provider.shutdown() {
            tracing::warn!(error = %err, "failed to shut down tracer provider cleanly");
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create a span for database operations.
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::info_span!("database_operation", operation = $operation)
    };
    ($operation:expr, $($key:expr => $value:expr),*) => {
        tracing::info_span!("database_operation", operation = $operation, $($key = $value),*)
    };
}

/// Create a span for scheduler operations.
#[macro_export]
macro_rules! scheduler_span {
    ($operation:expr) => {
        tracing::info_span!("scheduler_operation", operation = $operation)
    };
    ($operation:expr, $($key:expr => $value:expr),*) => {
        tracing::info_span!("scheduler_operation", operation = $operation, $($key = $value),*)
    };
}

/// Create a span for a single task's session lifecycle.
#[macro_export]
macro_rules! task_span {
    ($task_id:expr) => {
        tracing::info_span!("task_session", task_id = $task_id)
    };
    ($task_id:expr, $($key:expr => $value:expr),*) => {
        tracing::info_span!("task_session", task_id = $task_id, $($key = $value),*)
    };
}

/// Log run startup information.
pub fn log_startup_info(config: &Config) {
    tracing::info!(
        socket_path = %config.ipc.socket_path,
        concurrency = config.scheduler.concurrency,
        otlp_listen_addr = %config.telemetry.otlp_listen_addr,
        otlp_base_port = config.telemetry.otlp_base_port,
        "orchestrator starting up"
    );
}

/// Log run shutdown information.
pub fn log_shutdown_info() {
    tracing::info!("orchestrator shutting down gracefully");
}

/// Log configuration validation outcome.
pub fn log_config_validation(config: &Config) {
    match config.validate() {
        Ok(()) => tracing::info!("configuration validation passed"),
        Err(e) => tracing::error!(error = %e, "configuration validation failed"),
    }
}

/// Error reporting helper; walks the error's source chain.
#[allow(dead_code)]
pub fn report_error(error: &anyhow::Error, context: &str) {
    tracing::error!(error = %error, context = context, "operation failed");

    let mut current = error.source();
    let mut depth = 1;
    while let Some(err) = current {
        tracing::error!(error = %err, depth = depth, "error cause");
        current = err.source();
        depth += 1;
    }
}

/// Performance monitoring helper; warns on operations over one second.
#[allow(dead_code)]
pub struct PerformanceTimer {
    start: std::time::Instant,
    operation: String,
}

impl PerformanceTimer {
    #[allow(dead_code)]
    pub fn new(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!(operation = %operation, "starting performance timer");
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    #[allow(dead_code)]
    pub fn finish(self) {
        let duration = self.start.elapsed();
        tracing::info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "operation completed"
        );

        if duration.as_millis() > 1000 {
            tracing::warn!(
                operation = %self.operation,
                duration_ms = duration.as_millis(),
                "slow operation detected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn performance_timer_does_not_panic() {
        let timer = PerformanceTimer::new("test_operation");
        std::thread::sleep(Duration::from_millis(5));
        timer.finish();
    }

    #[test]
    fn log_formats_are_distinguishable() {
        let configs = vec![
            LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Json,
            },
            LoggingConfig {
                level: "warn".to_string(),
                format: LogFormat::Compact,
            },
        ];

        for config in configs {
            assert!(matches!(
                config.format,
                LogFormat::Pretty | LogFormat::Json | LogFormat::Compact
            ));
        }
    }
}
