//! Evaluation orchestrator library.
//!
//! Owns the full lifecycle of one evaluation run: configuration, structured
//! logging and OTLP span ingestion, per-task git workspace isolation, agent
//! process supervision, the rendezvous IPC session protocol, and the
//! bounded-concurrency scheduler tying it all together. `main.rs` is a thin
//! CLI shell over [`scheduler::Scheduler`].

pub mod agent_supervisor;
pub mod config;
pub mod scheduler;
pub mod session_driver;
pub mod span_ingestor;
pub mod telemetry;
pub mod test_runner;
pub mod workspace;

pub use agent_supervisor::{AgentLauncher, AgentProcessHandle, AgentSupervisor, ExitCause};
pub use config::Config;
pub use scheduler::Scheduler;
pub use session_driver::{DriverOutcome, DriverTask, SessionDependencies, SessionDriver};
pub use span_ingestor::SpanIngestor;
pub use telemetry::{init_telemetry, TelemetryGuard};
pub use test_runner::{TestOutcome, TestRunner};
pub use workspace::Workspace;
