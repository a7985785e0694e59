//! Evaluation Core Library
//!
//! Foundational domain models, persistence trait, IPC message schemas, and
//! the task-context registry shared by every component of the MCP agent
//! evaluation harness. All other crates in this workspace depend on the
//! types defined here.
//!
//! # Architecture
//!
//! - [`models`] — domain models (`Run`, `Task`, `Benchmark`, `Step`, ...)
//! - [`error`] — error taxonomy and result handling
//! - [`store`] — the `Store` trait for typed persistence
//! - [`ipc_messages`] — `TaskCommand`/`TaskEvent` wire schemas
//! - [`registry`] — `TaskContextRegistry`, the identifier-duality join table
//! - [`validation`] — business-logic validation utilities
//!
//! # Example
//!
//! ```rust
//! use eval_core::{
//!     models::NewRun,
//!     models::Language,
//!     validation::EvalValidator,
//! };
//! use serde_json::json;
//!
//! let spec = NewRun {
//!     model: "claude-sonnet".to_string(),
//!     concurrency: 4,
//!     socket_path: "/tmp/eval-run.sock".to_string(),
//!     settings: json!({}),
//! };
//!
//! EvalValidator::validate_new_run(&spec).unwrap();
//! assert_eq!(Language::parse("rust"), Some(Language::Rust));
//! ```

pub mod error;
pub mod ipc_messages;
pub mod models;
pub mod registry;
pub mod store;
pub mod validation;

pub use error::{EvalError, Result};
pub use ipc_messages::{TaskCommand, TaskEvent};
pub use models::{
    Benchmark, ExistingRun, Language, NewRun, Run, RunAggregate, Step, Task, TaskContext,
    TaskMetrics, TaskOutcome, ToolError,
};
pub use registry::TaskContextRegistry;
pub use store::Store;
pub use validation::EvalValidator;

/// Current version of the core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name.
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_constants_are_populated() {
        assert!(!VERSION.is_empty());
        assert_eq!(CRATE_NAME, "eval-core");
    }

    #[test]
    fn re_exports_resolve() {
        let lang = Language::Rust;
        assert_eq!(format!("{lang}"), "rust");

        let error = EvalError::task_not_found(1);
        assert!(error.is_not_found());
    }
}