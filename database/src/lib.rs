//! SQLite-backed [`eval_core::Store`] implementation for the evaluation
//! harness.
//!
//! # Features
//!
//! - SQLite with WAL mode for concurrent task writers
//! - Schema migrations embedded via `sqlx::migrate!`
//! - Connection pooling
//! - `EvalError` mapping for constraint violations, including duplicate-step
//!   detection
//!
//! # Usage
//!
//! ```rust,no_run
//! use eval_store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::new(":memory:").await?;
//!     store.migrate().await?;
//!     store.health_check().await?;
//!     Ok(())
//! }
//! ```

mod common;
mod sqlite;

pub use sqlite::SqliteStore;

pub use eval_core::{
    error::{EvalError, Result},
    models::{Benchmark, ExistingRun, Language, NewRun, Run, RunAggregate, Step, Task, TaskMetrics},
    store::Store,
};
