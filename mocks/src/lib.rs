//! Mock implementations and test utilities for the evaluation harness.
//!
//! This crate provides the testing infrastructure shared by `orchestrator`'s
//! unit tests and by `eval-integration-tests`:
//! - an in-memory [`Store`](eval_core::store::Store) implementation
//! - fluent builders for every store-backed entity
//! - realistic random data generators and `proptest` strategies
//! - custom assertion helpers
//! - a generic store contract test suite

pub mod assertions;
pub mod builders;
pub mod contracts;
pub mod fixtures;
pub mod generators;
pub mod store;

pub use assertions::*;
pub use builders::*;
pub use contracts::*;
pub use fixtures::*;
pub use generators::*;
pub use store::MockStore;
