use std::sync::Arc;

use dashmap::DashMap;

use crate::models::TaskContext;

/// Shared, concurrent join table mediating between an agent's opaque
/// identifier (`rooTaskId`) and the store's numeric task id, plus the
/// in-memory [`TaskContext`] for each task currently in flight.
///
/// This is the only component that understands both identifier spaces;
/// everything below it (the `Store`, the `SpanIngestor`'s persistence step)
/// only ever sees numeric ids. Each task's slot is guarded independently by
/// `DashMap`'s per-shard locking, matching the "per-task fine-grained lock"
/// requirement on shared registry state.
#[derive(Clone, Default)]
pub struct TaskContextRegistry {
    agent_to_task: Arc<DashMap<String, i64>>,
    contexts: Arc<DashMap<i64, TaskContext>>,
}

impl TaskContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert of an agent-id → numeric-id mapping.
    pub fn register(&self, agent_task_id: impl Into<String>, numeric_task_id: i64) {
        self.agent_to_task.insert(agent_task_id.into(), numeric_task_id);
    }

    /// Resolve an agent's opaque id to the store's numeric id, if known.
    pub fn resolve(&self, agent_task_id: &str) -> Option<i64> {
        self.agent_to_task.get(agent_task_id).map(|entry| *entry.value())
    }

    /// Attach or replace the context for a numeric task id.
    pub fn set_context(&self, numeric_task_id: i64, context: TaskContext) {
        self.contexts.insert(numeric_task_id, context);
    }

    /// Fetch a clone of the context for a numeric task id, if present.
    pub fn get_context(&self, numeric_task_id: i64) -> Option<TaskContext> {
        self.contexts.get(&numeric_task_id).map(|entry| entry.value().clone())
    }

    /// Atomically bump a task's step counter and return the next
    /// `step_number`, starting at 1. Returns `None` if no context is
    /// registered for this task (the caller should drop the span).
    pub fn next_step_number(&self, numeric_task_id: i64) -> Option<u32> {
        let mut entry = self.contexts.get_mut(&numeric_task_id)?;
        entry.current_step += 1;
        Some(entry.current_step)
    }

    /// Drop the mapping and context for a task, called during terminal
    /// teardown. Idempotent — dropping an already-absent task is a no-op.
    pub fn drop_task(&self, agent_task_id: &str, numeric_task_id: i64) {
        self.agent_to_task.remove(agent_task_id);
        self.contexts.remove(&numeric_task_id);
    }

    /// Number of tasks with a live context. Used by tests asserting that a
    /// scheduler drain leaves zero registry entries (P5).
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context(task_id: i64) -> TaskContext {
        TaskContext {
            task_id,
            run_id: 1,
            mcp_server: "filesystem".to_string(),
            user_intent: "solve".to_string(),
            start_time: Utc::now(),
            current_step: 0,
            total_steps: 0,
        }
    }

    #[test]
    fn register_and_resolve_round_trip() {
        let registry = TaskContextRegistry::new();
        registry.register("agent-1", 42);
        assert_eq!(registry.resolve("agent-1"), Some(42));
        assert_eq!(registry.resolve("agent-unknown"), None);
    }

    #[test]
    fn double_register_is_idempotent() {
        let registry = TaskContextRegistry::new();
        registry.register("agent-1", 42);
        registry.register("agent-1", 42);
        assert_eq!(registry.resolve("agent-1"), Some(42));
    }

    #[test]
    fn next_step_number_increments_from_one() {
        let registry = TaskContextRegistry::new();
        registry.set_context(1, context(1));
        assert_eq!(registry.next_step_number(1), Some(1));
        assert_eq!(registry.next_step_number(1), Some(2));
        assert_eq!(registry.next_step_number(1), Some(3));
    }

    #[test]
    fn next_step_number_without_context_returns_none() {
        let registry = TaskContextRegistry::new();
        assert_eq!(registry.next_step_number(999), None);
    }

    #[test]
    fn drop_task_removes_both_mapping_and_context() {
        let registry = TaskContextRegistry::new();
        registry.register("agent-1", 1);
        registry.set_context(1, context(1));
        assert_eq!(registry.len(), 1);

        registry.drop_task("agent-1", 1);
        assert_eq!(registry.resolve("agent-1"), None);
        assert_eq!(registry.get_context(1), None);
        assert!(registry.is_empty());

        // idempotent
        registry.drop_task("agent-1", 1);
        assert!(registry.is_empty());
    }
}
