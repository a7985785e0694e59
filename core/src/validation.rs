use crate::{
    error::{EvalError, Result},
    models::NewRun,
};

/// Validation utilities for evaluation-harness inputs shared by the `Store`
/// and the orchestrator's task-creation path.
pub struct EvalValidator;

impl EvalValidator {
    /// Validate a [`NewRun`] spec before it is persisted.
    ///
    /// # Returns
    /// * `Ok(())` — the spec is well-formed.
    /// * `Err(EvalError::Validation)` — a field is empty or out of range.
    pub fn validate_new_run(spec: &NewRun) -> Result<()> {
        if spec.model.trim().is_empty() {
            return Err(EvalError::Validation("model must not be empty".to_string()));
        }
        if spec.concurrency == 0 {
            return Err(EvalError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if spec.socket_path.trim().is_empty() {
            return Err(EvalError::Validation(
                "socket_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a task's exercise name. Exercise names are directory
    /// segments (`{root}/{language}/{exercise}`), so path separators and
    /// leading dots are rejected to avoid escaping the exercises root.
    pub fn validate_exercise_name(exercise: &str) -> Result<()> {
        if exercise.trim().is_empty() {
            return Err(EvalError::Validation("exercise must not be empty".to_string()));
        }
        if exercise.contains('/') || exercise.contains('\\') {
            return Err(EvalError::Validation(format!(
                "exercise name must not contain path separators: '{exercise}'"
            )));
        }
        if exercise.starts_with('.') {
            return Err(EvalError::Validation(format!(
                "exercise name must not start with '.': '{exercise}'"
            )));
        }
        Ok(())
    }

    /// Validate a raw language string, returning a friendly error that names
    /// the offending value rather than silently treating it as unknown.
    pub fn validate_language(language: &str) -> Result<crate::models::Language> {
        crate::models::Language::parse(language)
            .ok_or_else(|| EvalError::Configuration(format!("unknown language: '{language}'")))
    }
}
