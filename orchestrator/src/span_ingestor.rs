use std::sync::Arc;

use dashmap::DashMap;
use eval_core::{models::Step, registry::TaskContextRegistry, store::Store};
use futures_util::future::BoxFuture;
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use serde_json::Value;

/// Maximum number of recent steps kept in memory per task, for cheap
/// inspection without a round trip to the store. Evicted wholesale when the
/// benchmark finishes.
const SPAN_HISTORY_CAPACITY: usize = 50;

/// Span attribute carrying the task id. May be a string (the agent's own
/// opaque id, resolved through the registry) or an integer (already the
/// store's numeric id). Spans lacking it cannot be correlated and are
/// dropped with a warning.
const ATTR_TASK_ID: &str = "mcp.task_id";
const ATTR_REQUEST: &str = "mcp.request";
const ATTR_RESPONSE: &str = "mcp.response";
const ATTR_RESPONSE_SIZE: &str = "mcp.response_size_bytes";
const ATTR_DURATION_MS: &str = "mcp.duration_ms";

/// `SpanExporter` that turns completed MCP tool-call spans into persisted
/// [`Step`] rows.
///
/// Pipeline, in order: filter (`rpc.system == "mcp"` and `rpc.service` in the
/// configured allow-list) → correlate (resolve the span's task id against the
/// [`TaskContextRegistry`]) → sequence (assign the next dense `step_number`)
/// → project (pull request/response/size/duration/error out of span
/// attributes and status) → persist (`Store::append_step`, tolerating
/// duplicates as idempotent success).
///
/// Must never panic or propagate a hard error out of `export` — a malformed
/// or unrelated span is logged and skipped, not fatal to the batch.
///
/// `Clone` is shallow: every field is either an `Arc` or cheap to duplicate,
/// so a clone shares the same benchmark map, step history and registry as
/// the original. This lets the OpenTelemetry SDK own one `SpanIngestor` as
/// its exporter while the rest of the orchestrator holds another for
/// `register_benchmark`/`forget_task`, both observing the same state.
#[derive(Clone)]
pub struct SpanIngestor {
    store: Arc<dyn Store>,
    registry: TaskContextRegistry,
    benchmarks: Arc<DashMap<i64, i64>>,
    history: Arc<DashMap<i64, Vec<Step>>>,
    // Span ids already turned into a step, per task. The OTel batch
    // processor retries a failed export with the same `SpanData`, and an
    // agent's own transport may redeliver; a step_number is only ever
    // minted for a span id not already in this set, so a retried export
    // never mints a second step for the same underlying tool call.
    seen_spans: Arc<DashMap<i64, std::collections::HashSet<opentelemetry::trace::SpanId>>>,
    allowlist: Vec<String>,
}

impl SpanIngestor {
    pub fn new(store: Arc<dyn Store>, registry: TaskContextRegistry, allowlist: Vec<String>) -> Self {
        Self {
            store,
            registry,
            benchmarks: Arc::new(DashMap::new()),
            history: Arc::new(DashMap::new()),
            seen_spans: Arc::new(DashMap::new()),
            allowlist,
        }
    }

    /// Record the benchmark id a task's spans should be appended to. Called
    /// once a session reaches `HANDSHAKE` and its benchmark header exists.
    pub fn register_benchmark(&self, task_id: i64, benchmark_id: i64) {
        self.benchmarks.insert(task_id, benchmark_id);
    }

    /// Drop a task's benchmark mapping and span history, as part of terminal
    /// teardown once `finish_benchmark` has been called.
    pub fn forget_task(&self, task_id: i64) {
        self.benchmarks.remove(&task_id);
        self.history.remove(&task_id);
        self.seen_spans.remove(&task_id);
    }

    /// Recent steps kept for a task, most recent last. Empty if the task is
    /// unknown or nothing has landed yet.
    pub fn recent_steps(&self, task_id: i64) -> Vec<Step> {
        self.history
            .get(&task_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn is_allowed_service(&self, service: &str) -> bool {
        self.allowlist.iter().any(|allowed| allowed == service)
    }

    fn remember(&self, task_id: i64, step: Step) {
        let mut entry = self.history.entry(task_id).or_default();
        entry.push(step);
        if entry.len() > SPAN_HISTORY_CAPACITY {
            let overflow = entry.len() - SPAN_HISTORY_CAPACITY;
            entry.drain(0..overflow);
        }
    }
}

fn attr_str(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

fn attr_u64(span: &SpanData, key: &str) -> Option<u64> {
    span.attributes.iter().find(|kv| kv.key.as_str() == key).and_then(|kv| match &kv.value {
        opentelemetry::Value::I64(n) => Some(*n as u64),
        opentelemetry::Value::String(s) => s.as_str().parse().ok(),
        _ => None,
    })
}

fn attr_json(span: &SpanData, key: &str) -> Value {
    attr_str(span, key)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null)
}

fn span_error_message(span: &SpanData) -> Option<String> {
    match &span.status {
        Status::Error { description } if !description.is_empty() => Some(description.to_string()),
        Status::Error { .. } => Some("mcp call failed".to_string()),
        _ => None,
    }
}

fn span_duration_ms(span: &SpanData) -> u64 {
    span.end_time
        .duration_since(span.start_time)
        .ok()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolve a span's task id, accepting either the store's numeric id
/// directly or the agent's opaque id (looked up through the registry).
/// A string value is always treated as an opaque agent id, never parsed as
/// a number, since the two id spaces are otherwise indistinguishable.
fn correlate_task_id(span: &SpanData, registry: &TaskContextRegistry) -> Option<i64> {
    let kv = span.attributes.iter().find(|kv| kv.key.as_str() == ATTR_TASK_ID)?;
    match &kv.value {
        opentelemetry::Value::I64(n) => Some(*n),
        opentelemetry::Value::String(s) => registry.resolve(s.as_str()),
        _ => None,
    }
}

impl SpanExporter for SpanIngestor {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let benchmarks = self.benchmarks.clone();
        let history = self.history.clone();
        let seen_spans = self.seen_spans.clone();
        let allowlist = self.allowlist.clone();

        Box::pin(async move {
            for span in batch {
                if span.span_kind != SpanKind::Client {
                    continue;
                }

                let Some(system) = attr_str(&span, opentelemetry_semantic_conventions::trace::RPC_SYSTEM.as_str())
                else {
                    continue;
                };
                if system != "mcp" {
                    continue;
                }

                let Some(service) = attr_str(&span, opentelemetry_semantic_conventions::trace::RPC_SERVICE.as_str())
                else {
                    tracing::warn!("mcp span missing rpc.service, dropping");
                    continue;
                };
                if !allowlist.iter().any(|allowed| allowed == &service) {
                    continue;
                }

                let Some(task_id) = correlate_task_id(&span, &registry) else {
                    tracing::warn!("mcp span missing or unresolvable mcp.task_id, dropping");
                    continue;
                };

                if registry.get_context(task_id).is_none() {
                    tracing::warn!(task_id, "mcp span for unknown/terminated task, dropping");
                    continue;
                }

                let Some(benchmark_id) = benchmarks.get(&task_id).map(|entry| *entry.value()) else {
                    tracing::warn!(task_id, "mcp span arrived before benchmark existed, dropping");
                    continue;
                };

                let span_id = span.span_context.span_id();
                let already_ingested = {
                    let mut entry = seen_spans.entry(task_id).or_default();
                    !entry.insert(span_id)
                };
                if already_ingested {
                    tracing::debug!(task_id, %span_id, "span already ingested, skipping replay");
                    continue;
                }

                let Some(step_number) = registry.next_step_number(task_id) else {
                    tracing::warn!(task_id, "task context vanished mid-sequence, dropping span");
                    continue;
                };

                let request = attr_json(&span, ATTR_REQUEST);
                let response = attr_json(&span, ATTR_RESPONSE);
                let response_size_bytes =
                    attr_u64(&span, ATTR_RESPONSE_SIZE).unwrap_or_else(|| response.to_string().len() as u64);
                let duration_ms = attr_u64(&span, ATTR_DURATION_MS).unwrap_or_else(|| span_duration_ms(&span));
                let error_message = span_error_message(&span);

                let step = Step {
                    benchmark_id,
                    step_number,
                    request,
                    response,
                    response_size_bytes,
                    duration_ms,
                    error_message: error_message.clone(),
                    source: None,
                    timeout_ms: None,
                };

                match store
                    .append_step(
                        step.benchmark_id,
                        step.step_number,
                        step.request.clone(),
                        step.response.clone(),
                        step.response_size_bytes,
                        step.duration_ms,
                        step.error_message.clone(),
                        step.source.clone(),
                        step.timeout_ms,
                    )
                    .await
                {
                    Ok(()) => {}
                    Err(err) if err.is_duplicate() => {
                        tracing::debug!(task_id, step_number, "duplicate step, treated as idempotent success");
                    }
                    Err(err) => {
                        tracing::error!(task_id, step_number, error = %err, "failed to persist step");
                        continue;
                    }
                }

                let mut entry = history.entry(task_id).or_default();
                entry.push(step);
                if entry.len() > SPAN_HISTORY_CAPACITY {
                    let overflow = entry.len() - SPAN_HISTORY_CAPACITY;
                    entry.drain(0..overflow);
                }
            }

            Ok(())
        })
    }
}
