//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: run start/finish, subgraph
//!   stage transitions, retries, and breaker state changes
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).
//! For JSON output pass `json = true` to [`crate::telemetry::init_tracing`].

use tracing::info;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("trace-12345");
/// // Now all tracing calls are automatically associated with trace_id = "trace-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the trace_id.
    pub fn enter(trace_id: &str) -> Self {
        let span = tracing::info_span!("nl2sql.run", trace_id = %trace_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a pipeline run started for a user query.
pub fn emit_run_started(trace_id: &str, user_query: &str) {
    info!(event = "run.started", trace_id = %trace_id, user_query = %user_query);
}

/// Emit event: a pipeline run finished with duration, subquery count, and error count.
pub fn emit_run_finished(trace_id: &str, duration_ms: u64, subquery_count: usize, error_count: usize) {
    info!(
        event = "run.finished",
        trace_id = %trace_id,
        duration_ms = duration_ms,
        subquery_count = subquery_count,
        error_count = error_count,
    );
}

/// Emit event: a per-subquery subgraph entered a new stage (SCHEMA, PLAN, VALIDATE, GENERATE, EXECUTE, END).
pub fn emit_subgraph_stage(trace_id: &str, subgraph_id: &str, node_name: &str) {
    info!(event = "subgraph.stage", trace_id = %trace_id, subgraph_id = %subgraph_id, node_name = %node_name);
}

/// Emit event: a subgraph entered its refine/retry loop.
pub fn emit_subgraph_retry(trace_id: &str, subgraph_id: &str, retry_count: u32, reason: &str) {
    info!(
        event = "subgraph.retry",
        trace_id = %trace_id,
        subgraph_id = %subgraph_id,
        retry_count = retry_count,
        reason = %reason,
    );
}

/// Emit event: a subgraph terminated (success, failed, or timed out).
pub fn emit_subgraph_finished(trace_id: &str, subgraph_id: &str, status: &str) {
    info!(event = "subgraph.finished", trace_id = %trace_id, subgraph_id = %subgraph_id, status = %status);
}

/// Emit event: a circuit breaker changed state.
pub fn emit_breaker_state_change(name: &str, from: &str, to: &str) {
    info!(event = "breaker.state_change", breaker = %name, from = %from, to = %to);
}

/// Emit event: policy evaluation denied a table or datasource access.
pub fn emit_policy_denied(trace_id: &str, ds_id: &str, table: &str) {
    tracing::warn!(event = "policy.denied", trace_id = %trace_id, ds_id = %ds_id, table = %table);
}

/// Emit event: run finalization error (warning level) — e.g. synthesis or aggregation failed
/// but the run still returns partial results.
pub fn emit_run_finalize_error(trace_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.finalize_error", trace_id = %trace_id, error = %error);
}
