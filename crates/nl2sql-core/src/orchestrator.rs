//! Pipeline Orchestrator: the control graph tying every stage together —
//! `RESOLVE -> DECOMPOSE -> PLAN_GLOBAL -> (SCAN_LAYER_ROUTE <-> SUBGRAPH_FANOUT)*
//! -> AGGREGATE -> SYNTHESIZE -> END`.
//!
//! Every stage returns a [`crate::domain::StateUpdate`] the orchestrator
//! folds into one owned `GraphState`, same discipline the subgraph state
//! machine uses internally — no worker unit ever mutates shared state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::adapter::AdapterRegistry;
use crate::aggregator::aggregate;
use crate::artifact::ArtifactStore;
use crate::breaker::CircuitBreaker;
use crate::config::{PipelineConfig, SchemaVersionMismatchPolicy};
use crate::decomposer::decompose;
use crate::domain::{
    Capability, Chunk, ExecutionDAG, GraphState, NodeKind, ResolvedDatasource, ResolverResponse, StateUpdate,
    SubQuery, SubgraphOutput, SubgraphStatus, UserContext,
};
use crate::error::{PipelineError, PipelineErrorCode};
use crate::gate::PolicyEngine;
use crate::ids::stable_id_prefixed;
use crate::llm::StructuredLlm;
use crate::metrics::METRICS;
use crate::obs::{emit_run_finished, emit_run_started, emit_subgraph_finished, RunSpan};
use crate::planner::plan_global;
use crate::schema_store::SchemaSnapshotStore;
use crate::subgraph::{run_subgraph, SubgraphDeps};
use crate::synthesizer::synthesize;
use crate::validator::ValidatorConfig;
use crate::vector::{RetrievalFilter, VectorIndex};

/// Everything a pipeline run needs, borrowed for the run's duration.
pub struct PipelineDeps<'a> {
    pub vector_index: &'a dyn VectorIndex,
    pub schema_store: &'a dyn SchemaSnapshotStore,
    pub llm: &'a dyn StructuredLlm,
    pub adapters: &'a AdapterRegistry,
    pub artifact_store: &'a dyn ArtifactStore,
    pub policy: &'a PolicyEngine,
    pub llm_breaker: &'a CircuitBreaker,
    pub vector_breaker: &'a CircuitBreaker,
    pub db_breaker: &'a CircuitBreaker,
    pub config: PipelineConfig,
    pub validator_config: ValidatorConfig,
}

pub struct PipelineRequest {
    pub trace_id: String,
    pub request_id: String,
    pub user_query: String,
    pub user_context: UserContext,
    /// Caller-supplied datasource override; bypasses vector resolution but
    /// is still checked against the caller's allowed set.
    pub datasource_id: Option<String>,
    /// Caller-supplied schema version pin. Checked against the resolver's
    /// latest-known version per datasource; disagreement is handled per
    /// `PipelineConfig::schema_version_mismatch_policy`.
    pub requested_schema_version: Option<String>,
}

/// Run the full pipeline end to end. Always returns a `GraphState` — a
/// failed or partial run is represented by its accumulated `errors`, not a
/// Rust-level `Err`.
pub async fn run_pipeline(deps: &PipelineDeps<'_>, request: PipelineRequest) -> GraphState {
    let _span = RunSpan::enter(&request.trace_id);
    let trace_id = request.trace_id.clone();
    emit_run_started(&trace_id, &request.user_query);
    METRICS.inc_queries_processed();

    let start = Instant::now();
    let state = run_pipeline_inner(deps, request).await;

    emit_run_finished(&trace_id, start.elapsed().as_millis() as u64, state.subgraph_outputs.len(), state.errors.len());
    state
}

async fn run_pipeline_inner(deps: &PipelineDeps<'_>, request: PipelineRequest) -> GraphState {
    let start = Instant::now();
    let budget = Duration::from_secs(deps.config.global_timeout_seconds);
    let mut state = GraphState::new(request.trace_id.clone(), request.user_query.clone(), request.user_context.clone());

    let resolve_update = resolve_datasources(deps, &request).await;
    state.merge(resolve_update);
    if state.has_critical_error() {
        return state;
    }
    let Some(resolver_resp) = state.resolver_resp.clone() else {
        return state;
    };
    if resolver_resp.resolved.is_empty() {
        state.reasoning.push("no datasource resolved for query; terminating without error".to_string());
        return state;
    }

    if remaining(start, budget).is_none() {
        state.errors.push(PipelineError::new(PipelineErrorCode::PipelineTimeout, "global timeout exceeded before decompose"));
        return state;
    }

    let allowed_ds_ids = deps.policy.allowed_datasources(&request.user_context.roles);
    let resolved_ds_ids: std::collections::BTreeSet<String> = resolver_resp.resolved.iter().map(|r| r.id.clone()).collect();
    let schema_version_by_ds: BTreeMap<String, String> =
        resolver_resp.resolved.iter().map(|r| (r.id.clone(), r.schema_version_latest.clone())).collect();

    if !deps.vector_breaker.allow() {
        state.errors.push(PipelineError::new(PipelineErrorCode::DecomposerFailed, "vector breaker open"));
        return state;
    }

    let decomposer_resp = match decompose(
        deps.llm,
        deps.vector_index,
        &request.user_query,
        &allowed_ds_ids,
        &resolved_ds_ids,
        &schema_version_by_ds,
    )
    .await
    {
        Ok(resp) => {
            deps.vector_breaker.record_success();
            resp
        }
        Err(e) => {
            deps.vector_breaker.record_failure(true);
            state.errors.push(PipelineError::new(PipelineErrorCode::DecomposerFailed, e.to_string()));
            return state;
        }
    };

    let unmapped_subqueries = decomposer_resp.unmapped_subqueries.clone();
    state.merge(StateUpdate { decomposer_resp: Some(decomposer_resp.clone()), ..Default::default() });

    if decomposer_resp.sub_queries.is_empty() {
        state.reasoning.push("decomposer produced no mapped subqueries".to_string());
        return state;
    }

    let dag = match plan_global(&decomposer_resp) {
        Ok(dag) => dag,
        Err(e) => {
            state.errors.push(PipelineError::new(PipelineErrorCode::PlannerFailed, e.to_string()));
            return state;
        }
    };
    state.merge(StateUpdate { planner_resp: Some(dag.clone()), ..Default::default() });

    let sub_queries_by_id: BTreeMap<String, SubQuery> =
        decomposer_resp.sub_queries.into_iter().map(|sq| (sq.id.clone(), sq)).collect();

    for layer in &dag.layers {
        let pending: Vec<&str> = layer
            .iter()
            .map(String::as_str)
            .filter(|id| !state.artifact_refs.contains_key(*id))
            .filter(|id| dag.node(id).map(|n| n.kind == NodeKind::Scan).unwrap_or(false))
            .collect();
        if pending.is_empty() {
            continue;
        }

        let Some(remaining_budget) = remaining(start, budget) else {
            state.errors.push(PipelineError::new(PipelineErrorCode::PipelineTimeout, "global timeout exceeded during scan fan-out"));
            return state;
        };

        let fanout_update = match tokio::time::timeout(
            remaining_budget,
            fan_out_layer(deps, &request, &sub_queries_by_id, pending),
        )
        .await
        {
            Ok(update) => update,
            Err(_) => {
                state.errors.push(PipelineError::new(PipelineErrorCode::PipelineTimeout, "global timeout exceeded during scan fan-out"));
                return state;
            }
        };
        state.merge(fanout_update);
    }

    if remaining(start, budget).is_none() {
        state.errors.push(PipelineError::new(PipelineErrorCode::PipelineTimeout, "global timeout exceeded before aggregate"));
        return state;
    }

    let aggregator_resp = match aggregate(&dag, &state.artifact_refs, deps.artifact_store).await {
        Ok(resp) => resp,
        Err(e) => {
            state.errors.push(PipelineError::new(PipelineErrorCode::AggregatorFailed, e.to_string()));
            return state;
        }
    };
    let terminal_json = serde_json::to_value(&aggregator_resp.terminal_results).unwrap_or(serde_json::Value::Null);
    state.merge(StateUpdate { aggregator_resp: Some(terminal_json), ..Default::default() });

    if remaining(start, budget).is_none() {
        state.errors.push(PipelineError::new(PipelineErrorCode::PipelineTimeout, "global timeout exceeded before synthesize"));
        return state;
    }

    if deps.llm_breaker.allow() {
        match synthesize(deps.llm, &request.user_query, &aggregator_resp.terminal_results, &unmapped_subqueries).await {
            Ok(answer) => {
                deps.llm_breaker.record_success();
                state.merge(StateUpdate { synth_resp: Some(answer), ..Default::default() });
            }
            Err(e) => {
                deps.llm_breaker.record_failure(true);
                state.warnings.push(PipelineError::new(PipelineErrorCode::PlanFeedback, format!("synthesis failed: {e}")));
            }
        }
    } else {
        state.warnings.push(PipelineError::new(PipelineErrorCode::ServiceUnavailable, "LLM breaker open, skipping synthesis"));
    }

    state
}

fn remaining(start: Instant, budget: Duration) -> Option<Duration> {
    budget.checked_sub(start.elapsed())
}

/// Datasource Resolver: an explicit override is checked against the user's
/// allowed set; otherwise the top vector-ranked datasource candidates are
/// resolved against whichever of them already carry a registered schema.
async fn resolve_datasources(deps: &PipelineDeps<'_>, request: &PipelineRequest) -> StateUpdate {
    let allowed = deps.policy.allowed_datasources(&request.user_context.roles);

    if let Some(ds_id) = &request.datasource_id {
        if !allowed.contains(ds_id) {
            return StateUpdate {
                errors: vec![PipelineError::new(
                    PipelineErrorCode::SecurityViolation,
                    format!("datasource override '{ds_id}' not in caller's allowed set"),
                )],
                ..Default::default()
            };
        }
        return match deps.schema_store.latest_version(ds_id).await {
            Ok(Some(version)) => {
                let schema_version_latest = version.as_str().to_string();
                let mut update = StateUpdate {
                    datasource_id: Some(ds_id.clone()),
                    resolver_resp: Some(ResolverResponse {
                        resolved: vec![ResolvedDatasource { id: ds_id.clone(), schema_version_latest: schema_version_latest.clone() }],
                    }),
                    ..Default::default()
                };
                check_schema_version(deps, request, ds_id, &schema_version_latest, &mut update);
                update
            }
            Ok(None) => StateUpdate {
                errors: vec![PipelineError::new(PipelineErrorCode::InvalidState, format!("datasource '{ds_id}' has no registered schema"))],
                ..Default::default()
            },
            Err(e) => StateUpdate {
                errors: vec![PipelineError::new(PipelineErrorCode::InvalidState, e.to_string())],
                ..Default::default()
            },
        };
    }

    if !deps.vector_breaker.allow() {
        return StateUpdate {
            errors: vec![PipelineError::new(PipelineErrorCode::ServiceUnavailable, "vector breaker open during datasource resolution")],
            ..Default::default()
        };
    }

    let filter = RetrievalFilter::new(allowed.iter().cloned());
    let candidates = match deps.vector_index.retrieve_datasource_candidates(&request.user_query, 5, &filter).await {
        Ok(c) => {
            deps.vector_breaker.record_success();
            c
        }
        Err(e) => {
            deps.vector_breaker.record_failure(true);
            return StateUpdate {
                errors: vec![PipelineError::new(PipelineErrorCode::ServiceUnavailable, e.to_string())],
                ..Default::default()
            };
        }
    };

    let mut resolved = Vec::new();
    let mut update = StateUpdate::default();
    for c in candidates {
        let Chunk::Datasource { ds_id, .. } = c.chunk else { continue };
        if resolved.iter().any(|r: &ResolvedDatasource| r.id == ds_id) {
            continue;
        }
        if let Ok(Some(version)) = deps.schema_store.latest_version(&ds_id).await {
            let schema_version_latest = version.as_str().to_string();
            check_schema_version(deps, request, &ds_id, &schema_version_latest, &mut update);
            resolved.push(ResolvedDatasource { id: ds_id, schema_version_latest });
        }
    }

    update.resolver_resp = Some(ResolverResponse { resolved });
    update
}

/// Compare a caller-pinned `requested_schema_version` against the resolver's
/// latest-known version for one datasource. A mismatch is a warning or a
/// critical error depending on `PipelineConfig::schema_version_mismatch_policy`
/// — there is no silent third outcome.
fn check_schema_version(deps: &PipelineDeps<'_>, request: &PipelineRequest, ds_id: &str, schema_version_latest: &str, update: &mut StateUpdate) {
    let Some(requested) = &request.requested_schema_version else { return };
    if requested == schema_version_latest {
        return;
    }
    let message = format!(
        "requested schema version '{requested}' for datasource '{ds_id}' does not match latest known version '{schema_version_latest}'"
    );
    match deps.config.schema_version_mismatch_policy {
        SchemaVersionMismatchPolicy::Warn => {
            let mut err = PipelineError::new(PipelineErrorCode::SchemaVersionMismatch, message);
            err.severity = crate::error::Severity::Warning;
            err.retryable = false;
            update.warnings.push(err);
        }
        SchemaVersionMismatchPolicy::Fail => {
            update.errors.push(PipelineError::new(PipelineErrorCode::SchemaVersionMismatch, message));
        }
    }
}

/// Scan-Layer Router + Fan-out/Fan-in Merge: dispatch one subgraph per
/// pending scan node in this layer, concurrently, and fold every
/// `SubgraphOutput` back into a single `StateUpdate`.
async fn fan_out_layer(
    deps: &PipelineDeps<'_>,
    request: &PipelineRequest,
    sub_queries_by_id: &BTreeMap<String, SubQuery>,
    pending: Vec<&str>,
) -> StateUpdate {
    let mut update = StateUpdate::default();

    let futures = pending.into_iter().filter_map(|node_id| {
        let sub_query = sub_queries_by_id.get(node_id)?.clone();
        Some(run_one_subgraph(deps, request, sub_query))
    });

    let outputs: Vec<Option<SubgraphOutput>> = join_all(futures).await;

    for output in outputs.into_iter().flatten() {
        let node_id = output.sub_query.id.clone();
        if let Some(artifact) = &output.artifact {
            update.artifact_refs.insert(node_id.clone(), artifact.clone());
        }
        update.reasoning.extend(output.reasoning.clone());
        update.errors.extend(output.errors.clone());
        update.subgraph_outputs.insert(node_id, output);
    }

    update
}

async fn run_one_subgraph(deps: &PipelineDeps<'_>, request: &PipelineRequest, sub_query: SubQuery) -> Option<SubgraphOutput> {
    let adapter = match deps.adapters.compatible(&sub_query.datasource_id, &[Capability::SupportsSql]) {
        Ok(adapter) => adapter,
        Err(e) => {
            return Some(SubgraphOutput {
                sub_query,
                retry_count: 0,
                plan: None,
                sql_draft: None,
                artifact: None,
                errors: vec![PipelineError::new(PipelineErrorCode::NoCompatibleSubgraph, e.to_string())],
                reasoning: Vec::new(),
                status: SubgraphStatus::Failed,
            });
        }
    };

    let subgraph_id = stable_id_prefixed("sg", &serde_json::json!({"trace_id": request.trace_id, "node_id": sub_query.id}))
        .unwrap_or_else(|_| format!("sg_{}", sub_query.id));

    let subgraph_deps = SubgraphDeps {
        vector_index: deps.vector_index,
        schema_store: deps.schema_store,
        llm: deps.llm,
        adapter,
        artifact_store: deps.artifact_store,
        policy: deps.policy,
        llm_breaker: deps.llm_breaker,
        db_breaker: deps.db_breaker,
        config: deps.config.subgraph.clone(),
        validator_config: deps.validator_config,
    };

    let output = run_subgraph(
        &subgraph_deps,
        &request.trace_id,
        &request.user_context.tenant_id,
        &request.request_id,
        &subgraph_id,
        sub_query,
        &request.user_context,
    )
    .await;

    METRICS.inc_subqueries_executed();
    emit_subgraph_finished(&request.trace_id, &subgraph_id, status_str(output.status));
    Some(output)
}

fn status_str(status: SubgraphStatus) -> &'static str {
    match status {
        SubgraphStatus::Succeeded => "succeeded",
        SubgraphStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::fakes::FakeAdapter;
    use crate::config::BreakerConfig;
    use crate::domain::{Chunk, ColumnContract, SchemaContract, SchemaMetadata, TableContract};
    use crate::gate::RolePolicy;
    use crate::llm::fakes::ScriptedLlm;
    use crate::schema_store::InMemorySchemaStore;
    use crate::vector::InMemoryVectorIndex;
    use std::collections::BTreeMap as Map;

    fn breaker(name: &'static str) -> CircuitBreaker {
        CircuitBreaker::new(name, BreakerConfig { failure_threshold: 5, reset_timeout_sec: 30.0 })
    }

    fn policy() -> PolicyEngine {
        PolicyEngine::empty()
            .with_role("analyst", RolePolicy { allowed_datasources: vec!["ops".into()], allowed_tables: vec!["ops.*".into()] })
            .unwrap()
    }

    async fn schema_store_with_machines() -> InMemorySchemaStore {
        let store = InMemorySchemaStore::default();
        let mut columns = Map::new();
        columns.insert("id".to_string(), ColumnContract { data_type: "int".into(), nullable: false });
        let mut tables = Map::new();
        tables.insert("machines".to_string(), TableContract { columns, primary_key: vec!["id".into()], foreign_keys: vec![] });
        store.register("ops", SchemaContract { tables }, SchemaMetadata::default()).await.unwrap();
        store
    }

    fn plan_json() -> serde_json::Value {
        serde_json::json!({
            "query_type": "READ",
            "tables": [{"ordinal": 0, "name": "machines", "alias": "m"}],
            "joins": [],
            "select_items": [{"ordinal": 0, "expr": {"kind": "column", "alias": "m", "name": "id"}, "alias": "id"}],
            "where": null,
            "group_by": [],
            "having": null,
            "order_by": [],
            "limit": 5
        })
    }

    fn ds_chunk() -> Chunk {
        Chunk::Datasource { ds_id: "ops".into(), schema_version: "v1".into(), description: "operations machines".into(), sample_questions: vec![] }
    }

    #[tokio::test]
    async fn happy_path_resolves_decomposes_scans_aggregates_and_synthesizes() {
        let vector_index = InMemoryVectorIndex::new();
        vector_index.refresh("ops", vec![ds_chunk()]).await.unwrap();
        let schema_store = schema_store_with_machines().await;
        let artifact_store = crate::artifact::InMemoryArtifactStore::new();
        let policy = policy();
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(FakeAdapter::new("ops").with_table("machines", vec!["id".into()], vec![vec![serde_json::json!(1)]])));

        let llm = ScriptedLlm::new(vec![
            serde_json::json!({"sub_queries": [{"temp_id": "t1", "datasource_id": "ops", "intent": "list machines"}]}),
            plan_json(),
            serde_json::json!({"answer": "there is 1 machine"}),
        ]);

        let deps = PipelineDeps {
            vector_index: &vector_index,
            schema_store: &schema_store,
            llm: &llm,
            adapters: &registry,
            artifact_store: &artifact_store,
            policy: &policy,
            llm_breaker: &breaker("llm"),
            vector_breaker: &breaker("vector"),
            db_breaker: &breaker("db"),
            config: PipelineConfig::default(),
            validator_config: ValidatorConfig::default(),
        };

        let request = PipelineRequest {
            trace_id: "trace1".into(),
            request_id: "req1".into(),
            user_query: "list machines".into(),
            user_context: UserContext::new("u1", "t1", vec!["analyst".to_string()]),
            datasource_id: None,
            requested_schema_version: None,
        };

        let state = run_pipeline(&deps, request).await;
        assert!(!state.has_critical_error(), "unexpected errors: {:?}", state.errors);
        assert_eq!(state.synth_resp.as_deref(), Some("there is 1 machine"));
        assert_eq!(state.artifact_refs.len(), 1);
    }

    #[tokio::test]
    async fn datasource_override_outside_allowed_set_is_security_violation() {
        let vector_index = InMemoryVectorIndex::new();
        let schema_store = InMemorySchemaStore::default();
        let artifact_store = crate::artifact::InMemoryArtifactStore::new();
        let policy = policy();
        let registry = AdapterRegistry::new();
        let llm = ScriptedLlm::new(vec![]);

        let deps = PipelineDeps {
            vector_index: &vector_index,
            schema_store: &schema_store,
            llm: &llm,
            adapters: &registry,
            artifact_store: &artifact_store,
            policy: &policy,
            llm_breaker: &breaker("llm"),
            vector_breaker: &breaker("vector"),
            db_breaker: &breaker("db"),
            config: PipelineConfig::default(),
            validator_config: ValidatorConfig::default(),
        };

        let request = PipelineRequest {
            trace_id: "trace1".into(),
            request_id: "req1".into(),
            user_query: "list salaries".into(),
            user_context: UserContext::new("u1", "t1", vec!["analyst".to_string()]),
            datasource_id: Some("hr_db".into()),
            requested_schema_version: None,
        };

        let state = run_pipeline(&deps, request).await;
        assert!(state.has_critical_error());
        assert!(state.errors.iter().any(|e| matches!(e.code, PipelineErrorCode::SecurityViolation)));
    }

    #[tokio::test]
    async fn empty_resolution_terminates_gracefully_without_error() {
        let vector_index = InMemoryVectorIndex::new();
        let schema_store = InMemorySchemaStore::default();
        let artifact_store = crate::artifact::InMemoryArtifactStore::new();
        let policy = policy();
        let registry = AdapterRegistry::new();
        let llm = ScriptedLlm::new(vec![]);

        let deps = PipelineDeps {
            vector_index: &vector_index,
            schema_store: &schema_store,
            llm: &llm,
            adapters: &registry,
            artifact_store: &artifact_store,
            policy: &policy,
            llm_breaker: &breaker("llm"),
            vector_breaker: &breaker("vector"),
            db_breaker: &breaker("db"),
            config: PipelineConfig::default(),
            validator_config: ValidatorConfig::default(),
        };

        let request = PipelineRequest {
            trace_id: "trace1".into(),
            request_id: "req1".into(),
            user_query: "anything".into(),
            user_context: UserContext::new("u1", "t1", vec!["analyst".to_string()]),
            datasource_id: None,
            requested_schema_version: None,
        };

        let state = run_pipeline(&deps, request).await;
        assert!(!state.has_critical_error());
        assert!(state.resolver_resp.unwrap().resolved.is_empty());
    }

    #[tokio::test]
    async fn missing_adapter_for_resolved_subquery_is_no_compatible_subgraph() {
        let vector_index = InMemoryVectorIndex::new();
        vector_index.refresh("ops", vec![ds_chunk()]).await.unwrap();
        let schema_store = schema_store_with_machines().await;
        let artifact_store = crate::artifact::InMemoryArtifactStore::new();
        let policy = policy();
        let registry = AdapterRegistry::new(); // no adapter registered for "ops"

        let llm = ScriptedLlm::new(vec![
            serde_json::json!({"sub_queries": [{"temp_id": "t1", "datasource_id": "ops", "intent": "list machines"}]}),
        ]);

        let deps = PipelineDeps {
            vector_index: &vector_index,
            schema_store: &schema_store,
            llm: &llm,
            adapters: &registry,
            artifact_store: &artifact_store,
            policy: &policy,
            llm_breaker: &breaker("llm"),
            vector_breaker: &breaker("vector"),
            db_breaker: &breaker("db"),
            config: PipelineConfig::default(),
            validator_config: ValidatorConfig::default(),
        };

        let request = PipelineRequest {
            trace_id: "trace1".into(),
            request_id: "req1".into(),
            user_query: "list machines".into(),
            user_context: UserContext::new("u1", "t1", vec!["analyst".to_string()]),
            datasource_id: None,
            requested_schema_version: None,
        };

        let state = run_pipeline(&deps, request).await;
        assert!(state.errors.iter().any(|e| matches!(e.code, PipelineErrorCode::NoCompatibleSubgraph)));
        assert!(state.errors.iter().any(|e| matches!(e.code, PipelineErrorCode::AggregatorFailed)));
    }

    #[tokio::test]
    async fn requested_schema_version_mismatch_warns_by_default() {
        let vector_index = InMemoryVectorIndex::new();
        let schema_store = schema_store_with_machines().await;
        let artifact_store = crate::artifact::InMemoryArtifactStore::new();
        let policy = policy();
        let registry = AdapterRegistry::new();
        let llm = ScriptedLlm::new(vec![]);

        let deps = PipelineDeps {
            vector_index: &vector_index,
            schema_store: &schema_store,
            llm: &llm,
            adapters: &registry,
            artifact_store: &artifact_store,
            policy: &policy,
            llm_breaker: &breaker("llm"),
            vector_breaker: &breaker("vector"),
            db_breaker: &breaker("db"),
            config: PipelineConfig::default(),
            validator_config: ValidatorConfig::default(),
        };

        let request = PipelineRequest {
            trace_id: "trace1".into(),
            request_id: "req1".into(),
            user_query: "list machines".into(),
            user_context: UserContext::new("u1", "t1", vec!["analyst".to_string()]),
            datasource_id: Some("ops".into()),
            requested_schema_version: Some("stale_version".into()),
        };

        let update = resolve_datasources(&deps, &request).await;
        assert!(update.errors.is_empty());
        assert!(update.warnings.iter().any(|w| matches!(w.code, PipelineErrorCode::SchemaVersionMismatch)));
    }

    #[tokio::test]
    async fn requested_schema_version_mismatch_fails_under_strict_policy() {
        let vector_index = InMemoryVectorIndex::new();
        let schema_store = schema_store_with_machines().await;
        let artifact_store = crate::artifact::InMemoryArtifactStore::new();
        let policy = policy();
        let registry = AdapterRegistry::new();
        let llm = ScriptedLlm::new(vec![]);

        let mut config = PipelineConfig::default();
        config.schema_version_mismatch_policy = crate::config::SchemaVersionMismatchPolicy::Fail;

        let deps = PipelineDeps {
            vector_index: &vector_index,
            schema_store: &schema_store,
            llm: &llm,
            adapters: &registry,
            artifact_store: &artifact_store,
            policy: &policy,
            llm_breaker: &breaker("llm"),
            vector_breaker: &breaker("vector"),
            db_breaker: &breaker("db"),
            config,
            validator_config: ValidatorConfig::default(),
        };

        let request = PipelineRequest {
            trace_id: "trace1".into(),
            request_id: "req1".into(),
            user_query: "list machines".into(),
            user_context: UserContext::new("u1", "t1", vec!["analyst".to_string()]),
            datasource_id: Some("ops".into()),
            requested_schema_version: Some("stale_version".into()),
        };

        let update = resolve_datasources(&deps, &request).await;
        assert!(update.errors.iter().any(|e| matches!(e.code, PipelineErrorCode::SchemaVersionMismatch) && e.is_critical()));
    }
}
