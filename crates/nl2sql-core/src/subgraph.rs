//! Per-subquery subgraph: `SchemaRetriever -> ASTPlanner -> LogicalValidator
//! -> (retry? -> Refiner -> ASTPlanner) -> Generator -> Executor`.
//!
//! Each stage is a function over owned state rather than a shared mutable
//! object — the subgraph returns a [`SubgraphOutput`] the orchestrator folds
//! into `GraphState`, mirroring the no-in-place-mutation rule the rest of
//! the pipeline follows.

use std::sync::Arc;

use tracing::instrument;

use crate::adapter::Adapter;
use crate::artifact::ArtifactStore;
use crate::breaker::CircuitBreaker;
use crate::config::SubgraphConfig;
use crate::domain::{
    AdapterRequest, Chunk, PlanModel, RequestLimits, SchemaSnapshot, SubQuery, SubgraphOutput, SubgraphStatus,
    TableContract, UserContext,
};
use crate::error::{Nl2SqlError, PipelineError, PipelineErrorCode, Result};
use crate::gate::PolicyEngine;
use crate::generator::{generate, AnsiSqlBuilder};
use crate::llm::StructuredLlm;
use crate::metrics::METRICS;
use crate::obs::emit_subgraph_retry;
use crate::schema_store::SchemaSnapshotStore;
use crate::validator::{validate, ValidatorConfig};
use crate::vector::{RetrievalFilter, VectorIndex};

/// Dependencies a subgraph run needs, grouped so call sites don't thread
/// seven positional arguments through every stage function.
pub struct SubgraphDeps<'a> {
    pub vector_index: &'a dyn VectorIndex,
    pub schema_store: &'a dyn SchemaSnapshotStore,
    pub llm: &'a dyn StructuredLlm,
    pub adapter: Arc<dyn Adapter>,
    pub artifact_store: &'a dyn ArtifactStore,
    pub policy: &'a PolicyEngine,
    pub llm_breaker: &'a CircuitBreaker,
    pub db_breaker: &'a CircuitBreaker,
    pub config: SubgraphConfig,
    pub validator_config: ValidatorConfig,
}

fn retrieval_query(sub_query: &SubQuery) -> String {
    let mut parts = vec![sub_query.intent.clone()];
    if let Some(filters) = &sub_query.filters {
        parts.push(filters.to_string());
    }
    if let Some(group_by) = &sub_query.group_by {
        parts.push(group_by.join(" "));
    }
    if let Some(metrics) = &sub_query.metrics {
        parts.push(metrics.join(" "));
    }
    if let Some(expected) = &sub_query.expected_schema {
        parts.push(expected.join(" "));
    }
    parts.join(" ")
}

/// `SchemaRetriever`: staged vector retrieval (table context, then column
/// candidates as a fallback) resolved against the authoritative snapshot.
/// Falls back to the full snapshot — with a `SCHEMA_FALLBACK_USED` warning —
/// when retrieval comes back empty.
async fn retrieve_schema(
    deps: &SubgraphDeps<'_>,
    sub_query: &SubQuery,
    warnings: &mut Vec<PipelineError>,
) -> Result<Vec<(String, TableContract)>> {
    let query = retrieval_query(sub_query);
    let filter = RetrievalFilter::new([sub_query.datasource_id.clone()]);

    let mut candidate_tables: Vec<String> = Vec::new();
    if let Ok(chunks) = deps.vector_index.retrieve_schema_context(&query, 8, &filter).await {
        for c in chunks {
            if let Chunk::Table { table, .. } = c.chunk {
                if !candidate_tables.contains(&table) {
                    candidate_tables.push(table);
                }
            }
        }
    }

    if candidate_tables.is_empty() {
        if let Ok(chunks) = deps.vector_index.retrieve_column_candidates(&query, 8, &filter).await {
            for c in chunks {
                if let Chunk::Column { table, .. } = c.chunk {
                    if !candidate_tables.contains(&table) {
                        candidate_tables.push(table);
                    }
                }
            }
        }
    }

    let snapshot: SchemaSnapshot = deps.schema_store.get(&sub_query.datasource_id, sub_query.schema_version.as_deref()).await?;

    let mut relevant: Vec<(String, TableContract)> = candidate_tables
        .iter()
        .filter_map(|name| snapshot.contract.tables.get(name).map(|c| (name.clone(), c.clone())))
        .collect();

    if relevant.is_empty() {
        relevant = snapshot.contract.tables.iter().map(|(name, c)| (name.clone(), c.clone())).collect();
        warnings.push(PipelineError::new(
            PipelineErrorCode::SchemaFallbackUsed,
            format!("no vector candidates resolved for '{}', falling back to full snapshot", sub_query.datasource_id),
        ));
    }

    Ok(relevant)
}

fn plan_response_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

/// `ASTPlanner`: invoke the structured LLM for a `PlanModel`, folding in
/// refiner feedback from a prior iteration when present.
async fn plan(
    deps: &SubgraphDeps<'_>,
    sub_query: &SubQuery,
    relevant_tables: &[(String, TableContract)],
    feedback: Option<&str>,
) -> Result<PlanModel> {
    if !deps.llm_breaker.allow() {
        return Err(PipelineError::new(PipelineErrorCode::ServiceUnavailable, "LLM breaker open").into());
    }

    let tables_json = serde_json::to_string(relevant_tables).unwrap_or_default();
    let expected = sub_query.expected_schema.clone().unwrap_or_default().join(", ");
    let mut prompt = format!(
        "Plan a READ-only query.\nIntent: {}\nExpected columns: {}\nTables: {}\n",
        sub_query.intent, expected, tables_json
    );
    if let Some(fb) = feedback {
        prompt.push_str(&format!("Prior attempt feedback: {fb}\n"));
    }

    let schema = plan_response_schema();
    match deps.llm.invoke(&prompt, &schema).await {
        Ok(value) => {
            deps.llm_breaker.record_success();
            serde_json::from_value(value)
                .map_err(|e| PipelineError::new(PipelineErrorCode::PlanningFailure, e.to_string()).into())
        }
        Err(e) => {
            deps.llm_breaker.record_failure(true);
            Err(PipelineError::new(PipelineErrorCode::PlanningFailure, e.to_string()).into())
        }
    }
}

/// `Refiner`: ask the LLM for corrective feedback given the failed plan and
/// the validator/planner errors that rejected it.
async fn refine(deps: &SubgraphDeps<'_>, plan: &PlanModel, errors: &[PipelineError]) -> Result<String> {
    let prompt = format!(
        "The following plan failed validation: {}\nErrors: {}\nProvide corrective feedback.",
        serde_json::to_string(plan).unwrap_or_default(),
        errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
    );
    let schema = serde_json::json!({"type": "object", "properties": {"feedback": {"type": "string"}}});
    let value = deps.llm.invoke(&prompt, &schema).await?;
    Ok(value.get("feedback").and_then(|v| v.as_str()).unwrap_or("no feedback provided").to_string())
}

fn retry_delay(config: &SubgraphConfig, retry_count: u32) -> std::time::Duration {
    std::time::Duration::from_secs_f64(config.retry.backoff_seconds(retry_count))
}

/// Run the full subgraph state machine for one subquery: SCHEMA -> PLAN ->
/// VALIDATE -> (REFINE -> PLAN)* -> GENERATE -> EXECUTE -> END.
#[instrument(skip_all, fields(subgraph_id = %subgraph_id, sub_query_id = %sub_query.id))]
pub async fn run_subgraph(
    deps: &SubgraphDeps<'_>,
    trace_id: &str,
    tenant_id: &str,
    request_id: &str,
    subgraph_id: &str,
    sub_query: SubQuery,
    user_context: &UserContext,
) -> SubgraphOutput {
    let mut reasoning = Vec::new();
    let mut errors: Vec<PipelineError> = Vec::new();
    let mut retry_count = 0u32;
    let mut feedback: Option<String> = None;

    let relevant_tables = match retrieve_schema(deps, &sub_query, &mut errors).await {
        Ok(t) => t,
        Err(e) => {
            errors.push(PipelineError::new(PipelineErrorCode::PlannerFailed, e.to_string()));
            Vec::new()
        }
    };
    for w in &errors {
        reasoning.push(format!("{w}"));
    }

    let fail = |sub_query: SubQuery, retry_count, plan, sql_draft, errors, reasoning| SubgraphOutput {
        sub_query,
        retry_count,
        plan,
        sql_draft,
        artifact: None,
        errors,
        reasoning,
        status: SubgraphStatus::Failed,
    };

    let validated_plan;
    loop {
        let planned = match plan(deps, &sub_query, &relevant_tables, feedback.as_deref()).await {
            Ok(p) => p,
            Err(Nl2SqlError::Pipeline(pe)) => {
                let retryable = pe.retryable && retry_count < deps.config.max_retries;
                errors.push(pe);
                if retryable {
                    retry_count += 1;
                    METRICS.inc_subgraph_retries();
                    emit_subgraph_retry(trace_id, subgraph_id, retry_count, "planner error");
                    tokio::time::sleep(retry_delay(&deps.config, retry_count)).await;
                    continue;
                }
                return fail(sub_query, retry_count, None, None, errors, reasoning);
            }
            Err(other) => {
                errors.push(PipelineError::new(PipelineErrorCode::PlannerFailed, other.to_string()));
                return fail(sub_query, retry_count, None, None, errors, reasoning);
            }
        };

        let outcome = validate(
            &planned,
            sub_query.expected_schema.as_deref(),
            &relevant_tables,
            &sub_query.datasource_id,
            deps.policy,
            &user_context.roles,
            deps.validator_config,
        );

        if outcome.ok() {
            validated_plan = planned;
            break;
        }

        errors.extend(outcome.errors.clone());

        if outcome.has_critical() {
            return fail(sub_query, retry_count, Some(planned), None, errors, reasoning);
        }

        if outcome.has_retryable(retry_count < deps.config.max_retries) {
            retry_count += 1;
            METRICS.inc_subgraph_retries();
            emit_subgraph_retry(trace_id, subgraph_id, retry_count, "validation failed");
            tokio::time::sleep(retry_delay(&deps.config, retry_count)).await;
            match refine(deps, &planned, &outcome.errors).await {
                Ok(fb) => {
                    reasoning.push(format!("PLAN_FEEDBACK: {fb}"));
                    feedback = Some(fb);
                }
                Err(e) => reasoning.push(format!("refiner call failed: {e}")),
            }
            continue;
        }

        return fail(sub_query, retry_count, Some(planned), None, errors, reasoning);
    }

    let sql = match generate(&validated_plan, deps.adapter.row_limit(), &AnsiSqlBuilder) {
        Ok(sql) => sql,
        Err(e) => {
            errors.push(PipelineError::new(PipelineErrorCode::SqlGenFailed, e.to_string()));
            return fail(sub_query, retry_count, Some(validated_plan), None, errors, reasoning);
        }
    };

    if !deps.db_breaker.allow() {
        errors.push(PipelineError::new(PipelineErrorCode::ServiceUnavailable, "DB breaker open"));
        return fail(sub_query, retry_count, Some(validated_plan), Some(sql), errors, reasoning);
    }

    let limits = RequestLimits { row_limit: deps.adapter.row_limit(), byte_limit: deps.adapter.max_bytes(), timeout_ms: 30_000 };
    let request = AdapterRequest::sql(sql.clone(), limits, trace_id, tenant_id);

    let frame = match deps.adapter.execute(request).await {
        Ok(frame) => {
            deps.db_breaker.record_success();
            frame
        }
        Err(e) => {
            deps.db_breaker.record_failure(true);
            errors.push(PipelineError::new(PipelineErrorCode::ExecutionFailed, e.to_string()));
            return fail(sub_query, retry_count, Some(validated_plan), Some(sql), errors, reasoning);
        }
    };

    if !frame.is_ok() {
        errors.push(PipelineError::new(
            PipelineErrorCode::ExecutionFailed,
            frame.error.clone().unwrap_or_else(|| "adapter returned an error frame".to_string()),
        ));
        return fail(sub_query, retry_count, Some(validated_plan), Some(sql), errors, reasoning);
    }

    let artifact = match deps
        .artifact_store
        .put(tenant_id, request_id, subgraph_id, sub_query.schema_version.as_deref(), &frame)
        .await
    {
        Ok(a) => a,
        Err(e) => {
            errors.push(PipelineError::new(PipelineErrorCode::ExecutionFailed, e.to_string()));
            return fail(sub_query, retry_count, Some(validated_plan), Some(sql), errors, reasoning);
        }
    };

    SubgraphOutput {
        sub_query,
        retry_count,
        plan: Some(validated_plan),
        sql_draft: Some(sql),
        artifact: Some(artifact),
        errors,
        reasoning,
        status: SubgraphStatus::Succeeded,
    }
}
