//! HTTP handlers: request/response (de)serialization only. Every handler
//! delegates straight into `nl2sql_core::run_pipeline`; none of them decide
//! anything the pipeline itself doesn't already decide.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Extension};
use axum::Json;
use nl2sql_core::domain::UserContext;
use nl2sql_core::orchestrator::{run_pipeline, PipelineDeps, PipelineRequest};
use nl2sql_core::validator::ValidatorConfig;
use nl2sql_storage::runs::{self, RunRecord};
use serde::{Deserialize, Serialize};

use crate::error::RestError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub question: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub datasource_id: Option<String>,
    pub requested_schema_version: Option<String>,
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_user() -> String {
    "api".to_string()
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub run_id: String,
    pub trace_id: String,
    pub status: String,
    pub answer: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub async fn query(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResponse>, RestError> {
    if body.question.trim().is_empty() {
        return Err(RestError::bad_request("question must not be empty"));
    }
    if body.roles.is_empty() {
        return Err(RestError::bad_request("roles must not be empty"));
    }

    let validator_config = ValidatorConfig { strict_columns: state.config.logical_validator_strict_columns };
    let deps = PipelineDeps {
        vector_index: &state.vector_index,
        schema_store: &state.schema_store,
        llm: &state.llm,
        adapters: &state.adapters,
        artifact_store: &state.schema_store,
        policy: &state.policy,
        llm_breaker: &state.llm_breaker,
        vector_breaker: &state.vector_breaker,
        db_breaker: &state.db_breaker,
        config: state.config.clone(),
        validator_config,
    };

    let trace_id = uuid::Uuid::new_v4().to_string();
    let request = PipelineRequest {
        trace_id: trace_id.clone(),
        request_id: uuid::Uuid::new_v4().to_string(),
        user_query: body.question.clone(),
        user_context: UserContext::new(body.user.clone(), body.tenant.clone(), body.roles.clone()),
        datasource_id: body.datasource_id,
        requested_schema_version: body.requested_schema_version,
    };

    let pipeline_state = run_pipeline(&deps, request).await;

    let run_id = uuid::Uuid::new_v4().to_string();
    let record = RunRecord {
        run_id: run_id.clone(),
        trace_id: trace_id.clone(),
        created_at: chrono::Utc::now(),
        tenant_id: body.tenant,
        user_id: body.user,
        roles: body.roles,
        user_query: body.question,
        status: if pipeline_state.has_critical_error() { "error".to_string() } else { "ok".to_string() },
        error_count: pipeline_state.errors.len(),
        warning_count: pipeline_state.warnings.len(),
        answer: pipeline_state.synth_resp.clone(),
        state: serde_json::to_value(&pipeline_state).map_err(|e| RestError::internal(e.to_string()))?,
    };
    runs::append(&state.runs_path(), &record).map_err(|e| RestError::internal(e.to_string()))?;

    Ok(Json(QueryResponse {
        run_id,
        trace_id,
        status: record.status,
        answer: pipeline_state.synth_resp,
        errors: pipeline_state.errors.iter().map(ToString::to_string).collect(),
        warnings: pipeline_state.warnings.iter().map(ToString::to_string).collect(),
    }))
}

pub async fn get_run(
    Extension(state): Extension<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Result<Json<RunRecord>, RestError> {
    let record = runs::find(&state.runs_path(), &run_id).map_err(|e| RestError::internal(e.to_string()))?;
    record.map(Json).ok_or_else(|| RestError::not_found(format!("no run found with id '{run_id}'")))
}
