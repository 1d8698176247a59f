//! Root pipeline state (`GraphState`) and per-subquery state
//! (`SubgraphExecutionState`), plus the update-dictionary merge semantics
//! nodes use to fold partial results back in without in-place mutation.

use crate::domain::plan::PlanModel;
use crate::domain::subquery::{DecomposerResponse, SubQuery};
use crate::domain::user::UserContext;
use crate::error::PipelineError;
use crate::ids::compute_digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A persisted tabular result: uri + content hash + metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub uri: String,
    pub backend: String,
    pub format: String,
    pub content_hash: String,
    pub tenant_id: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ArtifactRef {
    /// Content hash = SHA-256 of canonical `{columns, row_count, path}`.
    pub fn content_hash_of(columns: &[String], row_count: u64, path: &str) -> crate::error::Result<String> {
        let payload = serde_json::json!({ "columns": columns, "row_count": row_count, "path": path });
        Ok(compute_digest(&payload)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubgraphStatus {
    Succeeded,
    Failed,
}

/// Output of one subgraph run, folded into `GraphState.subgraph_outputs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphOutput {
    pub sub_query: SubQuery,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_draft: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    pub errors: Vec<PipelineError>,
    pub reasoning: Vec<String>,
    pub status: SubgraphStatus,
}

/// Root pipeline state. Fields fall into three merge classes:
/// - lists (`errors`, `reasoning`, `warnings`): concatenation
/// - maps (`artifact_refs`, `subgraph_outputs`): per-key last-write-wins
/// - scalars/objects (`resolver_resp`, `decomposer_resp`, ...): last-write-wins,
///   and parallel branches MUST NOT write these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphState {
    pub trace_id: String,
    pub user_query: String,
    pub user_context: Option<UserContext>,
    pub datasource_id: Option<String>,
    pub resolver_resp: Option<ResolverResponse>,
    pub decomposer_resp: Option<DecomposerResponse>,
    pub planner_resp: Option<crate::domain::dag::ExecutionDAG>,
    pub aggregator_resp: Option<serde_json::Value>,
    pub synth_resp: Option<String>,
    pub artifact_refs: BTreeMap<String, ArtifactRef>,
    pub subgraph_outputs: BTreeMap<String, SubgraphOutput>,
    pub errors: Vec<PipelineError>,
    pub reasoning: Vec<String>,
    pub warnings: Vec<PipelineError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedDatasource {
    pub id: String,
    pub schema_version_latest: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverResponse {
    pub resolved: Vec<ResolvedDatasource>,
}

/// A partial update a node returns; the orchestrator folds it into
/// `GraphState` via [`GraphState::merge`]. This is how "no in-place mutation
/// by worker units" is enforced structurally.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub datasource_id: Option<String>,
    pub resolver_resp: Option<ResolverResponse>,
    pub decomposer_resp: Option<DecomposerResponse>,
    pub planner_resp: Option<crate::domain::dag::ExecutionDAG>,
    pub aggregator_resp: Option<serde_json::Value>,
    pub synth_resp: Option<String>,
    pub artifact_refs: BTreeMap<String, ArtifactRef>,
    pub subgraph_outputs: BTreeMap<String, SubgraphOutput>,
    pub errors: Vec<PipelineError>,
    pub reasoning: Vec<String>,
    pub warnings: Vec<PipelineError>,
}

impl GraphState {
    pub fn new(trace_id: impl Into<String>, user_query: impl Into<String>, user_context: UserContext) -> Self {
        Self {
            trace_id: trace_id.into(),
            user_query: user_query.into(),
            user_context: Some(user_context),
            ..Default::default()
        }
    }

    /// Fold a partial [`StateUpdate`] into this state using the merge rules:
    /// lists concatenate, maps overwrite per-key, scalars last-write-wins.
    pub fn merge(&mut self, update: StateUpdate) {
        if update.datasource_id.is_some() {
            self.datasource_id = update.datasource_id;
        }
        if update.resolver_resp.is_some() {
            self.resolver_resp = update.resolver_resp;
        }
        if update.decomposer_resp.is_some() {
            self.decomposer_resp = update.decomposer_resp;
        }
        if update.planner_resp.is_some() {
            self.planner_resp = update.planner_resp;
        }
        if update.aggregator_resp.is_some() {
            self.aggregator_resp = update.aggregator_resp;
        }
        if update.synth_resp.is_some() {
            self.synth_resp = update.synth_resp;
        }
        for (k, v) in update.artifact_refs {
            self.artifact_refs.insert(k, v);
        }
        for (k, v) in update.subgraph_outputs {
            self.subgraph_outputs.insert(k, v);
        }
        self.errors.extend(update.errors);
        self.reasoning.extend(update.reasoning);
        self.warnings.extend(update.warnings);
    }

    pub fn has_critical_error(&self) -> bool {
        self.errors.iter().any(|e| e.is_critical())
    }
}

/// Per-subquery execution state, passed by value through the subgraph's
/// state machine and merged back into `GraphState` at exit.
#[derive(Debug, Clone)]
pub struct SubgraphExecutionState {
    pub trace_id: String,
    pub sub_query: SubQuery,
    pub user_context: UserContext,
    pub subgraph_id: String,
    /// `(table_name, contract)`, restricted to the candidate set the
    /// `SchemaRetriever` resolved for this subquery.
    pub relevant_tables: Vec<(String, crate::domain::schema::TableContract)>,
    pub plan: Option<PlanModel>,
    pub retry_count: u32,
    pub errors: Vec<PipelineError>,
    pub reasoning: Vec<String>,
}

impl SubgraphExecutionState {
    pub fn new(trace_id: impl Into<String>, sub_query: SubQuery, user_context: UserContext, subgraph_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            sub_query,
            user_context,
            subgraph_id: subgraph_id.into(),
            relevant_tables: Vec::new(),
            plan: None,
            retry_count: 0,
            errors: Vec::new(),
            reasoning: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineErrorCode, Severity};

    fn err(code: PipelineErrorCode) -> PipelineError {
        PipelineError::new(code, "test")
    }

    #[test]
    fn list_fields_concatenate_on_merge() {
        let mut state = GraphState::new("t1", "q", UserContext::new("u", "t", vec![]));
        state.merge(StateUpdate { errors: vec![err(PipelineErrorCode::ColumnNotFound)], ..Default::default() });
        state.merge(StateUpdate { errors: vec![err(PipelineErrorCode::PlanFeedback)], ..Default::default() });
        assert_eq!(state.errors.len(), 2);
    }

    #[test]
    fn map_fields_overwrite_per_key_not_globally() {
        let mut state = GraphState::new("t1", "q", UserContext::new("u", "t", vec![]));
        let artifact = ArtifactRef {
            uri: "file://a".into(),
            backend: "local".into(),
            format: "parquet".into(),
            content_hash: "x".into(),
            tenant_id: "t".into(),
            request_id: "r".into(),
            schema_version: None,
            created_at: chrono::Utc::now(),
        };
        let mut m1 = BTreeMap::new();
        m1.insert("n1".to_string(), artifact.clone());
        state.merge(StateUpdate { artifact_refs: m1, ..Default::default() });

        let mut m2 = BTreeMap::new();
        m2.insert("n2".to_string(), artifact);
        state.merge(StateUpdate { artifact_refs: m2, ..Default::default() });

        assert_eq!(state.artifact_refs.len(), 2);
    }

    #[test]
    fn has_critical_error_detects_severity() {
        let mut state = GraphState::new("t1", "q", UserContext::new("u", "t", vec![]));
        assert!(!state.has_critical_error());
        state.merge(StateUpdate { errors: vec![err(PipelineErrorCode::SecurityViolation)], ..Default::default() });
        assert!(state.has_critical_error());
        assert_eq!(state.errors[0].severity, Severity::Critical);
    }
}
