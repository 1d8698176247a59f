//! Decomposer: turns a free-text user query plus the resolved datasource set
//! into a [`DecomposerResponse`] of single-datasource subqueries, combine
//! groups, and post-combine ops, all keyed by stable, content-derived IDs.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{CombineGroup, CombineOp, DecomposerResponse, PostCombineOp, PostOp, SubQuery};
use crate::error::{PipelineError, PipelineErrorCode, Result};
use crate::llm::StructuredLlm;
use crate::vector::{RetrievalFilter, VectorIndex};

/// Tokens that mark an LLM-emitted "subquery intent" as having leaked raw
/// SQL rather than staying semantic-only. Deliberately conservative: these
/// are keywords with no legitimate place in a natural-language intent.
fn looks_like_sql(intent: &str) -> bool {
    let re = Regex::new(r"(?i)\b(SELECT|FROM|WHERE|JOIN|UNION|DROP|INSERT|UPDATE|DELETE|ALTER|EXEC)\b").unwrap();
    re.is_match(intent)
}

/// Raw shape the planning LLM is asked to emit: temp ids rather than stable
/// ones, since stable ids depend on content the LLM doesn't control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSubQuery {
    pub temp_id: String,
    pub datasource_id: String,
    pub intent: String,
    #[serde(default)]
    pub expected_schema: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Option<serde_json::Value>,
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
    #[serde(default)]
    pub metrics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCombineGroup {
    pub temp_id: String,
    pub op: CombineOp,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub roles: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub join_keys: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPostCombineOp {
    pub op: PostOp,
    pub target_temp_id: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDecomposition {
    pub sub_queries: Vec<RawSubQuery>,
    #[serde(default)]
    pub combine_groups: Vec<RawCombineGroup>,
    #[serde(default)]
    pub post_combine_ops: Vec<RawPostCombineOp>,
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "sub_queries": {"type": "array"},
            "combine_groups": {"type": "array"},
            "post_combine_ops": {"type": "array"}
        },
        "required": ["sub_queries"]
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn decompose(
    llm: &dyn StructuredLlm,
    vector_index: &dyn VectorIndex,
    user_query: &str,
    allowed_ds_ids: &BTreeSet<String>,
    resolved_ds_ids: &BTreeSet<String>,
    schema_version_by_ds: &std::collections::BTreeMap<String, String>,
) -> Result<DecomposerResponse> {
    let filter = RetrievalFilter::new(allowed_ds_ids.iter().cloned());
    let candidates = vector_index.retrieve_datasource_candidates(user_query, 10, &filter).await?;

    let context: Vec<String> = candidates.iter().map(|c| c.chunk.embed_text()).collect();
    let prompt = format!(
        "Decompose the following user query into per-datasource subqueries.\nQuery: {user_query}\nCandidate context:\n{}",
        context.join("\n")
    );

    let schema = response_schema();
    let raw: RawDecomposition = llm
        .invoke(&prompt, &schema)
        .await
        .and_then(|v| serde_json::from_value(v).map_err(Into::into))
        .map_err(|e| PipelineError::new(PipelineErrorCode::DecomposerFailed, e.to_string()))?;

    let mut response = DecomposerResponse::default();
    let mut temp_to_stable: std::collections::BTreeMap<String, String> = std::collections::BTreeMap::new();

    for raw_sq in raw.sub_queries {
        if looks_like_sql(&raw_sq.intent) {
            response.unmapped_subqueries.push(raw_sq.temp_id.clone());
            continue;
        }
        if !resolved_ds_ids.contains(&raw_sq.datasource_id) || !allowed_ds_ids.contains(&raw_sq.datasource_id) {
            response.unmapped_subqueries.push(raw_sq.temp_id.clone());
            continue;
        }
        let schema_version = schema_version_by_ds.get(&raw_sq.datasource_id).cloned();
        let sub_query = SubQuery::new(
            raw_sq.datasource_id,
            raw_sq.intent,
            raw_sq.expected_schema,
            schema_version,
            raw_sq.filters,
            raw_sq.group_by,
            raw_sq.metrics,
        )?;
        temp_to_stable.insert(raw_sq.temp_id, sub_query.id.clone());
        response.sub_queries.push(sub_query);
    }

    let known_subquery_ids: BTreeSet<&str> = response.sub_queries.iter().map(|s| s.id.as_str()).collect();
    let mut temp_group_to_stable: std::collections::BTreeMap<String, String> = std::collections::BTreeMap::new();

    for raw_group in raw.combine_groups {
        let inputs: Vec<String> = raw_group
            .inputs
            .iter()
            .filter_map(|temp| temp_to_stable.get(temp).cloned())
            .collect();
        if inputs.len() != raw_group.inputs.len() || inputs.iter().any(|id| !known_subquery_ids.contains(id.as_str())) {
            continue;
        }
        // `raw_group.roles` is keyed by the same temp ids as `raw_group.inputs`;
        // carry the remap forward so downstream lookups by stable input id work.
        let roles = raw_group.roles.map(|roles| {
            roles
                .into_iter()
                .filter_map(|(temp, role)| temp_to_stable.get(&temp).cloned().map(|stable| (stable, role)))
                .collect::<std::collections::BTreeMap<_, _>>()
        });
        let group = CombineGroup::new(raw_group.op, inputs, roles, raw_group.join_keys)?;
        if !group.requires_roles_and_keys() {
            continue;
        }
        temp_group_to_stable.insert(raw_group.temp_id, group.id.clone());
        response.combine_groups.push(group);
    }

    let known_group_ids: BTreeSet<&str> = response.combine_groups.iter().map(|g| g.id.as_str()).collect();

    for raw_op in raw.post_combine_ops {
        let Some(target) = temp_group_to_stable.get(&raw_op.target_temp_id) else { continue };
        if !known_group_ids.contains(target.as_str()) {
            continue;
        }
        let op = PostCombineOp::new(raw_op.op, target.clone(), raw_op.params)?;
        response.post_combine_ops.push(op);
    }

    response.sort_all();
    Ok(response)
}
