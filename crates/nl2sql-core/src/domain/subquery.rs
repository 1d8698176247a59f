//! Decomposer output types: subqueries, combine groups, post-combine ops.

use crate::error::Result;
use crate::ids::stable_id;
use serde::{Deserialize, Serialize};

/// A single-datasource, semantic-only query fragment.
///
/// `id` is computed from the content below *excluding itself* — constructing
/// one always goes through [`SubQuery::new`] so the two can never drift
/// apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuery {
    pub id: String,
    pub datasource_id: String,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_schema: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<String>>,
}

/// Content used to derive a [`SubQuery`]'s stable ID — everything in
/// `SubQuery` except `id` itself.
#[derive(Serialize)]
struct SubQueryContent<'a> {
    datasource_id: &'a str,
    intent: &'a str,
    expected_schema: &'a Option<Vec<String>>,
    schema_version: &'a Option<String>,
    filters: &'a Option<serde_json::Value>,
    group_by: &'a Option<Vec<String>>,
    metrics: &'a Option<Vec<String>>,
}

impl SubQuery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        datasource_id: impl Into<String>,
        intent: impl Into<String>,
        expected_schema: Option<Vec<String>>,
        schema_version: Option<String>,
        filters: Option<serde_json::Value>,
        group_by: Option<Vec<String>>,
        metrics: Option<Vec<String>>,
    ) -> Result<Self> {
        let datasource_id = datasource_id.into();
        let intent = intent.into();
        let content = SubQueryContent {
            datasource_id: &datasource_id,
            intent: &intent,
            expected_schema: &expected_schema,
            schema_version: &schema_version,
            filters: &filters,
            group_by: &group_by,
            metrics: &metrics,
        };
        let id = stable_id(&content)?;
        Ok(Self {
            id,
            datasource_id,
            intent,
            expected_schema,
            schema_version,
            filters,
            group_by,
            metrics,
        })
    }
}

/// How a combine group's input participates: `role` is meaningful for
/// `join`/`compare` (e.g. "left"/"right"), required there, optional for `union`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineOp {
    Union,
    Join,
    Compare,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineGroup {
    pub id: String,
    pub op: CombineOp,
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_keys: Option<Vec<(String, String)>>,
}

#[derive(Serialize)]
struct CombineGroupContent<'a> {
    op: CombineOp,
    inputs: &'a [String],
    roles: &'a Option<std::collections::BTreeMap<String, String>>,
    join_keys: &'a Option<Vec<(String, String)>>,
}

impl CombineGroup {
    pub fn new(
        op: CombineOp,
        inputs: Vec<String>,
        roles: Option<std::collections::BTreeMap<String, String>>,
        join_keys: Option<Vec<(String, String)>>,
    ) -> Result<Self> {
        let content = CombineGroupContent { op, inputs: &inputs, roles: &roles, join_keys: &join_keys };
        let id = stable_id(&content)?;
        Ok(Self { id, op, inputs, roles, join_keys })
    }

    /// Whether this group satisfies the invariant that `join`/`compare` need a
    /// role per input and at least one join-key pair. `union` never needs
    /// either, so it's vacuously true.
    pub fn requires_roles_and_keys(&self) -> bool {
        if !matches!(self.op, CombineOp::Join | CombineOp::Compare) {
            return true;
        }
        let has_role_per_input = self.roles.as_ref().is_some_and(|roles| self.inputs.iter().all(|i| roles.contains_key(i)));
        let has_join_key = self.join_keys.as_ref().is_some_and(|keys| !keys.is_empty());
        has_role_per_input && has_join_key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostOp {
    Filter,
    Aggregate,
    Project,
    Sort,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCombineOp {
    pub id: String,
    pub op: PostOp,
    pub target: String,
    pub params: serde_json::Value,
}

#[derive(Serialize)]
struct PostOpContent<'a> {
    op: PostOp,
    target: &'a str,
    params: &'a serde_json::Value,
}

impl PostCombineOp {
    pub fn new(op: PostOp, target: impl Into<String>, params: serde_json::Value) -> Result<Self> {
        let target = target.into();
        let content = PostOpContent { op, target: &target, params: &params };
        let id = stable_id(&content)?;
        Ok(Self { id, op, target, params })
    }
}

/// Full decomposer output: resolved subqueries plus combine/post plumbing,
/// all sorted by ID before being returned (lexicographic tie-break).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecomposerResponse {
    pub sub_queries: Vec<SubQuery>,
    pub combine_groups: Vec<CombineGroup>,
    pub post_combine_ops: Vec<PostCombineOp>,
    pub unmapped_subqueries: Vec<String>,
}

impl DecomposerResponse {
    pub fn sort_all(&mut self) {
        self.sub_queries.sort_by(|a, b| a.id.cmp(&b.id));
        self.combine_groups.sort_by(|a, b| a.id.cmp(&b.id));
        self.post_combine_ops.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subquery_id_excludes_nothing_but_itself() {
        let a = SubQuery::new("ops", "list machines", None, None, None, None, None).unwrap();
        let b = SubQuery::new("ops", "list machines", None, None, None, None, None).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn subquery_id_changes_with_intent() {
        let a = SubQuery::new("ops", "list machines", None, None, None, None, None).unwrap();
        let b = SubQuery::new("ops", "list widgets", None, None, None, None, None).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn union_never_requires_roles_and_keys() {
        let group = CombineGroup::new(CombineOp::Union, vec!["a".into(), "b".into()], None, None).unwrap();
        assert!(group.requires_roles_and_keys());
    }

    #[test]
    fn join_without_roles_or_keys_fails_requirement() {
        let group = CombineGroup::new(CombineOp::Join, vec!["a".into(), "b".into()], None, None).unwrap();
        assert!(!group.requires_roles_and_keys());
    }

    #[test]
    fn join_with_partial_roles_fails_requirement() {
        let roles: std::collections::BTreeMap<String, String> = [("a".to_string(), "left".to_string())].into_iter().collect();
        let group = CombineGroup::new(CombineOp::Join, vec!["a".into(), "b".into()], Some(roles), Some(vec![("x".into(), "y".into())])).unwrap();
        assert!(!group.requires_roles_and_keys());
    }

    #[test]
    fn join_with_roles_per_input_and_join_key_satisfies_requirement() {
        let roles: std::collections::BTreeMap<String, String> =
            [("a".to_string(), "left".to_string()), ("b".to_string(), "right".to_string())].into_iter().collect();
        let group = CombineGroup::new(CombineOp::Join, vec!["a".into(), "b".into()], Some(roles), Some(vec![("x".into(), "y".into())])).unwrap();
        assert!(group.requires_roles_and_keys());
    }

    #[test]
    fn sort_all_orders_by_id() {
        let mut resp = DecomposerResponse::default();
        let a = SubQuery::new("ops", "b", None, None, None, None, None).unwrap();
        let b = SubQuery::new("ops", "a", None, None, None, None, None).unwrap();
        resp.sub_queries = vec![a.clone(), b.clone()];
        resp.sort_all();
        let ids: Vec<_> = resp.sub_queries.iter().map(|s| s.id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
