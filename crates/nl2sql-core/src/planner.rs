//! Global Planner: turns a `DecomposerResponse` into an `ExecutionDAG` of
//! scan, combine, and post-op nodes.

use crate::domain::{CombineGroup, DecomposerResponse, ExecutionDAG, LogicalNode, NodeKind, PostCombineOp, RelationSchema, SubQuery};
use crate::error::Result;

fn scan_node(sub_query: &SubQuery) -> LogicalNode {
    let columns = sub_query.expected_schema.clone().unwrap_or_default();
    LogicalNode {
        id: sub_query.id.clone(),
        kind: NodeKind::Scan,
        inputs: vec![],
        output_schema: RelationSchema::new(columns),
        attributes: serde_json::json!({ "datasource_id": sub_query.datasource_id, "intent": sub_query.intent }),
    }
}

fn combine_node(group: &CombineGroup) -> LogicalNode {
    let kind = NodeKind::Combine;
    let attributes = serde_json::json!({
        "op": group.op,
        "roles": group.roles,
        "join_keys": group.join_keys,
    });
    LogicalNode {
        id: group.id.clone(),
        kind,
        inputs: group.inputs.clone(),
        output_schema: RelationSchema::default(),
        attributes,
    }
}

fn post_node(op: &PostCombineOp) -> LogicalNode {
    let kind = match op.op {
        crate::domain::PostOp::Filter => NodeKind::PostFilter,
        crate::domain::PostOp::Aggregate => NodeKind::PostAggregate,
        crate::domain::PostOp::Project => NodeKind::PostProject,
        crate::domain::PostOp::Sort => NodeKind::PostSort,
        crate::domain::PostOp::Limit => NodeKind::PostLimit,
    };
    LogicalNode {
        id: op.id.clone(),
        kind,
        inputs: vec![op.target.clone()],
        output_schema: RelationSchema::default(),
        attributes: op.params.clone(),
    }
}

/// Build the full execution DAG: one scan per subquery, one combine per
/// combine group, one post-op node per post-combine op. Edges are derived
/// from each node's `inputs` by `ExecutionDAG::build`.
pub fn plan_global(decomposer_resp: &DecomposerResponse) -> Result<ExecutionDAG> {
    let mut nodes = Vec::new();
    for sq in &decomposer_resp.sub_queries {
        nodes.push(scan_node(sq));
    }
    for group in &decomposer_resp.combine_groups {
        nodes.push(combine_node(group));
    }
    for op in &decomposer_resp.post_combine_ops {
        nodes.push(post_node(op));
    }
    ExecutionDAG::build(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CombineOp, SubQuery};

    #[test]
    fn single_subquery_yields_one_scan_one_layer() {
        let sq = SubQuery::new("ops", "list machines", Some(vec!["id".into()]), None, None, None, None).unwrap();
        let mut resp = DecomposerResponse::default();
        resp.sub_queries.push(sq);
        let dag = plan_global(&resp).unwrap();
        assert_eq!(dag.nodes.len(), 1);
        assert_eq!(dag.layers.len(), 1);
        assert_eq!(dag.scan_nodes().count(), 1);
    }

    #[test]
    fn combine_group_depends_on_its_scan_inputs() {
        let a = SubQuery::new("history", "sales", Some(vec!["id".into()]), None, None, None, None).unwrap();
        let b = SubQuery::new("supply", "inventory", Some(vec!["id".into()]), None, None, None, None).unwrap();
        let group = CombineGroup::new(CombineOp::Union, vec![a.id.clone(), b.id.clone()], None, None).unwrap();

        let mut resp = DecomposerResponse::default();
        resp.sub_queries = vec![a, b];
        resp.combine_groups = vec![group];

        let dag = plan_global(&resp).unwrap();
        assert_eq!(dag.layers.len(), 2);
        assert_eq!(dag.layers[0].len(), 2);
        assert_eq!(dag.layers[1].len(), 1);
    }

    #[test]
    fn dag_content_hash_is_deterministic_regardless_of_input_order() {
        let a = SubQuery::new("ops", "a", Some(vec!["id".into()]), None, None, None, None).unwrap();
        let b = SubQuery::new("ops", "b", Some(vec!["id".into()]), None, None, None, None).unwrap();

        let mut resp1 = DecomposerResponse::default();
        resp1.sub_queries = vec![a.clone(), b.clone()];
        let mut resp2 = DecomposerResponse::default();
        resp2.sub_queries = vec![b, a];

        assert_eq!(plan_global(&resp1).unwrap().content_hash, plan_global(&resp2).unwrap().content_hash);
    }
}
