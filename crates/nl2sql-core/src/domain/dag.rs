//! Logical execution DAG: scan/combine/post_* nodes, deterministic layered
//! topological sort, and content hashing.
//!
//! Nodes live in a flat arena keyed by ID; edges reference IDs rather than
//! owning pointers, so the acyclic structure can be validated and re-sorted
//! without any interior mutability tricks.

use crate::error::{PipelineError, PipelineErrorCode, Result};
use crate::ids::stable_id;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Scan,
    Combine,
    PostFilter,
    PostAggregate,
    PostProject,
    PostSort,
    PostLimit,
}

/// Column set for a node's output; must be unique by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationSchema {
    pub columns: Vec<String>,
}

impl RelationSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn has_unique_columns(&self) -> bool {
        let set: BTreeSet<&String> = self.columns.iter().collect();
        set.len() == self.columns.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalNode {
    pub id: String,
    pub kind: NodeKind,
    pub inputs: Vec<String>,
    pub output_schema: RelationSchema,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// Deterministic logical graph of scan/combine/post operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDAG {
    pub nodes: Vec<LogicalNode>,
    pub edges: Vec<Edge>,
    pub layers: Vec<Vec<String>>,
    pub content_hash: String,
    pub dag_id: String,
}

#[derive(Serialize)]
struct DagContent<'a> {
    nodes: &'a [LogicalNode],
    edges: &'a [Edge],
    version: u32,
}

const DAG_VERSION: u32 = 1;

impl ExecutionDAG {
    /// Build a DAG from nodes (edges are derived from each node's `inputs`),
    /// validating references, acyclicity, and unique output columns, then
    /// compute the deterministic layering and content hash.
    pub fn build(mut nodes: Vec<LogicalNode>) -> Result<Self> {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let ids: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        if ids.len() != nodes.len() {
            return Err(PipelineError::new(
                PipelineErrorCode::PlannerFailed,
                "duplicate node id in execution DAG",
            )
            .into());
        }

        let mut edges = Vec::new();
        for n in &nodes {
            if !n.output_schema.has_unique_columns() {
                return Err(PipelineError::new(
                    PipelineErrorCode::PlannerFailed,
                    format!("node {} has duplicate output columns", n.id),
                )
                .into());
            }
            for input in &n.inputs {
                if !ids.contains(input.as_str()) {
                    return Err(PipelineError::new(
                        PipelineErrorCode::PlannerFailed,
                        format!("node {} references unknown input {}", n.id, input),
                    )
                    .into());
                }
                edges.push(Edge { from: input.clone(), to: n.id.clone() });
            }
        }
        edges.sort_by(|a, b| (a.from.as_str(), a.to.as_str()).cmp(&(b.from.as_str(), b.to.as_str())));

        let layers = Self::layered_topological_sort(&nodes, &edges)?;

        let content = DagContent { nodes: &nodes, edges: &edges, version: DAG_VERSION };
        let content_hash = stable_id(&content)?;
        let dag_id = format!("dag_{content_hash}");

        Ok(Self { nodes, edges, layers, content_hash, dag_id })
    }

    /// Repeatedly collect the set of nodes whose predecessors are all
    /// scheduled, sort each ready-set by id ascending, and emit as one layer.
    fn layered_topological_sort(nodes: &[LogicalNode], edges: &[Edge]) -> Result<Vec<Vec<String>>> {
        let mut indegree: BTreeMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut downstream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for e in edges {
            *indegree.get_mut(e.to.as_str()).unwrap() += 1;
            downstream.entry(e.from.as_str()).or_default().push(e.to.as_str());
        }

        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_unstable();

        let mut layers = Vec::new();
        let mut scheduled = 0usize;
        let mut queue: VecDeque<&str> = ready.into_iter().collect();

        while !queue.is_empty() {
            let layer: Vec<&str> = queue.drain(..).collect();
            let mut next_ready = Vec::new();
            for &id in &layer {
                scheduled += 1;
                if let Some(outs) = downstream.get(id) {
                    for &out in outs {
                        let deg = indegree.get_mut(out).unwrap();
                        *deg -= 1;
                        if *deg == 0 {
                            next_ready.push(out);
                        }
                    }
                }
            }
            let mut sorted_layer: Vec<String> = layer.iter().map(|s| s.to_string()).collect();
            sorted_layer.sort();
            layers.push(sorted_layer);
            next_ready.sort_unstable();
            next_ready.dedup();
            queue.extend(next_ready);
        }

        if scheduled != nodes.len() {
            return Err(PipelineError::new(PipelineErrorCode::PlannerFailed, "cycle detected in execution DAG").into());
        }

        Ok(layers)
    }

    pub fn node(&self, id: &str) -> Option<&LogicalNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn scan_nodes(&self) -> impl Iterator<Item = &LogicalNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Scan)
    }

    /// Nodes with no outgoing edges, sorted by id — the terminal result set.
    pub fn terminal_nodes(&self) -> Vec<&LogicalNode> {
        let has_outgoing: BTreeSet<&str> = self.edges.iter().map(|e| e.from.as_str()).collect();
        let mut terminal: Vec<&LogicalNode> = self
            .nodes
            .iter()
            .filter(|n| !has_outgoing.contains(n.id.as_str()))
            .collect();
        terminal.sort_by(|a, b| a.id.cmp(&b.id));
        terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(id: &str) -> LogicalNode {
        LogicalNode {
            id: id.to_string(),
            kind: NodeKind::Scan,
            inputs: vec![],
            output_schema: RelationSchema::new(vec!["id".into()]),
            attributes: serde_json::json!({}),
        }
    }

    fn combine(id: &str, inputs: Vec<&str>) -> LogicalNode {
        LogicalNode {
            id: id.to_string(),
            kind: NodeKind::Combine,
            inputs: inputs.into_iter().map(|s| s.to_string()).collect(),
            output_schema: RelationSchema::new(vec!["id".into()]),
            attributes: serde_json::json!({"op": "union"}),
        }
    }

    #[test]
    fn layers_partition_is_topological_and_sorted() {
        let dag = ExecutionDAG::build(vec![scan("b"), scan("a"), combine("c", vec!["a", "b"])]).unwrap();
        assert_eq!(dag.layers[0], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(dag.layers[1], vec!["c".to_string()]);
    }

    #[test]
    fn content_hash_is_deterministic_across_builds() {
        let d1 = ExecutionDAG::build(vec![scan("a"), scan("b"), combine("c", vec!["a", "b"])]).unwrap();
        let d2 = ExecutionDAG::build(vec![scan("b"), scan("a"), combine("c", vec!["b", "a"])]).unwrap();
        assert_eq!(d1.content_hash, d2.content_hash);
    }

    #[test]
    fn single_scan_has_one_layer() {
        let dag = ExecutionDAG::build(vec![scan("only")]).unwrap();
        assert_eq!(dag.layers.len(), 1);
        assert_eq!(dag.layers[0].len(), 1);
    }

    #[test]
    fn unknown_input_reference_is_rejected() {
        let result = ExecutionDAG::build(vec![combine("c", vec!["missing"])]);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_output_columns_rejected() {
        let mut bad = scan("a");
        bad.output_schema = RelationSchema::new(vec!["id".into(), "id".into()]);
        assert!(ExecutionDAG::build(vec![bad]).is_err());
    }

    #[test]
    fn terminal_nodes_sorted_by_id() {
        let dag = ExecutionDAG::build(vec![scan("a"), scan("b"), combine("c", vec!["a", "b"])]).unwrap();
        let terminal: Vec<&str> = dag.terminal_nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(terminal, vec!["c"]);
    }
}
