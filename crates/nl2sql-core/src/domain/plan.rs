//! Strict-typed query plan AST (`PlanModel`) — the intermediate
//! representation between the LLM planner and the SQL generator.
//!
//! Every variant here is deny-unknown-fields: the LLM's structured output is
//! deserialized straight into these types, so an unexpected field is a
//! deserialization error rather than a silently-ignored one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    IsNull,
    IsNotNull,
}

/// Tagged union of expression kinds. Each variant's required fields are
/// enforced by `deny_unknown_fields` plus the fields themselves being
/// non-`Option` wherever they are mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Expr {
    Literal { value: serde_json::Value },
    Column {
        #[serde(default)]
        alias: Option<String>,
        name: String,
    },
    Func { name: String, args: Vec<Expr> },
    Binary { left: Box<Expr>, op: BinaryOp, right: Box<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Case {
        whens: Vec<(Expr, Expr)>,
        #[serde(default)]
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Walk every `column` reference in the tree, depth-first.
    pub fn walk_columns<'a>(&'a self, out: &mut Vec<(&'a Option<String>, &'a str)>) {
        match self {
            Expr::Column { alias, name } => out.push((alias, name)),
            Expr::Literal { .. } => {}
            Expr::Func { args, .. } => args.iter().for_each(|a| a.walk_columns(out)),
            Expr::Binary { left, right, .. } => {
                left.walk_columns(out);
                right.walk_columns(out);
            }
            Expr::Unary { expr, .. } => expr.walk_columns(out),
            Expr::Case { whens, otherwise } => {
                for (cond, val) in whens {
                    cond.walk_columns(out);
                    val.walk_columns(out);
                }
                if let Some(o) = otherwise {
                    o.walk_columns(out);
                }
            }
        }
    }

    /// True if this is a `binary` node whose op is an equality comparison.
    pub fn is_equality(&self) -> bool {
        matches!(self, Expr::Binary { op: BinaryOp::Eq, .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableRef {
    pub ordinal: u32,
    pub name: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinClause {
    pub ordinal: u32,
    pub right_alias: String,
    pub condition: Expr,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectItem {
    pub ordinal: u32,
    pub expr: Expr,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupByItem {
    pub ordinal: u32,
    pub expr: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderByItem {
    pub ordinal: u32,
    pub expr: Expr,
    pub dir: SortDir,
}

/// The strict-typed plan AST produced by the planner LLM and consumed by
/// the validator and generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanModel {
    pub query_type: QueryType,
    pub tables: Vec<TableRef>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    pub select_items: Vec<SelectItem>,
    #[serde(default)]
    pub r#where: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<GroupByItem>,
    #[serde(default)]
    pub having: Option<Expr>,
    #[serde(default)]
    pub order_by: Vec<OrderByItem>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl PlanModel {
    /// Check ordinals in `items` are contiguous from 0 (no gaps, no duplicates).
    pub fn ordinals_contiguous(items: &[u32]) -> bool {
        let mut sorted: Vec<u32> = items.to_vec();
        sorted.sort_unstable();
        sorted.iter().enumerate().all(|(i, v)| *v == i as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_contiguous_detects_gap() {
        assert!(PlanModel::ordinals_contiguous(&[0, 1, 2]));
        assert!(!PlanModel::ordinals_contiguous(&[0, 2]));
        assert!(!PlanModel::ordinals_contiguous(&[1, 2, 3]));
    }

    #[test]
    fn walk_columns_collects_nested_refs() {
        let expr = Expr::Binary {
            left: Box::new(Expr::Column { alias: Some("m".into()), name: "id".into() }),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Column { alias: Some("o".into()), name: "machine_id".into() }),
        };
        let mut out = Vec::new();
        expr.walk_columns(&mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        let bad = serde_json::json!({"kind": "literal", "value": 1, "extra": true});
        let result: Result<Expr, _> = serde_json::from_value(bad);
        assert!(result.is_err());
    }
}
