//! SQL Generator: a visitor over a validated `PlanModel` that renders SQL
//! text through a pluggable `SqlBuilder`, keeping the dialect engine
//! separate from the plan-walking logic.

use crate::domain::{Expr, JoinKind, PlanModel, SortDir};
use crate::error::{PipelineError, PipelineErrorCode, Result};

/// Dialect-specific rendering primitives. A generic ANSI builder is provided
/// below; a Postgres/MySQL/etc. dialect supplies its own quoting and
/// pagination rules by implementing this trait.
pub trait SqlBuilder {
    fn quote_ident(&self, ident: &str) -> String;
    fn quote_literal(&self, value: &serde_json::Value) -> String;
    fn limit_clause(&self, limit: u64) -> String;
}

pub struct AnsiSqlBuilder;

impl SqlBuilder for AnsiSqlBuilder {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn quote_literal(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            serde_json::Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }

    fn limit_clause(&self, limit: u64) -> String {
        format!("LIMIT {limit}")
    }
}

fn render_expr(expr: &Expr, builder: &dyn SqlBuilder) -> String {
    match expr {
        Expr::Literal { value } => builder.quote_literal(value),
        Expr::Column { alias, name } => match alias {
            Some(a) => format!("{}.{}", builder.quote_ident(a), builder.quote_ident(name)),
            None => builder.quote_ident(name),
        },
        Expr::Func { name, args } => {
            let rendered: Vec<String> = args.iter().map(|a| render_expr(a, builder)).collect();
            format!("{name}({})", rendered.join(", "))
        }
        Expr::Binary { left, op, right } => {
            let op_str = binary_op_str(*op);
            format!("({} {} {})", render_expr(left, builder), op_str, render_expr(right, builder))
        }
        Expr::Unary { op, expr } => match op {
            crate::domain::UnaryOp::Not => format!("(NOT {})", render_expr(expr, builder)),
            crate::domain::UnaryOp::IsNull => format!("({} IS NULL)", render_expr(expr, builder)),
            crate::domain::UnaryOp::IsNotNull => format!("({} IS NOT NULL)", render_expr(expr, builder)),
        },
        Expr::Case { whens, otherwise } => {
            let mut s = String::from("CASE");
            for (cond, val) in whens {
                s.push_str(&format!(" WHEN {} THEN {}", render_expr(cond, builder), render_expr(val, builder)));
            }
            if let Some(o) = otherwise {
                s.push_str(&format!(" ELSE {}", render_expr(o, builder)));
            }
            s.push_str(" END");
            s
        }
    }
}

fn binary_op_str(op: crate::domain::BinaryOp) -> &'static str {
    use crate::domain::BinaryOp::*;
    match op {
        Eq => "=",
        Neq => "<>",
        Lt => "<",
        Lte => "<=",
        Gt => ">",
        Gte => ">=",
        And => "AND",
        Or => "OR",
        Like => "LIKE",
    }
}

fn join_kind_str(kind: &JoinKind) -> &'static str {
    match kind {
        JoinKind::Inner => "INNER JOIN",
        JoinKind::Left => "LEFT JOIN",
        JoinKind::Right => "RIGHT JOIN",
        JoinKind::Full => "FULL JOIN",
    }
}

/// Generate SQL text for `plan`, clamping the effective row limit to
/// `min(plan.limit ?? adapter_row_limit, adapter_row_limit)`.
pub fn generate(plan: &PlanModel, adapter_row_limit: u64, builder: &dyn SqlBuilder) -> Result<String> {
    if plan.tables.is_empty() {
        return Err(PipelineError::new(PipelineErrorCode::SqlGenFailed, "plan has no tables").into());
    }

    let mut ordered_tables = plan.tables.clone();
    ordered_tables.sort_by_key(|t| t.ordinal);
    let mut ordered_selects = plan.select_items.clone();
    ordered_selects.sort_by_key(|s| s.ordinal);
    let mut ordered_joins = plan.joins.clone();
    ordered_joins.sort_by_key(|j| j.ordinal);
    let mut ordered_group_by = plan.group_by.clone();
    ordered_group_by.sort_by_key(|g| g.ordinal);
    let mut ordered_order_by = plan.order_by.clone();
    ordered_order_by.sort_by_key(|o| o.ordinal);

    let select_clause = ordered_selects
        .iter()
        .map(|s| match &s.alias {
            Some(alias) => format!("{} AS {}", render_expr(&s.expr, builder), builder.quote_ident(alias)),
            None => render_expr(&s.expr, builder),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let base_table = &ordered_tables[0];
    let mut sql = format!(
        "SELECT {select_clause} FROM {} {}",
        builder.quote_ident(&base_table.name),
        builder.quote_ident(&base_table.alias)
    );

    let alias_to_name: std::collections::BTreeMap<&str, &str> =
        ordered_tables.iter().map(|t| (t.alias.as_str(), t.name.as_str())).collect();

    for j in &ordered_joins {
        let Some(right_table) = alias_to_name.get(j.right_alias.as_str()) else {
            return Err(PipelineError::new(PipelineErrorCode::SqlGenFailed, format!("join alias '{}' has no table", j.right_alias)).into());
        };
        sql.push_str(&format!(
            " {} {} {} ON {}",
            join_kind_str(&j.kind),
            builder.quote_ident(right_table),
            builder.quote_ident(&j.right_alias),
            render_expr(&j.condition, builder)
        ));
    }

    if let Some(w) = &plan.r#where {
        sql.push_str(&format!(" WHERE {}", render_expr(w, builder)));
    }

    if !ordered_group_by.is_empty() {
        let cols: Vec<String> = ordered_group_by.iter().map(|g| render_expr(&g.expr, builder)).collect();
        sql.push_str(&format!(" GROUP BY {}", cols.join(", ")));
    }

    if let Some(h) = &plan.having {
        sql.push_str(&format!(" HAVING {}", render_expr(h, builder)));
    }

    if !ordered_order_by.is_empty() {
        let cols: Vec<String> = ordered_order_by
            .iter()
            .map(|o| format!("{} {}", render_expr(&o.expr, builder), if o.dir == SortDir::Asc { "ASC" } else { "DESC" }))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", cols.join(", ")));
    }

    let effective_limit = plan.limit.unwrap_or(adapter_row_limit).min(adapter_row_limit);
    sql.push(' ');
    sql.push_str(&builder.limit_clause(effective_limit));

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BinaryOp, QueryType, SelectItem, TableRef};

    fn simple_plan(limit: Option<u64>) -> PlanModel {
        PlanModel {
            query_type: QueryType::Read,
            tables: vec![TableRef { ordinal: 0, name: "machines".into(), alias: "m".into() }],
            joins: vec![],
            select_items: vec![SelectItem {
                ordinal: 0,
                expr: Expr::Column { alias: Some("m".into()), name: "id".into() },
                alias: Some("id".into()),
            }],
            r#where: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit,
        }
    }

    #[test]
    fn generates_basic_select_with_limit() {
        let sql = generate(&simple_plan(Some(5)), 1000, &AnsiSqlBuilder).unwrap();
        assert!(sql.starts_with("SELECT"));
        assert!(sql.contains("LIMIT 5"));
    }

    #[test]
    fn limit_is_clamped_to_adapter_row_limit() {
        let sql = generate(&simple_plan(Some(10_000)), 100, &AnsiSqlBuilder).unwrap();
        assert!(sql.contains("LIMIT 100"));
    }

    #[test]
    fn missing_plan_limit_defaults_to_adapter_row_limit() {
        let sql = generate(&simple_plan(None), 50, &AnsiSqlBuilder).unwrap();
        assert!(sql.contains("LIMIT 50"));
    }

    #[test]
    fn where_clause_renders_binary_expr() {
        let mut plan = simple_plan(Some(5));
        plan.r#where = Some(Expr::Binary {
            left: Box::new(Expr::Column { alias: Some("m".into()), name: "status".into() }),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Literal { value: serde_json::json!("active") }),
        });
        let sql = generate(&plan, 1000, &AnsiSqlBuilder).unwrap();
        assert!(sql.contains("WHERE"));
        assert!(sql.contains("'active'"));
    }

    #[test]
    fn empty_tables_is_sql_gen_failed() {
        let mut plan = simple_plan(Some(5));
        plan.tables.clear();
        assert!(generate(&plan, 1000, &AnsiSqlBuilder).is_err());
    }
}
