//! Structural feature analysis.
//!
//! The walker descends through every reachable expression and nested query
//! (CTE bodies, derived tables, set-op branches, subqueries) so that a
//! feature ban can be checked against the whole tree. Join counting and the
//! join signatures describe the top-level FROM clause only.

use schemars::JsonSchema;
use serde::Serialize;

use crate::ast::{Expr, JoinConstraint, SelectQuery, TableRef};

/// Boolean flags and join signatures derived from the AST.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryFeatures {
    pub has_aggregate: bool,
    pub has_window: bool,
    pub has_window_frame: bool,
    pub has_subquery: bool,
    pub has_in_subquery: bool,
    pub has_not_in_subquery: bool,
    pub has_exists_subquery: bool,
    pub has_not_exists_subquery: bool,
    pub has_in_list: bool,
    pub has_not_in_list: bool,
    pub has_quantified_subqueries: bool,
    pub has_set_operations: bool,
    pub has_derived_tables: bool,
    pub has_recursive_cte: bool,
    pub has_full_join_emulation: bool,
    pub has_natural_join: bool,
    pub has_interval_arith: bool,
    /// Joins in the top-level FROM clause.
    pub join_count: usize,
    /// Hyphen-joined join tokens, `NATURAL `-prefixed where applicable.
    pub join_type_seq: String,
    /// `base->T:t1->T:t2` over the top-level FROM clause.
    pub join_graph_sig: String,
    /// Why subqueries were disallowed during generation, when they were.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subquery_disallow_reason: Option<String>,
}

/// Query-level analysis: feature flags plus clause presence and the
/// determinism verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnalysis {
    pub features: QueryFeatures,
    pub has_limit: bool,
    pub has_order_by: bool,
    pub has_group_by: bool,
    pub has_having: bool,
    pub has_distinct: bool,
    pub has_cte: bool,
    pub has_set_ops: bool,
    pub deterministic: bool,
}

/// Derives structural feature flags from the AST.
pub fn analyze_query_features(query: &SelectQuery) -> QueryFeatures {
    let mut features = QueryFeatures::default();
    walk_query(query, true, &mut features);
    features
}

/// Full analysis, cached on the query node. A second call with an
/// unmutated query returns the cached result.
pub fn analyze_query(query: &mut SelectQuery) -> QueryAnalysis {
    if let Some(cached) = query.cached_analysis() {
        return cached.clone();
    }
    let analysis = QueryAnalysis {
        features: analyze_query_features(query),
        has_limit: query.limit.is_some(),
        has_order_by: !query.order_by.is_empty(),
        has_group_by: !query.group_by.is_empty(),
        has_having: query.having.is_some(),
        has_distinct: query.distinct,
        has_cte: query.with.is_some(),
        has_set_ops: !query.set_ops.is_empty(),
        deterministic: query.is_deterministic(),
    };
    query.set_cached_analysis(analysis.clone());
    analysis
}

fn walk_query(query: &SelectQuery, top: bool, f: &mut QueryFeatures) {
    if let Some(with) = &query.with {
        if with.recursive {
            f.has_recursive_cte = true;
        }
        for cte in &with.ctes {
            walk_query(&cte.query, false, f);
        }
    }

    if query.full_join_emulated {
        f.has_full_join_emulation = true;
    }

    if top {
        f.join_count = query.from.joins.len();
        f.join_type_seq = query
            .from
            .joins
            .iter()
            .map(|j| {
                if j.natural {
                    format!("NATURAL {}", j.join_type.token())
                } else {
                    j.join_type.token().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("-");
        let mut sig = String::from("base");
        for join in &query.from.joins {
            sig.push_str("->");
            if join.natural {
                sig.push_str("NATURAL ");
            }
            sig.push_str("T:");
            sig.push_str(join.table.visible_alias());
        }
        f.join_graph_sig = sig;
    }

    walk_table_ref(&query.from.base, f);
    for join in &query.from.joins {
        if join.natural {
            f.has_natural_join = true;
        }
        walk_table_ref(&join.table, f);
        if let JoinConstraint::On(expr) = &join.constraint {
            walk_expr(expr, false, f);
        }
    }

    for item in &query.items {
        walk_expr(&item.expr, false, f);
    }
    if let Some(where_clause) = &query.where_clause {
        walk_expr(where_clause, false, f);
    }
    for expr in &query.group_by {
        walk_expr(expr, false, f);
    }
    if let Some(sets) = &query.grouping.grouping_sets {
        for expr in sets.iter().flatten() {
            walk_expr(expr, false, f);
        }
    }
    if let Some(having) = &query.having {
        walk_expr(having, false, f);
    }
    for def in &query.window_defs {
        for expr in def.spec.partition_by.iter().chain(def.spec.order_by.iter()) {
            walk_expr(expr, false, f);
        }
        if def.spec.frame.is_some() {
            f.has_window_frame = true;
        }
    }
    for expr in &query.order_by {
        walk_expr(expr, false, f);
    }

    if !query.set_ops.is_empty() {
        f.has_set_operations = true;
        for branch in &query.set_ops {
            walk_query(&branch.rhs, false, f);
        }
    }
}

fn walk_table_ref(table: &TableRef, f: &mut QueryFeatures) {
    if let TableRef::Derived { query, .. } = table {
        f.has_derived_tables = true;
        walk_query(query, false, f);
    }
}

/// Walks one expression. `negated` is true when the expression sits
/// directly under a `NOT`, so IN/EXISTS report only their negated form.
fn walk_expr(expr: &Expr, negated: bool, f: &mut QueryFeatures) {
    match expr {
        Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) => {}
        Expr::Interval { .. } => f.has_interval_arith = true,
        Expr::Unary { op, expr } => {
            let inner_negated = *op == crate::ast::UnaryOp::Not;
            walk_expr(expr, inner_negated, f);
        }
        Expr::Binary { left, right, .. } => {
            walk_expr(left, false, f);
            walk_expr(right, false, f);
        }
        Expr::Func { name, args } => {
            if crate::ast::is_aggregate_function(name) {
                f.has_aggregate = true;
            }
            for arg in args {
                walk_expr(arg, false, f);
            }
        }
        Expr::Case { whens, else_expr } => {
            for (when, then) in whens {
                walk_expr(when, false, f);
                walk_expr(then, false, f);
            }
            if let Some(e) = else_expr {
                walk_expr(e, false, f);
            }
        }
        Expr::In { left, list } => {
            walk_expr(left, false, f);
            let is_subquery = matches!(list.as_slice(), [Expr::Subquery(_)]);
            if is_subquery {
                f.has_subquery = true;
                if negated {
                    f.has_not_in_subquery = true;
                } else {
                    f.has_in_subquery = true;
                }
            } else if negated {
                f.has_not_in_list = true;
            } else {
                f.has_in_list = true;
            }
            for item in list {
                if let Expr::Subquery(q) = item {
                    walk_query(q, false, f);
                } else {
                    walk_expr(item, false, f);
                }
            }
        }
        Expr::Exists { query } => {
            f.has_subquery = true;
            if negated {
                f.has_not_exists_subquery = true;
            } else {
                f.has_exists_subquery = true;
            }
            walk_query(query, false, f);
        }
        Expr::Subquery(query) => {
            f.has_subquery = true;
            walk_query(query, false, f);
        }
        Expr::CompareSubquery { left, query, .. } => {
            f.has_subquery = true;
            f.has_quantified_subqueries = true;
            walk_expr(left, false, f);
            walk_query(query, false, f);
        }
        Expr::Window(w) => {
            f.has_window = true;
            if w.spec.frame.is_some() {
                f.has_window_frame = true;
            }
            for arg in &w.args {
                walk_expr(arg, false, f);
            }
            for e in w.spec.partition_by.iter().chain(w.spec.order_by.iter()) {
                walk_expr(e, false, f);
            }
        }
        // Transparent for feature purposes.
        Expr::GroupByOrdinal { inner, .. } => {
            if let Some(inner) = inner {
                walk_expr(inner, negated, f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinOp, FromClause, Join, JoinConstraint, JoinType, SelectItem, TableRef, Value,
    };
    use crate::schema::ColumnType;

    fn base_query() -> SelectQuery {
        let mut q = SelectQuery::from_table("t0");
        q.items = vec![SelectItem::bare(Expr::column("t0", "c0", ColumnType::Int))];
        q
    }

    #[test]
    fn test_join_signatures() {
        let mut q = base_query();
        q.from.joins.push(Join {
            join_type: JoinType::Inner,
            natural: false,
            table: TableRef::named("t1"),
            constraint: JoinConstraint::On(Expr::binary(
                Expr::column("t0", "c0", ColumnType::Int),
                BinOp::Eq,
                Expr::column("t1", "c0", ColumnType::Int),
            )),
        });
        q.from.joins.push(Join {
            join_type: JoinType::Left,
            natural: true,
            table: TableRef::named("t2"),
            constraint: JoinConstraint::None,
        });
        let f = analyze_query_features(&q);
        assert_eq!(f.join_count, 2);
        assert_eq!(f.join_type_seq, "INNER-NATURAL LEFT");
        assert_eq!(f.join_graph_sig, "base->T:t1->NATURAL T:t2");
        assert!(f.has_natural_join);
    }

    #[test]
    fn test_not_in_reports_only_negated_form() {
        let mut q = base_query();
        q.where_clause = Some(Expr::not(Expr::In {
            left: Box::new(Expr::column("t0", "c0", ColumnType::Int)),
            list: vec![Expr::lit(Value::Int(1)), Expr::lit(Value::Int(2))],
        }));
        let f = analyze_query_features(&q);
        assert!(f.has_not_in_list);
        assert!(!f.has_in_list);
    }

    #[test]
    fn test_not_exists_reports_only_negated_form() {
        let mut q = base_query();
        q.where_clause = Some(Expr::not(Expr::Exists {
            query: Box::new(base_query()),
        }));
        let f = analyze_query_features(&q);
        assert!(f.has_not_exists_subquery);
        assert!(!f.has_exists_subquery);
        assert!(f.has_subquery);
    }

    #[test]
    fn test_grouping_ordinal_is_transparent() {
        let mut q = base_query();
        q.where_clause = Some(Expr::GroupByOrdinal {
            ordinal: Some(1),
            inner: Some(Box::new(Expr::count_one())),
        });
        let f = analyze_query_features(&q);
        assert!(f.has_aggregate);
    }

    #[test]
    fn test_aggregate_found_in_cte_body() {
        let mut cte_body = base_query();
        cte_body.items = vec![SelectItem::new(Expr::count_one(), "cnt")];
        let mut q = base_query();
        q.with = Some(crate::ast::With {
            recursive: false,
            ctes: vec![crate::ast::Cte {
                name: "cte_0".into(),
                query: cte_body,
            }],
        });
        let f = analyze_query_features(&q);
        assert!(f.has_aggregate);
        assert!(!f.has_recursive_cte);
    }

    #[test]
    fn test_analysis_is_cached_until_mutation() {
        let mut q = base_query();
        let first = analyze_query(&mut q);
        assert!(q.cached_analysis().is_some());
        let second = analyze_query(&mut q);
        assert_eq!(first, second);
        q.set_where(Some(Expr::func("RAND", vec![])));
        assert!(q.cached_analysis().is_none());
        let third = analyze_query(&mut q);
        assert!(!third.deterministic);
    }

    #[test]
    fn test_derived_table_flag() {
        let inner = base_query();
        let mut q = SelectQuery::new(FromClause {
            base: TableRef::Derived {
                query: Box::new(inner),
                alias: "d0".into(),
            },
            joins: vec![],
        });
        q.items = vec![SelectItem::bare(Expr::unqualified("c0", ColumnType::Int))];
        let f = analyze_query_features(&q);
        assert!(f.has_derived_tables);
    }
}
