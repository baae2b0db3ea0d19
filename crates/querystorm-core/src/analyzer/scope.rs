//! Lexical scope validation.
//!
//! Each `SelectQuery` defines a table scope: visible aliases mapped to the
//! column names visible under them. The validator walks the tree with the
//! current scope and a merged outer scope in hand, so correlated references
//! inside subqueries resolve. It is used both as a post-hoc filter on
//! generated queries and to reject predicates that reference out-of-scope
//! columns during predicate attachment.
//!
//! Enforced rules:
//!
//! - an unqualified column reference is always permitted (the downstream
//!   engine resolves it);
//! - a qualified reference needs its alias in scope (or the outer scope)
//!   and its name in that alias's visible column set;
//! - a join's ON clause sees only tables accepted up to and including that
//!   join, which catches future-table references deterministically;
//! - after a USING or NATURAL join, the shared columns become
//!   unreferenceable via qualified names on any affected table;
//! - set-operation operand tables are not visible to the main query body;
//! - derived tables and CTEs publish their SELECT-item aliases, typed by
//!   the item's inferred type with a Varchar fallback.

use std::collections::{HashMap, HashSet};

use crate::ast::{Expr, JoinConstraint, SelectQuery, TableRef};
use crate::schema::SchemaState;

/// Visible aliases with their column sets, plus qualified references
/// suppressed by USING/NATURAL joins.
#[derive(Debug, Clone, Default)]
struct Scope {
    visible: HashMap<String, HashSet<String>>,
    banned: HashSet<(String, String)>,
}

impl Scope {
    /// Checks a qualified reference against this scope alone. Returns
    /// `None` when the alias is unknown here.
    fn check(&self, table: &str, column: &str) -> Option<bool> {
        let columns = self.visible.get(table)?;
        Some(columns.contains(column) && !self.banned.contains(&(table.to_string(), column.to_string())))
    }

    /// This scope layered over `outer`; inner aliases shadow outer ones.
    fn merged_over(&self, outer: &Scope) -> Scope {
        let mut merged = outer.clone();
        for (alias, cols) in &self.visible {
            merged.visible.insert(alias.clone(), cols.clone());
            merged
                .banned
                .retain(|(a, _)| a != alias);
        }
        merged
            .banned
            .extend(self.banned.iter().cloned());
        merged
    }
}

type CteEnv = HashMap<String, HashSet<String>>;

/// Validates every column reference in `query` against its lexical scope.
pub fn validate_query_scope(query: &SelectQuery, schema: &dyn SchemaState) -> bool {
    validate_query(query, schema, &Scope::default(), &CteEnv::new())
}

fn validate_query(
    query: &SelectQuery,
    schema: &dyn SchemaState,
    outer: &Scope,
    parent_ctes: &CteEnv,
) -> bool {
    // HAVING without GROUP BY is rejected at validation time.
    if query.having.is_some() && query.group_by.is_empty() {
        return false;
    }

    // CTEs: each body sees the CTEs defined before it; a recursive CTE also
    // sees itself. Names shadow base tables only within the owning query.
    let mut ctes = parent_ctes.clone();
    if let Some(with) = &query.with {
        for cte in &with.ctes {
            let published = published_columns(&cte.query);
            if with.recursive {
                ctes.insert(cte.name.clone(), published.clone());
            }
            if !validate_query(&cte.query, schema, outer, &ctes) {
                return false;
            }
            ctes.insert(cte.name.clone(), published);
        }
    }

    // FROM clause, joins processed in order.
    let mut scope = Scope::default();
    let Some((alias, columns)) = resolve_factor(&query.from.base, schema, outer, &ctes) else {
        return false;
    };
    scope.visible.insert(alias, columns);

    for join in &query.from.joins {
        let Some((alias, columns)) = resolve_factor(&join.table, schema, outer, &ctes) else {
            return false;
        };

        if join.natural {
            let left_names: HashSet<String> = scope
                .visible
                .values()
                .flat_map(|cols| cols.iter().cloned())
                .collect();
            for common in columns.iter().filter(|c| left_names.contains(*c)) {
                for (left_alias, cols) in &scope.visible {
                    if cols.contains(common) {
                        scope.banned.insert((left_alias.clone(), common.clone()));
                    }
                }
                scope.banned.insert((alias.clone(), common.clone()));
            }
        }

        match &join.constraint {
            JoinConstraint::Using(using) => {
                for column in using {
                    if !columns.contains(column) {
                        return false;
                    }
                    // The shared name must occur exactly once across all
                    // left-side columns, counting every column of every
                    // visible table.
                    let occurrences: usize = scope
                        .visible
                        .values()
                        .filter(|cols| cols.contains(column))
                        .count();
                    if occurrences != 1 {
                        return false;
                    }
                    for (left_alias, cols) in &scope.visible {
                        if cols.contains(column) {
                            scope.banned.insert((left_alias.clone(), column.clone()));
                        }
                    }
                    scope.banned.insert((alias.clone(), column.clone()));
                }
                scope.visible.insert(alias, columns);
            }
            JoinConstraint::On(on) => {
                // The ON expression sees tables up to and including this
                // join, so the factor enters scope first.
                scope.visible.insert(alias, columns);
                if !validate_expr(on, schema, &scope, outer, &ctes) {
                    return false;
                }
            }
            JoinConstraint::None => {
                scope.visible.insert(alias, columns);
            }
        }
    }

    // Named window definitions referenced by window functions must exist.
    let window_names: HashSet<&str> = query
        .window_defs
        .iter()
        .map(|def| def.name.as_str())
        .collect();

    let mut exprs: Vec<&Expr> = Vec::new();
    exprs.extend(query.items.iter().map(|item| &item.expr));
    exprs.extend(query.where_clause.iter());
    exprs.extend(query.group_by.iter());
    if let Some(sets) = &query.grouping.grouping_sets {
        exprs.extend(sets.iter().flatten());
    }
    exprs.extend(query.having.iter());
    for def in &query.window_defs {
        exprs.extend(def.spec.partition_by.iter());
        exprs.extend(def.spec.order_by.iter());
    }
    exprs.extend(query.order_by.iter());

    for expr in exprs {
        if !validate_expr(expr, schema, &scope, outer, &ctes) {
            return false;
        }
        if !window_refs_defined(expr, &window_names) {
            return false;
        }
    }

    // Set-op operands validate independently; their tables never leak into
    // the main body's scope.
    query
        .set_ops
        .iter()
        .all(|branch| validate_query(&branch.rhs, schema, outer, &ctes))
}

/// The columns a derived table or CTE publishes: item aliases, falling back
/// to the bare column name for unaliased column items.
fn published_columns(query: &SelectQuery) -> HashSet<String> {
    query
        .items
        .iter()
        .filter_map(|item| {
            if !item.alias.is_empty() {
                Some(item.alias.clone())
            } else if let Expr::Column(c) = &item.expr {
                Some(c.name.clone())
            } else {
                None
            }
        })
        .collect()
}

fn resolve_factor(
    table: &TableRef,
    schema: &dyn SchemaState,
    outer: &Scope,
    ctes: &CteEnv,
) -> Option<(String, HashSet<String>)> {
    match table {
        TableRef::Named { name } => {
            if let Some(columns) = ctes.get(name) {
                return Some((name.clone(), columns.clone()));
            }
            let table = schema.table_by_name(name)?;
            let columns = table.columns.iter().map(|c| c.name.clone()).collect();
            Some((name.clone(), columns))
        }
        TableRef::Derived { query, alias } => {
            if !validate_query(query, schema, outer, ctes) {
                return None;
            }
            Some((alias.clone(), published_columns(query)))
        }
    }
}

fn validate_expr(
    expr: &Expr,
    schema: &dyn SchemaState,
    scope: &Scope,
    outer: &Scope,
    ctes: &CteEnv,
) -> bool {
    match expr {
        Expr::Column(c) => {
            let Some(table) = &c.table else {
                // Unqualified references are always permitted.
                return true;
            };
            match scope.check(table, &c.name) {
                Some(ok) => ok,
                // Correlated reference: fall through to the outer scope.
                None => outer.check(table, &c.name).unwrap_or(false),
            }
        }
        Expr::Literal(_) | Expr::Param(_) | Expr::Interval { .. } => true,
        Expr::Unary { expr, .. } => validate_expr(expr, schema, scope, outer, ctes),
        Expr::Binary { left, right, .. } => {
            validate_expr(left, schema, scope, outer, ctes)
                && validate_expr(right, schema, scope, outer, ctes)
        }
        Expr::Func { args, .. } => args
            .iter()
            .all(|arg| validate_expr(arg, schema, scope, outer, ctes)),
        Expr::Case { whens, else_expr } => {
            whens.iter().all(|(when, then)| {
                validate_expr(when, schema, scope, outer, ctes)
                    && validate_expr(then, schema, scope, outer, ctes)
            }) && else_expr
                .as_ref()
                .is_none_or(|e| validate_expr(e, schema, scope, outer, ctes))
        }
        Expr::In { left, list } => {
            validate_expr(left, schema, scope, outer, ctes)
                && list
                    .iter()
                    .all(|item| validate_expr(item, schema, scope, outer, ctes))
        }
        Expr::Exists { query } => {
            validate_query(query, schema, &scope.merged_over(outer), ctes)
        }
        Expr::Subquery(query) => {
            validate_query(query, schema, &scope.merged_over(outer), ctes)
        }
        Expr::CompareSubquery { left, query, .. } => {
            validate_expr(left, schema, scope, outer, ctes)
                && validate_query(query, schema, &scope.merged_over(outer), ctes)
        }
        Expr::Window(w) => {
            w.args
                .iter()
                .chain(w.spec.partition_by.iter())
                .chain(w.spec.order_by.iter())
                .all(|e| validate_expr(e, schema, scope, outer, ctes))
        }
        Expr::GroupByOrdinal { inner, .. } => inner
            .as_ref()
            .is_none_or(|e| validate_expr(e, schema, scope, outer, ctes)),
    }
}

fn window_refs_defined(expr: &Expr, names: &HashSet<&str>) -> bool {
    match expr {
        Expr::Window(w) => {
            if let Some(name) = &w.window_ref {
                if !names.contains(name.as_str()) {
                    return false;
                }
            }
            w.args
                .iter()
                .chain(w.spec.partition_by.iter())
                .chain(w.spec.order_by.iter())
                .all(|e| window_refs_defined(e, names))
        }
        Expr::Unary { expr, .. } => window_refs_defined(expr, names),
        Expr::Binary { left, right, .. } => {
            window_refs_defined(left, names) && window_refs_defined(right, names)
        }
        Expr::Func { args, .. } => args.iter().all(|e| window_refs_defined(e, names)),
        Expr::Case { whens, else_expr } => {
            whens
                .iter()
                .all(|(w, t)| window_refs_defined(w, names) && window_refs_defined(t, names))
                && else_expr.as_ref().is_none_or(|e| window_refs_defined(e, names))
        }
        Expr::In { left, list } => {
            window_refs_defined(left, names) && list.iter().all(|e| window_refs_defined(e, names))
        }
        Expr::GroupByOrdinal { inner, .. } => {
            inner.as_ref().is_none_or(|e| window_refs_defined(e, names))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Cte, Join, JoinType, SelectItem, With};
    use crate::schema::{Column, ColumnType, MemoryCatalog, Table};

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::with_tables(vec![
            Table::new("t0").with_columns(vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("k0", ColumnType::Int),
                Column::new("c0", ColumnType::Int),
            ]),
            Table::new("t1").with_columns(vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("k0", ColumnType::Int),
            ]),
            Table::new("t2").with_columns(vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("k0", ColumnType::Int),
            ]),
        ])
    }

    fn eq(a: Expr, b: Expr) -> Expr {
        Expr::binary(a, BinOp::Eq, b)
    }

    fn join_on(name: &str, on: Expr) -> Join {
        Join {
            join_type: JoinType::Inner,
            natural: false,
            table: TableRef::named(name),
            constraint: JoinConstraint::On(on),
        }
    }

    fn select_star(name: &str) -> SelectQuery {
        let mut q = SelectQuery::from_table(name);
        q.items = vec![SelectItem::bare(Expr::column(
            name,
            "k0",
            ColumnType::Int,
        ))];
        q
    }

    #[test]
    fn test_future_table_reference_rejected() {
        let schema = catalog();
        let mut q = select_star("t0");
        // First ON references t2, which joins later.
        q.from.joins.push(join_on(
            "t1",
            eq(
                Expr::column("t2", "k0", ColumnType::Int),
                Expr::column("t1", "k0", ColumnType::Int),
            ),
        ));
        q.from.joins.push(join_on(
            "t2",
            eq(
                Expr::column("t1", "k0", ColumnType::Int),
                Expr::column("t2", "k0", ColumnType::Int),
            ),
        ));
        assert!(!validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_on_sees_current_join() {
        let schema = catalog();
        let mut q = select_star("t0");
        q.from.joins.push(join_on(
            "t1",
            eq(
                Expr::column("t0", "k0", ColumnType::Int),
                Expr::column("t1", "k0", ColumnType::Int),
            ),
        ));
        assert!(validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_using_bans_qualified_references() {
        let schema = catalog();
        let mut q = select_star("t0");
        q.from.joins.push(Join {
            join_type: JoinType::Inner,
            natural: false,
            table: TableRef::named("t1"),
            constraint: JoinConstraint::Using(vec!["k0".into()]),
        });
        // Qualified reference to a USING column on either side is invalid.
        q.where_clause = Some(eq(
            Expr::column("t0", "k0", ColumnType::Int),
            Expr::lit(crate::ast::Value::Int(1)),
        ));
        assert!(!validate_query_scope(&q, &schema));

        // Unqualified stays valid.
        q.where_clause = Some(eq(
            Expr::unqualified("k0", ColumnType::Int),
            Expr::lit(crate::ast::Value::Int(1)),
        ));
        q.items = vec![SelectItem::bare(Expr::unqualified("k0", ColumnType::Int))];
        assert!(validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_using_requires_unique_left_occurrence() {
        let schema = catalog();
        let mut q = select_star("t0");
        q.items = vec![SelectItem::bare(Expr::unqualified("id", ColumnType::BigInt))];
        q.from.joins.push(Join {
            join_type: JoinType::Inner,
            natural: false,
            table: TableRef::named("t1"),
            constraint: JoinConstraint::Using(vec!["k0".into()]),
        });
        // After t0-t1, `id` occurs on both sides; USING(id) on t2 is
        // ill-defined under the count-across-all-columns rule.
        q.from.joins.push(Join {
            join_type: JoinType::Inner,
            natural: false,
            table: TableRef::named("t2"),
            constraint: JoinConstraint::Using(vec!["id".into()]),
        });
        assert!(!validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_correlated_subquery_resolves_outer() {
        let schema = catalog();
        let mut inner = select_star("t1");
        inner.items = vec![SelectItem::bare(Expr::count_one())];
        inner.where_clause = Some(eq(
            Expr::column("t1", "k0", ColumnType::Int),
            Expr::column("t0", "k0", ColumnType::Int),
        ));
        let mut q = select_star("t0");
        q.where_clause = Some(Expr::Exists {
            query: Box::new(inner),
        });
        assert!(validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_set_op_operand_tables_invisible() {
        let schema = catalog();
        let mut q = select_star("t0");
        q.set_ops.push(crate::ast::SetOpBranch {
            op: crate::ast::SetOpType::Union,
            all: false,
            rhs: select_star("t1"),
        });
        assert!(validate_query_scope(&q, &schema));
        // Main body referencing an operand table is invalid.
        q.where_clause = Some(eq(
            Expr::column("t1", "k0", ColumnType::Int),
            Expr::lit(crate::ast::Value::Int(1)),
        ));
        assert!(!validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_cte_publishes_item_aliases() {
        let schema = catalog();
        let mut body = select_star("t0");
        body.items = vec![SelectItem::new(
            Expr::column("t0", "c0", ColumnType::Int),
            "value",
        )];
        let mut q = SelectQuery::from_table("cte_0");
        q.with = Some(With {
            recursive: false,
            ctes: vec![Cte {
                name: "cte_0".into(),
                query: body,
            }],
        });
        q.items = vec![SelectItem::bare(Expr::column(
            "cte_0",
            "value",
            ColumnType::Int,
        ))];
        assert!(validate_query_scope(&q, &schema));

        // A column the CTE does not publish is rejected.
        q.items = vec![SelectItem::bare(Expr::column(
            "cte_0",
            "c0",
            ColumnType::Int,
        ))];
        assert!(!validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_having_requires_group_by() {
        let schema = catalog();
        let mut q = select_star("t0");
        q.having = Some(eq(
            Expr::column("t0", "c0", ColumnType::Int),
            Expr::lit(crate::ast::Value::Int(0)),
        ));
        assert!(!validate_query_scope(&q, &schema));
        q.group_by = vec![Expr::column("t0", "c0", ColumnType::Int)];
        assert!(validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_unknown_table_rejected() {
        let schema = catalog();
        let q = select_star("missing");
        assert!(!validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_undefined_window_ref_rejected() {
        use crate::ast::{WindowFunc, WindowSpec};
        let schema = catalog();
        let mut q = select_star("t0");
        q.items = vec![SelectItem::bare(Expr::Window(Box::new(WindowFunc {
            name: "ROW_NUMBER".into(),
            args: vec![],
            window_ref: Some("w9".into()),
            spec: WindowSpec::default(),
        })))];
        assert!(!validate_query_scope(&q, &schema));
    }
}
