//! Query nodes: SELECT, FROM, joins, CTEs, set operations.

use super::expr::{Expr, WindowSpec};
use crate::analyzer::QueryAnalysis;
use crate::schema::ColumnType;

/// Join type tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinType {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }

    /// Bare token used in join signatures (`INNER`, `LEFT`, ...).
    pub fn token(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Cross => "CROSS",
        }
    }
}

/// Join condition.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinConstraint {
    /// No condition (CROSS and NATURAL joins).
    None,
    On(Expr),
    Using(Vec<String>),
}

/// A table factor: a named table/view/CTE or a derived table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Named { name: String },
    Derived { query: Box<SelectQuery>, alias: String },
}

impl TableRef {
    pub fn named(name: impl Into<String>) -> Self {
        TableRef::Named { name: name.into() }
    }

    /// The alias this factor is visible under in the enclosing scope.
    pub fn visible_alias(&self) -> &str {
        match self {
            TableRef::Named { name } => name,
            TableRef::Derived { alias, .. } => alias,
        }
    }
}

/// One join step appended to the FROM base.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub natural: bool,
    pub table: TableRef,
    pub constraint: JoinConstraint,
}

/// The FROM clause: a base factor plus ordered joins.
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub base: TableRef,
    pub joins: Vec<Join>,
}

impl FromClause {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            base: TableRef::named(name),
            joins: Vec::new(),
        }
    }

    /// Aliases of every factor, base first, join order preserved.
    pub fn visible_aliases(&self) -> Vec<&str> {
        let mut out = vec![self.base.visible_alias()];
        out.extend(self.joins.iter().map(|j| j.table.visible_alias()));
        out
    }

    pub fn has_cross_join(&self) -> bool {
        self.joins.iter().any(|j| j.join_type == JoinType::Cross)
    }
}

/// One SELECT-list item.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    /// Empty alias means "emit the expression bare".
    pub alias: String,
}

impl SelectItem {
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
        }
    }

    pub fn bare(expr: Expr) -> Self {
        Self {
            expr,
            alias: String::new(),
        }
    }

    /// Published column type when this item feeds a derived table or CTE.
    pub fn published_type(&self) -> ColumnType {
        self.expr.inferred_type().unwrap_or(ColumnType::Varchar)
    }
}

/// A common table expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: SelectQuery,
}

/// The WITH list.
#[derive(Debug, Clone, PartialEq)]
pub struct With {
    pub recursive: bool,
    pub ctes: Vec<Cte>,
}

/// Set operation tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpType {
    Union,
    Intersect,
    Except,
}

impl SetOpType {
    pub fn sql(&self) -> &'static str {
        match self {
            SetOpType::Union => "UNION",
            SetOpType::Intersect => "INTERSECT",
            SetOpType::Except => "EXCEPT",
        }
    }
}

/// One set-operation branch appended after the query body. Only UNION may
/// carry ALL.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOpBranch {
    pub op: SetOpType,
    pub all: bool,
    pub rhs: SelectQuery,
}

/// A named window definition lifted to the `WINDOW` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDef {
    pub name: String,
    pub spec: WindowSpec,
}

/// GROUP BY grouping extensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingExt {
    pub with_rollup: bool,
    pub with_cube: bool,
    pub grouping_sets: Option<Vec<Vec<Expr>>>,
}

impl GroupingExt {
    pub fn is_plain(&self) -> bool {
        !self.with_rollup && !self.with_cube && self.grouping_sets.is_none()
    }
}

/// A SELECT query node.
///
/// The `analysis` cache is private to the crate: it is dropped by `Clone`
/// and must be invalidated by every mutation, notably predicate attachment.
#[derive(Debug, PartialEq)]
pub struct SelectQuery {
    pub with: Option<With>,
    pub set_ops: Vec<SetOpBranch>,
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: FromClause,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub grouping: GroupingExt,
    pub having: Option<Expr>,
    pub window_defs: Vec<WindowDef>,
    pub order_by: Vec<Expr>,
    pub limit: Option<u64>,
    /// Template strategy label (`join_only`, `join_filter`, ...) recorded
    /// for downstream oracles.
    pub strategy: Option<String>,
    /// Set when this query was rewritten into the LEFT/RIGHT UNION ALL
    /// shape that emulates a FULL OUTER JOIN.
    pub full_join_emulated: bool,
    pub(crate) analysis: Option<Box<QueryAnalysis>>,
}

impl Clone for SelectQuery {
    /// Deep clone of all subtrees. The cached analysis never travels.
    fn clone(&self) -> Self {
        Self {
            with: self.with.clone(),
            set_ops: self.set_ops.clone(),
            distinct: self.distinct,
            items: self.items.clone(),
            from: self.from.clone(),
            where_clause: self.where_clause.clone(),
            group_by: self.group_by.clone(),
            grouping: self.grouping.clone(),
            having: self.having.clone(),
            window_defs: self.window_defs.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            strategy: self.strategy.clone(),
            full_join_emulated: self.full_join_emulated,
            analysis: None,
        }
    }
}

impl SelectQuery {
    pub fn new(from: FromClause) -> Self {
        Self {
            with: None,
            set_ops: Vec::new(),
            distinct: false,
            items: Vec::new(),
            from,
            where_clause: None,
            group_by: Vec::new(),
            grouping: GroupingExt::default(),
            having: None,
            window_defs: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            strategy: None,
            full_join_emulated: false,
            analysis: None,
        }
    }

    /// A bare `SELECT ... FROM name` shell.
    pub fn from_table(name: impl Into<String>) -> Self {
        Self::new(FromClause::table(name))
    }

    pub(crate) fn invalidate_analysis(&mut self) {
        self.analysis = None;
    }

    pub(crate) fn cached_analysis(&self) -> Option<&QueryAnalysis> {
        self.analysis.as_deref()
    }

    pub(crate) fn set_cached_analysis(&mut self, analysis: QueryAnalysis) {
        self.analysis = Some(Box::new(analysis));
    }

    /// Replaces the WHERE clause, invalidating the cached analysis.
    pub fn set_where(&mut self, predicate: Option<Expr>) {
        self.where_clause = predicate;
        self.invalidate_analysis();
    }

    /// True when ORDER BY must reference only SELECT-list expressions or
    /// their ordinals: DISTINCT, GROUP BY, or any aggregate in the items.
    pub fn requires_select_order(&self) -> bool {
        self.distinct
            || !self.group_by.is_empty()
            || self.items.iter().any(|item| item.expr.contains_aggregate())
    }

    /// Makes item aliases unique by appending `_<n>` on collision.
    pub fn dedupe_item_aliases(&mut self) {
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for item in &mut self.items {
            if item.alias.is_empty() {
                continue;
            }
            if seen.contains(&item.alias) {
                let mut n = 1;
                let mut candidate = format!("{}_{}", item.alias, n);
                while seen.contains(&candidate) {
                    n += 1;
                    candidate = format!("{}_{}", item.alias, n);
                }
                item.alias = candidate;
            }
            seen.insert(item.alias.clone());
        }
        self.invalidate_analysis();
    }

    /// Clears ORDER BY and LIMIT on every node that participates as a
    /// set-op operand, recursively. The outermost query keeps its own
    /// ordering (it is the top wrapping level).
    pub fn normalize_set_operands(&mut self) {
        if self.set_ops.is_empty() {
            return;
        }
        for branch in &mut self.set_ops {
            branch.rhs.order_by.clear();
            branch.rhs.limit = None;
            branch.rhs.invalidate_analysis();
            branch.rhs.normalize_set_operands();
        }
        self.invalidate_analysis();
    }

    /// Recursive determinism verdict: the conjunction over every expression
    /// reachable from this query, including CTE bodies, derived tables,
    /// set-op branches, window definitions and join predicates.
    pub fn is_deterministic(&self) -> bool {
        if let Some(with) = &self.with {
            if !with.ctes.iter().all(|cte| cte.query.is_deterministic()) {
                return false;
            }
        }
        if !table_ref_deterministic(&self.from.base) {
            return false;
        }
        for join in &self.from.joins {
            if !table_ref_deterministic(&join.table) {
                return false;
            }
            if let JoinConstraint::On(expr) = &join.constraint {
                if !expr.is_deterministic() {
                    return false;
                }
            }
        }
        let exprs = self
            .items
            .iter()
            .map(|item| &item.expr)
            .chain(self.where_clause.iter())
            .chain(self.group_by.iter())
            .chain(self.having.iter())
            .chain(self.order_by.iter());
        for expr in exprs {
            if !expr.is_deterministic() {
                return false;
            }
        }
        if let Some(sets) = &self.grouping.grouping_sets {
            if !sets.iter().flatten().all(Expr::is_deterministic) {
                return false;
            }
        }
        for def in &self.window_defs {
            if !def.spec.partition_by.iter().all(Expr::is_deterministic)
                || !def.spec.order_by.iter().all(Expr::is_deterministic)
            {
                return false;
            }
        }
        self.set_ops.iter().all(|b| b.rhs.is_deterministic())
    }

    /// Names of CTEs defined on this query, in order.
    pub fn cte_names(&self) -> Vec<&str> {
        self.with
            .as_ref()
            .map(|w| w.ctes.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }
}

fn table_ref_deterministic(table: &TableRef) -> bool {
    match table {
        TableRef::Named { .. } => true,
        TableRef::Derived { query, .. } => query.is_deterministic(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    fn two_item_query() -> SelectQuery {
        let mut q = SelectQuery::from_table("t0");
        q.items = vec![
            SelectItem::new(Expr::unqualified("c0", ColumnType::Int), "c0"),
            SelectItem::new(Expr::unqualified("c1", ColumnType::Int), "c0"),
        ];
        q
    }

    #[test]
    fn test_alias_dedupe_appends_suffix() {
        let mut q = two_item_query();
        q.dedupe_item_aliases();
        assert_eq!(q.items[0].alias, "c0");
        assert_eq!(q.items[1].alias, "c0_1");
    }

    #[test]
    fn test_alias_dedupe_avoids_existing_suffix() {
        let mut q = two_item_query();
        q.items.push(SelectItem::new(
            Expr::unqualified("c2", ColumnType::Int),
            "c0_1",
        ));
        q.dedupe_item_aliases();
        let aliases: Vec<_> = q.items.iter().map(|i| i.alias.as_str()).collect();
        assert_eq!(aliases, vec!["c0", "c0_1", "c0_1_1"]);
    }

    #[test]
    fn test_clone_drops_analysis_cache() {
        let mut q = SelectQuery::from_table("t0");
        q.items = vec![SelectItem::bare(Expr::lit(Value::Int(1)))];
        let _ = crate::analyzer::analyze_query(&mut q);
        assert!(q.cached_analysis().is_some());
        let cloned = q.clone();
        assert!(cloned.cached_analysis().is_none());
    }

    #[test]
    fn test_normalize_clears_operand_order_limit() {
        let mut rhs = SelectQuery::from_table("t1");
        rhs.order_by = vec![Expr::unqualified("c0", ColumnType::Int)];
        rhs.limit = Some(5);
        let mut q = SelectQuery::from_table("t0");
        q.order_by = vec![Expr::unqualified("c0", ColumnType::Int)];
        q.limit = Some(1);
        q.set_ops.push(SetOpBranch {
            op: SetOpType::Union,
            all: true,
            rhs,
        });
        q.normalize_set_operands();
        // Operand cleared, top wrapping level kept.
        assert!(q.set_ops[0].rhs.order_by.is_empty());
        assert_eq!(q.set_ops[0].rhs.limit, None);
        assert_eq!(q.limit, Some(1));
    }

    #[test]
    fn test_requires_select_order() {
        let mut q = SelectQuery::from_table("t0");
        q.items = vec![SelectItem::bare(Expr::unqualified("c0", ColumnType::Int))];
        assert!(!q.requires_select_order());
        q.distinct = true;
        assert!(q.requires_select_order());
        q.distinct = false;
        q.items = vec![SelectItem::new(Expr::count_one(), "cnt")];
        assert!(q.requires_select_order());
    }
}
