//! SQL emission.
//!
//! A [`SqlBuilder`] accumulates the text buffer and the ordered vector of
//! bind arguments; the AST renders itself into it. The rendered string is
//! stable: same inputs produce byte-identical output. No generated text is
//! ever reparsed.
//!
//! Impossible states (nested `WITH` in an inline context, an empty SELECT
//! list, a grouping ordinal with neither part) signal a generator bug and
//! panic instead of emitting malformed SQL.

use std::fmt::Write;

use super::expr::{Expr, FrameBound, UnaryOp, Value, WindowSpec};
use super::query::{GroupingExt, Join, JoinConstraint, SelectQuery, TableRef};

/// Mutable builder holding the SQL text and bind arguments.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    sql: String,
    args: Vec<Value>,
    group_by_context: bool,
}

impl SqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Appends a `?` placeholder and tracks its bind value.
    pub fn push_arg(&mut self, value: Value) {
        self.sql.push('?');
        self.args.push(value);
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }

    fn write_joined<T>(&mut self, items: &[T], sep: &str, mut write: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            write(self, item);
        }
    }
}

impl Value {
    /// Renders the value inline. String literals are single-quoted with `'`
    /// doubled; booleans render as `1`/`0`; null as `NULL`.
    pub fn write_inline(&self, out: &mut String) {
        match self {
            Value::Int(v) | Value::BigInt(v) => {
                let _ = write!(out, "{v}");
            }
            Value::Float(v) => {
                let _ = write!(out, "{v}");
            }
            Value::Decimal(s) => out.push_str(s),
            Value::Str(s) => {
                out.push('\'');
                for ch in s.chars() {
                    if ch == '\'' {
                        out.push('\'');
                    }
                    out.push(ch);
                }
                out.push('\'');
            }
            Value::Bool(b) => out.push_str(if *b { "1" } else { "0" }),
            Value::Null => out.push_str("NULL"),
        }
    }
}

impl Expr {
    /// Emits this expression. Binary expressions are always parenthesized.
    pub fn emit(&self, b: &mut SqlBuilder) {
        match self {
            Expr::Column(c) => {
                if let Some(table) = &c.table {
                    b.push(table);
                    b.push(".");
                }
                b.push(&c.name);
            }
            Expr::Literal(v) => {
                let mut s = String::new();
                v.write_inline(&mut s);
                b.push(&s);
            }
            Expr::Param(v) => b.push_arg(v.clone()),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => {
                    b.push("NOT (");
                    expr.emit(b);
                    b.push(")");
                }
                UnaryOp::Neg => {
                    b.push("-(");
                    expr.emit(b);
                    b.push(")");
                }
                UnaryOp::IsNull => {
                    expr.emit(b);
                    b.push(" IS NULL");
                }
            },
            Expr::Binary { left, op, right } => {
                b.push("(");
                left.emit(b);
                b.push(" ");
                b.push(op.sql());
                b.push(" ");
                right.emit(b);
                b.push(")");
            }
            Expr::Func { name, args } => {
                b.push(name);
                b.push("(");
                b.write_joined(args, ", ", |b, arg| arg.emit(b));
                b.push(")");
            }
            Expr::Case { whens, else_expr } => {
                b.push("CASE");
                for (when, then) in whens {
                    b.push(" WHEN ");
                    when.emit(b);
                    b.push(" THEN ");
                    then.emit(b);
                }
                if let Some(e) = else_expr {
                    b.push(" ELSE ");
                    e.emit(b);
                }
                b.push(" END");
            }
            Expr::In { left, list } => {
                left.emit(b);
                b.push(" IN (");
                // A single subquery element prints without its own wrapping
                // parentheses to avoid `IN ((SELECT ...))`.
                if let [Expr::Subquery(q)] = list.as_slice() {
                    q.write_sql(b, true);
                } else {
                    b.write_joined(list, ", ", |b, e| e.emit(b));
                }
                b.push(")");
            }
            Expr::Exists { query } => {
                b.push("EXISTS (");
                query.write_sql(b, true);
                b.push(")");
            }
            Expr::Subquery(query) => {
                b.push("(");
                query.write_sql(b, true);
                b.push(")");
            }
            Expr::CompareSubquery {
                left,
                op,
                quantifier,
                query,
            } => {
                left.emit(b);
                b.push(" ");
                b.push(op.sql());
                b.push(" ");
                b.push(quantifier.sql());
                b.push(" (");
                query.write_sql(b, true);
                b.push(")");
            }
            Expr::Window(w) => {
                b.push(&w.name);
                b.push("(");
                b.write_joined(&w.args, ", ", |b, arg| arg.emit(b));
                b.push(") OVER ");
                if let Some(name) = &w.window_ref {
                    b.push(name);
                } else {
                    b.push("(");
                    write_window_spec(b, &w.spec);
                    b.push(")");
                }
            }
            Expr::Interval { value, unit } => {
                let mut s = String::new();
                let _ = write!(s, "INTERVAL {value} {}", unit.sql());
                b.push(&s);
            }
            Expr::GroupByOrdinal { ordinal, inner } => {
                if b.group_by_context {
                    match (ordinal, inner) {
                        (Some(n), _) => {
                            let mut s = String::new();
                            let _ = write!(s, "{n}");
                            b.push(&s);
                        }
                        (None, Some(inner)) => inner.emit(b),
                        (None, None) => {
                            panic!("grouping ordinal without ordinal or inner expression")
                        }
                    }
                } else {
                    match (inner, ordinal) {
                        (Some(inner), _) => inner.emit(b),
                        (None, Some(n)) => {
                            let mut s = String::new();
                            let _ = write!(s, "{n}");
                            b.push(&s);
                        }
                        (None, None) => {
                            panic!("grouping ordinal without ordinal or inner expression")
                        }
                    }
                }
            }
        }
    }
}

/// Shared writer for window specifications: `PARTITION BY`, `ORDER BY`, and
/// the frame clause, in that order.
pub(crate) fn write_window_spec(b: &mut SqlBuilder, spec: &WindowSpec) {
    let mut wrote = false;
    if !spec.partition_by.is_empty() {
        b.push("PARTITION BY ");
        b.write_joined(&spec.partition_by, ", ", |b, e| e.emit(b));
        wrote = true;
    }
    if !spec.order_by.is_empty() {
        if wrote {
            b.push(" ");
        }
        b.push("ORDER BY ");
        b.write_joined(&spec.order_by, ", ", |b, e| e.emit(b));
        wrote = true;
    }
    if let Some(frame) = &spec.frame {
        if wrote {
            b.push(" ");
        }
        b.push(frame.unit.sql());
        b.push(" BETWEEN ");
        write_frame_bound(b, frame.start.unwrap_or(FrameBound::UnboundedPreceding));
        b.push(" AND ");
        write_frame_bound(b, frame.end.unwrap_or(FrameBound::CurrentRow));
    }
}

fn write_frame_bound(b: &mut SqlBuilder, bound: FrameBound) {
    match bound {
        FrameBound::UnboundedPreceding => b.push("UNBOUNDED PRECEDING"),
        FrameBound::Preceding(n) => {
            let mut s = String::new();
            let _ = write!(s, "{n} PRECEDING");
            b.push(&s);
        }
        FrameBound::CurrentRow => b.push("CURRENT ROW"),
        FrameBound::Following(n) => {
            let mut s = String::new();
            let _ = write!(s, "{n} FOLLOWING");
            b.push(&s);
        }
        FrameBound::UnboundedFollowing => b.push("UNBOUNDED FOLLOWING"),
    }
}

impl TableRef {
    fn write_factor(&self, b: &mut SqlBuilder) {
        match self {
            TableRef::Named { name } => b.push(name),
            TableRef::Derived { query, alias } => {
                b.push("(");
                query.write_sql(b, true);
                b.push(") AS ");
                b.push(alias);
            }
        }
    }
}

impl Join {
    fn write_join(&self, b: &mut SqlBuilder) {
        b.push(" ");
        if self.natural {
            b.push("NATURAL ");
        }
        b.push(self.join_type.sql());
        b.push(" ");
        self.table.write_factor(b);
        match &self.constraint {
            JoinConstraint::None => {}
            JoinConstraint::On(expr) => {
                b.push(" ON ");
                expr.emit(b);
            }
            JoinConstraint::Using(cols) => {
                b.push(" USING (");
                b.write_joined(cols, ", ", |b, c| b.push(c));
                b.push(")");
            }
        }
    }
}

impl SelectQuery {
    /// Renders the query and returns the SQL text plus bind arguments.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut b = SqlBuilder::new();
        self.write_sql(&mut b, false);
        b.finish()
    }

    /// Convenience: SQL text only.
    pub fn sql(&self) -> String {
        self.build().0
    }

    /// Renders into `b`. `inline` marks sub-AST positions (derived tables,
    /// CTE bodies, subqueries, set-op operands) where a `WITH` list is an
    /// invariant violation.
    pub(crate) fn write_sql(&self, b: &mut SqlBuilder, inline: bool) {
        if let Some(with) = &self.with {
            assert!(
                !inline,
                "nested WITH is not allowed in an inline subquery context"
            );
            b.push("WITH ");
            if with.recursive {
                b.push("RECURSIVE ");
            }
            b.write_joined(&with.ctes, ", ", |b, cte| {
                b.push(&cte.name);
                b.push(" AS (");
                cte.query.write_sql(b, true);
                b.push(")");
            });
            b.push(" ");
        }

        assert!(!self.items.is_empty(), "SELECT list is empty");

        b.push("SELECT ");
        if self.distinct {
            b.push("DISTINCT ");
        }
        b.write_joined(&self.items, ", ", |b, item| {
            item.expr.emit(b);
            if !item.alias.is_empty() {
                b.push(" AS ");
                b.push(&item.alias);
            }
        });

        b.push(" FROM ");
        self.from.base.write_factor(b);
        for join in &self.from.joins {
            join.write_join(b);
        }

        if let Some(where_clause) = &self.where_clause {
            b.push(" WHERE ");
            where_clause.emit(b);
        }

        if !self.group_by.is_empty() {
            b.push(" GROUP BY ");
            self.write_group_by(b);
        }

        if let Some(having) = &self.having {
            b.push(" HAVING ");
            having.emit(b);
        }

        if !self.window_defs.is_empty() {
            b.push(" WINDOW ");
            b.write_joined(&self.window_defs, ", ", |b, def| {
                b.push(&def.name);
                b.push(" AS (");
                write_window_spec(b, &def.spec);
                b.push(")");
            });
        }

        if !self.order_by.is_empty() {
            b.push(" ORDER BY ");
            b.write_joined(&self.order_by, ", ", |b, e| e.emit(b));
        }

        if let Some(limit) = self.limit {
            let mut s = String::new();
            let _ = write!(s, " LIMIT {limit}");
            b.push(&s);
        }

        for branch in &self.set_ops {
            b.push(" ");
            b.push(branch.op.sql());
            if branch.all {
                b.push(" ALL");
            }
            b.push(" (");
            branch.rhs.write_sql(b, true);
            b.push(")");
        }
    }

    fn write_group_by(&self, b: &mut SqlBuilder) {
        let GroupingExt {
            with_rollup,
            with_cube,
            grouping_sets,
        } = &self.grouping;

        b.group_by_context = true;
        if let Some(sets) = grouping_sets {
            b.push("GROUPING SETS (");
            b.write_joined(sets, ", ", |b, set| {
                b.push("(");
                b.write_joined(set, ", ", |b, e| e.emit(b));
                b.push(")");
            });
            b.push(")");
        } else if *with_cube {
            b.push("CUBE (");
            b.write_joined(&self.group_by, ", ", |b, e| e.emit(b));
            b.push(")");
        } else {
            b.write_joined(&self.group_by, ", ", |b, e| e.emit(b));
            if *with_rollup {
                b.push(" WITH ROLLUP");
            }
        }
        b.group_by_context = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinOp, Cte, FromClause, Quantifier, SelectItem, SetOpBranch, SetOpType, With,
    };
    use crate::schema::ColumnType;

    fn q(name: &str, items: Vec<SelectItem>) -> SelectQuery {
        let mut q = SelectQuery::new(FromClause::table(name));
        q.items = items;
        q
    }

    #[test]
    fn test_literal_string_escaping() {
        let mut s = String::new();
        Value::Str("it's".into()).write_inline(&mut s);
        assert_eq!(s, "'it''s'");
    }

    #[test]
    fn test_param_tracks_argument() {
        let query = q(
            "t0",
            vec![SelectItem::bare(Expr::Param(Value::Int(42)))],
        );
        let (sql, args) = query.build();
        assert_eq!(sql, "SELECT ? FROM t0");
        assert_eq!(args, vec![Value::Int(42)]);
    }

    #[test]
    fn test_binary_always_parenthesized() {
        let query = q(
            "t0",
            vec![SelectItem::bare(Expr::binary(
                Expr::column("t0", "c0", ColumnType::Int),
                BinOp::Add,
                Expr::lit(Value::Int(1)),
            ))],
        );
        assert_eq!(query.sql(), "SELECT (t0.c0 + 1) FROM t0");
    }

    #[test]
    fn test_in_subquery_single_parens() {
        let inner = q(
            "t1",
            vec![SelectItem::bare(Expr::column("t1", "c0", ColumnType::Int))],
        );
        let query = q(
            "t0",
            vec![SelectItem::bare(Expr::In {
                left: Box::new(Expr::column("t0", "c0", ColumnType::Int)),
                list: vec![Expr::Subquery(Box::new(inner))],
            })],
        );
        assert_eq!(
            query.sql(),
            "SELECT t0.c0 IN (SELECT t1.c0 FROM t1) FROM t0"
        );
    }

    #[test]
    fn test_compare_subquery() {
        let inner = q(
            "t1",
            vec![SelectItem::bare(Expr::column("t1", "c0", ColumnType::Int))],
        );
        let mut query = q(
            "t0",
            vec![SelectItem::bare(Expr::column("t0", "c0", ColumnType::Int))],
        );
        query.where_clause = Some(Expr::CompareSubquery {
            left: Box::new(Expr::column("t0", "c0", ColumnType::Int)),
            op: BinOp::GtEq,
            quantifier: Quantifier::Some,
            query: Box::new(inner),
        });
        assert_eq!(
            query.sql(),
            "SELECT t0.c0 FROM t0 WHERE t0.c0 >= SOME (SELECT t1.c0 FROM t1)"
        );
    }

    #[test]
    fn test_group_by_ordinal_context() {
        let key = Expr::GroupByOrdinal {
            ordinal: Some(1),
            inner: Some(Box::new(Expr::column("t0", "c0", ColumnType::Int))),
        };
        let mut query = q("t0", vec![SelectItem::new(key.clone(), "c0")]);
        query.group_by = vec![key];
        assert_eq!(
            query.sql(),
            "SELECT t0.c0 AS c0 FROM t0 GROUP BY 1"
        );
    }

    #[test]
    #[should_panic(expected = "grouping ordinal")]
    fn test_group_by_ordinal_empty_panics() {
        let query = q(
            "t0",
            vec![SelectItem::bare(Expr::GroupByOrdinal {
                ordinal: None,
                inner: None,
            })],
        );
        let _ = query.sql();
    }

    #[test]
    #[should_panic(expected = "nested WITH")]
    fn test_inline_with_panics() {
        let mut inner = q(
            "t1",
            vec![SelectItem::bare(Expr::lit(Value::Int(1)))],
        );
        inner.with = Some(With {
            recursive: false,
            ctes: vec![Cte {
                name: "cte_0".into(),
                query: q("t2", vec![SelectItem::bare(Expr::lit(Value::Int(1)))]),
            }],
        });
        let query = q(
            "t0",
            vec![SelectItem::bare(Expr::Subquery(Box::new(inner)))],
        );
        let _ = query.sql();
    }

    #[test]
    fn test_set_op_rendering() {
        let rhs = q("t1", vec![SelectItem::bare(Expr::lit(Value::Int(2)))]);
        let mut query = q("t0", vec![SelectItem::bare(Expr::lit(Value::Int(1)))]);
        query.set_ops.push(SetOpBranch {
            op: SetOpType::Union,
            all: true,
            rhs,
        });
        assert_eq!(
            query.sql(),
            "SELECT 1 FROM t0 UNION ALL (SELECT 2 FROM t1)"
        );
    }

    #[test]
    fn test_window_frame_defaults() {
        use crate::ast::{FrameUnit, WindowFrame, WindowFunc, WindowSpec};
        let w = Expr::Window(Box::new(WindowFunc {
            name: "SUM".into(),
            args: vec![Expr::column("t0", "c0", ColumnType::Int)],
            window_ref: None,
            spec: WindowSpec {
                partition_by: vec![Expr::column("t0", "c1", ColumnType::Int)],
                order_by: vec![],
                frame: Some(WindowFrame {
                    unit: FrameUnit::Rows,
                    start: None,
                    end: None,
                }),
            },
        }));
        let query = q("t0", vec![SelectItem::bare(w)]);
        assert_eq!(
            query.sql(),
            "SELECT SUM(t0.c0) OVER (PARTITION BY t0.c1 ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) FROM t0"
        );
    }

    #[test]
    fn test_byte_identical_rebuild() {
        let mut query = q(
            "t0",
            vec![
                SelectItem::new(Expr::column("t0", "c0", ColumnType::Int), "c0"),
                SelectItem::new(Expr::count_one(), "cnt"),
            ],
        );
        query.group_by = vec![Expr::column("t0", "c0", ColumnType::Int)];
        query.grouping.with_rollup = true;
        let first = query.sql();
        assert_eq!(first, query.sql());
        assert_eq!(
            first,
            "SELECT t0.c0 AS c0, COUNT(1) AS cnt FROM t0 GROUP BY t0.c0 WITH ROLLUP"
        );
    }
}
