//! Expression nodes.
//!
//! [`Expr`] is the polymorphic sum type at the heart of the generator. Every
//! variant exposes three capabilities: emission into a SQL builder
//! (implemented in [`super::emit`]), enumeration of referenced column refs
//! ([`Expr::collect_column_refs`]), and a determinism verdict
//! ([`Expr::is_deterministic`]). Subquery-bearing variants delegate their
//! determinism to the nested query.

use serde::Serialize;

use super::query::SelectQuery;
use crate::schema::ColumnType;

/// Aggregate function names, detected by uppercase comparison.
pub const AGGREGATE_FUNCTIONS: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

/// The closed set of functions known to be pure over their inputs. Any
/// function outside this list is treated as nondeterministic, so newly
/// introduced non-pure functions cannot silently poison the verdict.
pub const PURE_FUNCTIONS: &[&str] = &[
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "ABS",
    "FLOOR",
    "CEIL",
    "ROUND",
    "UPPER",
    "LOWER",
    "LENGTH",
    "CONCAT",
    "COALESCE",
    "IFNULL",
    "ROW_NUMBER",
    "RANK",
    "DENSE_RANK",
];

/// True when `name` is an aggregate (uppercase comparison).
pub fn is_aggregate_function(name: &str) -> bool {
    let upper = name.to_uppercase();
    AGGREGATE_FUNCTIONS.contains(&upper.as_str())
}

/// True when `name` is in the closed pure-function list.
pub fn is_pure_function(name: &str) -> bool {
    let upper = name.to_uppercase();
    PURE_FUNCTIONS.contains(&upper.as_str())
}

/// A literal or bind value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Int(i64),
    BigInt(i64),
    Float(f64),
    /// Decimal kept as its exact textual form.
    Decimal(String),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    /// The column type this value would satisfy, when unambiguous.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Int(_) => Some(ColumnType::Int),
            Value::BigInt(_) => Some(ColumnType::BigInt),
            Value::Float(_) => Some(ColumnType::Double),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::Str(_) => Some(ColumnType::Varchar),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Null => None,
        }
    }
}

/// Unary operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    /// Postfix `IS NULL`.
    IsNull,
}

/// Binary operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Null-safe equality `<=>`.
    NullSafeEq,
    Add,
    Sub,
    Mul,
    And,
    Or,
}

impl BinOp {
    pub fn sql(&self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::NullSafeEq => "<=>",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }

    /// All comparison operators usable between a comparable pair.
    pub const COMPARISONS: &'static [BinOp] = &[
        BinOp::Eq,
        BinOp::NotEq,
        BinOp::Lt,
        BinOp::LtEq,
        BinOp::Gt,
        BinOp::GtEq,
        BinOp::NullSafeEq,
    ];

    pub fn is_comparison(&self) -> bool {
        Self::COMPARISONS.contains(self)
    }
}

/// Quantifier of a compared subquery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    Some,
    All,
}

impl Quantifier {
    pub fn sql(&self) -> &'static str {
        match self {
            Quantifier::Any => "ANY",
            Quantifier::Some => "SOME",
            Quantifier::All => "ALL",
        }
    }
}

/// Unit of an `INTERVAL` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl IntervalUnit {
    pub fn sql(&self) -> &'static str {
        match self {
            IntervalUnit::Second => "SECOND",
            IntervalUnit::Minute => "MINUTE",
            IntervalUnit::Hour => "HOUR",
            IntervalUnit::Day => "DAY",
            IntervalUnit::Month => "MONTH",
            IntervalUnit::Year => "YEAR",
        }
    }
}

/// A qualified column reference. `table == None` means unqualified; the
/// downstream engine resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub ty: ColumnType,
}

/// Frame unit of a window frame clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUnit {
    Rows,
    Range,
}

impl FrameUnit {
    pub fn sql(&self) -> &'static str {
        match self {
            FrameUnit::Rows => "ROWS",
            FrameUnit::Range => "RANGE",
        }
    }
}

/// A window frame bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

/// A window frame. Missing bounds are filled at emission time as
/// `ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW` defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFrame {
    pub unit: FrameUnit,
    pub start: Option<FrameBound>,
    pub end: Option<FrameBound>,
}

/// The partition/order/frame triple of a window specification, shared by
/// inline `OVER (...)` specs and named `WINDOW` definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<Expr>,
    pub frame: Option<WindowFrame>,
}

/// A window function call: `name(args) OVER (spec)` or `OVER w<N>` when a
/// named window is referenced.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFunc {
    pub name: String,
    pub args: Vec<Expr>,
    /// Reference to a named `WINDOW` definition; when set, the inline spec
    /// is not emitted.
    pub window_ref: Option<String>,
    pub spec: WindowSpec,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    /// `?` placeholder with tracked bind value.
    Param(Value),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Func {
        name: String,
        args: Vec<Expr>,
    },
    Case {
        whens: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// `left IN (list...)`; an IN-subquery is a single [`Expr::Subquery`]
    /// element in the list. Negation is a wrapping [`UnaryOp::Not`].
    In {
        left: Box<Expr>,
        list: Vec<Expr>,
    },
    Exists {
        query: Box<SelectQuery>,
    },
    /// Scalar subquery.
    Subquery(Box<SelectQuery>),
    /// `left op ANY|SOME|ALL (query)`.
    CompareSubquery {
        left: Box<Expr>,
        op: BinOp,
        quantifier: Quantifier,
        query: Box<SelectQuery>,
    },
    Window(Box<WindowFunc>),
    Interval {
        value: i64,
        unit: IntervalUnit,
    },
    /// Emits its ordinal in GROUP BY context and its inner expression
    /// elsewhere. At least one part must be present.
    GroupByOrdinal {
        ordinal: Option<usize>,
        inner: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn column(table: impl Into<String>, name: impl Into<String>, ty: ColumnType) -> Expr {
        Expr::Column(ColumnRef {
            table: Some(table.into()),
            name: name.into(),
            ty,
        })
    }

    pub fn unqualified(name: impl Into<String>, ty: ColumnType) -> Expr {
        Expr::Column(ColumnRef {
            table: None,
            name: name.into(),
            ty,
        })
    }

    pub fn lit(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(left, BinOp::And, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::binary(left, BinOp::Or, right)
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }

    pub fn is_null(expr: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::IsNull,
            expr: Box::new(expr),
        }
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Func {
            name: name.into(),
            args,
        }
    }

    /// `COUNT(1)`.
    pub fn count_one() -> Expr {
        Expr::func("COUNT", vec![Expr::lit(Value::Int(1))])
    }

    /// Appends every column reference of this expression to `out`.
    ///
    /// Nested queries (subqueries, EXISTS, quantified comparisons) are not
    /// descended into; the scope validator walks those with its own merged
    /// outer scope.
    pub fn collect_column_refs<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) | Expr::Param(_) | Expr::Interval { .. } => {}
            Expr::Unary { expr, .. } => expr.collect_column_refs(out),
            Expr::Binary { left, right, .. } => {
                left.collect_column_refs(out);
                right.collect_column_refs(out);
            }
            Expr::Func { args, .. } => {
                for arg in args {
                    arg.collect_column_refs(out);
                }
            }
            Expr::Case { whens, else_expr } => {
                for (when, then) in whens {
                    when.collect_column_refs(out);
                    then.collect_column_refs(out);
                }
                if let Some(e) = else_expr {
                    e.collect_column_refs(out);
                }
            }
            Expr::In { left, list } => {
                left.collect_column_refs(out);
                for item in list {
                    item.collect_column_refs(out);
                }
            }
            Expr::Exists { .. } | Expr::Subquery(_) => {}
            Expr::CompareSubquery { left, .. } => left.collect_column_refs(out),
            Expr::Window(w) => {
                for arg in &w.args {
                    arg.collect_column_refs(out);
                }
                for e in &w.spec.partition_by {
                    e.collect_column_refs(out);
                }
                for e in &w.spec.order_by {
                    e.collect_column_refs(out);
                }
            }
            Expr::GroupByOrdinal { inner, .. } => {
                if let Some(inner) = inner {
                    inner.collect_column_refs(out);
                }
            }
        }
    }

    /// Determinism verdict: pure over inputs. Subquery variants delegate to
    /// the nested query; unknown function names are nondeterministic.
    pub fn is_deterministic(&self) -> bool {
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::Param(_) | Expr::Interval { .. } => true,
            Expr::Unary { expr, .. } => expr.is_deterministic(),
            Expr::Binary { left, right, .. } => {
                left.is_deterministic() && right.is_deterministic()
            }
            Expr::Func { name, args } => {
                is_pure_function(name) && args.iter().all(Expr::is_deterministic)
            }
            Expr::Case { whens, else_expr } => {
                whens
                    .iter()
                    .all(|(w, t)| w.is_deterministic() && t.is_deterministic())
                    && else_expr.as_ref().is_none_or(|e| e.is_deterministic())
            }
            Expr::In { left, list } => {
                left.is_deterministic() && list.iter().all(Expr::is_deterministic)
            }
            Expr::Exists { query } => query.is_deterministic(),
            Expr::Subquery(query) => query.is_deterministic(),
            Expr::CompareSubquery { left, query, .. } => {
                left.is_deterministic() && query.is_deterministic()
            }
            Expr::Window(w) => {
                is_pure_function(&w.name)
                    && w.args.iter().all(Expr::is_deterministic)
                    && w.spec.partition_by.iter().all(Expr::is_deterministic)
                    && w.spec.order_by.iter().all(Expr::is_deterministic)
            }
            Expr::GroupByOrdinal { inner, .. } => {
                inner.as_ref().is_none_or(|e| e.is_deterministic())
            }
        }
    }

    /// True when this expression contains a plain aggregate call. Does not
    /// descend into nested queries (their aggregates do not aggregate the
    /// outer query) or window functions.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Func { name, args } => {
                is_aggregate_function(name) || args.iter().any(Expr::contains_aggregate)
            }
            Expr::Column(_)
            | Expr::Literal(_)
            | Expr::Param(_)
            | Expr::Interval { .. }
            | Expr::Exists { .. }
            | Expr::Subquery(_)
            | Expr::Window(_) => false,
            Expr::Unary { expr, .. } => expr.contains_aggregate(),
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Case { whens, else_expr } => {
                whens
                    .iter()
                    .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_expr.as_ref().is_some_and(|e| e.contains_aggregate())
            }
            Expr::In { left, list } => {
                left.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::CompareSubquery { left, .. } => left.contains_aggregate(),
            Expr::GroupByOrdinal { inner, .. } => {
                inner.as_ref().is_some_and(|e| e.contains_aggregate())
            }
        }
    }

    /// Best-effort inferred type, used when derived tables and CTEs publish
    /// their item columns. Callers fall back to Varchar on `None`.
    pub fn inferred_type(&self) -> Option<ColumnType> {
        match self {
            Expr::Column(c) => Some(c.ty),
            Expr::Literal(v) | Expr::Param(v) => v.column_type(),
            Expr::Unary { expr, .. } => expr.inferred_type(),
            Expr::Binary { left, op, right } => match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul => {
                    left.inferred_type().or_else(|| right.inferred_type())
                }
                _ => Some(ColumnType::Bool),
            },
            Expr::Func { name, args } => {
                let upper = name.to_uppercase();
                match upper.as_str() {
                    "COUNT" | "LENGTH" => Some(ColumnType::BigInt),
                    "SUM" | "AVG" => Some(ColumnType::Decimal),
                    "MIN" | "MAX" | "ABS" | "FLOOR" | "CEIL" | "ROUND" | "COALESCE"
                    | "IFNULL" => args.first().and_then(Expr::inferred_type),
                    "UPPER" | "LOWER" | "CONCAT" => Some(ColumnType::Varchar),
                    _ => None,
                }
            }
            Expr::Case { whens, else_expr } => whens
                .first()
                .and_then(|(_, then)| then.inferred_type())
                .or_else(|| else_expr.as_ref().and_then(|e| e.inferred_type())),
            Expr::In { .. } | Expr::Exists { .. } | Expr::CompareSubquery { .. } => {
                Some(ColumnType::Bool)
            }
            Expr::Subquery(q) => q.items.first().and_then(|item| item.expr.inferred_type()),
            Expr::Window(w) => match w.name.to_uppercase().as_str() {
                "ROW_NUMBER" | "RANK" | "DENSE_RANK" => Some(ColumnType::BigInt),
                _ => w.args.first().and_then(Expr::inferred_type),
            },
            Expr::Interval { .. } => None,
            Expr::GroupByOrdinal { inner, .. } => inner.as_ref().and_then(|e| e.inferred_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_detection_uppercase() {
        assert!(is_aggregate_function("count"));
        assert!(is_aggregate_function("SUM"));
        assert!(!is_aggregate_function("CONCAT"));
    }

    #[test]
    fn test_unknown_function_nondeterministic() {
        let e = Expr::func("RAND", vec![]);
        assert!(!e.is_deterministic());
        let e = Expr::func("ABS", vec![Expr::lit(Value::Int(-3))]);
        assert!(e.is_deterministic());
    }

    #[test]
    fn test_contains_aggregate_ignores_subqueries() {
        let inner = crate::ast::SelectQuery::from_table("t0");
        let e = Expr::Subquery(Box::new(inner));
        assert!(!e.contains_aggregate());
        let e = Expr::binary(
            Expr::count_one(),
            BinOp::Gt,
            Expr::lit(Value::Int(0)),
        );
        assert!(e.contains_aggregate());
    }

    #[test]
    fn test_collect_column_refs_shallow() {
        let e = Expr::binary(
            Expr::column("t0", "c0", ColumnType::Int),
            BinOp::Eq,
            Expr::column("t1", "c1", ColumnType::Int),
        );
        let mut refs = Vec::new();
        e.collect_column_refs(&mut refs);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "c0");
    }

    #[test]
    fn test_inferred_types() {
        assert_eq!(
            Expr::count_one().inferred_type(),
            Some(ColumnType::BigInt)
        );
        assert_eq!(
            Expr::func("SUM", vec![Expr::unqualified("c0", ColumnType::Int)]).inferred_type(),
            Some(ColumnType::Decimal)
        );
        assert_eq!(
            Expr::lit(Value::Str("x".into())).inferred_type(),
            Some(ColumnType::Varchar)
        );
    }
}
