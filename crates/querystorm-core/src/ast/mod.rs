//! Typed expression and query AST plus the SQL emitter.
//!
//! The AST is strictly a tree of owned subtrees; when one query embeds
//! another (CTE, subquery, derived table, set-op branch) the outer owns the
//! inner. Correlated references are textual only and resolve through the
//! scope validator, never through pointers.

pub mod emit;
pub mod expr;
pub mod query;

pub use emit::SqlBuilder;
pub use expr::{
    is_aggregate_function, is_pure_function, BinOp, ColumnRef, Expr, FrameBound, FrameUnit,
    IntervalUnit, Quantifier, UnaryOp, Value, WindowFrame, WindowFunc, WindowSpec,
};
pub use query::{
    Cte, FromClause, GroupingExt, Join, JoinConstraint, JoinType, SelectItem, SelectQuery,
    SetOpBranch, SetOpType, TableRef, WindowDef, With,
};
