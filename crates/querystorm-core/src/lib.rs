//! Core randomized SQL query generator for stress-testing relational
//! engines.
//!
//! Given a live logical schema, a [`Generator`] produces syntactically
//! valid, semantically well-scoped SQL statements: SELECT queries with
//! joins, predicates, aggregates, subqueries, CTEs (including recursive),
//! set operations and window functions, plus DML and schema DDL. The data
//! flow is strictly one-way: the generator reads schema state and
//! configuration, produces an AST, runs visitors and guards on it, then
//! asks the AST to emit SQL text plus bind arguments. No generated text is
//! ever reparsed.

pub mod analyzer;
pub mod ast;
pub mod config;
pub mod error;
pub mod generator;
pub mod schema;

// Re-export main types and functions
pub use analyzer::{
    analyze_query, analyze_query_features, query_deterministic, validate_query_scope,
    QueryAnalysis, QueryFeatures,
};
pub use error::ConfigError;
pub use generator::{reason_codes, Generator, GeneratorStats, PreparedQuery, SelectQueryBuilder, TqsWalker};

// Re-export types explicitly
pub use ast::{
    BinOp,
    ColumnRef,
    Cte,
    Expr,
    FrameBound,
    FrameUnit,
    FromClause,
    GroupingExt,
    IntervalUnit,
    Join,
    JoinConstraint,
    JoinType,
    Quantifier,
    SelectItem,
    SelectQuery,
    SetOpBranch,
    SetOpType,
    SqlBuilder,
    TableRef,
    UnaryOp,
    Value,
    WindowDef,
    WindowFrame,
    WindowFunc,
    WindowSpec,
    With,
};
pub use config::{
    FeatureToggles, FeatureWeights, GeneratorConfig, JoinOnPolicy, OracleOptions, PredicateMode,
    TqsOptions,
};
pub use schema::{
    Column, ColumnType, ForeignKey, Index, MemoryCatalog, SchemaState, Table, TypeCategory,
};
