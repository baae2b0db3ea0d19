//! Feature analysis visitors and the lexical scope validator.
//!
//! Two bundles traverse the AST bottom-up: [`analyze_query_features`]
//! derives structural flags from expressions and joins, and
//! [`analyze_query`] wraps it with query-level flags plus the recursive
//! determinism verdict, caching the result on the query node. The cache is
//! dropped by `Clone` and invalidated by every mutation.

pub mod features;
pub mod scope;

pub use features::{analyze_query, analyze_query_features, QueryAnalysis, QueryFeatures};
pub use scope::validate_query_scope;

use crate::ast::SelectQuery;

/// Recursive determinism verdict for a query.
///
/// Equivalent to `analyze_query(q).deterministic` without touching the
/// cache.
pub fn query_deterministic(query: &SelectQuery) -> bool {
    query.is_deterministic()
}
