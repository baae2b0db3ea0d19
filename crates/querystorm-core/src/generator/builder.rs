//! The constrained query builder: a retry-with-reason wrapper around
//! [`Generator::generate_select_query`].
//!
//! Constraints are applied by mutating a snapshot of the generator's
//! configuration; the snapshot is restored on every exit path, including
//! unwinding, by a `Drop` guard. Rejections carry a short stable reason
//! label from [`reason_codes`].

use std::ops::{Deref, DerefMut};

use super::Generator;
use crate::analyzer::{analyze_query, validate_query_scope};
use crate::ast::{Expr, SelectQuery, TableRef};
use crate::config::{GeneratorConfig, PredicateMode};
use crate::schema::Table;

/// Stable reason labels produced by the constrained builder.
pub mod reason_codes {
    pub const CONSTRAINT_SUBQUERY: &str = "constraint:subquery";
    pub const CONSTRAINT_AGGREGATE: &str = "constraint:aggregate";
    pub const CONSTRAINT_WINDOW: &str = "constraint:window";
    pub const CONSTRAINT_NONDETERMINISTIC: &str = "constraint:nondeterministic";
    pub const CONSTRAINT_JOIN_COUNT: &str = "constraint:join_count";
    pub const CONSTRAINT_MIN_JOIN_TABLES: &str = "constraint:min_join_tables";
    pub const CONSTRAINT_PREDICATE_GUARD: &str = "constraint:predicate_guard";
    pub const CONSTRAINT_QUERY_GUARD: &str = "constraint:query_guard";
    pub const CONSTRAINT_EMPTY_QUERY: &str = "constraint:empty_query";
    pub const CONSTRAINT_NO_WHERE: &str = "constraint:no_where";
    pub const CONSTRAINT_LIMIT: &str = "constraint:limit";
    pub const CONSTRAINT_ORDER_BY: &str = "constraint:order_by";
    pub const CONSTRAINT_DISTINCT: &str = "constraint:distinct";
    pub const CONSTRAINT_GROUP_BY: &str = "constraint:group_by";
    pub const CONSTRAINT_HAVING: &str = "constraint:having";
    pub const CONSTRAINT_CTE: &str = "constraint:cte";
    pub const CONSTRAINT_SET_OPS: &str = "constraint:set_ops";
    pub const CONFIG_SUBQUERIES_OFF: &str = "config:subqueries_off";
    pub const SCALAR_SUBQUERY_OFF: &str = "scalar_subquery_off";
}

/// Restores the generator's configuration (and the builder's subquery ban
/// label) when dropped, so constraint mutation never leaks — not even on
/// panic.
struct ConfigGuard<'g, 'a> {
    generator: &'g mut Generator<'a>,
    saved: Option<(GeneratorConfig, Option<String>)>,
}

impl<'g, 'a> ConfigGuard<'g, 'a> {
    fn new(generator: &'g mut Generator<'a>) -> Self {
        let saved = Some((
            generator.config().clone(),
            generator.subquery_ban_label.clone(),
        ));
        Self { generator, saved }
    }
}

impl<'a> Deref for ConfigGuard<'_, 'a> {
    type Target = Generator<'a>;

    fn deref(&self) -> &Self::Target {
        self.generator
    }
}

impl DerefMut for ConfigGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.generator
    }
}

impl Drop for ConfigGuard<'_, '_> {
    fn drop(&mut self) {
        if let Some((cfg, label)) = self.saved.take() {
            *self.generator.config_mut() = cfg;
            self.generator.subquery_ban_label = label;
        }
    }
}

type QueryGuard = Box<dyn Fn(&SelectQuery) -> bool>;
type PredicateGuard = Box<dyn Fn(&Expr) -> bool>;

/// Builder of constrained SELECT queries.
pub struct SelectQueryBuilder<'g, 'a> {
    generator: &'g mut Generator<'a>,
    require_where: bool,
    require_deterministic: bool,
    predicate_mode: Option<PredicateMode>,
    predicate_guard: Option<PredicateGuard>,
    query_guard: Option<QueryGuard>,
    query_guard_reason: Option<String>,
    disallow_subquery: bool,
    disallow_aggregate: bool,
    disallow_window: bool,
    disallow_limit: bool,
    disallow_order_by: bool,
    disallow_distinct: bool,
    disallow_group_by: bool,
    disallow_having: bool,
    disallow_cte: bool,
    disallow_set_ops: bool,
    max_join_count: Option<usize>,
    min_join_tables: Option<usize>,
    max_tries: usize,
}

impl<'g, 'a> SelectQueryBuilder<'g, 'a> {
    pub fn new(generator: &'g mut Generator<'a>) -> Self {
        Self {
            generator,
            require_where: false,
            require_deterministic: false,
            predicate_mode: None,
            predicate_guard: None,
            query_guard: None,
            query_guard_reason: None,
            disallow_subquery: false,
            disallow_aggregate: false,
            disallow_window: false,
            disallow_limit: false,
            disallow_order_by: false,
            disallow_distinct: false,
            disallow_group_by: false,
            disallow_having: false,
            disallow_cte: false,
            disallow_set_ops: false,
            max_join_count: None,
            min_join_tables: None,
            max_tries: 5,
        }
    }

    pub fn require_where(mut self) -> Self {
        self.require_where = true;
        self
    }

    pub fn require_deterministic(mut self) -> Self {
        self.require_deterministic = true;
        self
    }

    pub fn predicate_mode(mut self, mode: PredicateMode) -> Self {
        self.predicate_mode = Some(mode);
        self
    }

    pub fn predicate_guard(mut self, guard: impl Fn(&Expr) -> bool + 'static) -> Self {
        self.predicate_guard = Some(Box::new(guard));
        self
    }

    pub fn query_guard(mut self, guard: impl Fn(&SelectQuery) -> bool + 'static) -> Self {
        self.query_guard = Some(Box::new(guard));
        self
    }

    pub fn query_guard_with_reason(
        mut self,
        guard: impl Fn(&SelectQuery) -> bool + 'static,
        reason: impl Into<String>,
    ) -> Self {
        self.query_guard = Some(Box::new(guard));
        self.query_guard_reason = Some(reason.into());
        self
    }

    pub fn disallow_subquery(mut self) -> Self {
        self.disallow_subquery = true;
        self
    }

    pub fn disallow_aggregate(mut self) -> Self {
        self.disallow_aggregate = true;
        self
    }

    pub fn disallow_window(mut self) -> Self {
        self.disallow_window = true;
        self
    }

    pub fn disallow_limit(mut self) -> Self {
        self.disallow_limit = true;
        self
    }

    pub fn disallow_order_by(mut self) -> Self {
        self.disallow_order_by = true;
        self
    }

    pub fn disallow_distinct(mut self) -> Self {
        self.disallow_distinct = true;
        self
    }

    pub fn disallow_group_by(mut self) -> Self {
        self.disallow_group_by = true;
        self
    }

    pub fn disallow_having(mut self) -> Self {
        self.disallow_having = true;
        self
    }

    pub fn disallow_cte(mut self) -> Self {
        self.disallow_cte = true;
        self
    }

    pub fn disallow_set_ops(mut self) -> Self {
        self.disallow_set_ops = true;
        self
    }

    pub fn max_join_count(mut self, count: usize) -> Self {
        self.max_join_count = Some(count);
        self
    }

    pub fn min_join_tables(mut self, count: usize) -> Self {
        self.min_join_tables = Some(count);
        self
    }

    pub fn max_tries(mut self, tries: usize) -> Self {
        self.max_tries = tries.max(1);
        self
    }

    /// Builds under the constraints, returning the query (or `None`), the
    /// last rejection reason (empty on success) and the attempts used.
    pub fn build_with_reason(self) -> (Option<SelectQuery>, String, usize) {
        let Self {
            generator,
            require_where,
            require_deterministic,
            predicate_mode,
            predicate_guard,
            query_guard,
            query_guard_reason,
            disallow_subquery,
            disallow_aggregate,
            disallow_window,
            disallow_limit,
            disallow_order_by,
            disallow_distinct,
            disallow_group_by,
            disallow_having,
            disallow_cte,
            disallow_set_ops,
            max_join_count,
            min_join_tables,
            max_tries,
        } = self;

        let mut guard = ConfigGuard::new(generator);

        // Mutate the snapshot: bans flip features off, the caps narrow the
        // generator's bounds.
        {
            let cfg = guard.config_mut();
            if disallow_subquery {
                cfg.features.subqueries = false;
                cfg.disallow_scalar_subquery = true;
            }
            if disallow_aggregate {
                cfg.features.aggregates = false;
            }
            if disallow_window {
                cfg.features.window_funcs = false;
            }
            if disallow_limit {
                cfg.features.limit = false;
            }
            if disallow_order_by {
                cfg.features.order_by = false;
            }
            if disallow_distinct {
                cfg.features.distinct = false;
            }
            if disallow_group_by {
                cfg.features.group_by = false;
            }
            if disallow_having {
                cfg.features.having = false;
            }
            if disallow_cte {
                cfg.features.cte = false;
                cfg.features.recursive_cte = false;
            }
            if disallow_set_ops {
                cfg.features.set_operations = false;
                cfg.features.full_join_emulation = false;
            }
            if let Some(max) = max_join_count {
                cfg.weights.join_count = cfg.weights.join_count.min(max as u32);
                cfg.max_join_tables = cfg.max_join_tables.min(max + 1);
            }
            if let Some(min) = min_join_tables {
                cfg.min_join_tables = min;
                cfg.max_join_tables = cfg.max_join_tables.max(min);
            }
            if let Some(mode) = predicate_mode {
                cfg.predicate_mode = mode;
            }
        }
        if disallow_subquery {
            guard.subquery_ban_label = Some(reason_codes::CONSTRAINT_SUBQUERY.to_string());
        }

        let mut last_reason = reason_codes::CONSTRAINT_EMPTY_QUERY.to_string();
        for attempt in 1..=max_tries {
            let Some(mut query) = guard.generate_select_query() else {
                last_reason = reason_codes::CONSTRAINT_EMPTY_QUERY.to_string();
                continue;
            };

            if require_where && query.where_clause.is_none() {
                if !guard.attach_predicate(&mut query) {
                    last_reason = reason_codes::CONSTRAINT_NO_WHERE.to_string();
                    continue;
                }
            }

            let analysis = analyze_query(&mut query);
            let f = &analysis.features;
            let join_tables = f.join_count + 1;

            let violation: Option<String> = if disallow_subquery && f.has_subquery {
                Some(reason_codes::CONSTRAINT_SUBQUERY.into())
            } else if disallow_aggregate && f.has_aggregate {
                Some(reason_codes::CONSTRAINT_AGGREGATE.into())
            } else if disallow_window && f.has_window {
                Some(reason_codes::CONSTRAINT_WINDOW.into())
            } else if disallow_limit && analysis.has_limit {
                Some(reason_codes::CONSTRAINT_LIMIT.into())
            } else if disallow_order_by && analysis.has_order_by {
                Some(reason_codes::CONSTRAINT_ORDER_BY.into())
            } else if disallow_distinct && analysis.has_distinct {
                Some(reason_codes::CONSTRAINT_DISTINCT.into())
            } else if disallow_group_by && analysis.has_group_by {
                Some(reason_codes::CONSTRAINT_GROUP_BY.into())
            } else if disallow_having && analysis.has_having {
                Some(reason_codes::CONSTRAINT_HAVING.into())
            } else if analysis.has_having && !analysis.has_group_by {
                Some(reason_codes::CONSTRAINT_HAVING.into())
            } else if disallow_cte && analysis.has_cte {
                Some(reason_codes::CONSTRAINT_CTE.into())
            } else if disallow_set_ops && analysis.has_set_ops {
                Some(reason_codes::CONSTRAINT_SET_OPS.into())
            } else if require_deterministic && !analysis.deterministic {
                Some(reason_codes::CONSTRAINT_NONDETERMINISTIC.into())
            } else if max_join_count.is_some_and(|max| f.join_count > max) {
                Some(reason_codes::CONSTRAINT_JOIN_COUNT.into())
            } else if min_join_tables.is_some_and(|min| join_tables < min) {
                Some(reason_codes::CONSTRAINT_MIN_JOIN_TABLES.into())
            } else if predicate_guard
                .as_ref()
                .is_some_and(|g| query.where_clause.as_ref().is_some_and(|w| !g(w)))
            {
                Some(reason_codes::CONSTRAINT_PREDICATE_GUARD.into())
            } else if query_guard.as_ref().is_some_and(|g| !g(&query)) {
                Some(
                    query_guard_reason
                        .clone()
                        .unwrap_or_else(|| reason_codes::CONSTRAINT_QUERY_GUARD.into()),
                )
            } else {
                None
            };

            match violation {
                Some(reason) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%reason, attempt, "constrained builder rejected candidate");
                    last_reason = reason;
                }
                None => {
                    // Predicate attachment may have invalidated the cached
                    // analysis; make sure the disallow reason survives.
                    let reason = guard.subquery_disallow_reason();
                    if reason.is_some() {
                        let mut refreshed = analyze_query(&mut query);
                        refreshed.features.subquery_disallow_reason = reason;
                        query.set_cached_analysis(refreshed);
                    }
                    return (Some(query), String::new(), attempt);
                }
            }
        }
        (None, last_reason, max_tries)
    }
}

impl<'a> Generator<'a> {
    /// Starts a constrained builder on this generator.
    pub fn select_query_builder<'g>(&'g mut self) -> SelectQueryBuilder<'g, 'a> {
        SelectQueryBuilder::new(self)
    }

    /// Re-runs predicate generation under the active mode and attaches the
    /// result, rejecting predicates that fall out of scope.
    fn attach_predicate(&mut self, query: &mut SelectQuery) -> bool {
        // Every FROM factor must be a named schema table for the predicate
        // generator to see its columns.
        let all_named = std::iter::once(&query.from.base)
            .chain(query.from.joins.iter().map(|j| &j.table))
            .all(|t| matches!(t, TableRef::Named { .. }));
        if !all_named {
            return false;
        }
        let tables: Vec<Table> = query
            .from
            .visible_aliases()
            .iter()
            .filter_map(|name| self.schema().table_by_name(name).cloned())
            .collect();
        if tables.is_empty() {
            return false;
        }
        let refs: Vec<&Table> = tables.iter().collect();
        let allow_subquery = self.subqueries_allowed();
        let Some(predicate) = self.predicate_for_mode(&refs, allow_subquery) else {
            return false;
        };
        query.set_where(Some(predicate));
        self.strip_suppressed_qualifiers(query);
        if !validate_query_scope(query, self.schema()) {
            query.set_where(None);
            return false;
        }
        true
    }
}
