//! The SELECT generation pipeline.
//!
//! `generate_select_query` proceeds in a fixed sequence: table picking,
//! template attempt, CTEs, FROM, projection, WHERE, GROUP/HAVING, FULL-JOIN
//! emulation and windows, ORDER/LIMIT, set operations, then scope
//! validation. A failed validation returns `None` for the caller to loop
//! on.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use super::Generator;
use crate::analyzer::{analyze_query, validate_query_scope};
use crate::ast::{
    Cte, Expr, FromClause, JoinConstraint, SelectItem, SelectQuery, TableRef, Value, With,
};
use crate::schema::{Column, Table};

impl Generator<'_> {
    /// Generates one SELECT query, or `None` when the candidate failed its
    /// scope validation.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub fn generate_select_query(&mut self) -> Option<SelectQuery> {
        if self.schema().tables().is_empty() {
            return None;
        }

        // Fresh predicate statistics for this query.
        self.stats_mut().predicate_pairs_total = 0;
        self.stats_mut().predicate_pairs_join = 0;

        let allow_subquery = self.subqueries_allowed();
        let disallow_reason = self.subquery_disallow_reason();

        let names = self.pick_table_names();
        if names.is_empty() {
            return None;
        }

        // Template path, skipped when the TQS walker drives table picking
        // or a constrained predicate mode is active (templates fix their
        // own predicate shapes).
        let template_p = self.config().weights.template_prob;
        if !self.config().tqs.enabled
            && self.config().predicate_mode == crate::config::PredicateMode::Default
            && self.chance(template_p)
        {
            if let Some(mut query) = self.generate_template_query() {
                self.finalize(&mut query, disallow_reason);
                return Some(query);
            }
        }

        // CTE list.
        let mut with = None;
        let mut cte_tables: Vec<Table> = Vec::new();
        if self.config().features.cte && self.chance(30) {
            if let Some((built, virtuals)) = self.build_cte_list() {
                with = Some(built);
                cte_tables = virtuals;
            }
        }

        // Resolve and order the FROM tables.
        let mut resolved: Vec<Table> = names
            .iter()
            .filter_map(|n| self.schema().table_by_name(n).cloned())
            .collect();
        if resolved.is_empty() {
            return None;
        }
        if !self.config().features.dsg && self.chance(50) {
            resolved.shuffle(self.rng());
        }
        // The base slot takes either a CTE table, a derived table, or the
        // first picked table; a CTE never lands anywhere but the base.
        let mut derived_base: Option<Box<SelectQuery>> = None;
        let dsg = self.config().features.dsg;
        if !dsg && !cte_tables.is_empty() && self.chance(50) {
            let idx = self.rng().gen_range(0..cte_tables.len());
            resolved.insert(0, cte_tables[idx].clone());
            resolved.truncate(self.config().max_join_tables.max(1));
        } else if !dsg && self.config().features.derived_tables && self.chance(15) {
            if let Some((body, virtual_table)) = self.build_derived_base(&resolved[0]) {
                resolved[0] = virtual_table;
                derived_base = Some(Box::new(body));
            }
        }

        let mut from = self.build_from_clause(&resolved);
        if let Some(body) = derived_base {
            from.base = TableRef::Derived {
                query: body,
                alias: resolved[0].name.clone(),
            };
        }
        let mut query = SelectQuery::new(from);
        query.with = with;

        let refs: Vec<&Table> = resolved.iter().collect();
        query.items = self.build_select_items(&refs);

        let distinct_p = self.config().weights.distinct_prob;
        if self.config().features.distinct && self.chance(distinct_p) {
            query.distinct = true;
        }

        query.where_clause = self.predicate_for_mode(&refs, allow_subquery);

        let agg_p = self.config().weights.agg_prob;
        if self.config().features.aggregates && self.chance(agg_p) {
            self.apply_aggregates(&mut query, &refs);
        }

        if self.config().features.full_join_emulation
            && query.from.joins.len() == 1
            && query.with.is_none()
            && self.chance(30)
        {
            self.emulate_full_join(&mut query);
        }

        let window_p = self.config().weights.window_prob;
        if self.config().features.window_funcs
            && query.group_by.is_empty()
            && query.set_ops.is_empty()
            && !query.items.iter().any(|i| i.expr.contains_aggregate())
            && self.chance(window_p)
        {
            self.apply_windows(&mut query, &refs);
        }

        self.apply_order_and_limit(&mut query, &refs);

        if self.config().features.set_operations && query.set_ops.is_empty() && self.chance(25) {
            self.attach_set_ops(&mut query);
        }

        query.dedupe_item_aliases();
        query.normalize_set_operands();
        self.strip_suppressed_qualifiers(&mut query);

        if !validate_query_scope(&query, self.schema()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("generated query failed scope validation");
            return None;
        }
        self.finalize(&mut query, disallow_reason);
        Some(query)
    }

    fn finalize(&mut self, query: &mut SelectQuery, disallow_reason: Option<String>) {
        let mut analysis = analyze_query(query);
        if disallow_reason.is_some() {
            analysis.features.subquery_disallow_reason = disallow_reason;
            query.set_cached_analysis(analysis);
        }
    }

    /// The SELECT list: qualified columns, with the occasional scalar
    /// expression.
    fn build_select_items(&mut self, tables: &[&Table]) -> Vec<SelectItem> {
        let max = self.config().max_columns.max(1);
        let count = self.rng().gen_range(1..=max);
        let mut items = Vec::new();
        for _ in 0..count {
            if self.chance(15) {
                let depth = self.config().max_depth;
                let expr = self.generate_scalar_expr(tables, depth.min(2), false, 0);
                items.push(SelectItem::new(expr, format!("r{}", items.len())));
            } else if let Some(column) = self.random_column_expr(tables) {
                items.push(SelectItem::bare(column));
            }
        }
        if items.is_empty() {
            items.push(SelectItem::bare(Expr::lit(Value::Int(1))));
        }
        items
    }

    /// GROUP BY plus the aggregate select list, optional HAVING, optional
    /// ordinal wrapping and one grouping extension.
    fn apply_aggregates(&mut self, query: &mut SelectQuery, tables: &[&Table]) {
        let group_p = self.config().weights.group_by_prob;
        let mut keys: Vec<Expr> = Vec::new();
        if self.config().features.group_by && self.chance(group_p) {
            for _ in 0..self.rng().gen_range(1..=2u32) {
                if let Some(column) = self.random_column_expr(tables) {
                    if !keys.contains(&column) {
                        keys.push(column);
                    }
                }
            }
        }

        let mut items = vec![SelectItem::new(Expr::count_one(), "cnt")];
        let numeric = self.random_numeric_column(tables);
        if let Some(numeric) = numeric.clone() {
            items.push(SelectItem::new(Expr::func("SUM", vec![numeric]), "sum1"));
        }
        for key in &keys {
            let alias = match key {
                Expr::Column(c) => c.name.clone(),
                _ => format!("g{}", items.len()),
            };
            items.push(SelectItem::new(key.clone(), alias));
        }
        query.items = items;
        query.group_by = keys;

        if !query.group_by.is_empty() {
            let having_p = self.config().weights.having_prob;
            if self.config().features.having && self.chance(having_p) {
                query.having = Some(self.having_predicate(query, tables));
            }

            let ord_p = self.config().weights.group_by_ord_prob;
            let wrapped_ordinals = self.chance(ord_p);
            if wrapped_ordinals {
                let key_offset = query.items.len() - query.group_by.len();
                query.group_by = query
                    .group_by
                    .drain(..)
                    .enumerate()
                    .map(|(i, key)| Expr::GroupByOrdinal {
                        ordinal: Some(key_offset + i + 1),
                        inner: Some(Box::new(key)),
                    })
                    .collect();
            }

            // Grouping extension, plain keys only.
            if !wrapped_ordinals {
                match self.rng().gen_range(0..100) {
                    0..=14 => query.grouping.with_rollup = true,
                    15..=21 => query.grouping.with_cube = true,
                    22..=28 => {
                        let all: Vec<Expr> = query.group_by.clone();
                        let first = vec![all[0].clone()];
                        query.grouping.grouping_sets = Some(vec![all, first]);
                    }
                    _ => {}
                }
            }
        }
        query.invalidate_analysis();
    }

    fn having_predicate(&mut self, query: &SelectQuery, tables: &[&Table]) -> Expr {
        if self.chance(60) {
            if let Some(numeric) = self.random_numeric_column(tables) {
                let bound = Expr::lit(self.literal_for_type(crate::schema::ColumnType::Int));
                return Expr::binary(Expr::func("SUM", vec![numeric]), crate::ast::BinOp::Gt, bound);
            }
        }
        let key = query.group_by[self.rng().gen_range(0..query.group_by.len())].clone();
        let ty = key.inferred_type().unwrap_or(crate::schema::ColumnType::Int);
        let bound = Expr::lit(self.literal_for_type(ty));
        let op = *self
            .pick(crate::ast::BinOp::COMPARISONS)
            .expect("non-empty comparison set");
        Expr::binary(key, op, bound)
    }

    fn apply_windows(&mut self, query: &mut SelectQuery, tables: &[&Table]) {
        for i in 0..self.rng().gen_range(1..=2u32) {
            if let Some(window) = self.generate_window_expr(tables) {
                query
                    .items
                    .push(SelectItem::new(window, format!("wf{i}")));
            }
        }
        if self.chance(50) {
            self.hoist_shared_windows(query);
        }
        query.invalidate_analysis();
    }

    /// ORDER BY and LIMIT. Two rules are non-negotiable: a query that
    /// requires SELECT-order compatibility orders only by SELECT-list
    /// expressions or their ordinals, and a CROSS join always gets a
    /// non-empty ORDER BY.
    fn apply_order_and_limit(&mut self, query: &mut SelectQuery, tables: &[&Table]) {
        let cross = query.from.has_cross_join();
        let order_p = self.config().weights.order_by_prob;
        let want_order = self.config().features.order_by && self.chance(order_p);

        if cross || want_order {
            if query.requires_select_order() {
                let count = self.rng().gen_range(1..=query.items.len().min(2));
                for _ in 0..count {
                    let idx = self.rng().gen_range(0..query.items.len());
                    let order = if self.chance(50) {
                        Expr::lit(Value::Int((idx + 1) as i64))
                    } else {
                        query.items[idx].expr.clone()
                    };
                    query.order_by.push(order);
                }
            } else {
                for _ in 0..self.rng().gen_range(1..=2u32) {
                    if let Some(column) = self.random_column_expr(tables) {
                        query.order_by.push(column);
                    }
                }
                if query.order_by.is_empty() {
                    // CROSS joins cannot go unordered; order by the first
                    // item as a last resort.
                    query.order_by.push(query.items[0].expr.clone());
                }
            }
        }

        let limit_p = self.config().weights.limit_prob;
        if self.config().features.limit && !query.order_by.is_empty() && self.chance(limit_p) {
            query.limit = Some(self.rng().gen_range(1..=100));
        }
        query.invalidate_analysis();
    }

    /// A derived-table body over `base` plus the virtual table it exposes
    /// to the rest of the query under the alias `d0`.
    fn build_derived_base(&mut self, base: &Table) -> Option<(SelectQuery, Table)> {
        if base.columns.is_empty() {
            return None;
        }
        let mut body = SelectQuery::from_table(&base.name);
        let count = self.rng().gen_range(1..=base.columns.len().min(3));
        let mut items = Vec::new();
        for _ in 0..count {
            if let Some(Expr::Column(c)) = self.random_column_expr(&[base]) {
                let alias = c.name.clone();
                items.push(SelectItem::new(Expr::Column(c), alias));
            }
        }
        if items.is_empty() {
            return None;
        }
        body.items = items;
        body.dedupe_item_aliases();
        if self.chance(40) {
            let predicate = self.simple_predicate(&[base]);
            body.set_where(Some(predicate));
        }

        let columns: Vec<Column> = body
            .items
            .iter()
            .map(|item| Column::new(item.alias.clone(), item.published_type()))
            .collect();
        Some((body, Table::new("d0").with_columns(columns)))
    }

    /// The WITH list plus the virtual tables each CTE publishes.
    fn build_cte_list(&mut self) -> Option<(With, Vec<Table>)> {
        let max = self.config().weights.cte_count.max(1);
        let count = self.rng().gen_range(1..=max);
        let mut ctes = Vec::new();
        let mut virtuals = Vec::new();
        let mut recursive = false;

        for i in 0..count {
            let name = format!("cte_{i}");
            let body = if i == 0 && self.config().features.recursive_cte && self.chance(30) {
                let numeric_tables: Vec<Table> = self
                    .candidate_tables()
                    .into_iter()
                    .filter(|t| t.columns.iter().any(|c| c.ty.is_numeric()))
                    .cloned()
                    .collect();
                let base = self.pick(&numeric_tables)?.clone();
                let body = Self::recursive_cte_body(&base, &name)?;
                recursive = true;
                body
            } else {
                let base = {
                    let candidates: Vec<&Table> = self
                        .candidate_tables()
                        .into_iter()
                        .filter(|t| !t.columns.is_empty())
                        .collect();
                    self.pick(&candidates).copied()?.clone()
                };
                let mut body = SelectQuery::from_table(&base.name);
                let column_count = self.rng().gen_range(1..=base.columns.len().min(3));
                let mut items = Vec::new();
                for _ in 0..column_count {
                    if let Some(Expr::Column(c)) = self.random_column_expr(&[&base]) {
                        let alias = c.name.clone();
                        items.push(SelectItem::new(Expr::Column(c), alias));
                    }
                }
                if items.is_empty() {
                    items.push(SelectItem::new(Expr::lit(Value::Int(1)), "one"));
                }
                body.items = items;
                body.dedupe_item_aliases();
                if self.chance(40) {
                    let predicate = self.simple_predicate(&[&base]);
                    body.set_where(Some(predicate));
                }
                body
            };

            let columns: Vec<Column> = body
                .items
                .iter()
                .map(|item| Column::new(item.alias.clone(), item.published_type()))
                .collect();
            virtuals.push(Table::new(&name).with_columns(columns));
            ctes.push(Cte { name, query: body });
        }

        Some((With { recursive, ctes }, virtuals))
    }

    /// Rewrites qualified references to USING/NATURAL-suppressed columns
    /// into unqualified form across the query's own clauses. Nested
    /// subqueries own their scopes and are left alone.
    pub(crate) fn strip_suppressed_qualifiers(&mut self, query: &mut SelectQuery) {
        let banned = self.suppressed_pairs(query);
        if banned.is_empty() {
            return;
        }
        for item in &mut query.items {
            fixup_expr(&mut item.expr, &banned);
        }
        if let Some(where_clause) = &mut query.where_clause {
            fixup_expr(where_clause, &banned);
        }
        for expr in &mut query.group_by {
            fixup_expr(expr, &banned);
        }
        if let Some(sets) = &mut query.grouping.grouping_sets {
            for expr in sets.iter_mut().flatten() {
                fixup_expr(expr, &banned);
            }
        }
        if let Some(having) = &mut query.having {
            fixup_expr(having, &banned);
        }
        for def in &mut query.window_defs {
            for expr in def
                .spec
                .partition_by
                .iter_mut()
                .chain(def.spec.order_by.iter_mut())
            {
                fixup_expr(expr, &banned);
            }
        }
        for expr in &mut query.order_by {
            fixup_expr(expr, &banned);
        }
        query.invalidate_analysis();
    }

    /// The (alias, column) pairs whose qualified form a USING or NATURAL
    /// join suppressed, walking joins in order like the validator.
    fn suppressed_pairs(&self, query: &SelectQuery) -> HashSet<(String, String)> {
        let mut banned = HashSet::new();
        let mut visible: Vec<(String, Vec<String>)> = Vec::new();
        if let Some(columns) = self.factor_columns(query, &query.from.base) {
            visible.push((query.from.base.visible_alias().to_string(), columns));
        }

        for join in &query.from.joins {
            let Some(columns) = self.factor_columns(query, &join.table) else {
                continue;
            };
            let alias = join.table.visible_alias().to_string();
            let shared: Vec<String> = match &join.constraint {
                JoinConstraint::Using(using) => using.clone(),
                _ if join.natural => {
                    let left: HashSet<&String> =
                        visible.iter().flat_map(|(_, cols)| cols.iter()).collect();
                    columns.iter().filter(|c| left.contains(c)).cloned().collect()
                }
                _ => Vec::new(),
            };
            for column in &shared {
                for (left_alias, cols) in &visible {
                    if cols.contains(column) {
                        banned.insert((left_alias.clone(), column.clone()));
                    }
                }
                banned.insert((alias.clone(), column.clone()));
            }
            visible.push((alias, columns));
        }
        banned
    }

    fn factor_columns(&self, query: &SelectQuery, table: &TableRef) -> Option<Vec<String>> {
        match table {
            TableRef::Named { name } => {
                if let Some(with) = &query.with {
                    if let Some(cte) = with.ctes.iter().find(|c| c.name == *name) {
                        return Some(
                            cte.query
                                .items
                                .iter()
                                .filter_map(|i| {
                                    if !i.alias.is_empty() {
                                        Some(i.alias.clone())
                                    } else if let Expr::Column(c) = &i.expr {
                                        Some(c.name.clone())
                                    } else {
                                        None
                                    }
                                })
                                .collect(),
                        );
                    }
                }
                let table = self.schema().table_by_name(name)?;
                Some(table.columns.iter().map(|c| c.name.clone()).collect())
            }
            TableRef::Derived { query: inner, .. } => Some(
                inner
                    .items
                    .iter()
                    .filter_map(|i| {
                        if !i.alias.is_empty() {
                            Some(i.alias.clone())
                        } else if let Expr::Column(c) = &i.expr {
                            Some(c.name.clone())
                        } else {
                            None
                        }
                    })
                    .collect(),
            ),
        }
    }
}

fn fixup_expr(expr: &mut Expr, banned: &HashSet<(String, String)>) {
    match expr {
        Expr::Column(c) => {
            if let Some(table) = &c.table {
                if banned.contains(&(table.clone(), c.name.clone())) {
                    c.table = None;
                }
            }
        }
        Expr::Literal(_) | Expr::Param(_) | Expr::Interval { .. } => {}
        Expr::Unary { expr, .. } => fixup_expr(expr, banned),
        Expr::Binary { left, right, .. } => {
            fixup_expr(left, banned);
            fixup_expr(right, banned);
        }
        Expr::Func { args, .. } => args.iter_mut().for_each(|a| fixup_expr(a, banned)),
        Expr::Case { whens, else_expr } => {
            for (when, then) in whens {
                fixup_expr(when, banned);
                fixup_expr(then, banned);
            }
            if let Some(e) = else_expr {
                fixup_expr(e, banned);
            }
        }
        Expr::In { left, list } => {
            fixup_expr(left, banned);
            list.iter_mut().for_each(|e| fixup_expr(e, banned));
        }
        Expr::Exists { .. } | Expr::Subquery(_) => {}
        Expr::CompareSubquery { left, .. } => fixup_expr(left, banned),
        Expr::Window(w) => {
            w.args.iter_mut().for_each(|a| fixup_expr(a, banned));
            w.spec
                .partition_by
                .iter_mut()
                .chain(w.spec.order_by.iter_mut())
                .for_each(|e| fixup_expr(e, banned));
        }
        Expr::GroupByOrdinal { inner, .. } => {
            if let Some(inner) = inner {
                fixup_expr(inner, banned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_query_features;
    use crate::generator::tests::test_catalog;

    #[test]
    fn test_generated_queries_validate() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 71);
        let mut produced = 0;
        for _ in 0..50 {
            if let Some(q) = g.generate_select_query() {
                produced += 1;
                assert!(validate_query_scope(&q, &schema), "invalid: {}", q.sql());
            }
        }
        assert!(produced > 0, "no queries produced in 50 attempts");
    }

    #[test]
    fn test_having_always_has_group_by() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 72);
        for _ in 0..80 {
            if let Some(q) = g.generate_select_query() {
                if q.having.is_some() {
                    assert!(!q.group_by.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_cross_join_forces_order_by() {
        let schema = test_catalog();
        let mut cfg = crate::config::GeneratorConfig::default();
        cfg.weights.cross_join_prob = 100;
        cfg.weights.template_prob = 0;
        cfg.features.set_operations = false;
        let mut g = Generator::new(&schema, 73, cfg);
        for _ in 0..40 {
            if let Some(q) = g.generate_select_query() {
                if q.from.has_cross_join() {
                    assert!(!q.order_by.is_empty(), "unordered cross join: {}", q.sql());
                }
            }
        }
    }

    #[test]
    fn test_select_order_alignment() {
        let schema = test_catalog();
        let mut cfg = crate::config::GeneratorConfig::default();
        cfg.weights.distinct_prob = 100;
        cfg.weights.order_by_prob = 100;
        cfg.weights.template_prob = 0;
        let mut g = Generator::new(&schema, 74, cfg);
        for _ in 0..60 {
            let Some(q) = g.generate_select_query() else {
                continue;
            };
            if !q.requires_select_order() {
                continue;
            }
            for order in &q.order_by {
                let ok = match order {
                    Expr::Literal(Value::Int(n)) => {
                        *n >= 1 && (*n as usize) <= q.items.len()
                    }
                    other => q.items.iter().any(|item| item.expr == *other),
                };
                assert!(ok, "order expr not aligned in: {}", q.sql());
            }
        }
    }

    #[test]
    fn test_feature_off_skips_paths() {
        let schema = test_catalog();
        let mut cfg = crate::config::GeneratorConfig::default();
        cfg.features.subqueries = false;
        cfg.features.set_operations = false;
        cfg.features.window_funcs = false;
        cfg.features.cte = false;
        cfg.weights.template_prob = 0;
        let mut g = Generator::new(&schema, 75, cfg);
        for _ in 0..40 {
            let Some(mut q) = g.generate_select_query() else {
                continue;
            };
            let f = crate::analyzer::analyze_query(&mut q);
            assert!(!f.features.has_subquery);
            assert!(!f.features.has_window);
            assert!(!f.has_set_ops);
            assert!(!f.has_cte);
            assert_eq!(
                f.features.subquery_disallow_reason.as_deref(),
                Some("config:subqueries_off")
            );
        }
    }

    #[test]
    fn test_strip_suppressed_qualifiers() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 76);
        let mut q = SelectQuery::new(FromClause {
            base: TableRef::named("t0"),
            joins: vec![crate::ast::Join {
                join_type: crate::ast::JoinType::Inner,
                natural: false,
                table: TableRef::named("t1"),
                constraint: JoinConstraint::Using(vec!["c0".into()]),
            }],
        });
        q.items = vec![SelectItem::bare(Expr::column(
            "t0",
            "c0",
            crate::schema::ColumnType::Int,
        ))];
        g.strip_suppressed_qualifiers(&mut q);
        let Expr::Column(c) = &q.items[0].expr else {
            panic!()
        };
        assert_eq!(c.table, None);
        assert!(validate_query_scope(&q, &schema));
    }

    #[test]
    fn test_dsg_mode_generates() {
        let schema = test_catalog();
        let mut cfg = crate::config::GeneratorConfig::default();
        cfg.features.dsg = true;
        cfg.weights.template_prob = 0;
        let mut g = Generator::new(&schema, 77, cfg);
        let mut produced = 0;
        for _ in 0..30 {
            if let Some(q) = g.generate_select_query() {
                produced += 1;
                let f = analyze_query_features(&q);
                if !f.join_graph_sig.is_empty() {
                    assert!(f.join_graph_sig.starts_with("base"));
                }
            }
        }
        assert!(produced > 0);
    }
}
