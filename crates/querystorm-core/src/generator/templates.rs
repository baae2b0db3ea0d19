//! Template strategies: pre-shaped constructions selected by weight before
//! the generic pipeline. A failing builder zeroes its weight and the loop
//! retries until every weight is exhausted.

use rand::seq::SliceRandom;
use rand::Rng;

use super::Generator;
use crate::analyzer::validate_query_scope;
use crate::ast::{BinOp, Expr, SelectItem, SelectQuery};
use crate::schema::Table;

/// Strategy labels recorded on the produced query.
pub(crate) const STRATEGY_JOIN_ONLY: &str = "join_only";
pub(crate) const STRATEGY_JOIN_FILTER: &str = "join_filter";
pub(crate) const STRATEGY_AGG_PUSHDOWN: &str = "agg_pushdown";
pub(crate) const STRATEGY_SEMI_ANTI: &str = "semi_anti";

impl Generator<'_> {
    /// Attempts one template query, sampling among join-reorder,
    /// agg-pushdown and semi/anti shapes by weight.
    pub(crate) fn generate_template_query(&mut self) -> Option<SelectQuery> {
        let features = self.config().features.clone();
        let w = &self.config().weights;
        let mut weights = [
            if features.joins { w.join_reorder_weight } else { 0 },
            if features.aggregates && features.group_by {
                w.agg_pushdown_weight
            } else {
                0
            },
            if features.subqueries { w.semi_anti_weight } else { 0 },
        ];

        loop {
            let total: u32 = weights.iter().sum();
            if total == 0 {
                return None;
            }
            let mut roll = self.rng().gen_range(0..total);
            let mut idx = 0;
            for (i, weight) in weights.iter().enumerate() {
                if roll < *weight {
                    idx = i;
                    break;
                }
                roll -= weight;
            }
            let built = match idx {
                0 => self.template_join_reorder(),
                1 => self.template_agg_pushdown(),
                _ => self.template_semi_anti(),
            };
            match built {
                Some(query) => return Some(query),
                None => weights[idx] = 0,
            }
        }
    }

    /// Join reorder: at least three shuffled tables, a projection, and
    /// either an empty WHERE (`join_only`) or a full predicate
    /// (`join_filter`). The choice is weight-driven and recorded so
    /// downstream oracles can distinguish the two.
    fn template_join_reorder(&mut self) -> Option<SelectQuery> {
        let candidates: Vec<Table> = self.candidate_tables().into_iter().cloned().collect();
        if candidates.len() < 3 {
            return None;
        }
        let upper = candidates.len().min(self.config().max_join_tables).max(3);
        let count = self.rng().gen_range(3..=upper);
        let mut tables = candidates;
        tables.shuffle(self.rng());
        tables.truncate(count);

        let mut query = SelectQuery::new(self.build_from_clause(&tables));
        let refs: Vec<&Table> = tables.iter().collect();
        query.items = self.projection_items(&refs);

        let w = &self.config().weights;
        let (only, filter) = (w.template_join_only_weight, w.template_join_filter_weight);
        let total = only + filter;
        let join_only = total == 0 || self.rng().gen_range(0..total) < only;
        if join_only {
            query.strategy = Some(STRATEGY_JOIN_ONLY.to_string());
        } else {
            let depth = self.config().max_depth;
            let predicate = self.generate_predicate(&refs, depth, false, 0);
            query.set_where(Some(predicate));
            query.strategy = Some(STRATEGY_JOIN_FILTER.to_string());
        }

        self.finish_template(query)
    }

    /// Agg pushdown: one table, forced GROUP BY, an aggregate select list,
    /// a subquery-free WHERE and an optional HAVING.
    fn template_agg_pushdown(&mut self) -> Option<SelectQuery> {
        let table = {
            let candidates = self.candidate_tables();
            self.pick(&candidates).copied()?.clone()
        };
        let key = {
            let idx = self.pick_index(table.columns.len())?;
            table.columns[idx].clone()
        };

        let mut query = SelectQuery::from_table(&table.name);
        query.group_by = vec![Expr::column(&table.name, &key.name, key.ty)];
        query.items = vec![SelectItem::new(Expr::count_one(), "cnt")];
        let numeric = self.random_numeric_column(&[&table]);
        if let Some(numeric) = numeric.clone() {
            query
                .items
                .push(SelectItem::new(Expr::func("SUM", vec![numeric]), "sum1"));
        }
        query.items.push(SelectItem::new(
            Expr::column(&table.name, &key.name, key.ty),
            &key.name,
        ));

        let depth = self.config().max_depth;
        let predicate = self.generate_predicate(&[&table], depth, false, 0);
        query.set_where(Some(predicate));

        let having_p = self.config().weights.having_prob;
        if self.config().features.having && self.chance(having_p) {
            if let Some(numeric) = numeric {
                let bound = Expr::lit(self.literal_for_type(crate::schema::ColumnType::Int));
                query.having = Some(Expr::binary(
                    Expr::func("SUM", vec![numeric]),
                    BinOp::Gt,
                    bound,
                ));
            }
        }

        query.strategy = Some(STRATEGY_AGG_PUSHDOWN.to_string());
        self.finish_template(query)
    }

    /// Semi/anti join: an outer SELECT with an EXISTS (or NOT EXISTS)
    /// subquery plus an optional extra AND-filter.
    fn template_semi_anti(&mut self) -> Option<SelectQuery> {
        let table = {
            let candidates = self.candidate_tables();
            self.pick(&candidates).copied()?.clone()
        };
        let subq_depth = self.config().max_subq_depth;
        let subquery = self.generate_exists_subquery(&[&table], subq_depth)?;

        let mut query = SelectQuery::from_table(&table.name);
        let refs: Vec<&Table> = vec![&table];
        query.items = self.projection_items(&refs);

        let exists = Expr::Exists {
            query: Box::new(subquery),
        };
        let not_exists_p = self.config().weights.not_exists_prob;
        let mut predicate = if self.config().features.not_exists && self.chance(not_exists_p) {
            Expr::not(exists)
        } else {
            exists
        };
        if self.chance(40) {
            predicate = Expr::and(predicate, self.simple_predicate(&refs));
        }
        query.set_where(Some(predicate));

        query.strategy = Some(STRATEGY_SEMI_ANTI.to_string());
        self.finish_template(query)
    }

    fn projection_items(&mut self, tables: &[&Table]) -> Vec<SelectItem> {
        let max = self.config().max_columns.max(1);
        let count = self.rng().gen_range(1..=max.min(4));
        let mut items = Vec::new();
        for _ in 0..count {
            if let Some(column) = self.random_column_expr(tables) {
                items.push(SelectItem::bare(column));
            }
        }
        if items.is_empty() {
            items.push(SelectItem::bare(Expr::lit(crate::ast::Value::Int(1))));
        }
        items
    }

    fn finish_template(&mut self, mut query: SelectQuery) -> Option<SelectQuery> {
        query.dedupe_item_aliases();
        // CROSS joins never go unordered.
        if query.from.has_cross_join() && query.order_by.is_empty() {
            query.order_by.push(query.items[0].expr.clone());
        }
        self.strip_suppressed_qualifiers(&mut query);
        if !validate_query_scope(&query, self.schema()) {
            return None;
        }
        Some(query)
    }
}
