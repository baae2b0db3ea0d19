//! Subquery construction: scalar, IN and EXISTS flavors.
//!
//! All three pick their inner table the same way: join-compatible with the
//! outer set when possible, a non-outer table when available (self-joins
//! bias results), and able to supply a type-compatible column. Correlation
//! is an equality against an outer column; the reference resolves through
//! the merged outer scope, never through pointers.

use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, SelectItem, SelectQuery};
use crate::schema::{ColumnType, Table};

impl<'a> Generator<'a> {
    /// Picks the inner table for a subquery over `outer` tables.
    pub(crate) fn choose_inner_table(
        &mut self,
        outer: &[&Table],
        needed: Option<ColumnType>,
    ) -> Option<&'a Table> {
        let all = self.schema().tables();
        let supplies = |t: &Table| match needed {
            Some(ty) => t.columns.iter().any(|c| c.ty.compatible_with(ty)),
            None => !t.columns.is_empty(),
        };
        let is_outer = |t: &Table| outer.iter().any(|o| o.name == t.name);
        let joinable = |t: &Table| outer.iter().any(|o| o.joinable_with(t));

        let candidates: Vec<&'a Table> = all.iter().filter(|t| supplies(t)).collect();
        if candidates.is_empty() {
            return None;
        }
        let preferred: Vec<&'a Table> = candidates
            .iter()
            .copied()
            .filter(|t| !is_outer(t) && joinable(t))
            .collect();
        if !preferred.is_empty() {
            return self.pick(&preferred).copied();
        }
        let non_outer: Vec<&'a Table> = candidates
            .iter()
            .copied()
            .filter(|t| !is_outer(t))
            .collect();
        if !non_outer.is_empty() {
            return self.pick(&non_outer).copied();
        }
        self.pick(&candidates).copied()
    }

    /// An equality correlating the inner table to one outer column.
    fn correlation_predicate(&mut self, inner: &Table, outer: &[&Table]) -> Option<Expr> {
        let mut pairs: Vec<(Expr, Expr)> = Vec::new();
        for o in outer {
            for oc in &o.columns {
                for ic in &inner.columns {
                    if ic.ty.compatible_with(oc.ty) {
                        pairs.push((
                            Expr::column(&inner.name, &ic.name, ic.ty),
                            Expr::column(&o.name, &oc.name, oc.ty),
                        ));
                    }
                }
            }
        }
        let idx = self.pick_index(pairs.len())?;
        let (inner_col, outer_col) = pairs.swap_remove(idx);
        Some(Expr::binary(inner_col, BinOp::Eq, outer_col))
    }

    fn finish_inner_query(
        &mut self,
        query: &mut SelectQuery,
        inner: &Table,
        outer: &[&Table],
        subq_depth: usize,
    ) {
        let mut predicate = None;
        if self.config().features.correlated_subqueries && self.chance(50) {
            predicate = self.correlation_predicate(inner, outer);
        }
        if subq_depth > 1 && self.chance(30) {
            let extra = self.generate_predicate(&[inner], 1, true, subq_depth - 1);
            predicate = Some(match predicate {
                Some(p) => Expr::and(p, extra),
                None => extra,
            });
        }
        query.set_where(predicate);

        // Random walk over LIMIT and ORDER BY, feature-gated.
        if self.config().features.limit {
            let p = self.config().weights.limit_prob;
            if self.chance(p) {
                if self.config().features.order_by && self.chance(50) {
                    if let Some(order) = self.random_column_expr(&[inner]) {
                        query.order_by.push(order);
                    }
                }
                query.limit = Some(self.rng().gen_range(1..=20));
            }
        }
    }

    /// Scalar subquery: `SELECT COUNT(1) FROM <inner>`, optionally
    /// correlated to an outer column.
    pub fn generate_subquery(
        &mut self,
        outer: &[&Table],
        subq_depth: usize,
    ) -> Option<SelectQuery> {
        self.stats_mut().subquery_attempts += 1;
        if subq_depth == 0 {
            self.stats_mut().subquery_failed += 1;
            return None;
        }
        let Some(inner) = self.choose_inner_table(outer, None) else {
            self.stats_mut().subquery_failed += 1;
            return None;
        };
        let mut query = SelectQuery::from_table(&inner.name);
        query.items = vec![SelectItem::bare(Expr::count_one())];
        self.finish_inner_query(&mut query, inner, outer, subq_depth);
        self.stats_mut().subquery_built += 1;
        Some(query)
    }

    /// IN-subquery body: projects one column compatible with the left
    /// operand's type.
    pub(crate) fn generate_in_subquery(
        &mut self,
        outer: &[&Table],
        left_type: ColumnType,
        subq_depth: usize,
    ) -> Option<SelectQuery> {
        self.stats_mut().subquery_attempts += 1;
        if subq_depth == 0 {
            self.stats_mut().subquery_failed += 1;
            return None;
        }
        let Some(inner) = self.choose_inner_table(outer, Some(left_type)) else {
            self.stats_mut().subquery_failed += 1;
            return None;
        };
        let compatible: Vec<_> = inner.columns_compatible_with(left_type);
        let idx = self.pick_index(compatible.len())?;
        let column = compatible[idx];
        let mut query = SelectQuery::from_table(&inner.name);
        query.items = vec![SelectItem::bare(Expr::column(
            &inner.name,
            &column.name,
            column.ty,
        ))];
        self.finish_inner_query(&mut query, inner, outer, subq_depth);
        self.stats_mut().subquery_built += 1;
        Some(query)
    }

    /// EXISTS-subquery body: prefers a projected column when a type match
    /// with the outer side exists, else counts.
    pub(crate) fn generate_exists_subquery(
        &mut self,
        outer: &[&Table],
        subq_depth: usize,
    ) -> Option<SelectQuery> {
        self.stats_mut().subquery_attempts += 1;
        if subq_depth == 0 {
            self.stats_mut().subquery_failed += 1;
            return None;
        }
        let Some(inner) = self.choose_inner_table(outer, None) else {
            self.stats_mut().subquery_failed += 1;
            return None;
        };

        let outer_types: Vec<ColumnType> = outer
            .iter()
            .flat_map(|t| t.columns.iter().map(|c| c.ty))
            .collect();
        let matched: Vec<_> = inner
            .columns
            .iter()
            .filter(|c| outer_types.iter().any(|ty| c.ty.compatible_with(*ty)))
            .collect();

        let mut query = SelectQuery::from_table(&inner.name);
        query.items = vec![match self.pick(&matched) {
            Some(column) => SelectItem::bare(Expr::column(&inner.name, &column.name, column.ty)),
            None => SelectItem::bare(Expr::count_one()),
        }];
        self.finish_inner_query(&mut query, inner, outer, subq_depth);
        self.stats_mut().subquery_built += 1;
        Some(query)
    }
}
