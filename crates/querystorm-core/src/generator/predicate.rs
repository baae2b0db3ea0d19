//! Predicate generation: the recursive weighted sampler.

use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, Value};
use crate::config::PredicateMode;
use crate::schema::{ColumnType, Table};

impl Generator<'_> {
    /// The recursive weighted predicate sampler.
    ///
    /// Decision ladder: a subquery roll proportional to the configured
    /// subquery budget, a comparison leaf at depth zero, an IN-list roll,
    /// then either a comparison or an AND/OR combination of two
    /// sub-predicates.
    pub fn generate_predicate(
        &mut self,
        tables: &[&Table],
        depth: usize,
        allow_subquery: bool,
        subq_depth: usize,
    ) -> Expr {
        if allow_subquery && subq_depth > 0 {
            let w = &self.config().weights;
            let budget = (w.subq_count as f64 * w.subquery_scale * 10.0).min(40.0);
            let p = budget.max(0.0) as u32;
            if self.chance(p) {
                if let Some(predicate) = self.subquery_predicate(tables, subq_depth) {
                    return predicate;
                }
            }
        }

        if depth == 0 {
            return self.comparison_predicate(tables);
        }

        let in_list_p = self.config().weights.in_list_prob;
        if self.chance(in_list_p) {
            if let Some(predicate) = self.in_list_predicate(tables) {
                return predicate;
            }
        }

        if self.rng().gen_range(0..3) == 0 {
            return self.comparison_predicate(tables);
        }
        let left = self.generate_predicate(tables, depth - 1, allow_subquery, subq_depth);
        let right = self.generate_predicate(tables, depth - 1, allow_subquery, subq_depth);
        let or_p = self.config().weights.or_prob;
        if self.chance(or_p) {
            Expr::or(left, right)
        } else {
            Expr::and(left, right)
        }
    }

    /// Predicate for one run of the configured [`PredicateMode`].
    pub(crate) fn predicate_for_mode(
        &mut self,
        tables: &[&Table],
        allow_subquery: bool,
    ) -> Option<Expr> {
        let mode = self.config().predicate_mode;
        let depth = self.config().max_depth;
        let subq_depth = self.config().max_subq_depth;
        match mode {
            PredicateMode::None => None,
            PredicateMode::Simple => Some(self.simple_predicate(tables)),
            PredicateMode::SimpleColumns => Some(self.simple_columns_predicate(tables)),
            PredicateMode::Default => {
                Some(self.generate_predicate(tables, depth, allow_subquery, subq_depth))
            }
        }
    }

    /// One comparison: column against a type-matched literal.
    pub(crate) fn simple_predicate(&mut self, tables: &[&Table]) -> Expr {
        let Some(column) = self.random_column_expr(tables) else {
            return Expr::binary(
                Expr::lit(Value::Int(1)),
                BinOp::Eq,
                Expr::lit(Value::Int(1)),
            );
        };
        let ty = column.inferred_type().unwrap_or(ColumnType::Int);
        let literal = Expr::lit(self.literal_for_type(ty));
        let op = *self
            .pick(BinOp::COMPARISONS)
            .expect("non-empty comparison set");
        Expr::binary(column, op, literal)
    }

    /// One comparison: column against a category-compatible column.
    pub(crate) fn simple_columns_predicate(&mut self, tables: &[&Table]) -> Expr {
        let mut pairs: Vec<(Expr, Expr)> = Vec::new();
        for (i, a) in tables.iter().enumerate() {
            for ac in &a.columns {
                for b in tables.iter().skip(i) {
                    for bc in &b.columns {
                        if a.name == b.name && ac.name == bc.name {
                            continue;
                        }
                        if ac.ty.compatible_with(bc.ty) {
                            pairs.push((
                                Expr::column(&a.name, &ac.name, ac.ty),
                                Expr::column(&b.name, &bc.name, bc.ty),
                            ));
                        }
                    }
                }
            }
        }
        match self.pick_index(pairs.len()) {
            Some(idx) => {
                let (left, right) = pairs.swap_remove(idx);
                let op = *self
                    .pick(BinOp::COMPARISONS)
                    .expect("non-empty comparison set");
                Expr::binary(left, op, right)
            }
            None => self.simple_predicate(tables),
        }
    }

    fn comparison_predicate(&mut self, tables: &[&Table]) -> Expr {
        if self.chance(15) {
            if let Some(predicate) = self.interval_comparison(tables) {
                return predicate;
            }
        }
        let (left, right) = self.generate_comparable_pair(tables);
        let op = *self
            .pick(BinOp::COMPARISONS)
            .expect("non-empty comparison set");
        Expr::binary(left, op, right)
    }

    /// `(date_col + INTERVAL n UNIT) op <temporal literal>` over a temporal
    /// column, when one exists.
    fn interval_comparison(&mut self, tables: &[&Table]) -> Option<Expr> {
        let mut temporals = Vec::new();
        for table in tables {
            for column in &table.columns {
                if column.ty.category() == crate::schema::TypeCategory::Temporal {
                    temporals.push((table.name.clone(), column.name.clone(), column.ty));
                }
            }
        }
        let idx = self.pick_index(temporals.len())?;
        let (table, column, ty) = temporals.swap_remove(idx);

        let unit = *self
            .pick(&[
                crate::ast::IntervalUnit::Day,
                crate::ast::IntervalUnit::Month,
                crate::ast::IntervalUnit::Year,
            ])
            .expect("non-empty unit set");
        let shift_op = if self.chance(50) { BinOp::Add } else { BinOp::Sub };
        let shifted = Expr::binary(
            Expr::column(table, column, ty),
            shift_op,
            Expr::Interval {
                value: self.rng().gen_range(1..=30),
                unit,
            },
        );
        let op = *self
            .pick(BinOp::COMPARISONS)
            .expect("non-empty comparison set");
        Some(Expr::binary(shifted, op, Expr::lit(self.literal_for_type(ty))))
    }

    /// A pair of comparable operands. Preference order: join-graph edge
    /// pairs (tracked in the statistics), same-category column pairs,
    /// column vs. literal, then synthesized scalar vs. matched literal.
    pub(crate) fn generate_comparable_pair(&mut self, tables: &[&Table]) -> (Expr, Expr) {
        self.stats_mut().predicate_pairs_total += 1;

        // Join-graph edges: columns of two different, joinable tables.
        let mut edge_pairs: Vec<(Expr, Expr)> = Vec::new();
        for (i, a) in tables.iter().enumerate() {
            for b in tables.iter().skip(i + 1) {
                if !a.joinable_with(b) {
                    continue;
                }
                for ac in &a.columns {
                    for bc in &b.columns {
                        if ac.ty.compatible_with(bc.ty) {
                            edge_pairs.push((
                                Expr::column(&a.name, &ac.name, ac.ty),
                                Expr::column(&b.name, &bc.name, bc.ty),
                            ));
                        }
                    }
                }
            }
        }
        if !edge_pairs.is_empty() && self.chance(60) {
            self.stats_mut().predicate_pairs_join += 1;
            let idx = self.rng().gen_range(0..edge_pairs.len());
            return edge_pairs.swap_remove(idx);
        }

        // Same-category pair within the table set.
        let mut same_category: Vec<(Expr, Expr)> = Vec::new();
        for a in tables {
            for (ci, ac) in a.columns.iter().enumerate() {
                for bc in a.columns.iter().skip(ci + 1) {
                    if ac.ty.compatible_with(bc.ty) {
                        same_category.push((
                            Expr::column(&a.name, &ac.name, ac.ty),
                            Expr::column(&a.name, &bc.name, bc.ty),
                        ));
                    }
                }
            }
        }
        if !same_category.is_empty() && self.chance(40) {
            let idx = self.rng().gen_range(0..same_category.len());
            return same_category.swap_remove(idx);
        }

        // Column vs. typed literal.
        if let Some(column) = self.random_column_expr(tables) {
            let ty = column.inferred_type().unwrap_or(ColumnType::Int);
            let literal = Expr::lit(self.literal_for_type(ty));
            return (column, literal);
        }

        // Scalar synthesis with a type-matched literal.
        let scalar = self.generate_scalar_expr(tables, 1, false, 0);
        let ty = scalar.inferred_type().unwrap_or(ColumnType::Int);
        let literal = Expr::lit(self.literal_for_type(ty));
        (scalar, literal)
    }

    /// `col IN (lit, ...)` with up to three literals, possibly negated.
    fn in_list_predicate(&mut self, tables: &[&Table]) -> Option<Expr> {
        let column = self.random_column_expr(tables)?;
        let ty = column.inferred_type().unwrap_or(ColumnType::Int);
        let n = self.rng().gen_range(1..=3);
        let list: Vec<Expr> = (0..n)
            .map(|_| Expr::lit(self.literal_for_type(ty)))
            .collect();
        let expr = Expr::In {
            left: Box::new(column),
            list,
        };
        let not_in_p = self.config().weights.not_in_prob;
        if self.config().features.not_in && self.chance(not_in_p) {
            Some(Expr::not(expr))
        } else {
            Some(expr)
        }
    }

    /// EXISTS / NOT EXISTS / IN-subquery / NOT IN-subquery predicate, with
    /// the occasional quantified comparison.
    fn subquery_predicate(&mut self, tables: &[&Table], subq_depth: usize) -> Option<Expr> {
        if self.chance(15) {
            if let Some(predicate) = self.quantified_predicate(tables, subq_depth) {
                return Some(predicate);
            }
        }
        let exists_p = self.config().weights.exists_prob;
        if self.chance(exists_p) {
            let query = self.generate_exists_subquery(tables, subq_depth)?;
            let exists = Expr::Exists {
                query: Box::new(query),
            };
            let not_exists_p = self.config().weights.not_exists_prob;
            if self.config().features.not_exists && self.chance(not_exists_p) {
                return Some(Expr::not(exists));
            }
            return Some(exists);
        }

        // IN over a typed subquery; the left operand comes from the join
        // graph when possible, falling back to a numeric column or literal.
        let left = self
            .random_column_expr(tables)
            .or_else(|| self.random_numeric_column(tables))
            .unwrap_or_else(|| Expr::lit(Value::Int(1)));
        let left_ty = left.inferred_type().unwrap_or(ColumnType::Int);
        let query = self.generate_in_subquery(tables, left_ty, subq_depth)?;
        let expr = Expr::In {
            left: Box::new(left),
            list: vec![Expr::Subquery(Box::new(query))],
        };
        let not_in_p = self.config().weights.not_in_prob;
        if self.config().features.not_in && self.chance(not_in_p) {
            Some(Expr::not(expr))
        } else {
            Some(expr)
        }
    }

    /// `col op ANY|SOME|ALL (subquery)` over a column the subquery can
    /// type-match.
    fn quantified_predicate(&mut self, tables: &[&Table], subq_depth: usize) -> Option<Expr> {
        let left = self.random_column_expr(tables)?;
        let left_ty = left.inferred_type().unwrap_or(ColumnType::Int);
        let query = self.generate_in_subquery(tables, left_ty, subq_depth)?;
        // The null-safe form does not combine with quantifiers.
        let op = *self
            .pick(&[
                BinOp::Eq,
                BinOp::NotEq,
                BinOp::Lt,
                BinOp::LtEq,
                BinOp::Gt,
                BinOp::GtEq,
            ])
            .expect("non-empty comparison set");
        let quantifier = *self
            .pick(&[
                crate::ast::Quantifier::Any,
                crate::ast::Quantifier::Some,
                crate::ast::Quantifier::All,
            ])
            .expect("non-empty quantifier set");
        Some(Expr::CompareSubquery {
            left: Box::new(left),
            op,
            quantifier,
            query: Box::new(query),
        })
    }
}
