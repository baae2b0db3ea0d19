//! Join graph, topology sampling and table picking.
//!
//! Candidate tables form an undirected graph whose edges are type-category
//! compatibilities. A weighted roll picks the join shape (chain, star or
//! snowflake), then node order is sampled along the graph. Under data-star
//! geometry `t0` is forced into the base slot and dimension tables join on
//! key pairs. An installed TQS walker replaces adjacency sampling with a
//! biased random walk.

use rand::seq::SliceRandom;
use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, FromClause, Join, JoinConstraint, JoinType, TableRef};
use crate::config::JoinOnPolicy;
use crate::schema::Table;

/// Join topology over the picked tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinShape {
    Chain,
    Star,
    Snowflake,
}

/// Undirected adjacency over candidate tables. Tables share an edge iff any
/// of their column types fall in the same type category.
pub(crate) struct JoinGraph<'t> {
    pub tables: Vec<&'t Table>,
    adj: Vec<Vec<bool>>,
}

impl<'t> JoinGraph<'t> {
    pub fn build(tables: Vec<&'t Table>) -> Self {
        let n = tables.len();
        let mut adj = vec![vec![false; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                if tables[i].joinable_with(tables[j]) {
                    adj[i][j] = true;
                    adj[j][i] = true;
                }
            }
        }
        Self { tables, adj }
    }

    fn degree(&self, i: usize) -> usize {
        self.adj[i].iter().filter(|e| **e).count()
    }

    fn neighbors_of(&self, i: usize) -> Vec<usize> {
        (0..self.tables.len()).filter(|&j| self.adj[i][j]).collect()
    }

    /// Highest-degree node with a deterministic (lowest index) tie-break.
    fn best_start(&self) -> Option<usize> {
        (0..self.tables.len()).max_by_key(|&i| (self.degree(i), usize::MAX - i))
    }
}

impl<'a> Generator<'a> {
    /// Non-CTE candidate tables from the schema. The returned references
    /// borrow the schema, not the generator, so callers can keep them
    /// across RNG calls.
    pub(crate) fn candidate_tables(&self) -> Vec<&'a Table> {
        self.schema().tables().iter().collect()
    }

    /// Picks the base-table set for one query, in join order.
    pub(crate) fn pick_table_names(&mut self) -> Vec<String> {
        let candidates: Vec<String> = self
            .candidate_tables()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        if !self.config().features.joins {
            let idx = self.rng().gen_range(0..candidates.len());
            return vec![candidates[idx].clone()];
        }

        if self.config().tqs.enabled {
            if let Some(mut names) = self.tqs_walk() {
                // A biased walk may revisit a table; self-joins need
                // aliases this generator does not emit.
                let mut seen = std::collections::HashSet::new();
                names.retain(|n| seen.insert(n.clone()));
                if !names.is_empty() {
                    return names;
                }
            }
        }

        let count = self.desired_table_count(candidates.len());
        if self.config().features.dsg {
            return self.pick_dsg_tables(count);
        }

        let shape = self.roll_join_shape();
        let order = {
            let tables = self.candidate_tables();
            let graph = JoinGraph::build(tables);
            self.sample_order(&graph, shape, count)
        };
        if order.is_empty() {
            let idx = self.rng().gen_range(0..candidates.len());
            return vec![candidates[idx].clone()];
        }
        order
    }

    fn tqs_walk(&mut self) -> Option<Vec<String>> {
        let mut walker = self.take_tqs_walker()?;
        let tqs = self.config().tqs.clone();
        let length = if tqs.walk_length > 0 {
            tqs.walk_length
        } else {
            self.rng().gen_range(tqs.walk_min..=tqs.walk_max.max(tqs.walk_min))
        };
        let names = walker.walk_tables(self.rng(), length, tqs.gamma);
        walker.record_path(&names);
        self.put_tqs_walker(walker);
        Some(names)
    }

    fn desired_table_count(&mut self, available: usize) -> usize {
        let cfg = self.config();
        let max_joins = (cfg.max_join_tables.saturating_sub(1)).min(cfg.weights.join_count as usize);
        let min = cfg.min_join_tables.max(1);
        let joins = self.rng().gen_range(0..=max_joins);
        (1 + joins).max(min).min(available)
    }

    fn roll_join_shape(&mut self) -> JoinShape {
        let w = &self.config().weights;
        let (chain, star, snow) = (w.chain_weight, w.star_weight, w.snowflake_weight);
        let total = chain + star + snow;
        if total == 0 {
            return JoinShape::Chain;
        }
        let roll = self.rng().gen_range(0..total);
        if roll < chain {
            JoinShape::Chain
        } else if roll < chain + star {
            JoinShape::Star
        } else {
            JoinShape::Snowflake
        }
    }

    /// Data-star geometry: `t0` occupies position 0, dimensions follow.
    fn pick_dsg_tables(&mut self, count: usize) -> Vec<String> {
        let mut names = vec!["t0".to_string()];
        let mut dims: Vec<String> = self
            .candidate_tables()
            .iter()
            .filter(|t| t.name != "t0" && !t.is_view)
            .map(|t| t.name.clone())
            .collect();
        dims.shuffle(self.rng());
        names.extend(dims.into_iter().take(count.saturating_sub(1)));
        names
    }

    fn sample_order(&mut self, graph: &JoinGraph<'_>, shape: JoinShape, count: usize) -> Vec<String> {
        let picked = match shape {
            JoinShape::Chain => self.sample_chain(graph, count),
            JoinShape::Star => self.sample_star(graph, count),
            JoinShape::Snowflake => self.sample_snowflake(graph, count),
        };
        picked
            .into_iter()
            .map(|i| graph.tables[i].name.clone())
            .collect()
    }

    /// Chain: each successive node must neighbor the last; when the walk
    /// dead-ends, any selected node with an unvisited neighbor anchors the
    /// continuation.
    fn sample_chain(&mut self, graph: &JoinGraph<'_>, count: usize) -> Vec<usize> {
        let Some(start) = graph.best_start() else {
            return Vec::new();
        };
        let mut picked = vec![start];
        while picked.len() < count {
            let last = *picked.last().expect("picked is non-empty");
            let mut next = self.unvisited_neighbor(graph, last, &picked);
            if next.is_none() {
                // Anchor fallback: any selected node.
                for &anchor in &picked {
                    if let Some(n) = self.unvisited_neighbor(graph, anchor, &picked) {
                        next = Some(n);
                        break;
                    }
                }
            }
            match next {
                Some(n) => picked.push(n),
                None => break,
            }
        }
        picked
    }

    /// Star: a center plus N random neighbors.
    fn sample_star(&mut self, graph: &JoinGraph<'_>, count: usize) -> Vec<usize> {
        let Some(center) = graph.best_start() else {
            return Vec::new();
        };
        let mut picked = vec![center];
        let mut spokes = graph.neighbors_of(center);
        spokes.shuffle(self.rng());
        picked.extend(spokes.into_iter().take(count.saturating_sub(1)));
        picked
    }

    /// Snowflake: a center, up to two first-level neighbors, then nodes
    /// adjacent to the first level.
    fn sample_snowflake(&mut self, graph: &JoinGraph<'_>, count: usize) -> Vec<usize> {
        let Some(center) = graph.best_start() else {
            return Vec::new();
        };
        let mut picked = vec![center];
        let mut first_level = graph.neighbors_of(center);
        first_level.shuffle(self.rng());
        first_level.truncate(2);
        for n in &first_level {
            if picked.len() < count && !picked.contains(n) {
                picked.push(*n);
            }
        }
        while picked.len() < count {
            let mut next = None;
            for &anchor in &first_level {
                if let Some(n) = self.unvisited_neighbor(graph, anchor, &picked) {
                    next = Some(n);
                    break;
                }
            }
            if next.is_none() {
                for &anchor in &picked {
                    if let Some(n) = self.unvisited_neighbor(graph, anchor, &picked) {
                        next = Some(n);
                        break;
                    }
                }
            }
            match next {
                Some(n) => picked.push(n),
                None => break,
            }
        }
        picked
    }

    fn unvisited_neighbor(
        &mut self,
        graph: &JoinGraph<'_>,
        from: usize,
        picked: &[usize],
    ) -> Option<usize> {
        let open: Vec<usize> = graph
            .neighbors_of(from)
            .into_iter()
            .filter(|n| !picked.contains(n))
            .collect();
        self.pick(&open).copied()
    }

    /// Scores and samples a join column pair between the accumulated left
    /// side and the joining table. Same-name and index-prefixed pairs win
    /// their bucket; `index_prefix_prob` controls how often the winning
    /// bucket is preferred over a uniform sample.
    pub(crate) fn pick_join_column_pair(
        &mut self,
        left_tables: &[&Table],
        right: &Table,
    ) -> Option<(Expr, Expr)> {
        struct Candidate {
            left_table: String,
            left_col: String,
            left_ty: crate::schema::ColumnType,
            right_col: String,
            right_ty: crate::schema::ColumnType,
            score: u32,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for lt in left_tables {
            for lc in &lt.columns {
                for rc in &right.columns {
                    if !lc.ty.compatible_with(rc.ty) {
                        continue;
                    }
                    let same_name = lc.name == rc.name;
                    let prefixed = lt.is_index_prefix(&lc.name) || right.is_index_prefix(&rc.name);
                    let score = (same_name as u32) * 2 + (prefixed as u32);
                    candidates.push(Candidate {
                        left_table: lt.name.clone(),
                        left_col: lc.name.clone(),
                        left_ty: lc.ty,
                        right_col: rc.name.clone(),
                        right_ty: rc.ty,
                        score,
                    });
                }
            }
        }
        if candidates.is_empty() {
            return None;
        }

        let best = candidates.iter().map(|c| c.score).max().unwrap_or(0);
        let prefer_best = best > 0 && {
            let p = self.config().weights.index_prefix_prob;
            self.chance(p)
        };
        let pool: Vec<&Candidate> = if prefer_best {
            candidates.iter().filter(|c| c.score == best).collect()
        } else {
            candidates.iter().collect()
        };
        let idx = self.rng().gen_range(0..pool.len());
        let c = pool[idx];
        Some((
            Expr::column(&c.left_table, &c.left_col, c.left_ty),
            Expr::column(&right.name, &c.right_col, c.right_ty),
        ))
    }

    /// A USING candidate: a column name occurring exactly once across ALL
    /// columns of the left side (not merely join columns) that matches a
    /// compatible column on the right.
    pub(crate) fn using_candidate(&mut self, left_tables: &[&Table], right: &Table) -> Option<String> {
        let candidates: Vec<String> = right
            .columns
            .iter()
            .filter_map(|rc| {
                let occurrences: Vec<_> = left_tables
                    .iter()
                    .flat_map(|lt| lt.columns.iter())
                    .filter(|lc| lc.name == rc.name)
                    .collect();
                match occurrences.as_slice() {
                    [only] if only.ty.compatible_with(rc.ty) => Some(rc.name.clone()),
                    _ => None,
                }
            })
            .collect();
        self.pick(&candidates).cloned()
    }

    /// NATURAL is allowed only when the common column set is well-defined:
    /// at least one shared name, and no shared name duplicated on the left.
    pub(crate) fn natural_join_allowed(left_tables: &[&Table], right: &Table) -> bool {
        let mut any_common = false;
        for rc in &right.columns {
            let count = left_tables
                .iter()
                .flat_map(|lt| lt.columns.iter())
                .filter(|lc| lc.name == rc.name)
                .count();
            if count > 1 {
                return false;
            }
            if count == 1 {
                let compatible = left_tables
                    .iter()
                    .flat_map(|lt| lt.columns.iter())
                    .any(|lc| lc.name == rc.name && lc.ty.compatible_with(rc.ty));
                if !compatible {
                    return false;
                }
                any_common = true;
            }
        }
        any_common
    }

    /// Builds a FROM clause over `tables` in order; `tables[0]` is the base.
    pub(crate) fn build_from_clause(&mut self, tables: &[Table]) -> FromClause {
        let mut from = FromClause {
            base: TableRef::named(&tables[0].name),
            joins: Vec::new(),
        };
        let dsg = self.config().features.dsg && tables[0].name == "t0";

        for i in 1..tables.len() {
            let (left, right) = tables.split_at(i);
            let left_refs: Vec<&Table> = left.iter().collect();
            let right = &right[0];
            let join = if dsg {
                self.dsg_join(&tables[0], right)
            } else {
                self.generic_join(&left_refs, right)
            };
            from.joins.push(join);
        }
        from
    }

    /// Dimension join under data-star geometry: `t0.k0` pairs with the
    /// dimension's key column.
    fn dsg_join(&mut self, fact: &Table, dim: &Table) -> Join {
        let fact_key = fact.column_by_name("k0");
        let dim_key = dim
            .columns
            .iter()
            .find(|c| c.name.starts_with('k') && fact_key.is_some_and(|f| f.ty.compatible_with(c.ty)));
        let constraint = match (fact_key, dim_key) {
            (Some(f), Some(d)) => JoinConstraint::On(Expr::binary(
                Expr::column(&fact.name, &f.name, f.ty),
                BinOp::Eq,
                Expr::column(&dim.name, &d.name, d.ty),
            )),
            _ => JoinConstraint::None,
        };
        let join_type = if matches!(constraint, JoinConstraint::None) {
            JoinType::Cross
        } else {
            JoinType::Inner
        };
        Join {
            join_type,
            natural: false,
            table: TableRef::named(&dim.name),
            constraint,
        }
    }

    fn generic_join(&mut self, left: &[&Table], right: &Table) -> Join {
        let cross_p = self.config().weights.cross_join_prob;
        if self.chance(cross_p) {
            return Join {
                join_type: JoinType::Cross,
                natural: false,
                table: TableRef::named(&right.name),
                constraint: JoinConstraint::None,
            };
        }

        let join_type = *self
            .pick(&[JoinType::Inner, JoinType::Left, JoinType::Right])
            .expect("non-empty join type set");
        let using_p = self.config().effective_using_prob();

        if self.config().features.natural_joins
            && Self::natural_join_allowed(left, right)
            && self.chance(using_p / 2)
        {
            return Join {
                join_type,
                natural: true,
                table: TableRef::named(&right.name),
                constraint: JoinConstraint::None,
            };
        }

        if self.chance(using_p) {
            if let Some(column) = self.using_candidate(left, right) {
                return Join {
                    join_type,
                    natural: false,
                    table: TableRef::named(&right.name),
                    constraint: JoinConstraint::Using(vec![column]),
                };
            }
        }

        match self.pick_join_column_pair(left, right) {
            Some((lhs, rhs)) => {
                let mut on = Expr::binary(lhs, BinOp::Eq, rhs);
                if self.config().oracles.join_on_policy == JoinOnPolicy::Complex && self.chance(50) {
                    if let Some((l2, r2)) = self.pick_join_column_pair(left, right) {
                        let op = *self
                            .pick(BinOp::COMPARISONS)
                            .expect("non-empty comparison set");
                        on = Expr::and(on, Expr::binary(l2, op, r2));
                    }
                }
                Join {
                    join_type,
                    natural: false,
                    table: TableRef::named(&right.name),
                    constraint: JoinConstraint::On(on),
                }
            }
            // No compatible pair: fall back to a CROSS join.
            None => Join {
                join_type: JoinType::Cross,
                natural: false,
                table: TableRef::named(&right.name),
                constraint: JoinConstraint::None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::test_catalog;
    use crate::schema::{Column, ColumnType, MemoryCatalog, SchemaState};

    #[test]
    fn test_graph_adjacency() {
        let schema = test_catalog();
        let tables: Vec<&Table> = schema.tables().iter().collect();
        let graph = JoinGraph::build(tables);
        // All three test tables share numeric columns.
        assert_eq!(graph.degree(0), 2);
        assert_eq!(graph.neighbors_of(1), vec![0, 2]);
    }

    #[test]
    fn test_chain_respects_count() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 5);
        let tables: Vec<&Table> = schema.tables().iter().collect();
        let graph = JoinGraph::build(tables);
        let order = g.sample_chain(&graph, 2);
        assert_eq!(order.len(), 2);
        // Successive nodes neighbor each other.
        assert!(graph.adj[order[0]][order[1]]);
    }

    #[test]
    fn test_using_candidate_counts_all_columns() {
        let schema = MemoryCatalog::with_tables(vec![
            Table::new("a").with_columns(vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("k0", ColumnType::Int),
            ]),
            Table::new("b").with_columns(vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("k0", ColumnType::Int),
            ]),
            Table::new("c").with_columns(vec![Column::new("k0", ColumnType::Int)]),
        ]);
        let mut g = Generator::with_default_config(&schema, 5);
        let a = schema.table_by_name("a").unwrap();
        let b = schema.table_by_name("b").unwrap();
        let c = schema.table_by_name("c").unwrap();
        // Left side {a}: both id and k0 occur once.
        assert!(g.using_candidate(&[a], b).is_some());
        // Left side {a, b}: k0 occurs twice across all columns.
        assert_eq!(g.using_candidate(&[a, b], c), None);
    }

    #[test]
    fn test_natural_rejects_duplicated_left_names() {
        let schema = test_catalog();
        let a = schema.table_by_name("t0").unwrap();
        let b = schema.table_by_name("t1").unwrap();
        let c = schema.table_by_name("t2").unwrap();
        assert!(Generator::natural_join_allowed(&[a], b));
        // id appears in both t0 and t1.
        assert!(!Generator::natural_join_allowed(&[a, b], c));
    }

    #[test]
    fn test_dsg_places_t0_first() {
        let schema = test_catalog();
        let mut cfg = crate::config::GeneratorConfig::default();
        cfg.features.dsg = true;
        let mut g = Generator::new(&schema, 5, cfg);
        for _ in 0..10 {
            let names = g.pick_table_names();
            assert_eq!(names[0], "t0");
        }
    }

    #[test]
    fn test_pick_tables_bounded() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 9);
        for _ in 0..20 {
            let names = g.pick_table_names();
            assert!(!names.is_empty());
            assert!(names.len() <= g.config().max_join_tables);
        }
    }
}
