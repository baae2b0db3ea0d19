//! The randomized query generator.
//!
//! A [`Generator`] owns a seeded PRNG, the effective configuration, and read
//! access to external schema state. It is single-threaded and non-blocking:
//! no operation suspends or performs I/O, recursion is bounded by the
//! configured depths, and a fixed (seed, config, schema) triple reproduces
//! the exact sequence of generated queries. Callers that want parallelism
//! instantiate N generators with disjoint seeds.

pub mod builder;
pub mod ddl;
pub mod dml;
pub mod plancache;
pub mod predicate;
pub mod scalar;
pub mod select;
pub mod setops;
pub mod subquery;
pub mod tables;
pub mod templates;
pub mod window;

pub use builder::{reason_codes, SelectQueryBuilder};
pub use plancache::PreparedQuery;

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::GeneratorConfig;
use crate::schema::SchemaState;

/// Monotonic counters owned by one generator.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStats {
    pub table_seq: u64,
    pub view_seq: u64,
    pub index_seq: u64,
    pub constraint_seq: u64,
    /// Comparable pairs produced for the current query.
    pub predicate_pairs_total: u64,
    /// Comparable pairs that came from a join-graph edge.
    pub predicate_pairs_join: u64,
    pub subquery_attempts: u64,
    pub subquery_built: u64,
    pub subquery_failed: u64,
}

/// External biased-random-walk source for multi-table join paths. The RNG
/// is passed explicitly so the walker stays free of hidden state.
pub trait TqsWalker {
    fn walk_tables(&mut self, rng: &mut StdRng, length: usize, gamma: f64) -> Vec<String>;

    fn record_path(&mut self, path: &[String]);
}

/// The query generator.
pub struct Generator<'a> {
    schema: &'a dyn SchemaState,
    cfg: GeneratorConfig,
    rng: StdRng,
    stats: GeneratorStats,
    /// Bounded per-column bag of dates harvested from INSERTs, keyed
    /// `table.column`.
    date_samples: HashMap<String, Vec<chrono::NaiveDate>>,
    tqs_walker: Option<Box<dyn TqsWalker>>,
    /// Reason label overriding the config-derived subquery disallow reason,
    /// set by the constrained builder for the scope of one build.
    pub(crate) subquery_ban_label: Option<String>,
}

impl<'a> Generator<'a> {
    /// A generator over `schema` with the given seed and configuration.
    pub fn new(schema: &'a dyn SchemaState, seed: u64, cfg: GeneratorConfig) -> Self {
        Self {
            schema,
            cfg,
            rng: StdRng::seed_from_u64(seed),
            stats: GeneratorStats::default(),
            date_samples: HashMap::new(),
            tqs_walker: None,
            subquery_ban_label: None,
        }
    }

    pub fn with_default_config(schema: &'a dyn SchemaState, seed: u64) -> Self {
        Self::new(schema, seed, GeneratorConfig::default())
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.cfg
    }

    pub(crate) fn config_mut(&mut self) -> &mut GeneratorConfig {
        &mut self.cfg
    }

    /// Schema access with the full borrow lifetime, so table references can
    /// outlive later mutable borrows of the generator.
    pub(crate) fn schema(&self) -> &'a dyn SchemaState {
        self.schema
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut GeneratorStats {
        &mut self.stats
    }

    /// Installs the external TQS walker.
    pub fn set_tqs_walker(&mut self, walker: Box<dyn TqsWalker>) {
        self.tqs_walker = Some(walker);
    }

    pub(crate) fn take_tqs_walker(&mut self) -> Option<Box<dyn TqsWalker>> {
        self.tqs_walker.take()
    }

    pub(crate) fn put_tqs_walker(&mut self, walker: Box<dyn TqsWalker>) {
        self.tqs_walker = Some(walker);
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// One percentage roll: true with probability `percent`/100.
    pub(crate) fn chance(&mut self, percent: u32) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.rng.gen_range(0..100) < percent
    }

    /// Uniform pick from a slice.
    pub(crate) fn pick<'t, T>(&mut self, items: &'t [T]) -> Option<&'t T> {
        if items.is_empty() {
            None
        } else {
            let idx = self.rng.gen_range(0..items.len());
            Some(&items[idx])
        }
    }

    /// Uniform index pick.
    pub(crate) fn pick_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            None
        } else {
            Some(self.rng.gen_range(0..len))
        }
    }

    pub(crate) fn date_samples_for(&self, table: &str, column: &str) -> Option<&Vec<chrono::NaiveDate>> {
        self.date_samples.get(&format!("{table}.{column}"))
    }

    /// Records a harvested date, keeping the per-column bag bounded.
    pub(crate) fn record_date_sample(&mut self, table: &str, column: &str, date: chrono::NaiveDate) {
        let bag = self
            .date_samples
            .entry(format!("{table}.{column}"))
            .or_default();
        if bag.len() < 16 {
            bag.push(date);
        }
    }

    /// The deterministic label explaining why subqueries are disallowed,
    /// when they are. Order: an active builder ban wins, then the feature
    /// toggle, then the scalar-subquery flag.
    pub(crate) fn subquery_disallow_reason(&self) -> Option<String> {
        if let Some(label) = &self.subquery_ban_label {
            return Some(label.clone());
        }
        if !self.cfg.features.subqueries {
            return Some(reason_codes::CONFIG_SUBQUERIES_OFF.to_string());
        }
        if self.cfg.disallow_scalar_subquery {
            return Some(reason_codes::SCALAR_SUBQUERY_OFF.to_string());
        }
        None
    }

    /// Effective subquery permission for the current configuration.
    pub(crate) fn subqueries_allowed(&self) -> bool {
        self.cfg.features.subqueries
            && !self.cfg.disallow_scalar_subquery
            && self.subquery_ban_label.is_none()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, MemoryCatalog, Table};

    pub(crate) fn test_catalog() -> MemoryCatalog {
        MemoryCatalog::with_tables(vec![
            Table::new("t0").with_columns(vec![
                Column::new("id", ColumnType::BigInt).indexed(),
                Column::new("k0", ColumnType::Int).indexed(),
                Column::new("c0", ColumnType::Int),
                Column::new("c1", ColumnType::Varchar),
                Column::new("c2", ColumnType::Date),
            ]),
            Table::new("t1").with_columns(vec![
                Column::new("id", ColumnType::BigInt).indexed(),
                Column::new("k1", ColumnType::Int).indexed(),
                Column::new("c0", ColumnType::Int),
                Column::new("c1", ColumnType::Varchar),
            ]),
            Table::new("t2").with_columns(vec![
                Column::new("id", ColumnType::BigInt).indexed(),
                Column::new("k2", ColumnType::Int),
                Column::new("c3", ColumnType::Decimal),
                Column::new("c4", ColumnType::Datetime),
            ]),
        ])
    }

    #[test]
    fn test_same_seed_reproduces() {
        let schema = test_catalog();
        let mut a = Generator::with_default_config(&schema, 7);
        let mut b = Generator::with_default_config(&schema, 7);
        for _ in 0..10 {
            let qa = a.generate_select_query().map(|q| q.sql());
            let qb = b.generate_select_query().map(|q| q.sql());
            assert_eq!(qa, qb);
        }
    }

    #[test]
    fn test_different_seed_diverges() {
        let schema = test_catalog();
        let mut a = Generator::with_default_config(&schema, 7);
        let mut b = Generator::with_default_config(&schema, 8);
        let qa: Vec<_> = (0..10)
            .filter_map(|_| a.generate_select_query().map(|q| q.sql()))
            .collect();
        let qb: Vec<_> = (0..10)
            .filter_map(|_| b.generate_select_query().map(|q| q.sql()))
            .collect();
        assert_ne!(qa, qb);
    }

    #[test]
    fn test_chance_extremes() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 1);
        assert!(!g.chance(0));
        assert!(g.chance(100));
    }

    #[test]
    fn test_date_sample_bag_is_bounded() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 1);
        for day in 1..=31 {
            let date = chrono::NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            g.record_date_sample("t0", "c2", date);
        }
        assert_eq!(g.date_samples_for("t0", "c2").unwrap().len(), 16);
    }
}
