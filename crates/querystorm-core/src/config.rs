//! Generator configuration.
//!
//! The core accepts a flat, fully-owned configuration document; it never
//! reads configuration from disk. All types round-trip through serde
//! (camelCase) and publish a JSON schema so external tooling can validate
//! config files before handing them to the generator. Every toggle and
//! weight here maps to one construction path in the generator; flipping a
//! feature off skips the corresponding emission path entirely.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Run-time switch selecting predicate complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum PredicateMode {
    /// Full recursive predicate generation.
    #[default]
    Default,
    /// No WHERE clause at all.
    None,
    /// A single comparison, column vs. literal.
    Simple,
    /// A single comparison, column vs. column.
    SimpleColumns,
}

/// How JOIN ... ON predicates are composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinOnPolicy {
    /// Single equality on the picked column pair.
    #[default]
    Simple,
    /// Equality optionally extended with an extra AND-ed comparison.
    Complex,
}

/// Effective generator configuration.
///
/// The constrained builder mutates a snapshot of this struct for the scope
/// of one build and restores it afterwards; nothing else in the core writes
/// to it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    /// Upper bound on columns per generated table and items per SELECT list.
    pub max_columns: usize,
    /// Upper bound on tables participating in one FROM clause.
    pub max_join_tables: usize,
    /// Lower bound on tables participating in one FROM clause.
    pub min_join_tables: usize,
    /// Upper bound on rows per generated INSERT.
    pub insert_row_count_max: usize,
    /// Upper bound on `?` placeholders in prepared statements.
    pub max_prepared_params: usize,
    /// Maximum predicate/scalar recursion depth.
    pub max_depth: usize,
    /// Maximum subquery nesting depth.
    pub max_subq_depth: usize,
    /// Predicate complexity for WHERE generation.
    pub predicate_mode: PredicateMode,
    /// Disallow scalar subqueries even when the subquery feature is on.
    pub disallow_scalar_subquery: bool,
    /// Restrict prepared-candidate tables (skips views).
    pub plan_cache_only: bool,
    pub features: FeatureToggles,
    pub weights: FeatureWeights,
    pub oracles: OracleOptions,
    pub tqs: TqsOptions,
}

/// Booleans toggling whole construction paths.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureToggles {
    pub joins: bool,
    pub cte: bool,
    pub recursive_cte: bool,
    pub subqueries: bool,
    pub correlated_subqueries: bool,
    pub aggregates: bool,
    pub group_by: bool,
    pub having: bool,
    pub order_by: bool,
    pub limit: bool,
    pub distinct: bool,
    pub window_funcs: bool,
    pub partition_tables: bool,
    pub natural_joins: bool,
    pub full_join_emulation: bool,
    pub derived_tables: bool,
    pub set_operations: bool,
    pub not_in: bool,
    pub not_exists: bool,
    pub non_prepared_plan_cache: bool,
    /// Data-star geometry: `t0` is the fact table, dimensions join on
    /// `k0` <-> `k<i>` key pairs.
    pub dsg: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            joins: true,
            cte: true,
            recursive_cte: true,
            subqueries: true,
            correlated_subqueries: true,
            aggregates: true,
            group_by: true,
            having: true,
            order_by: true,
            limit: true,
            distinct: true,
            window_funcs: true,
            partition_tables: true,
            natural_joins: true,
            full_join_emulation: true,
            derived_tables: true,
            set_operations: true,
            not_in: true,
            not_exists: true,
            non_prepared_plan_cache: true,
            dsg: false,
        }
    }
}

/// Integer weights. Fields ending in `prob` or `weight` are percentages in
/// `0..=100`; `count` fields are unbounded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureWeights {
    /// Maximum joins appended after the base table.
    pub join_count: u32,
    /// Subquery budget feeding the subquery roll.
    pub subq_count: u32,
    /// Multiplier applied to `subq_count` in the subquery roll.
    pub subquery_scale: f64,
    pub agg_prob: u32,
    pub index_prefix_prob: u32,
    pub distinct_prob: u32,
    pub group_by_prob: u32,
    pub having_prob: u32,
    pub order_by_prob: u32,
    pub limit_prob: u32,
    pub window_prob: u32,
    /// Maximum CTEs prepended to one query.
    pub cte_count: u32,
    pub partition_prob: u32,
    /// Preference for DECIMAL arguments in windowed aggregates.
    pub decimal_agg_prob: u32,
    pub not_in_prob: u32,
    pub not_exists_prob: u32,
    pub exists_prob: u32,
    pub in_list_prob: u32,
    pub or_prob: u32,
    pub cross_join_prob: u32,
    /// Probability of entering the template path at all.
    pub template_prob: u32,
    pub template_join_only_weight: u32,
    pub template_join_filter_weight: u32,
    /// Template strategy weights.
    pub join_reorder_weight: u32,
    pub agg_pushdown_weight: u32,
    pub semi_anti_weight: u32,
    /// Join shape weights.
    pub chain_weight: u32,
    pub star_weight: u32,
    pub snowflake_weight: u32,
    /// Default probability of USING over ON when eligible; overridden by
    /// a non-negative [`OracleOptions::join_using_prob`].
    pub using_join_prob: u32,
    /// Wrap GROUP BY keys as select-list ordinals.
    pub group_by_ord_prob: u32,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            join_count: 3,
            subq_count: 2,
            subquery_scale: 1.0,
            agg_prob: 25,
            index_prefix_prob: 60,
            distinct_prob: 15,
            group_by_prob: 30,
            having_prob: 30,
            order_by_prob: 60,
            limit_prob: 40,
            window_prob: 15,
            cte_count: 2,
            partition_prob: 20,
            decimal_agg_prob: 60,
            not_in_prob: 30,
            not_exists_prob: 30,
            exists_prob: 50,
            in_list_prob: 20,
            or_prob: 30,
            cross_join_prob: 10,
            template_prob: 20,
            template_join_only_weight: 50,
            template_join_filter_weight: 50,
            join_reorder_weight: 40,
            agg_pushdown_weight: 30,
            semi_anti_weight: 30,
            chain_weight: 45,
            star_weight: 35,
            snowflake_weight: 20,
            using_join_prob: 30,
            group_by_ord_prob: 25,
        }
    }
}

/// Options affecting JOIN predicate composition for downstream oracles.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct OracleOptions {
    pub join_on_policy: JoinOnPolicy,
    /// Probability of USING over ON. Negative means "use
    /// [`FeatureWeights::using_join_prob`]".
    pub join_using_prob: i32,
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self {
            join_on_policy: JoinOnPolicy::Simple,
            join_using_prob: -1,
        }
    }
}

/// Template-query-shape walker activation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TqsOptions {
    pub enabled: bool,
    /// Fixed walk length; 0 samples from `walk_min..=walk_max`.
    pub walk_length: usize,
    pub walk_min: usize,
    pub walk_max: usize,
    pub gamma: f64,
}

impl Default for TqsOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            walk_length: 0,
            walk_min: 2,
            walk_max: 4,
            gamma: 0.5,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_columns: 8,
            max_join_tables: 4,
            min_join_tables: 1,
            insert_row_count_max: 10,
            max_prepared_params: 16,
            max_depth: 3,
            max_subq_depth: 2,
            predicate_mode: PredicateMode::Default,
            disallow_scalar_subquery: false,
            plan_cache_only: false,
            features: FeatureToggles::default(),
            weights: FeatureWeights::default(),
            oracles: OracleOptions::default(),
            tqs: TqsOptions::default(),
        }
    }
}

impl GeneratorConfig {
    /// Validates bounds and percentage weights.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("maxColumns", self.max_columns),
            ("maxJoinTables", self.max_join_tables),
            ("insertRowCountMax", self.insert_row_count_max),
            ("maxDepth", self.max_depth),
        ] {
            if value < 1 {
                return Err(ConfigError::BoundTooSmall {
                    name,
                    min: 1,
                    value,
                });
            }
        }

        let w = &self.weights;
        for (name, value) in [
            ("aggProb", w.agg_prob),
            ("indexPrefixProb", w.index_prefix_prob),
            ("distinctProb", w.distinct_prob),
            ("groupByProb", w.group_by_prob),
            ("havingProb", w.having_prob),
            ("orderByProb", w.order_by_prob),
            ("limitProb", w.limit_prob),
            ("windowProb", w.window_prob),
            ("partitionProb", w.partition_prob),
            ("decimalAggProb", w.decimal_agg_prob),
            ("notInProb", w.not_in_prob),
            ("notExistsProb", w.not_exists_prob),
            ("existsProb", w.exists_prob),
            ("inListProb", w.in_list_prob),
            ("orProb", w.or_prob),
            ("crossJoinProb", w.cross_join_prob),
            ("templateProb", w.template_prob),
            ("usingJoinProb", w.using_join_prob),
            ("groupByOrdProb", w.group_by_ord_prob),
        ] {
            if value > 100 {
                return Err(ConfigError::WeightOutOfRange { name, value });
            }
        }

        if self.tqs.walk_min > self.tqs.walk_max {
            return Err(ConfigError::InvertedWalkBounds {
                min: self.tqs.walk_min,
                max: self.tqs.walk_max,
            });
        }

        Ok(())
    }

    /// The effective USING-vs-ON probability, honoring the negative
    /// fallback on [`OracleOptions::join_using_prob`].
    pub fn effective_using_prob(&self) -> u32 {
        if self.oracles.join_using_prob < 0 {
            self.weights.using_join_prob
        } else {
            self.oracles.join_using_prob as u32
        }
    }
}
