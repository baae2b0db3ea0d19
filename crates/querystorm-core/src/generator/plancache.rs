//! Prepared-statement and plan-cache query builders.

use chrono::NaiveDate;
use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, SelectItem, SelectQuery, Value};
use crate::schema::{ColumnType, Table};

/// A parameterized query: SQL with `?` placeholders, the bind arguments,
/// and their tracked types for per-argument mutation.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub sql: String,
    pub args: Vec<Value>,
    pub arg_types: Vec<ColumnType>,
}

impl<'a> Generator<'a> {
    fn prepared_candidates(&self, allow_views: bool, allow_partitioned: bool) -> Vec<&'a Table> {
        self.schema()
            .tables()
            .iter()
            .filter(|t| (allow_views || !t.is_view) && (allow_partitioned || !t.partitioned))
            .filter(|t| !t.columns.is_empty())
            .collect()
    }

    /// A prepared single-table query with parameterized comparisons. The
    /// argument count never exceeds `max_prepared_params`.
    pub fn generate_prepared_query(&mut self) -> Option<PreparedQuery> {
        let allow_views = !self.config().plan_cache_only;
        let table = {
            let candidates = self.prepared_candidates(allow_views, true);
            self.pick(&candidates).copied()?.clone()
        };
        let query = self.parameterized_query(&table, None)?;
        Some(query)
    }

    /// A prepared two-table join; both tables must share a compatible
    /// column pair.
    pub fn prepared_join_query(&mut self) -> Option<PreparedQuery> {
        let allow_views = !self.config().plan_cache_only;
        let (left, right) = {
            let candidates = self.prepared_candidates(allow_views, true);
            let mut pairs = Vec::new();
            for (i, a) in candidates.iter().enumerate() {
                for b in candidates.iter().skip(i + 1) {
                    if a.joinable_with(b) {
                        pairs.push(((*a).clone(), (*b).clone()));
                    }
                }
            }
            let idx = self.pick_index(pairs.len())?;
            pairs.swap_remove(idx)
        };
        self.parameterized_query(&left, Some(&right))
    }

    /// The non-prepared plan-cache variant: inline literals, and partitioned
    /// tables and views are refused.
    pub fn generate_plan_cache_query(&mut self) -> Option<String> {
        if !self.config().features.non_prepared_plan_cache {
            return None;
        }
        let table = {
            let candidates = self.prepared_candidates(false, false);
            self.pick(&candidates).copied()?.clone()
        };
        let mut query = SelectQuery::from_table(&table.name);
        query.items = self.prepared_items(&table);
        let predicate = self.simple_predicate(&[&table]);
        query.set_where(Some(predicate));
        Some(query.sql())
    }

    /// Mutates a previous argument into the next one with a bounded delta,
    /// keeping its type.
    pub fn next_arg_for_type(&mut self, ty: ColumnType, prev: &Value) -> Value {
        match (ty, prev) {
            (ColumnType::Int | ColumnType::BigInt, Value::Int(v)) => {
                Value::Int(v + self.rng().gen_range(-5..=5))
            }
            (ColumnType::Int | ColumnType::BigInt, Value::BigInt(v)) => {
                Value::BigInt(v + self.rng().gen_range(-5..=5))
            }
            (ColumnType::Float | ColumnType::Double, Value::Float(v)) => {
                let delta = self.rng().gen_range(-500..=500) as f64 / 100.0;
                Value::Float(v + delta)
            }
            (ColumnType::Date, Value::Str(s)) => {
                match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    Ok(date) => {
                        let delta = self.rng().gen_range(-3..=3);
                        let moved = date + chrono::Duration::days(delta);
                        Value::Str(moved.format("%Y-%m-%d").to_string())
                    }
                    Err(_) => self.literal_for_type(ty),
                }
            }
            (ColumnType::Bool, Value::Bool(v)) => Value::Bool(!v),
            _ => self.literal_for_type(ty),
        }
    }

    fn prepared_items(&mut self, table: &Table) -> Vec<SelectItem> {
        let count = self.rng().gen_range(1..=table.columns.len().min(3));
        let mut items = Vec::new();
        for _ in 0..count {
            let idx = self.rng().gen_range(0..table.columns.len());
            let column = &table.columns[idx];
            items.push(SelectItem::bare(Expr::column(
                &table.name,
                &column.name,
                column.ty,
            )));
        }
        items
    }

    fn parameterized_query(&mut self, table: &Table, joined: Option<&Table>) -> Option<PreparedQuery> {
        let mut query = SelectQuery::from_table(&table.name);
        query.items = self.prepared_items(table);

        if let Some(right) = joined {
            let (lhs, rhs) = self.pick_join_column_pair(&[table], right)?;
            query.from.joins.push(crate::ast::Join {
                join_type: crate::ast::JoinType::Inner,
                natural: false,
                table: crate::ast::TableRef::named(&right.name),
                constraint: crate::ast::JoinConstraint::On(Expr::binary(lhs, BinOp::Eq, rhs)),
            });
        }

        let max_params = self.config().max_prepared_params.max(1);
        let wanted = self.rng().gen_range(1..=3usize);
        let param_count = wanted.min(max_params);
        let mut arg_types = Vec::new();
        let mut predicate: Option<Expr> = None;
        for _ in 0..param_count {
            let idx = self.rng().gen_range(0..table.columns.len());
            let column = &table.columns[idx];
            let value = self.literal_for_type(column.ty);
            arg_types.push(column.ty);
            let comparison = Expr::binary(
                Expr::column(&table.name, &column.name, column.ty),
                *self
                    .pick(BinOp::COMPARISONS)
                    .expect("non-empty comparison set"),
                Expr::Param(value),
            );
            predicate = Some(match predicate {
                Some(p) => Expr::and(p, comparison),
                None => comparison,
            });
        }
        query.set_where(predicate);

        let (sql, args) = query.build();
        debug_assert!(args.len() <= max_params);
        Some(PreparedQuery {
            sql,
            args,
            arg_types,
        })
    }
}
