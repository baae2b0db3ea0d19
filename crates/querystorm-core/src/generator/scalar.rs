//! Typed literal and scalar expression synthesis.

use chrono::{Datelike, NaiveDate};
use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, Value};
use crate::schema::{ColumnType, Table, TypeCategory};

const VARCHAR_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

impl Generator<'_> {
    /// A literal value satisfying `ty`. Dates format as `YYYY-MM-DD`,
    /// timestamps as `YYYY-MM-DD HH:MM:SS`, booleans as `0`/`1`.
    pub(crate) fn literal_for_type(&mut self, ty: ColumnType) -> Value {
        match ty {
            ColumnType::Int => Value::Int(self.rng().gen_range(-100..1000)),
            ColumnType::BigInt => Value::BigInt(self.rng().gen_range(0..100_000)),
            ColumnType::Float | ColumnType::Double => {
                let cents = self.rng().gen_range(0..1_000_000);
                Value::Float(cents as f64 / 100.0)
            }
            ColumnType::Decimal => {
                let whole = self.rng().gen_range(0..10_000);
                let frac = self.rng().gen_range(0..100);
                Value::Decimal(format!("{whole}.{frac:02}"))
            }
            ColumnType::Varchar => {
                let len = self.rng().gen_range(1..=8);
                let s: String = (0..len)
                    .map(|_| {
                        let i = self.rng().gen_range(0..VARCHAR_ALPHABET.len());
                        VARCHAR_ALPHABET[i] as char
                    })
                    .collect();
                Value::Str(s)
            }
            ColumnType::Date => Value::Str(self.random_date().format("%Y-%m-%d").to_string()),
            ColumnType::Datetime | ColumnType::Timestamp => {
                let date = self.random_date();
                let h = self.rng().gen_range(0..24);
                let m = self.rng().gen_range(0..60);
                let s = self.rng().gen_range(0..60);
                Value::Str(format!("{} {h:02}:{m:02}:{s:02}", date.format("%Y-%m-%d")))
            }
            ColumnType::Bool => Value::Bool(self.rng().gen_bool(0.5)),
        }
    }

    /// A date literal for `column` of `table`, reusing harvested INSERT
    /// samples when the bag has any.
    pub(crate) fn date_literal_for_column(&mut self, table: &str, column: &str) -> Value {
        let len = self
            .date_samples_for(table, column)
            .map(Vec::len)
            .unwrap_or(0);
        if len > 0 {
            let idx = self.rng().gen_range(0..len);
            let date = self.date_samples_for(table, column).expect("bag exists")[idx];
            return Value::Str(date.format("%Y-%m-%d").to_string());
        }
        self.literal_for_type(ColumnType::Date)
    }

    pub(crate) fn random_date(&mut self) -> NaiveDate {
        let year = self.rng().gen_range(2018..=2024);
        let month = self.rng().gen_range(1..=12);
        let day = self.rng().gen_range(1..=28);
        NaiveDate::from_ymd_opt(year, month, day).expect("day <= 28 is valid in every month")
    }

    /// A typed literal matched to `column`, preferring harvested date
    /// samples for temporal columns.
    pub(crate) fn literal_for_column(&mut self, table: &Table, column_name: &str) -> Value {
        let Some(column) = table.column_by_name(column_name) else {
            return Value::Null;
        };
        if column.ty == ColumnType::Date {
            return self.date_literal_for_column(&table.name, column_name);
        }
        self.literal_for_type(column.ty)
    }

    /// A random qualified column expression over `tables`.
    pub(crate) fn random_column_expr(&mut self, tables: &[&Table]) -> Option<Expr> {
        let table = *self.pick(tables)?;
        let idx = self.pick_index(table.columns.len())?;
        let column = &table.columns[idx];
        Some(Expr::column(&table.name, &column.name, column.ty))
    }

    /// A random numeric column over `tables`.
    pub(crate) fn random_numeric_column(&mut self, tables: &[&Table]) -> Option<Expr> {
        let candidates: Vec<(usize, usize)> = tables
            .iter()
            .enumerate()
            .flat_map(|(ti, t)| {
                t.columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.ty.is_numeric())
                    .map(move |(ci, _)| (ti, ci))
            })
            .collect();
        let (ti, ci) = *self.pick(&candidates)?;
        let table = tables[ti];
        let column = &table.columns[ci];
        Some(Expr::column(&table.name, &column.name, column.ty))
    }

    /// A scalar expression tree with bounded depth, sampled uniformly over
    /// literal, column, binary arithmetic, function call and (when allowed)
    /// scalar subquery.
    pub(crate) fn generate_scalar_expr(
        &mut self,
        tables: &[&Table],
        depth: usize,
        allow_subquery: bool,
        subq_depth: usize,
    ) -> Expr {
        let arms = if allow_subquery && subq_depth > 0 { 6 } else { 5 };
        let roll = if depth == 0 {
            // Leaves only.
            self.rng().gen_range(0..2)
        } else {
            self.rng().gen_range(0..arms)
        };
        match roll {
            0 => {
                let ty = self
                    .random_column_expr(tables)
                    .and_then(|e| e.inferred_type())
                    .unwrap_or(ColumnType::Int);
                Expr::lit(self.literal_for_type(ty))
            }
            1 => self
                .random_column_expr(tables)
                .unwrap_or(Expr::lit(Value::Int(1))),
            2 => {
                let left = self
                    .random_numeric_column(tables)
                    .unwrap_or(Expr::lit(Value::Int(1)));
                let right = self.generate_scalar_expr(tables, depth - 1, false, 0);
                let right = if right.inferred_type().is_some_and(|t| t.is_numeric()) {
                    right
                } else {
                    Expr::lit(self.literal_for_type(ColumnType::Int))
                };
                let op = *self
                    .pick(&[BinOp::Add, BinOp::Sub, BinOp::Mul])
                    .expect("non-empty operator set");
                Expr::binary(left, op, right)
            }
            3 => self.scalar_function_call(tables, depth),
            4 => self.case_expression(tables, depth),
            _ => {
                // Scalar-expression synthesis mixes the attempt counter in.
                self.stats_mut().subquery_attempts += 1;
                match self.generate_subquery(tables, subq_depth) {
                    Some(query) => Expr::Subquery(Box::new(query)),
                    None => Expr::lit(Value::Int(1)),
                }
            }
        }
    }

    /// `CASE WHEN <comparison> THEN <lit> [ELSE <lit>] END` with branches
    /// of one shared type.
    fn case_expression(&mut self, tables: &[&Table], depth: usize) -> Expr {
        let condition = self.simple_predicate(tables);
        let ty = self
            .random_column_expr(tables)
            .and_then(|e| e.inferred_type())
            .unwrap_or(ColumnType::Int);
        let then = Expr::lit(self.literal_for_type(ty));
        let else_expr = if self.chance(70) {
            Some(Box::new(Expr::lit(self.literal_for_type(ty))))
        } else {
            None
        };
        let mut whens = vec![(condition, then)];
        if depth > 1 && self.chance(30) {
            let extra = self.simple_predicate(tables);
            whens.push((extra, Expr::lit(self.literal_for_type(ty))));
        }
        Expr::Case { whens, else_expr }
    }

    fn scalar_function_call(&mut self, tables: &[&Table], depth: usize) -> Expr {
        let column = self.random_column_expr(tables);
        let (is_numeric, is_string) = column
            .as_ref()
            .and_then(|e| e.inferred_type())
            .map(|t| {
                (
                    t.category() == TypeCategory::Numeric,
                    t.category() == TypeCategory::String,
                )
            })
            .unwrap_or((false, false));

        if let Some(column) = column {
            if is_numeric {
                let name = *self
                    .pick(&["ABS", "FLOOR", "CEIL", "ROUND"])
                    .expect("non-empty function set");
                return Expr::func(name, vec![column]);
            }
            if is_string {
                let name = *self
                    .pick(&["UPPER", "LOWER", "LENGTH"])
                    .expect("non-empty function set");
                return Expr::func(name, vec![column]);
            }
            let fallback = if depth > 0 {
                self.generate_scalar_expr(tables, depth - 1, false, 0)
            } else {
                Expr::lit(Value::Int(0))
            };
            return Expr::func("COALESCE", vec![column, fallback]);
        }
        Expr::func("ABS", vec![Expr::lit(Value::Int(-1))])
    }
}

/// Days in the month of `date`, used by bounded date mutation.
pub(crate) fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|n| n.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
