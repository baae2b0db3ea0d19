//! Window function generation and WINDOW-clause hoisting.

use rand::Rng;

use super::Generator;
use crate::ast::{
    Expr, FrameBound, FrameUnit, SelectQuery, WindowDef, WindowFrame, WindowFunc, WindowSpec,
};
use crate::schema::{ColumnType, Table};

const WINDOW_FUNCTIONS: &[&str] = &["ROW_NUMBER", "RANK", "DENSE_RANK", "SUM", "AVG"];

impl Generator<'_> {
    /// One window function expression over `tables`, or `None` when the
    /// tables cannot supply the needed columns.
    pub(crate) fn generate_window_expr(&mut self, tables: &[&Table]) -> Option<Expr> {
        let name = (*self.pick(WINDOW_FUNCTIONS)?).to_string();

        let args = if matches!(name.as_str(), "SUM" | "AVG") {
            vec![self.windowed_aggregate_argument(tables)?]
        } else {
            Vec::new()
        };

        let mut used: Vec<String> = Vec::new();
        let mut partition_by = Vec::new();
        for _ in 0..self.rng().gen_range(0..=2u32) {
            if let Some(column) = self.distinct_column(tables, &mut used) {
                partition_by.push(column);
            }
        }
        let mut order_by = Vec::new();
        for _ in 0..self.rng().gen_range(1..=2u32) {
            if let Some(column) = self.distinct_column(tables, &mut used) {
                order_by.push(column);
            }
        }
        if order_by.is_empty() {
            let column = self.random_column_expr(tables)?;
            order_by.push(column);
        }

        let frame = if self.chance(40) {
            Some(self.random_frame())
        } else {
            None
        };

        Some(Expr::Window(Box::new(WindowFunc {
            name,
            args,
            window_ref: None,
            spec: WindowSpec {
                partition_by,
                order_by,
                frame,
            },
        })))
    }

    /// Numeric argument for a windowed SUM/AVG, preferring DECIMAL and
    /// avoiding DOUBLE. Falls back with a warning when only doubles exist.
    fn windowed_aggregate_argument(&mut self, tables: &[&Table]) -> Option<Expr> {
        let mut decimals = Vec::new();
        let mut safe_numerics = Vec::new();
        let mut doubles = Vec::new();
        for table in tables {
            for column in &table.columns {
                if !column.ty.is_numeric() {
                    continue;
                }
                let expr = Expr::column(&table.name, &column.name, column.ty);
                match column.ty {
                    ColumnType::Decimal => decimals.push(expr),
                    ColumnType::Double | ColumnType::Float => doubles.push(expr),
                    _ => safe_numerics.push(expr),
                }
            }
        }

        let decimal_p = self.config().weights.decimal_agg_prob;
        if !decimals.is_empty() && self.chance(decimal_p) {
            return self.pick(&decimals).cloned();
        }
        if !safe_numerics.is_empty() {
            return self.pick(&safe_numerics).cloned();
        }
        if !decimals.is_empty() {
            return self.pick(&decimals).cloned();
        }
        if !doubles.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!("windowed aggregate falling back to a DOUBLE argument");
            return self.pick(&doubles).cloned();
        }
        None
    }

    fn distinct_column(&mut self, tables: &[&Table], used: &mut Vec<String>) -> Option<Expr> {
        for _ in 0..8 {
            let Some(expr) = self.random_column_expr(tables) else {
                return None;
            };
            if let Expr::Column(c) = &expr {
                let key = format!("{}.{}", c.table.as_deref().unwrap_or(""), c.name);
                if !used.contains(&key) {
                    used.push(key);
                    return Some(expr);
                }
            }
        }
        None
    }

    fn random_frame(&mut self) -> WindowFrame {
        let unit = if self.chance(50) {
            FrameUnit::Rows
        } else {
            FrameUnit::Range
        };
        match unit {
            FrameUnit::Rows => {
                let start = match self.rng().gen_range(0..3) {
                    0 => FrameBound::UnboundedPreceding,
                    1 => FrameBound::Preceding(self.rng().gen_range(1..=5)),
                    _ => FrameBound::CurrentRow,
                };
                let end = match self.rng().gen_range(0..3) {
                    0 => FrameBound::CurrentRow,
                    1 => FrameBound::Following(self.rng().gen_range(1..=5)),
                    _ => FrameBound::UnboundedFollowing,
                };
                WindowFrame {
                    unit,
                    start: Some(start),
                    end: Some(end),
                }
            }
            // RANGE frames stick to the unbounded/current bounds.
            FrameUnit::Range => WindowFrame {
                unit,
                start: Some(FrameBound::UnboundedPreceding),
                end: Some(FrameBound::CurrentRow),
            },
        }
    }

    /// Hoists inline window specs that appear more than once into shared
    /// `WINDOW w<N> AS (...)` definitions.
    pub(crate) fn hoist_shared_windows(&mut self, query: &mut SelectQuery) {
        let mut specs: Vec<(WindowSpec, usize)> = Vec::new();
        for item in &query.items {
            if let Expr::Window(w) = &item.expr {
                if w.window_ref.is_some() {
                    continue;
                }
                match specs.iter_mut().find(|(s, _)| *s == w.spec) {
                    Some((_, count)) => *count += 1,
                    None => specs.push((w.spec.clone(), 1)),
                }
            }
        }

        let shared: Vec<WindowSpec> = specs
            .into_iter()
            .filter(|(_, count)| *count >= 2)
            .map(|(spec, _)| spec)
            .collect();
        if shared.is_empty() {
            return;
        }

        for (i, spec) in shared.iter().enumerate() {
            let name = format!("w{}", query.window_defs.len() + i);
            query.window_defs.push(WindowDef {
                name,
                spec: spec.clone(),
            });
        }
        for item in &mut query.items {
            if let Expr::Window(w) = &mut item.expr {
                if w.window_ref.is_none() {
                    if let Some(def) = query.window_defs.iter().find(|d| d.spec == w.spec) {
                        w.window_ref = Some(def.name.clone());
                    }
                }
            }
        }
        query.invalidate_analysis();
    }
}
