//! DML emitters: INSERT, UPDATE, DELETE.

use std::fmt::Write;

use chrono::NaiveDate;
use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, SqlBuilder, Value};
use crate::schema::{ColumnType, Table};

impl Generator<'_> {
    /// Builds a multi-row INSERT. The primary `id` column advances the
    /// table's `next_id`; on FK-bearing child tables, rows whose id would
    /// exceed any parent's `next_id - 1` are skipped. Returns an empty
    /// string when every row was skipped.
    pub fn insert_sql(&mut self, table: &mut Table) -> String {
        let max_rows = self.config().insert_row_count_max.max(1);
        let rows = self.rng().gen_range(1..=max_rows);

        // The highest child id any parent can absorb.
        let parent_limit: Option<u64> = table
            .foreign_keys
            .iter()
            .filter_map(|fk| self.schema().table_by_name(&fk.parent_table))
            .map(|parent| parent.next_id.saturating_sub(1))
            .min();

        let column_names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let columns_meta: Vec<(String, ColumnType)> = table
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.ty))
            .collect();
        let table_name = table.name.clone();

        let mut rendered_rows: Vec<String> = Vec::new();
        for _ in 0..rows {
            let id = table.next_id;
            if let Some(limit) = parent_limit {
                if id > limit {
                    break;
                }
            }
            let mut row = String::from("(");
            for (i, (name, ty)) in columns_meta.iter().enumerate() {
                if i > 0 {
                    row.push_str(", ");
                }
                if name == "id" {
                    let _ = write!(row, "{id}");
                    continue;
                }
                let value = self.literal_for_type(*ty);
                if *ty == ColumnType::Date {
                    if let Value::Str(s) = &value {
                        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                            self.record_date_sample(&table_name, name, date);
                        }
                    }
                }
                value.write_inline(&mut row);
            }
            row.push(')');
            rendered_rows.push(row);
            table.next_id += 1;
        }

        if rendered_rows.is_empty() {
            return String::new();
        }
        format!(
            "INSERT INTO {table_name} ({}) VALUES {};",
            column_names.join(", "),
            rendered_rows.join(", ")
        )
    }

    /// Builds an UPDATE on a non-id, non-FK column: numeric columns advance
    /// by one, others receive a typed literal. Returns `None` when the
    /// table has no updatable column.
    pub fn update_sql(&mut self, table: &Table) -> Option<String> {
        let updatable: Vec<&crate::schema::Column> = table
            .columns
            .iter()
            .filter(|c| c.name != "id" && table.foreign_key_on(&c.name).is_none())
            .collect();
        let column = *self.pick(&updatable)?;

        let assignment = if column.ty.is_numeric() {
            Expr::binary(
                Expr::unqualified(&column.name, column.ty),
                BinOp::Add,
                Expr::lit(Value::Int(1)),
            )
        } else {
            Expr::lit(self.literal_for_column(table, &column.name))
        };

        let depth = self.config().max_depth;
        let subq_depth = self.config().max_subq_depth;
        let allow = self.subqueries_allowed();
        let predicate = self.generate_predicate(&[table], depth, allow, subq_depth);

        let mut b = SqlBuilder::new();
        b.push("UPDATE ");
        b.push(&table.name);
        b.push(" SET ");
        b.push(&column.name);
        b.push(" = ");
        assignment.emit(&mut b);
        b.push(" WHERE ");
        predicate.emit(&mut b);
        b.push(";");
        Some(b.finish().0)
    }

    /// Builds a WHERE-only DELETE.
    pub fn delete_sql(&mut self, table: &Table) -> String {
        let depth = self.config().max_depth;
        let subq_depth = self.config().max_subq_depth;
        let allow = self.subqueries_allowed();
        let predicate = self.generate_predicate(&[table], depth, allow, subq_depth);

        let mut b = SqlBuilder::new();
        b.push("DELETE FROM ");
        b.push(&table.name);
        b.push(" WHERE ");
        predicate.emit(&mut b);
        b.push(";");
        b.finish().0
    }
}
