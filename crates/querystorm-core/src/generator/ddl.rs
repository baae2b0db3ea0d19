//! Schema DDL emitters and name sequencers.

use rand::Rng;

use super::Generator;
use crate::ast::{BinOp, Expr, SqlBuilder};
use crate::schema::{Column, ColumnType, Table};

const COLUMN_TYPES: &[ColumnType] = &[
    ColumnType::Int,
    ColumnType::BigInt,
    ColumnType::Float,
    ColumnType::Double,
    ColumnType::Decimal,
    ColumnType::Varchar,
    ColumnType::Date,
    ColumnType::Datetime,
    ColumnType::Timestamp,
    ColumnType::Bool,
];

impl Generator<'_> {
    /// `t<N>`, monotonically increasing.
    pub fn next_table_name(&mut self) -> String {
        let n = self.stats().table_seq;
        self.stats_mut().table_seq += 1;
        format!("t{n}")
    }

    /// `v<N>`, monotonically increasing.
    pub fn next_view_name(&mut self) -> String {
        let n = self.stats().view_seq;
        self.stats_mut().view_seq += 1;
        format!("v{n}")
    }

    /// `idx<N>`, monotonically increasing.
    pub fn next_index_name(&mut self) -> String {
        let n = self.stats().index_seq;
        self.stats_mut().index_seq += 1;
        format!("idx{n}")
    }

    /// `constr<N>`, monotonically increasing.
    pub fn next_constraint_name(&mut self) -> String {
        let n = self.stats().constraint_seq;
        self.stats_mut().constraint_seq += 1;
        format!("constr{n}")
    }

    /// A fresh random table definition: a `BIGINT id` plus up to
    /// `max_columns` typed columns, optionally hash-partitioned.
    pub fn generate_table(&mut self) -> Table {
        let name = self.next_table_name();
        let mut columns = vec![Column::new("id", ColumnType::BigInt).indexed()];
        let max = self.config().max_columns.max(1);
        let count = self.rng().gen_range(1..=max);
        for i in 0..count {
            let ty = *self.pick(COLUMN_TYPES).expect("non-empty type set");
            let mut column = Column::new(format!("c{i}"), ty);
            if self.chance(30) {
                column.nullable = true;
            }
            if self.chance(40) {
                column.indexed = true;
            }
            columns.push(column);
        }

        let mut table = Table::new(name).with_columns(columns);
        let partition_p = self.config().weights.partition_prob;
        if self.config().features.partition_tables && self.chance(partition_p) {
            table.partitioned = true;
            table.partition_count = self.rng().gen_range(2..=8);
        }
        table
    }

    /// Renders the CREATE TABLE statement: columns, `PRIMARY KEY (id)`,
    /// one `INDEX idx_<col>` per indexed column, and the optional hash
    /// partitioning clause.
    pub fn create_table_sql(&self, table: &Table) -> String {
        let mut parts: Vec<String> = Vec::new();
        for column in &table.columns {
            let nullability = if column.nullable { "" } else { " NOT NULL" };
            parts.push(format!("{} {}{nullability}", column.name, column.ty.sql_name()));
        }
        parts.push("PRIMARY KEY (id)".to_string());
        for column in &table.columns {
            if column.indexed && column.name != "id" {
                parts.push(format!("INDEX idx_{0} ({0})", column.name));
            }
        }
        for index in &table.indexes {
            parts.push(format!("INDEX {} ({})", index.name, index.columns.join(", ")));
        }

        let mut sql = format!("CREATE TABLE {} ({})", table.name, parts.join(", "));
        if table.partitioned && table.partition_count > 0 {
            sql.push_str(&format!(
                " PARTITION BY HASH(id) PARTITIONS {}",
                table.partition_count
            ));
        }
        sql.push(';');
        sql
    }

    /// ALTER TABLE adding a foreign key from a compatible child column to
    /// the parent's id. Returns `None` when no column fits.
    pub fn add_foreign_key_sql(&mut self, child: &Table, parent: &Table) -> Option<String> {
        let parent_id = parent.column_by_name("id")?;
        let candidates: Vec<&Column> = child
            .columns
            .iter()
            .filter(|c| c.name != "id" && c.ty.compatible_with(parent_id.ty))
            .collect();
        let column = *self.pick(&candidates)?;
        let name = self.next_constraint_name();
        Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {name} FOREIGN KEY ({}) REFERENCES {} (id);",
            child.name, column.name, parent.name
        ))
    }

    /// ALTER TABLE adding a CHECK on a numeric column.
    pub fn add_check_constraint_sql(&mut self, table: &Table) -> Option<String> {
        let numerics: Vec<&Column> = table
            .columns
            .iter()
            .filter(|c| c.ty.is_numeric() && c.name != "id")
            .collect();
        let column = *self.pick(&numerics)?;
        let bound = self.literal_for_type(column.ty);
        let check = Expr::binary(
            Expr::unqualified(&column.name, column.ty),
            BinOp::GtEq,
            Expr::lit(bound),
        );
        let name = self.next_constraint_name();

        let mut b = SqlBuilder::new();
        b.push("ALTER TABLE ");
        b.push(&table.name);
        b.push(" ADD CONSTRAINT ");
        b.push(&name);
        b.push(" CHECK ");
        check.emit(&mut b);
        b.push(";");
        Some(b.finish().0)
    }

    /// CREATE INDEX over one to three distinct columns.
    pub fn create_index_sql(&mut self, table: &Table) -> Option<String> {
        if table.columns.is_empty() {
            return None;
        }
        let upper = table.columns.len().min(3);
        let count = self.rng().gen_range(1..=upper);
        let mut chosen: Vec<String> = Vec::new();
        for _ in 0..(count * 3) {
            let idx = self.rng().gen_range(0..table.columns.len());
            let name = table.columns[idx].name.clone();
            if !chosen.contains(&name) {
                chosen.push(name);
                if chosen.len() == count {
                    break;
                }
            }
        }
        let name = self.next_index_name();
        Some(format!(
            "CREATE INDEX {name} ON {} ({});",
            table.name,
            chosen.join(", ")
        ))
    }

    /// CREATE VIEW over a freshly generated SELECT. The CTE feature is
    /// turned off for the body (a view body is an inline context where
    /// `WITH` must not appear) and item aliases are made unique. Returns
    /// the statement plus the published view table.
    pub fn create_view_sql(&mut self) -> Option<(String, Table)> {
        let saved_cte = self.config().features.cte;
        let saved_recursive = self.config().features.recursive_cte;
        self.config_mut().features.cte = false;
        self.config_mut().features.recursive_cte = false;
        let generated = self.generate_select_query();
        self.config_mut().features.cte = saved_cte;
        self.config_mut().features.recursive_cte = saved_recursive;

        let mut query = generated?;
        for (i, item) in query.items.iter_mut().enumerate() {
            if item.alias.is_empty() {
                item.alias = match &item.expr {
                    Expr::Column(c) => c.name.clone(),
                    _ => format!("vc{i}"),
                };
            }
        }
        query.dedupe_item_aliases();

        let name = self.next_view_name();
        let columns: Vec<Column> = query
            .items
            .iter()
            .map(|item| Column::new(item.alias.clone(), item.published_type()))
            .collect();
        let mut view = Table::new(&name).with_columns(columns);
        view.is_view = true;

        let sql = format!("CREATE VIEW {name} AS {};", query.sql());
        Some((sql, view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::test_catalog;
    use crate::schema::SchemaState;

    #[test]
    fn test_name_sequencers_are_monotonic() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 101);
        assert_eq!(g.next_table_name(), "t0");
        assert_eq!(g.next_table_name(), "t1");
        assert_eq!(g.next_view_name(), "v0");
        assert_eq!(g.next_constraint_name(), "constr0");
        assert_eq!(g.next_constraint_name(), "constr1");
        assert_eq!(g.next_index_name(), "idx0");
    }

    #[test]
    fn test_generate_table_shape() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 102);
        let table = g.generate_table();
        assert_eq!(table.columns[0].name, "id");
        assert_eq!(table.columns[0].ty, ColumnType::BigInt);
        assert!(table.columns.len() >= 2);
        assert!(table.columns.len() <= g.config().max_columns + 1);
    }

    #[test]
    fn test_create_table_sql_shape() {
        let schema = test_catalog();
        let g = Generator::with_default_config(&schema, 103);
        let mut table = Table::new("t9").with_columns(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("c0", ColumnType::Int).indexed(),
            Column::new("c1", ColumnType::Varchar).nullable(),
        ]);
        table.partitioned = true;
        table.partition_count = 4;
        let sql = g.create_table_sql(&table);
        assert_eq!(
            sql,
            "CREATE TABLE t9 (id BIGINT NOT NULL, c0 INT NOT NULL, c1 VARCHAR(64), \
             PRIMARY KEY (id), INDEX idx_c0 (c0)) PARTITION BY HASH(id) PARTITIONS 4;"
        );
    }

    #[test]
    fn test_foreign_key_sql() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 104);
        let child = schema.table_by_name("t1").unwrap();
        let parent = schema.table_by_name("t0").unwrap();
        let sql = g.add_foreign_key_sql(child, parent).unwrap();
        assert!(sql.starts_with("ALTER TABLE t1 ADD CONSTRAINT constr0 FOREIGN KEY ("));
        assert!(sql.ends_with("REFERENCES t0 (id);"));
    }

    #[test]
    fn test_view_body_never_carries_with() {
        let schema = test_catalog();
        let mut cfg = crate::config::GeneratorConfig::default();
        cfg.weights.template_prob = 0;
        let mut g = Generator::new(&schema, 105, cfg);
        let mut seen = 0;
        for _ in 0..20 {
            if let Some((sql, view)) = g.create_view_sql() {
                seen += 1;
                assert!(!sql.contains("WITH "), "view body has WITH: {sql}");
                assert!(view.is_view);
                assert!(!view.columns.is_empty());
            }
        }
        assert!(seen > 0);
        // The CTE feature is restored afterwards.
        assert!(g.config().features.cte);
    }

    #[test]
    fn test_check_constraint_sql() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 106);
        let table = schema.table_by_name("t2").unwrap();
        let sql = g.add_check_constraint_sql(table).unwrap();
        assert!(sql.starts_with("ALTER TABLE t2 ADD CONSTRAINT constr0 CHECK ("));
        assert!(sql.ends_with(");"));
    }
}
