//! Logical schema state consumed by the generator.
//!
//! The generator reads tables, columns, indexes and foreign keys through the
//! [`SchemaState`] trait; it never mutates schema state. [`MemoryCatalog`] is
//! the in-crate implementation used by DDL generation and by tests. The
//! external schema manager may provide its own implementation as long as it
//! guarantees a read-only snapshot for the duration of a generation call.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Semantic column type of the target dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Varchar,
    Date,
    Datetime,
    Timestamp,
    Bool,
}

/// Semantic bucket used for comparison and join compatibility.
///
/// Two column types are compatible iff they fall in the same category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TypeCategory {
    Numeric,
    String,
    Temporal,
    Bool,
    Other,
}

impl ColumnType {
    /// The category this type falls in for compatibility checks.
    pub fn category(&self) -> TypeCategory {
        match self {
            ColumnType::Int
            | ColumnType::BigInt
            | ColumnType::Float
            | ColumnType::Double
            | ColumnType::Decimal => TypeCategory::Numeric,
            ColumnType::Varchar => TypeCategory::String,
            ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp => {
                TypeCategory::Temporal
            }
            ColumnType::Bool => TypeCategory::Bool,
        }
    }

    /// Whether this type participates in arithmetic.
    pub fn is_numeric(&self) -> bool {
        self.category() == TypeCategory::Numeric
    }

    /// True when two types may be compared or joined directly.
    pub fn compatible_with(&self, other: ColumnType) -> bool {
        self.category() == other.category()
    }

    /// DDL type name for CREATE TABLE rendering.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Int => "INT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Decimal => "DECIMAL(12,4)",
            ColumnType::Varchar => "VARCHAR(64)",
            ColumnType::Date => "DATE",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Bool => "BOOL",
        }
    }
}

/// A column of a table, view or published CTE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    /// True when a single-column index covers this column.
    #[serde(default)]
    pub indexed: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            indexed: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// A composite index: ordered column names under an index name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

/// A foreign key from a child column to a parent table/column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub child_column: String,
    pub parent_table: String,
    pub parent_column: String,
}

/// A logical table. Base tables are named `t<N>`, views `v<N>`, published
/// CTEs `cte_<i>`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub partitioned: bool,
    #[serde(default)]
    pub partition_count: u32,
    /// Next primary-key id, strictly greater than any previously emitted id.
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub is_view: bool,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            partitioned: false,
            partition_count: 0,
            next_id: 1,
            is_view: false,
        }
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns whose type falls in `category`.
    pub fn columns_of_category(&self, category: TypeCategory) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.ty.category() == category)
            .collect()
    }

    /// Columns compatible with `ty`.
    pub fn columns_compatible_with(&self, ty: ColumnType) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.ty.compatible_with(ty))
            .collect()
    }

    /// True when `column` is the leading column of any composite index.
    pub fn is_index_prefix(&self, column: &str) -> bool {
        self.indexes
            .iter()
            .any(|idx| idx.columns.first().map(String::as_str) == Some(column))
        || self
            .column_by_name(column)
            .is_some_and(|c| c.indexed)
    }

    /// The foreign key on `column`, if one exists.
    pub fn foreign_key_on(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.child_column == column)
    }

    /// True when any column of this table is category-compatible with any
    /// column of `other`. Defines join-graph adjacency.
    pub fn joinable_with(&self, other: &Table) -> bool {
        self.columns.iter().any(|a| {
            other
                .columns
                .iter()
                .any(|b| a.ty.category() == b.ty.category())
        })
    }
}

/// Read access to the evolving schema. Implementations must behave as
/// read-only snapshots for the lifetime of a generation call.
pub trait SchemaState {
    fn tables(&self) -> &[Table];

    fn table_by_name(&self, name: &str) -> Option<&Table>;
}

/// In-memory schema catalog.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: Vec<Table>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// Adds a table, replacing any previous table of the same name.
    pub fn put_table(&mut self, table: Table) {
        if let Some(existing) = self.tables.iter_mut().find(|t| t.name == table.name) {
            *existing = table;
        } else {
            self.tables.push(table);
        }
    }

    pub fn remove_table(&mut self, name: &str) {
        self.tables.retain(|t| t.name != name);
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }
}

impl SchemaState for MemoryCatalog {
    fn tables(&self) -> &[Table] {
        &self.tables
    }

    fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::new("t0").with_columns(vec![
            Column::new("id", ColumnType::BigInt).indexed(),
            Column::new("c0", ColumnType::Int),
            Column::new("c1", ColumnType::Varchar).nullable(),
            Column::new("c2", ColumnType::Date),
        ])
    }

    #[test]
    fn test_type_categories() {
        assert_eq!(ColumnType::Decimal.category(), TypeCategory::Numeric);
        assert_eq!(ColumnType::Varchar.category(), TypeCategory::String);
        assert_eq!(ColumnType::Timestamp.category(), TypeCategory::Temporal);
        assert!(ColumnType::Int.compatible_with(ColumnType::Double));
        assert!(!ColumnType::Int.compatible_with(ColumnType::Date));
    }

    #[test]
    fn test_index_prefix_detection() {
        let mut t = sample_table();
        t.indexes.push(Index {
            name: "idx_c0_c1".into(),
            columns: vec!["c0".into(), "c1".into()],
        });
        assert!(t.is_index_prefix("c0"));
        assert!(t.is_index_prefix("id"));
        assert!(!t.is_index_prefix("c1"));
    }

    #[test]
    fn test_joinable_with() {
        let a = sample_table();
        let b = Table::new("t1").with_columns(vec![Column::new("k0", ColumnType::Int)]);
        let c = Table::new("t2").with_columns(vec![Column::new("b0", ColumnType::Bool)]);
        assert!(a.joinable_with(&b));
        assert!(!b.joinable_with(&c));
    }

    #[test]
    fn test_catalog_put_replaces() {
        let mut catalog = MemoryCatalog::new();
        catalog.put_table(sample_table());
        catalog.put_table(Table::new("t0").with_columns(vec![Column::new(
            "only",
            ColumnType::Int,
        )]));
        assert_eq!(catalog.tables().len(), 1);
        assert_eq!(catalog.table_by_name("t0").unwrap().columns.len(), 1);
    }
}
