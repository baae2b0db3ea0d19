use querystorm_core::{Column, ColumnType, MemoryCatalog, Table};

/// The scenario schema: `t0(id BIGINT, c0 INT, c1 VARCHAR, c2 DATE)` plus
/// two join partners sharing an INT key.
pub fn scenario_catalog() -> MemoryCatalog {
    MemoryCatalog::with_tables(vec![
        Table::new("t0").with_columns(vec![
            Column::new("id", ColumnType::BigInt).indexed(),
            Column::new("c0", ColumnType::Int),
            Column::new("c1", ColumnType::Varchar),
            Column::new("c2", ColumnType::Date),
        ]),
        Table::new("t1").with_columns(vec![
            Column::new("id", ColumnType::BigInt).indexed(),
            Column::new("k0", ColumnType::Int).indexed(),
            Column::new("c0", ColumnType::Int),
        ]),
        Table::new("t2").with_columns(vec![
            Column::new("id", ColumnType::BigInt).indexed(),
            Column::new("k0", ColumnType::Int),
            Column::new("c3", ColumnType::Decimal),
        ]),
    ])
}

/// Three tables all carrying `k0 INT`, for the join-scope scenarios.
#[allow(dead_code)]
pub fn shared_key_catalog() -> MemoryCatalog {
    let shared = |name: &str| {
        Table::new(name).with_columns(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("k0", ColumnType::Int),
        ])
    };
    MemoryCatalog::with_tables(vec![shared("t0"), shared("t1"), shared("t2")])
}
