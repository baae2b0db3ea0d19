#![no_main]

use libfuzzer_sys::fuzz_target;
use querystorm_core::{
    validate_query_scope, Column, ColumnType, Generator, MemoryCatalog, Table,
};

fn catalog() -> MemoryCatalog {
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
            Column::new("k1", ColumnType::Int),
            Column::new("c0", ColumnType::Decimal),
        ]),
        Table::new("t2").with_columns(vec![
            Column::new("id", ColumnType::BigInt),
            Column::new("c4", ColumnType::Datetime),
            Column::new("c5", ColumnType::Bool),
        ]),
    ])
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let seed = u64::from_le_bytes(data[..8].try_into().unwrap());
    let schema = catalog();
    let mut generator = Generator::with_default_config(&schema, seed);
    for _ in 0..4 {
        if let Some(query) = generator.generate_select_query() {
            assert!(validate_query_scope(&query, &schema));
            let (first, _) = query.build();
            let (second, _) = query.build();
            assert_eq!(first, second);
        }
    }
});
