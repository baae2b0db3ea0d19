//! Byte-exact emission snapshots for hand-built ASTs.

use insta::assert_snapshot;
use querystorm_core::{
    BinOp, ColumnType, Cte, Expr, FromClause, Join, JoinConstraint, JoinType, Quantifier,
    SelectItem, SelectQuery, SetOpBranch, SetOpType, TableRef, Value, With,
};

fn col(table: &str, name: &str) -> Expr {
    Expr::column(table, name, ColumnType::Int)
}

#[test]
fn snapshot_full_clause_ordering() {
    let mut q = SelectQuery::from_table("t0");
    q.from.joins.push(Join {
        join_type: JoinType::Inner,
        natural: false,
        table: TableRef::named("t1"),
        constraint: JoinConstraint::On(Expr::binary(
            col("t0", "k0"),
            BinOp::Eq,
            col("t1", "k0"),
        )),
    });
    q.items = vec![
        SelectItem::new(col("t0", "c0"), "c0"),
        SelectItem::new(Expr::count_one(), "cnt"),
    ];
    q.where_clause = Some(Expr::binary(col("t0", "c0"), BinOp::Gt, Expr::lit(Value::Int(5))));
    q.group_by = vec![col("t0", "c0")];
    q.having = Some(Expr::binary(
        Expr::count_one(),
        BinOp::Gt,
        Expr::lit(Value::Int(0)),
    ));
    q.order_by = vec![col("t0", "c0")];
    q.limit = Some(10);

    assert_snapshot!(
        q.sql(),
        @"SELECT t0.c0 AS c0, COUNT(1) AS cnt FROM t0 INNER JOIN t1 ON (t0.k0 = t1.k0) WHERE (t0.c0 > 5) GROUP BY t0.c0 HAVING (COUNT(1) > 0) ORDER BY t0.c0 LIMIT 10"
    );
}

#[test]
fn snapshot_with_and_set_op() {
    let mut body = SelectQuery::from_table("t0");
    body.items = vec![SelectItem::new(col("t0", "c0"), "c0")];

    let mut q = SelectQuery::from_table("cte_0");
    q.with = Some(With {
        recursive: false,
        ctes: vec![Cte {
            name: "cte_0".into(),
            query: body,
        }],
    });
    q.items = vec![SelectItem::bare(col("cte_0", "c0"))];
    let mut rhs = SelectQuery::from_table("t1");
    rhs.items = vec![SelectItem::bare(col("t1", "c0"))];
    q.set_ops.push(SetOpBranch {
        op: SetOpType::Union,
        all: true,
        rhs,
    });

    assert_snapshot!(
        q.sql(),
        @"WITH cte_0 AS (SELECT t0.c0 AS c0 FROM t0) SELECT cte_0.c0 FROM cte_0 UNION ALL (SELECT t1.c0 FROM t1)"
    );
}

#[test]
fn snapshot_natural_and_using_joins() {
    let mut q = SelectQuery::from_table("t0");
    q.from.joins.push(Join {
        join_type: JoinType::Left,
        natural: true,
        table: TableRef::named("t1"),
        constraint: JoinConstraint::None,
    });
    q.items = vec![SelectItem::bare(Expr::unqualified("k0", ColumnType::Int))];
    assert_snapshot!(q.sql(), @"SELECT k0 FROM t0 NATURAL LEFT JOIN t1");

    let mut q = SelectQuery::from_table("t0");
    q.from.joins.push(Join {
        join_type: JoinType::Left,
        natural: false,
        table: TableRef::named("t1"),
        constraint: JoinConstraint::Using(vec!["k0".into()]),
    });
    q.items = vec![SelectItem::bare(Expr::unqualified("k0", ColumnType::Int))];
    assert_snapshot!(q.sql(), @"SELECT k0 FROM t0 LEFT JOIN t1 USING (k0)");
}

#[test]
fn snapshot_case_in_and_interval() {
    let mut q = SelectQuery::from_table("t0");
    q.items = vec![SelectItem::bare(Expr::Case {
        whens: vec![(
            Expr::binary(col("t0", "c0"), BinOp::Eq, Expr::lit(Value::Int(1))),
            Expr::lit(Value::Str("a".into())),
        )],
        else_expr: Some(Box::new(Expr::lit(Value::Str("b".into())))),
    })];
    q.where_clause = Some(Expr::In {
        left: Box::new(col("t0", "c0")),
        list: vec![
            Expr::lit(Value::Int(1)),
            Expr::lit(Value::Int(2)),
            Expr::lit(Value::Int(3)),
        ],
    });
    assert_snapshot!(
        q.sql(),
        @"SELECT CASE WHEN (t0.c0 = 1) THEN 'a' ELSE 'b' END FROM t0 WHERE t0.c0 IN (1, 2, 3)"
    );

    let mut q = SelectQuery::from_table("t0");
    q.items = vec![SelectItem::bare(Expr::binary(
        Expr::column("t0", "c2", ColumnType::Date),
        BinOp::Add,
        Expr::Interval {
            value: 3,
            unit: querystorm_core::IntervalUnit::Day,
        },
    ))];
    assert_snapshot!(q.sql(), @"SELECT (t0.c2 + INTERVAL 3 DAY) FROM t0");
}

#[test]
fn snapshot_quantified_and_exists() {
    let mut inner = SelectQuery::from_table("t1");
    inner.items = vec![SelectItem::bare(col("t1", "c0"))];

    let mut q = SelectQuery::from_table("t0");
    q.items = vec![SelectItem::bare(col("t0", "c0"))];
    q.where_clause = Some(Expr::and(
        Expr::CompareSubquery {
            left: Box::new(col("t0", "c0")),
            op: BinOp::GtEq,
            quantifier: Quantifier::All,
            query: Box::new(inner.clone()),
        },
        Expr::not(Expr::Exists {
            query: Box::new(inner),
        }),
    ));
    assert_snapshot!(
        q.sql(),
        @"SELECT t0.c0 FROM t0 WHERE (t0.c0 >= ALL (SELECT t1.c0 FROM t1) AND NOT (EXISTS (SELECT t1.c0 FROM t1)))"
    );
}

#[test]
fn snapshot_derived_table_and_params() {
    let mut inner = SelectQuery::from_table("t1");
    inner.items = vec![SelectItem::new(col("t1", "c0"), "d0")];

    let mut q = SelectQuery::new(FromClause {
        base: TableRef::Derived {
            query: Box::new(inner),
            alias: "sub0".into(),
        },
        joins: vec![],
    });
    q.items = vec![SelectItem::bare(Expr::column(
        "sub0",
        "d0",
        ColumnType::Int,
    ))];
    q.where_clause = Some(Expr::binary(
        Expr::column("sub0", "d0", ColumnType::Int),
        BinOp::Lt,
        Expr::Param(Value::Int(7)),
    ));

    let (sql, args) = q.build();
    assert_snapshot!(
        sql,
        @"SELECT sub0.d0 FROM (SELECT t1.c0 AS d0 FROM t1) AS sub0 WHERE (sub0.d0 < ?)"
    );
    assert_eq!(args, vec![Value::Int(7)]);
}

#[test]
fn snapshot_grouping_extensions() {
    let mut q = SelectQuery::from_table("t0");
    q.items = vec![
        SelectItem::new(col("t0", "c0"), "c0"),
        SelectItem::new(Expr::count_one(), "cnt"),
    ];
    q.group_by = vec![col("t0", "c0")];
    q.grouping.with_rollup = true;
    assert_snapshot!(
        q.sql(),
        @"SELECT t0.c0 AS c0, COUNT(1) AS cnt FROM t0 GROUP BY t0.c0 WITH ROLLUP"
    );

    q.grouping.with_rollup = false;
    q.grouping.grouping_sets = Some(vec![vec![col("t0", "c0")], vec![]]);
    assert_snapshot!(
        q.sql(),
        @"SELECT t0.c0 AS c0, COUNT(1) AS cnt FROM t0 GROUP BY GROUPING SETS ((t0.c0), ())"
    );
}

#[test]
fn emission_is_byte_stable() {
    let mut q = SelectQuery::from_table("t0");
    q.items = vec![SelectItem::bare(Expr::Param(Value::Str("x'y".into())))];
    q.where_clause = Some(Expr::binary(
        col("t0", "c0"),
        BinOp::NullSafeEq,
        Expr::lit(Value::Str("o'brien".into())),
    ));
    let (first_sql, first_args) = q.build();
    let (second_sql, second_args) = q.build();
    assert_eq!(first_sql, second_sql);
    assert_eq!(first_args, second_args);
    assert_eq!(
        first_sql,
        "SELECT ? FROM t0 WHERE (t0.c0 <=> 'o''brien')"
    );
}
