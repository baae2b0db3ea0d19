//! Set-operation attachment, recursive CTE construction and FULL JOIN
//! emulation.

use rand::Rng;

use super::Generator;
use crate::ast::{
    BinOp, Cte, Expr, JoinConstraint, JoinType, SelectItem, SelectQuery, SetOpBranch, SetOpType,
    TableRef, Value, With,
};
use crate::schema::Table;

impl Generator<'_> {
    /// Attaches one or two set-operation branches. RHS queries are built
    /// over a resampled table set with items shaped one-per-LHS-item,
    /// reusing type-compatible columns when available and falling back to a
    /// typed literal. Only UNION may carry ALL.
    pub(crate) fn attach_set_ops(&mut self, query: &mut SelectQuery) {
        let branches = self.rng().gen_range(1..=2);
        for _ in 0..branches {
            let names = self.pick_table_names();
            let rhs_tables: Vec<Table> = names
                .iter()
                .filter_map(|n| self.schema().table_by_name(n).cloned())
                .collect();
            if rhs_tables.is_empty() {
                continue;
            }

            let mut rhs = SelectQuery::new(self.build_from_clause(&rhs_tables));
            let refs: Vec<&Table> = rhs_tables.iter().collect();
            rhs.items = query
                .items
                .iter()
                .map(|item| {
                    let wanted = item.published_type();
                    let mut candidates = Vec::new();
                    for table in &refs {
                        for column in table.columns_compatible_with(wanted) {
                            candidates.push(Expr::column(&table.name, &column.name, column.ty));
                        }
                    }
                    match self.pick(&candidates) {
                        Some(column) => SelectItem::bare(column.clone()),
                        None => SelectItem::bare(Expr::lit(self.literal_for_type(wanted))),
                    }
                })
                .collect();
            if self.chance(40) {
                rhs.set_where(Some(self.simple_predicate(&refs)));
            }

            let op = *self
                .pick(&[SetOpType::Union, SetOpType::Union, SetOpType::Intersect, SetOpType::Except])
                .expect("non-empty set-op choices");
            let all = op == SetOpType::Union && self.chance(50);
            query.set_ops.push(SetOpBranch { op, all, rhs });
        }
        query.normalize_set_operands();
        query.invalidate_analysis();
    }

    /// A recursive CTE query over `table_name`: the seed selects a numeric
    /// column with `LIMIT 1` and the recursive arm advances it by one while
    /// it stays under 3, unioned with ALL.
    pub fn generate_recursive_cte_query(
        &mut self,
        table_name: &str,
        cte_name: &str,
    ) -> Option<SelectQuery> {
        let table = self.schema().table_by_name(table_name)?;
        let body = Self::recursive_cte_body(table, cte_name)?;
        let column_alias = body.items[0].alias.clone();
        let column_type = body.items[0].published_type();

        let mut outer = SelectQuery::from_table(cte_name);
        outer.with = Some(With {
            recursive: true,
            ctes: vec![Cte {
                name: cte_name.to_string(),
                query: body,
            }],
        });
        outer.items = vec![SelectItem::bare(Expr::column(
            cte_name,
            &column_alias,
            column_type,
        ))];
        Some(outer)
    }

    /// The seed-plus-arm body of a recursive CTE. Requires a numeric seed
    /// column; prefers one other than the primary id.
    pub(crate) fn recursive_cte_body(table: &Table, cte_name: &str) -> Option<SelectQuery> {
        let seed_column = table
            .columns
            .iter()
            .find(|c| c.ty.is_numeric() && c.name != "id")
            .or_else(|| table.columns.iter().find(|c| c.ty.is_numeric()))?;

        let mut seed = SelectQuery::from_table(&table.name);
        seed.items = vec![SelectItem::new(
            Expr::column(&table.name, &seed_column.name, seed_column.ty),
            &seed_column.name,
        )];
        seed.order_by = vec![Expr::column(&table.name, &seed_column.name, seed_column.ty)];
        seed.limit = Some(1);

        let mut arm = SelectQuery::from_table(cte_name);
        arm.items = vec![SelectItem::new(
            Expr::binary(
                Expr::column(cte_name, &seed_column.name, seed_column.ty),
                BinOp::Add,
                Expr::lit(Value::Int(1)),
            ),
            &seed_column.name,
        )];
        arm.where_clause = Some(Expr::binary(
            Expr::column(cte_name, &seed_column.name, seed_column.ty),
            BinOp::Lt,
            Expr::lit(Value::Int(3)),
        ));

        seed.set_ops = vec![SetOpBranch {
            op: SetOpType::Union,
            all: true,
            rhs: arm,
        }];
        Some(seed)
    }

    /// Rewrites a single-join query into the LEFT/RIGHT `UNION ALL` pair
    /// that emulates a FULL OUTER JOIN. The RIGHT branch filters the base
    /// side of the join key with `IS NULL`: the USING column unqualified,
    /// otherwise the base side of the first equality in the ON tree.
    ///
    /// Applies only to queries with exactly one non-CROSS join and no WITH
    /// list (the right branch becomes an inline operand).
    pub fn emulate_full_join(&mut self, query: &mut SelectQuery) -> bool {
        if query.from.joins.len() != 1
            || query.from.joins[0].join_type == JoinType::Cross
            || query.with.is_some()
            || !query.set_ops.is_empty()
        {
            return false;
        }

        let anti_null = match &query.from.joins[0].constraint {
            JoinConstraint::Using(columns) => match columns.first() {
                Some(column) => {
                    let base = query.from.base.visible_alias();
                    let ty = self
                        .schema()
                        .table_by_name(base)
                        .and_then(|t| t.column_by_name(column))
                        .map(|c| c.ty)
                        .unwrap_or(crate::schema::ColumnType::Int);
                    Expr::unqualified(column.clone(), ty)
                }
                None => return false,
            },
            JoinConstraint::On(on) => match first_equality(on) {
                Some((left, _)) => base_side(left, query.from.base.visible_alias()).clone(),
                None => return false,
            },
            JoinConstraint::None => return false,
        };

        let mut left = query.clone();
        left.from.joins[0].join_type = JoinType::Left;
        left.order_by.clear();
        left.limit = None;

        let mut right = query.clone();
        right.from.joins[0].join_type = JoinType::Right;
        right.order_by.clear();
        right.limit = None;
        let is_null = Expr::is_null(anti_null);
        let extended = match right.where_clause.take() {
            Some(existing) => Expr::and(existing, is_null),
            None => is_null,
        };
        right.set_where(Some(extended));

        *query = left;
        query.set_ops = vec![SetOpBranch {
            op: SetOpType::Union,
            all: true,
            rhs: right,
        }];
        query.full_join_emulated = true;
        query.invalidate_analysis();
        true
    }
}

/// Depth-first search for the first equality comparison in an ON tree.
fn first_equality(expr: &Expr) -> Option<(&Expr, &Expr)> {
    match expr {
        Expr::Binary { left, op, right } => {
            if *op == BinOp::Eq {
                return Some((left, right));
            }
            first_equality(left).or_else(|| first_equality(right))
        }
        Expr::Unary { expr, .. } => first_equality(expr),
        _ => None,
    }
}

/// The operand of an equality referencing the FROM base, falling back to
/// the left operand.
fn base_side<'e>(left: &'e Expr, base_alias: &str) -> &'e Expr {
    if let Expr::Column(c) = left {
        if c.table.as_deref() == Some(base_alias) {
            return left;
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_query_features;
    use crate::ast::FromClause;
    use crate::generator::tests::test_catalog;
    use crate::schema::{Column, ColumnType};

    #[test]
    fn test_recursive_cte_shape() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 51);
        let q = g.generate_recursive_cte_query("t0", "cte_0").unwrap();

        let features = analyze_query_features(&q);
        assert!(features.has_recursive_cte);

        let body = &q.with.as_ref().unwrap().ctes[0].query;
        assert_eq!(body.set_ops.len(), 1);
        assert_eq!(body.set_ops[0].op, SetOpType::Union);
        assert!(body.set_ops[0].all);
        assert_eq!(body.limit, Some(1));
        assert_eq!(body.order_by.len(), 1);

        let sql = q.sql();
        assert!(sql.starts_with("WITH RECURSIVE cte_0 AS ("), "sql: {sql}");
        assert!(sql.contains("ORDER BY t0.k0 LIMIT 1"), "sql: {sql}");
        assert!(
            sql.contains("UNION ALL (SELECT (cte_0.k0 + 1) AS k0 FROM cte_0 WHERE (cte_0.k0 < 3))"),
            "sql: {sql}"
        );
    }

    #[test]
    fn test_full_join_emulation_using() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 52);
        let mut q = SelectQuery::new(FromClause {
            base: TableRef::named("t0"),
            joins: vec![crate::ast::Join {
                join_type: JoinType::Inner,
                natural: false,
                table: TableRef::named("t1"),
                constraint: JoinConstraint::Using(vec!["id".into()]),
            }],
        });
        q.items = vec![SelectItem::bare(Expr::unqualified("id", ColumnType::BigInt))];
        assert!(g.emulate_full_join(&mut q));

        let features = analyze_query_features(&q);
        assert!(features.has_full_join_emulation);
        assert_eq!(q.set_ops.len(), 1);
        assert!(q.set_ops[0].all);

        let sql = q.sql();
        assert!(sql.contains("LEFT JOIN t1 USING (id)"), "sql: {sql}");
        assert!(sql.contains("UNION ALL ("), "sql: {sql}");
        assert!(sql.contains("RIGHT JOIN t1 USING (id) WHERE id IS NULL"), "sql: {sql}");
    }

    #[test]
    fn test_full_join_emulation_on_uses_base_side() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 53);
        let mut q = SelectQuery::new(FromClause {
            base: TableRef::named("t0"),
            joins: vec![crate::ast::Join {
                join_type: JoinType::Inner,
                natural: false,
                table: TableRef::named("t1"),
                constraint: JoinConstraint::On(Expr::binary(
                    Expr::column("t0", "k0", ColumnType::Int),
                    BinOp::Eq,
                    Expr::column("t1", "k1", ColumnType::Int),
                )),
            }],
        });
        q.items = vec![SelectItem::bare(Expr::column("t0", "c0", ColumnType::Int))];
        assert!(g.emulate_full_join(&mut q));
        let sql = q.sql();
        assert!(sql.contains("WHERE t0.k0 IS NULL"), "sql: {sql}");
    }

    #[test]
    fn test_emulation_refuses_cross_and_multi_join() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 54);
        let mut q = SelectQuery::new(FromClause {
            base: TableRef::named("t0"),
            joins: vec![crate::ast::Join {
                join_type: JoinType::Cross,
                natural: false,
                table: TableRef::named("t1"),
                constraint: JoinConstraint::None,
            }],
        });
        q.items = vec![SelectItem::bare(Expr::lit(Value::Int(1)))];
        assert!(!g.emulate_full_join(&mut q));
    }

    #[test]
    fn test_attach_set_ops_matches_arity() {
        let schema = test_catalog();
        let mut g = Generator::with_default_config(&schema, 55);
        let mut q = SelectQuery::from_table("t0");
        q.items = vec![
            SelectItem::bare(Expr::column("t0", "c0", ColumnType::Int)),
            SelectItem::bare(Expr::column("t0", "c1", ColumnType::Varchar)),
        ];
        g.attach_set_ops(&mut q);
        assert!(!q.set_ops.is_empty());
        for branch in &q.set_ops {
            assert_eq!(branch.rhs.items.len(), q.items.len());
            assert!(branch.rhs.order_by.is_empty());
            assert_eq!(branch.rhs.limit, None);
        }
    }

    #[test]
    fn test_recursive_body_requires_numeric() {
        let table = crate::schema::Table::new("s").with_columns(vec![Column::new(
            "name",
            ColumnType::Varchar,
        )]);
        assert!(Generator::recursive_cte_body(&table, "cte_0").is_none());
    }
}
