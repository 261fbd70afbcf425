//! # Projection Pushdown Rule
//!
//! Column pruning: when a Project sits on top of a Scan and only references some of
//! the table's columns, the rule adds `Project(Scan'(needed columns))` to the
//! project's group, where `Scan'` reads only what the projection uses. The narrow
//! scan lands in its own group through the memo's insert-or-find.
//!
//! The catalog decides whether pruning can help: if it knows the table and the
//! projection already needs every column, the promise is `None`.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::{OpMatcher, Pattern};
use optx_core::rule::{OptContext, Promise, Rule, RuleChild, RuleResult, RuleType};

/// Project over a Scan to the same Project over a Scan of only the referenced
/// columns.
pub struct ProjectionPushdownRule;

/// Distinct local columns referenced by the projection, in first-use order.
fn needed_columns(exprs: &[Expr]) -> Vec<ColumnRef> {
    let mut needed: Vec<ColumnRef> = Vec::new();
    for col in exprs.iter().flat_map(|e| e.columns()) {
        if !needed.iter().any(|c| c.table == col.table && c.name == col.name) {
            needed.push(col.clone());
        }
    }
    needed
}

impl Rule for ProjectionPushdownRule {
    fn name(&self) -> &str {
        "ProjectionPushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::Operator(OpMatcher::LogicalOp(LogicalOpKind::Project), vec![Pattern::scan()])
    }

    fn promise(&self, expr: &MemoExpr, memo: &Memo, ctx: &OptContext) -> Promise {
        let Operator::Logical(LogicalOp::Project { exprs, .. }) = &expr.op else {
            return Promise::None;
        };
        let needed = needed_columns(exprs);
        if needed.is_empty() {
            return Promise::None;
        }
        let Some(&input) = expr.children.first() else {
            return Promise::None;
        };
        let prunable = memo.group(input).logical_exprs().into_iter().any(|eid| {
            match &memo.expr(eid).op {
                Operator::Logical(LogicalOp::Scan { table, .. }) => {
                    match ctx.catalog.get_table_columns(table) {
                        Some(all) => all.iter().any(|c| !needed.iter().any(|n| n.name == c.name)),
                        None => true,
                    }
                }
                _ => false,
            }
        });
        if prunable {
            Promise::Medium
        } else {
            Promise::None
        }
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Operator::Logical(LogicalOp::Project { exprs, .. }) = &expr.op else {
            return Ok(vec![]);
        };
        let Some(&input) = expr.children.first() else {
            return Ok(vec![]);
        };
        let needed = needed_columns(exprs);
        if needed.is_empty() {
            return Ok(vec![]);
        }

        let mut results = Vec::new();
        for eid in memo.group(input).logical_exprs() {
            let scan = memo.expr(eid);
            let Operator::Logical(LogicalOp::Scan {
                table,
                columns,
                predicate,
            }) = &scan.op
            else {
                continue;
            };
            if *columns == needed {
                continue;
            }
            let narrow = Operator::Logical(LogicalOp::Scan {
                table: table.clone(),
                columns: needed.clone(),
                predicate: predicate.clone(),
            });
            results.push(RuleResult::NewChildren(
                expr.op.clone(),
                vec![RuleChild::NewExpr(narrow, vec![])],
            ));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::{Catalog, InMemoryCatalog};

    fn project(cols: &[&str]) -> Operator {
        Operator::Logical(LogicalOp::Project {
            exprs: cols
                .iter()
                .map(|c| Expr::Column(ColumnRef::qualified("t", *c)))
                .collect(),
            aliases: cols.iter().map(|c| c.to_string()).collect(),
        })
    }

    #[test]
    fn test_needed_columns_dedup() {
        let exprs = vec![
            Expr::equi("t", "a", "t", "b"),
            Expr::Column(ColumnRef::qualified("t", "a")),
        ];
        let names: Vec<_> = needed_columns(&exprs).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_promise_consults_catalog() {
        let table = TableRef::new("s", "t");
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(&table, vec![ColumnRef::qualified("t", "a"), ColumnRef::qualified("t", "b")]);
        assert!(catalog.has_table(&table));
        let ctx = OptContext { catalog: &catalog };

        let memo = Memo::new();
        let scan = Operator::Logical(LogicalOp::Scan {
            table,
            columns: vec![],
            predicate: None,
        });
        let (s, _) = memo.add_expr(scan, vec![]);
        let (_, narrow) = memo.add_expr(project(&["a"]), vec![s]);
        let (_, full) = memo.add_expr(project(&["a", "b"]), vec![s]);

        let rule = ProjectionPushdownRule;
        assert_eq!(rule.promise(&memo.expr(narrow), &memo, &ctx), Promise::Medium);
        assert_eq!(rule.promise(&memo.expr(full), &memo, &ctx), Promise::None);

        let results = rule.apply(&memo.expr(narrow), &memo, &ctx).unwrap();
        assert!(matches!(
            &results[..],
            [RuleResult::NewChildren(_, children)]
                if matches!(&children[0], RuleChild::NewExpr(Operator::Logical(LogicalOp::Scan { columns, .. }), _) if columns.len() == 1)
        ));
    }
}
