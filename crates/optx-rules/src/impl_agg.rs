//! # Aggregate Implementation Rules
//!
//! ## Hash Aggregate (`ImplHashAggregateRule`)
//!
//! A hash table keyed by the group-by columns. Works on input in any order.
//!
//! ## Stream Aggregate (`ImplStreamAggregateRule`)
//!
//! One pass over input sorted on the group-by columns, emitting a group whenever the
//! key changes. A global aggregate (no group-by) is trivially sorted, so both rules
//! apply to it.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Rule, RuleResult, RuleType};

fn aggregate_parts(expr: &MemoExpr) -> Option<(&Vec<Expr>, &Vec<AggExpr>)> {
    match &expr.op {
        Operator::Logical(LogicalOp::Aggregate {
            group_by,
            aggregates,
        }) => Some((group_by, aggregates)),
        _ => None,
    }
}

/// Logical aggregate as a hash aggregate. Applies to every aggregate.
pub struct ImplHashAggregateRule;

impl Rule for ImplHashAggregateRule {
    fn name(&self) -> &str {
        "ImplHashAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Aggregate, 1)
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Some((group_by, aggregates)) = aggregate_parts(expr) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::HashAggregate {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

/// Logical aggregate as a stream aggregate over input sorted on the group-by
/// columns.
pub struct ImplStreamAggregateRule;

impl Rule for ImplStreamAggregateRule {
    fn name(&self) -> &str {
        "ImplStreamAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Aggregate, 1)
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Some((group_by, aggregates)) = aggregate_parts(expr) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::StreamAggregate {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    #[test]
    fn test_both_strategies() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let (s, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Scan {
                table: TableRef::new("tpch", "orders"),
                columns: vec![],
                predicate: None,
            }),
            vec![],
        );
        let agg = Operator::Logical(LogicalOp::Aggregate {
            group_by: vec![Expr::Column(ColumnRef::qualified("orders", "o_custkey"))],
            aggregates: vec![AggExpr {
                func: AggFunc::Count,
                arg: Expr::Column(ColumnRef::qualified("orders", "o_orderkey")),
                distinct: false,
            }],
        });
        let (_, a) = memo.add_expr(agg, vec![s]);
        let expr = memo.expr(a);

        let hash = ImplHashAggregateRule.apply(&expr, &memo, &ctx).unwrap();
        let stream = ImplStreamAggregateRule.apply(&expr, &memo, &ctx).unwrap();
        assert!(matches!(
            &hash[..],
            [RuleResult::Substitution(Operator::Physical(PhysicalOp::HashAggregate { .. }), c)] if *c == vec![s]
        ));
        assert!(matches!(
            &stream[..],
            [RuleResult::Substitution(Operator::Physical(PhysicalOp::StreamAggregate { .. }), _)]
        ));
    }
}
