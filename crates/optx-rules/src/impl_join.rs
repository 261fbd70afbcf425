//! # Join Implementation Rules
//!
//! Map a logical join to its physical alternatives:
//!
//! - **Hash join**: needs an equi predicate (or a cross join). Produced twice, once
//!   per build side, since either input may be the smaller one.
//! - **Merge join**: inner equi-joins only. Promise `Low`: it needs sorted inputs,
//!   which the plan space does not model as a separate requirement.
//! - **Nested loop join**: the universal fallback for any join type and condition.
//!   Promise `Low` when an equi predicate exists (a hash join covers it), `Medium`
//!   otherwise.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

fn join_parts(expr: &MemoExpr) -> Option<(JoinType, &Expr)> {
    match &expr.op {
        Operator::Logical(LogicalOp::Join {
            join_type,
            condition,
        }) if expr.children.len() == 2 => Some((*join_type, condition)),
        _ => None,
    }
}

/// Hash join with the left input as build side, and again with the right.
pub struct ImplHashJoinRule;

impl Rule for ImplHashJoinRule {
    fn name(&self) -> &str {
        "ImplHashJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match join_parts(expr) {
            Some((_, condition)) if condition.has_equi_predicate() => Promise::High,
            Some((JoinType::Cross, _)) => Promise::Medium,
            _ => Promise::None,
        }
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Some((join_type, condition)) = join_parts(expr) else {
            return Ok(vec![]);
        };
        if !condition.has_equi_predicate() && join_type != JoinType::Cross {
            return Ok(vec![]);
        }

        Ok([BuildSide::Right, BuildSide::Left]
            .into_iter()
            .map(|build_side| {
                RuleResult::Substitution(
                    Operator::Physical(PhysicalOp::HashJoin {
                        join_type,
                        build_side,
                        condition: condition.clone(),
                    }),
                    expr.children.clone(),
                )
            })
            .collect())
    }
}

/// Merge join for inner equi-joins.
pub struct ImplMergeJoinRule;

impl Rule for ImplMergeJoinRule {
    fn name(&self) -> &str {
        "ImplMergeJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match join_parts(expr) {
            Some((JoinType::Inner, condition)) if condition.has_equi_predicate() => Promise::Low,
            _ => Promise::None,
        }
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        match join_parts(expr) {
            Some((JoinType::Inner, condition)) if condition.has_equi_predicate() => {
                Ok(vec![RuleResult::Substitution(
                    Operator::Physical(PhysicalOp::MergeJoin {
                        join_type: JoinType::Inner,
                        condition: condition.clone(),
                    }),
                    expr.children.clone(),
                )])
            }
            _ => Ok(vec![]),
        }
    }
}

/// Nested loop join. Accepts any join type and condition.
pub struct ImplNestedLoopJoinRule;

impl Rule for ImplNestedLoopJoinRule {
    fn name(&self) -> &str {
        "ImplNestedLoopJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match join_parts(expr) {
            Some((_, condition)) if condition.has_equi_predicate() => Promise::Low,
            Some(_) => Promise::Medium,
            None => Promise::None,
        }
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Some((join_type, condition)) = join_parts(expr) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            Operator::Physical(PhysicalOp::NestedLoopJoin {
                join_type,
                condition: condition.clone(),
            }),
            expr.children.clone(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    fn setup(condition: Expr, join_type: JoinType) -> (Memo, u32) {
        let memo = Memo::new();
        let scan = |n: &str| {
            Operator::Logical(LogicalOp::Scan {
                table: TableRef::new("s", n),
                columns: vec![],
                predicate: None,
            })
        };
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let (_, j) = memo.add_expr(
            Operator::Logical(LogicalOp::Join {
                join_type,
                condition,
            }),
            vec![a, b],
        );
        (memo, j)
    }

    #[test]
    fn test_equi_join_alternatives() {
        let (memo, j) = setup(Expr::equi("a", "x", "b", "y"), JoinType::Inner);
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let expr = memo.expr(j);

        assert_eq!(ImplHashJoinRule.apply(&expr, &memo, &ctx).unwrap().len(), 2);
        assert_eq!(ImplMergeJoinRule.apply(&expr, &memo, &ctx).unwrap().len(), 1);
        assert_eq!(ImplNestedLoopJoinRule.apply(&expr, &memo, &ctx).unwrap().len(), 1);
        assert_eq!(ImplHashJoinRule.promise(&expr, &memo, &ctx), Promise::High);
        assert_eq!(ImplNestedLoopJoinRule.promise(&expr, &memo, &ctx), Promise::Low);
    }

    #[test]
    fn test_theta_join_only_nested_loop() {
        let theta = Expr::BinaryOp {
            op: BinaryOp::Lt,
            left: Box::new(Expr::Column(ColumnRef::qualified("a", "x"))),
            right: Box::new(Expr::Column(ColumnRef::qualified("b", "y"))),
        };
        let (memo, j) = setup(theta, JoinType::Left);
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let expr = memo.expr(j);

        assert_eq!(ImplHashJoinRule.promise(&expr, &memo, &ctx), Promise::None);
        assert_eq!(ImplMergeJoinRule.promise(&expr, &memo, &ctx), Promise::None);
        assert_eq!(ImplNestedLoopJoinRule.promise(&expr, &memo, &ctx), Promise::Medium);
        assert!(ImplHashJoinRule.apply(&expr, &memo, &ctx).unwrap().is_empty());
    }
}
