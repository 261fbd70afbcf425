//! # Single-Input Implementation Rules
//!
//! Sort, Filter, Project and Limit each have exactly one physical counterpart that
//! carries the same payload over the same child group.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Rule, RuleResult, RuleType};

/// One-to-one mapping of a logical operator, or nothing if `map` rejects it.
fn implement(
    expr: &MemoExpr,
    map: impl FnOnce(&LogicalOp) -> Option<PhysicalOp>,
) -> Result<Vec<RuleResult>, RuleError> {
    let Operator::Logical(op) = &expr.op else {
        return Ok(vec![]);
    };
    Ok(map(op)
        .map(|physical| {
            RuleResult::Substitution(Operator::Physical(physical), expr.children.clone())
        })
        .into_iter()
        .collect())
}

/// Logical sort as a physical sort on the same keys.
pub struct ImplSortRule;

impl Rule for ImplSortRule {
    fn name(&self) -> &str {
        "ImplSort"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Sort, 1)
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        implement(expr, |op| match op {
            LogicalOp::Sort { order } => Some(PhysicalOp::SortOp {
                order: order.clone(),
            }),
            _ => None,
        })
    }
}

/// Logical filter as a physical filter.
pub struct ImplFilterRule;

impl Rule for ImplFilterRule {
    fn name(&self) -> &str {
        "ImplFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Filter, 1)
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        implement(expr, |op| match op {
            LogicalOp::Filter { predicate } => Some(PhysicalOp::Filter {
                predicate: predicate.clone(),
            }),
            _ => None,
        })
    }
}

pub struct ImplProjectRule;

impl Rule for ImplProjectRule {
    fn name(&self) -> &str {
        "ImplProject"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Project, 1)
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        implement(expr, |op| match op {
            LogicalOp::Project { exprs, aliases } => Some(PhysicalOp::Project {
                exprs: exprs.clone(),
                aliases: aliases.clone(),
            }),
            _ => None,
        })
    }
}

/// Logical limit as a physical limit.
pub struct ImplLimitRule;

impl Rule for ImplLimitRule {
    fn name(&self) -> &str {
        "ImplLimit"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::logical(LogicalOpKind::Limit, 1)
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        implement(expr, |op| match op {
            LogicalOp::Limit { offset, count } => Some(PhysicalOp::Limit {
                offset: *offset,
                count: *count,
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    #[test]
    fn test_limit_and_sort() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let (s, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Scan {
                table: TableRef::new("s", "t"),
                columns: vec![],
                predicate: None,
            }),
            vec![],
        );
        let (_, limit) = memo.add_expr(
            Operator::Logical(LogicalOp::Limit { offset: 5, count: 10 }),
            vec![s],
        );

        let out = ImplLimitRule.apply(&memo.expr(limit), &memo, &ctx).unwrap();
        assert!(matches!(
            &out[..],
            [RuleResult::Substitution(Operator::Physical(PhysicalOp::Limit { offset: 5, count: 10 }), c)]
                if *c == vec![s]
        ));
        // A rule handed the wrong operator produces nothing.
        assert!(ImplSortRule.apply(&memo.expr(limit), &memo, &ctx).unwrap().is_empty());
    }
}
