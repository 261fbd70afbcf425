//! # Join Commutativity Rule
//!
//! `A JOIN B = B JOIN A` for symmetric join types (inner and cross joins).
//!
//! Left, right, full, semi and anti joins have fixed left/right semantics and are
//! given promise `None`, so no rule-application job is ever spawned for them.
//!
//! The condition is kept as is. An equality conjunct means the same thing whichever
//! input its columns come from, and keeping it lets the memo recognize a join that
//! was reached along another rewrite path.
//!
//! ## Self-Incompatibility
//!
//! Commuting an expression that was itself produced by commutativity only gives back
//! the original, which the memo already holds. The rule therefore declares itself
//! incompatible with its own output and the scheduler skips that pairing.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

/// `A JOIN B` to `B JOIN A` for inner and cross joins.
pub struct JoinCommutativityRule;

impl Rule for JoinCommutativityRule {
    fn name(&self) -> &str {
        "JoinCommutativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match &expr.op {
            Operator::Logical(LogicalOp::Join { join_type, .. }) if join_type.is_symmetric() => {
                Promise::Medium
            }
            _ => Promise::None,
        }
    }

    fn incompatible_with(&self) -> &[&'static str] {
        &["JoinCommutativity"]
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        _memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Operator::Logical(LogicalOp::Join {
            join_type,
            condition,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };
        if !join_type.is_symmetric() || expr.children.len() != 2 {
            return Ok(vec![]);
        }

        let swapped = Operator::Logical(LogicalOp::Join {
            join_type: *join_type,
            condition: condition.clone(),
        });
        Ok(vec![RuleResult::Substitution(
            swapped,
            vec![expr.children[1], expr.children[0]],
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    fn scan(name: &str) -> Operator {
        Operator::Logical(LogicalOp::Scan {
            table: TableRef::new("s", name),
            columns: vec![],
            predicate: None,
        })
    }

    #[test]
    fn test_promise_by_join_type() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let join = |join_type| {
            Operator::Logical(LogicalOp::Join {
                join_type,
                condition: Expr::equi("a", "x", "b", "y"),
            })
        };
        let (_, inner) = memo.add_expr(join(JoinType::Inner), vec![a, b]);
        let (_, left) = memo.add_expr(join(JoinType::Left), vec![a, b]);

        let rule = JoinCommutativityRule;
        assert_eq!(rule.promise(&memo.expr(inner), &memo, &ctx), Promise::Medium);
        assert_eq!(rule.promise(&memo.expr(left), &memo, &ctx), Promise::None);

        let results = rule.apply(&memo.expr(inner), &memo, &ctx).unwrap();
        assert!(matches!(
            &results[..],
            [RuleResult::Substitution(Operator::Logical(LogicalOp::Join { condition, .. }), c)]
                if *c == vec![b, a] && *condition == Expr::equi("a", "x", "b", "y")
        ));
        assert!(rule.apply(&memo.expr(left), &memo, &ctx).unwrap().is_empty());
    }
}
