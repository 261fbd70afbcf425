//! # Predicate Pushdown Rule
//!
//! Merges a filter sitting on top of a join into the join condition:
//!
//! ```text
//! Before: Filter(pred, Join(A, B, cond))
//! After:  Join(A, B, cond AND pred)
//! ```
//!
//! The rewritten join is added to the *filter's* group as an equivalent alternative;
//! the Filter-over-Join expression stays in the memo as well.
//!
//! Only inner and cross joins accept the merge (a cross join becomes an inner join).
//! On an outer join a filter above the join and a join condition mean different
//! things. A predicate with outer references is given promise `None`: it belongs to
//! the enclosing query's correlation and is left where it is.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleResult, RuleType};

/// Filter over an inner or cross join to an inner join with the predicate merged
/// into its condition.
pub struct PredicatePushdownRule;

impl Rule for PredicatePushdownRule {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter_join()
    }

    fn promise(&self, expr: &MemoExpr, _memo: &Memo, _ctx: &OptContext) -> Promise {
        match &expr.op {
            Operator::Logical(LogicalOp::Filter { predicate }) if !predicate.has_outer_refs() => {
                Promise::High
            }
            _ => Promise::None,
        }
    }

    fn apply(
        &self,
        expr: &MemoExpr,
        memo: &Memo,
        _ctx: &OptContext,
    ) -> Result<Vec<RuleResult>, RuleError> {
        let Operator::Logical(LogicalOp::Filter { predicate }) = &expr.op else {
            return Ok(vec![]);
        };
        let Some(&input) = expr.children.first() else {
            return Ok(vec![]);
        };

        let mut results = Vec::new();
        for eid in memo.group(input).logical_exprs() {
            let join = memo.expr(eid);
            let Operator::Logical(LogicalOp::Join {
                join_type,
                condition,
            }) = &join.op
            else {
                continue;
            };
            if !join_type.is_symmetric() || join.children.len() != 2 {
                continue;
            }
            results.push(RuleResult::Substitution(
                Operator::Logical(LogicalOp::Join {
                    join_type: JoinType::Inner,
                    condition: merge_conditions(condition, predicate),
                }),
                join.children.clone(),
            ));
        }
        Ok(results)
    }
}

/// Conjuncts of `condition` and `predicate` as one canonical conjunction. A literal
/// `TRUE` condition (cross join) contributes nothing.
fn merge_conditions(condition: &Expr, predicate: &Expr) -> Expr {
    let conjuncts: Vec<Expr> = condition
        .conjuncts()
        .into_iter()
        .filter(|c| **c != Expr::true_lit())
        .chain(predicate.conjuncts())
        .cloned()
        .collect();
    Expr::canonical_conjunction(conjuncts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optx_core::catalog::InMemoryCatalog;

    #[test]
    fn test_merge_conditions() {
        let cond = Expr::equi("a", "x", "b", "y");
        let pred = Expr::BinaryOp {
            op: BinaryOp::Gt,
            left: Box::new(Expr::Column(ColumnRef::qualified("a", "z"))),
            right: Box::new(Expr::Literal(ScalarValue::Int64(10))),
        };
        let merged = merge_conditions(&cond, &pred);
        assert!(matches!(&merged, Expr::And(v) if v.len() == 2));
        assert_eq!(merge_conditions(&merged, &pred), merged);
        assert_eq!(merge_conditions(&Expr::true_lit(), &pred), pred);
        // Merging in either direction yields the same condition.
        assert_eq!(merge_conditions(&pred, &cond), merged);
    }

    #[test]
    fn test_pushdown_into_cross_join() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let scan = |n: &str| {
            Operator::Logical(LogicalOp::Scan {
                table: TableRef::new("s", n),
                columns: vec![],
                predicate: None,
            })
        };
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let cross = Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Cross,
            condition: Expr::true_lit(),
        });
        let (j, _) = memo.add_expr(cross, vec![a, b]);
        let filter = Operator::Logical(LogicalOp::Filter {
            predicate: Expr::equi("a", "x", "b", "y"),
        });
        let (_, f) = memo.add_expr(filter, vec![j]);

        let rule = PredicatePushdownRule;
        assert_eq!(rule.promise(&memo.expr(f), &memo, &ctx), Promise::High);
        let results = rule.apply(&memo.expr(f), &memo, &ctx).unwrap();
        let [RuleResult::Substitution(op, children)] = &results[..] else {
            panic!("expected one substitution");
        };
        assert_eq!(children, &vec![a, b]);
        assert_eq!(
            op,
            &Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: Expr::equi("a", "x", "b", "y"),
            })
        );
    }
}
