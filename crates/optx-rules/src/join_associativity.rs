//! # Join Associativity Rule
//!
//! For inner joins: `(A JOIN_1 B) JOIN_2 C = A JOIN_1 (B JOIN_2 C)`.
//!
//! Associativity changes the *shape* of the join tree (left-deep, right-deep, bushy).
//! Together with commutativity it reaches every join order of a connected join
//! graph.
//!
//! ## New Intermediate Groups
//!
//! The rewritten expression needs a group for `B JOIN C`, which may not exist yet.
//! The rule returns it as a [`RuleChild::NewExpr`]; the scheduler inserts it with the
//! memo's insert-or-find, so an intermediate join that another rule application
//! already produced is reused rather than duplicated.
//!
//! ## Condition Handling
//!
//! The outer condition is split into conjuncts that only connect the moved input with
//! `C` (they go to the new inner join) and the rest, which stay on the new outer join
//! together with the original inner condition. Both conditions are rebuilt with their
//! conjuncts sorted, so a join reached along two rewrite paths is one memo
//! expression. A reassociation whose new inner join
//! would have no predicate at all is skipped: it would introduce a cross product.
//!
//! Both orientations of the inner join are tried, `A JOIN (B JOIN C)` and
//! `B JOIN (A JOIN C)`, for every inner join in the left input's group.
//!
//! ## Applicability
//!
//! Only inner joins without outer references. Outer join reassociation has validity
//! constraints this rule does not check, and a correlated condition cannot be moved
//! to a join that does not see the enclosing query's columns.

use optx_core::error::RuleError;
use optx_core::expr::*;
use optx_core::memo::{GroupId, Memo, MemoExpr};
use optx_core::pattern::Pattern;
use optx_core::rule::{OptContext, Promise, Rule, RuleChild, RuleResult, RuleType};
use std::collections::HashSet;
use tracing::trace;

/// `(A JOIN B) JOIN C` to `A JOIN (B JOIN C)` and `B JOIN (A JOIN C)` for inner
/// joins. The inner join of the result gets its own group.
pub struct JoinAssociativityRule;

impl JoinAssociativityRule {
    /// Inner joins without outer references in `group`: (left, right, condition).
    fn inner_joins(memo: &Memo, group: GroupId) -> Vec<(GroupId, GroupId, Expr)> {
        memo.group(group)
            .logical_exprs()
            .into_iter()
            .filter_map(|eid| {
                let e = memo.expr(eid);
                match &e.op {
                    Operator::Logical(LogicalOp::Join {
                        join_type: JoinType::Inner,
                        condition,
                    }) if e.children.len() == 2 && !condition.has_outer_refs() => {
                        Some((e.children[0], e.children[1], condition.clone()))
                    }
                    _ => None,
                }
            })
            .collect()
    }
}

impl Rule for JoinAssociativityRule {
    fn name(&self) -> &str {
        "JoinAssociativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::join_join_left()
    }

    fn promise(&self, expr: &MemoExpr, memo: &Memo, _ctx: &OptContext) -> Promise {
        match &expr.op {
            Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                condition,
            }) if !condition.has_outer_refs()
                && expr.children.len() == 2
                && !Self::inner_joins(memo, expr.children[0]).is_empty() =>
            {
                Promise::Medium
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
        let Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: outer_cond,
        }) = &expr.op
        else {
            return Ok(vec![]);
        };
        if expr.children.len() != 2 {
            return Ok(vec![]);
        }
        let c_group = expr.children[1];
        let c_tables = collect_table_names(memo, c_group);

        let mut results = Vec::new();
        for (left, right, inner_cond) in Self::inner_joins(memo, expr.children[0]) {
            let left_tables = collect_table_names(memo, left);
            let right_tables = collect_table_names(memo, right);
            // left ⋈ (right ⋈ C)
            results.extend(reassociate(
                outer_cond,
                &inner_cond,
                (left, right, c_group),
                &right_tables,
                &c_tables,
            ));
            // right ⋈ (left ⋈ C)
            results.extend(reassociate(
                outer_cond,
                &inner_cond,
                (right, left, c_group),
                &left_tables,
                &c_tables,
            ));
        }
        trace!(expr = expr.id, produced = results.len(), "reassociated join");
        Ok(results)
    }
}

/// `(stay ⋈ moved) ⋈ c` becomes `stay ⋈ (moved ⋈ c)`, or `None` when no outer
/// conjunct connects `moved` with `c` alone.
fn reassociate(
    outer_cond: &Expr,
    inner_cond: &Expr,
    (stay, moved, c): (GroupId, GroupId, GroupId),
    moved_tables: &HashSet<String>,
    c_tables: &HashSet<String>,
) -> Option<RuleResult> {
    let (pushed, kept): (Vec<&Expr>, Vec<&Expr>) =
        outer_cond.conjuncts().into_iter().partition(|pred| {
            let tables = referenced_tables(pred);
            tables.iter().all(|t| moved_tables.contains(t) || c_tables.contains(t))
                && tables.iter().any(|t| moved_tables.contains(t))
                && tables.iter().any(|t| c_tables.contains(t))
        });
    if pushed.is_empty() {
        return None;
    }

    let new_inner = Expr::canonical_conjunction(pushed.into_iter().cloned().collect());
    let new_outer = Expr::canonical_conjunction(
        inner_cond
            .conjuncts()
            .into_iter()
            .chain(kept)
            .cloned()
            .collect(),
    );
    Some(RuleResult::NewChildren(
        Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: new_outer,
        }),
        vec![
            RuleChild::Group(stay),
            RuleChild::NewExpr(
                Operator::Logical(LogicalOp::Join {
                    join_type: JoinType::Inner,
                    condition: new_inner,
                }),
                vec![RuleChild::Group(moved), RuleChild::Group(c)],
            ),
        ],
    ))
}

fn referenced_tables(expr: &Expr) -> HashSet<String> {
    expr.columns()
        .into_iter()
        .filter_map(|c| c.table.clone())
        .collect()
}

/// Names of the tables scanned below `group`.
fn collect_table_names(memo: &Memo, group: GroupId) -> HashSet<String> {
    let mut tables = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack = vec![group];
    while let Some(gid) = stack.pop() {
        if !visited.insert(gid) {
            continue;
        }
        for eid in memo.group(gid).logical_exprs() {
            let expr = memo.expr(eid);
            match &expr.op {
                Operator::Logical(LogicalOp::Scan { table, .. }) => {
                    tables.insert(table.name.clone());
                }
                _ => stack.extend(expr.children.iter().copied()),
            }
        }
    }
    tables
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

    fn join(condition: Expr) -> Operator {
        Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition,
        })
    }

    fn tables(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_collect_table_names() {
        let memo = Memo::new();
        let (a, _) = memo.add_expr(scan("A"), vec![]);
        let (b, _) = memo.add_expr(scan("B"), vec![]);
        let (ab, _) = memo.add_expr(join(Expr::equi("A", "x", "B", "y")), vec![a, b]);
        assert_eq!(collect_table_names(&memo, ab), tables(&["A", "B"]));
        assert_eq!(collect_table_names(&memo, a), tables(&["A"]));
    }

    #[test]
    fn test_reassociate_moves_connecting_predicate() {
        let inner = Expr::equi("A", "x", "B", "y");
        let outer = Expr::equi("B", "z", "C", "w");
        let result = reassociate(&outer, &inner, (0, 1, 2), &tables(&["B"]), &tables(&["C"]));
        let Some(RuleResult::NewChildren(op, children)) = result else {
            panic!("expected a reassociation");
        };
        assert!(matches!(op, Operator::Logical(LogicalOp::Join { condition, .. }) if condition == inner));
        assert!(matches!(children[0], RuleChild::Group(0)));
        assert!(matches!(
            &children[1],
            RuleChild::NewExpr(Operator::Logical(LogicalOp::Join { condition, .. }), _) if *condition == outer
        ));
    }

    #[test]
    fn test_rewritten_conditions_are_canonical() {
        let inner = Expr::equi("B", "y", "A", "x");
        let kept = Expr::equi("A", "q", "C", "r");
        let pushed = Expr::equi("B", "z", "C", "w");
        let outer = Expr::And(vec![pushed.clone(), kept.clone()]);
        let result = reassociate(&outer, &inner, (0, 1, 2), &tables(&["B"]), &tables(&["C"]));
        let Some(RuleResult::NewChildren(op, _)) = result else {
            panic!("expected a reassociation");
        };
        let Operator::Logical(LogicalOp::Join { condition, .. }) = op else {
            panic!("expected a join");
        };
        assert_eq!(condition, Expr::And(vec![kept, inner]));
    }

    #[test]
    fn test_reassociate_skips_cross_product() {
        // The outer condition connects A (which stays) with C.
        let inner = Expr::equi("A", "x", "B", "y");
        let outer = Expr::equi("A", "z", "C", "w");
        assert!(reassociate(&outer, &inner, (0, 1, 2), &tables(&["B"]), &tables(&["C"])).is_none());
        assert!(reassociate(&outer, &inner, (1, 0, 2), &tables(&["A"]), &tables(&["C"])).is_some());
    }

    #[test]
    fn test_apply_chain() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let (a, _) = memo.add_expr(scan("A"), vec![]);
        let (b, _) = memo.add_expr(scan("B"), vec![]);
        let (c, _) = memo.add_expr(scan("C"), vec![]);
        let (ab, _) = memo.add_expr(join(Expr::equi("A", "x", "B", "y")), vec![a, b]);
        let (_, abc) = memo.add_expr(join(Expr::equi("B", "z", "C", "w")), vec![ab, c]);

        let rule = JoinAssociativityRule;
        assert_eq!(rule.promise(&memo.expr(abc), &memo, &ctx), Promise::Medium);
        let results = rule.apply(&memo.expr(abc), &memo, &ctx).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_no_promise_with_outer_refs() {
        let memo = Memo::new();
        let catalog = InMemoryCatalog::new();
        let ctx = OptContext { catalog: &catalog };
        let (a, _) = memo.add_expr(scan("A"), vec![]);
        let (b, _) = memo.add_expr(scan("B"), vec![]);
        let (c, _) = memo.add_expr(scan("C"), vec![]);
        let (ab, _) = memo.add_expr(join(Expr::equi("A", "x", "B", "y")), vec![a, b]);
        let correlated = Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(Expr::Column(ColumnRef::qualified("C", "w"))),
            right: Box::new(Expr::OuterRef(ColumnRef::qualified("Q", "k"))),
        };
        let (_, abc) = memo.add_expr(join(correlated), vec![ab, c]);
        assert_eq!(
            JoinAssociativityRule.promise(&memo.expr(abc), &memo, &ctx),
            Promise::None
        );
    }
}
