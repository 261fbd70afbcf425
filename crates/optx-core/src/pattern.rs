//! # Pattern Matching for Rules
//!
//! Each rule declares a [`Pattern`] describing the expression shape it applies to.
//! The scheduler checks the pattern before spawning a rule-application job, so a
//! rule's `apply` is only called on expressions of the right shape.
//!
//! - `Pattern::Operator(matcher, children)`: the operator kind must satisfy
//!   `matcher` and the arity must equal `children.len()`. Each non-`Any` child
//!   pattern must be matched by *at least one* expression of the corresponding child
//!   group, since every expression in a group is interchangeable.
//! - `Pattern::Any`: matches anything; children the rule does not inspect.
//! - `Pattern::Leaf`: matches expressions without children.

use crate::expr::{LogicalOpKind, Operator, PhysicalOpKind};
use crate::memo::{ExprId, Memo};

#[derive(Debug, Clone)]
pub enum Pattern {
    Operator(OpMatcher, Vec<Pattern>),
    Any,
    Leaf,
}

#[derive(Debug, Clone)]
pub enum OpMatcher {
    LogicalOp(LogicalOpKind),
    PhysicalOp(PhysicalOpKind),
    AnyLogical,
    AnyPhysical,
}

impl OpMatcher {
    fn accepts(&self, op: &Operator) -> bool {
        match (op, self) {
            (Operator::Logical(l), OpMatcher::LogicalOp(kind)) => l.kind() == *kind,
            (Operator::Physical(p), OpMatcher::PhysicalOp(kind)) => p.kind() == *kind,
            (Operator::Logical(_), OpMatcher::AnyLogical) => true,
            (Operator::Physical(_), OpMatcher::AnyPhysical) => true,
            _ => false,
        }
    }
}

impl Pattern {
    /// A logical operator of `kind` over `arity` unconstrained children.
    pub fn logical(kind: LogicalOpKind, arity: usize) -> Self {
        Pattern::Operator(OpMatcher::LogicalOp(kind), vec![Pattern::Any; arity])
    }

    pub fn join() -> Self {
        Self::logical(LogicalOpKind::Join, 2)
    }

    /// `Join(Join(_, _), _)`.
    pub fn join_join_left() -> Self {
        Pattern::Operator(
            OpMatcher::LogicalOp(LogicalOpKind::Join),
            vec![Self::join(), Pattern::Any],
        )
    }

    pub fn scan() -> Self {
        Self::logical(LogicalOpKind::Scan, 0)
    }

    /// `Filter(Join(_, _))`.
    pub fn filter_join() -> Self {
        Pattern::Operator(OpMatcher::LogicalOp(LogicalOpKind::Filter), vec![Self::join()])
    }
}

/// Check if a memo expression matches a pattern.
pub fn matches(memo: &Memo, expr_id: ExprId, pattern: &Pattern) -> bool {
    let expr = memo.expr(expr_id);
    match pattern {
        Pattern::Any => true,
        Pattern::Leaf => expr.children.is_empty(),
        Pattern::Operator(matcher, child_patterns) => {
            if !matcher.accepts(&expr.op) || expr.children.len() != child_patterns.len() {
                return false;
            }
            expr.children
                .iter()
                .zip(child_patterns)
                .all(|(&child_gid, child_pattern)| match child_pattern {
                    Pattern::Any => true,
                    _ => memo
                        .group(child_gid)
                        .exprs()
                        .into_iter()
                        .any(|eid| matches(memo, eid, child_pattern)),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::*;

    fn scan(name: &str) -> Operator {
        Operator::Logical(LogicalOp::Scan {
            table: TableRef::new("s", name),
            columns: vec![],
            predicate: None,
        })
    }

    fn join() -> Operator {
        Operator::Logical(LogicalOp::Join {
            join_type: JoinType::Inner,
            condition: Expr::true_lit(),
        })
    }

    #[test]
    fn test_nested_pattern() {
        let memo = Memo::new();
        let (a, ea) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        let (c, _) = memo.add_expr(scan("c"), vec![]);
        let (ab, eab) = memo.add_expr(join(), vec![a, b]);
        let (_, eabc) = memo.add_expr(join(), vec![ab, c]);
        let (_, ecab) = memo.add_expr(join(), vec![c, ab]);

        assert!(matches(&memo, eabc, &Pattern::join_join_left()));
        assert!(!matches(&memo, ecab, &Pattern::join_join_left()));
        assert!(!matches(&memo, eab, &Pattern::join_join_left()));
        assert!(matches(&memo, ea, &Pattern::scan()));
        assert!(matches(&memo, ea, &Pattern::Leaf));
        assert!(!matches(&memo, eab, &Pattern::Leaf));
    }
}
