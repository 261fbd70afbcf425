//! # Plan Space
//!
//! Feeds the memo, from a root group, into a [`TreeMap`] so every concrete plan the
//! search found can be counted, addressed by rank, sampled or listed.
//!
//! Tree-map nodes are memo expressions of one [`PlanKind`]. An expression with `n`
//! children is declared with `n` slots, and slot `i` holds every expression of the
//! same kind in child group `i`. Expressions of the root group are the top-level
//! alternatives. Only groups reached this way are loaded, so a group that no
//! expression of the chosen kind refers to does not contribute stray subtrees.

use crate::error::{OptError, Result};
use crate::expr::Operator;
use crate::memo::{ExprId, Group, GroupId, Memo};
use crate::tree_map::TreeMap;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// One operator of a concrete plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    pub group: GroupId,
    pub expr: ExprId,
    pub op: Operator,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Number of operators in the tree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(PlanNode::size).sum::<usize>()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} [group {}, #{}]",
            "",
            self.op,
            self.group,
            self.expr,
            indent = depth * 2
        )?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

/// Which expressions of each group make up the plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Physical,
    Logical,
}

impl PlanKind {
    fn exprs(self, group: &Group) -> Vec<ExprId> {
        match self {
            PlanKind::Physical => group.physical_exprs(),
            PlanKind::Logical => group.logical_exprs(),
        }
    }
}

type Rehydrate = fn(&ExprId, Vec<PlanNode>, &Memo) -> PlanNode;

fn rehydrate(expr: &ExprId, children: Vec<PlanNode>, memo: &Memo) -> PlanNode {
    let e = memo.expr(*expr);
    PlanNode {
        group: e.group,
        expr: e.id,
        op: e.op.clone(),
        children,
    }
}

/// All plans of one kind below a root group. Unrank against the memo the space was
/// built from.
pub struct PlanSpace {
    map: TreeMap<ExprId, PlanNode, Memo, Rehydrate>,
    kind: PlanKind,
}

impl PlanSpace {
    pub fn build(memo: &Memo, root: GroupId, kind: PlanKind) -> Result<Self> {
        let root_group = memo
            .try_group(root)
            .ok_or_else(|| OptError::GraphCorruption(format!("unknown root group {root}")))?;
        let mut map = TreeMap::new(rehydrate as Rehydrate);
        for expr in kind.exprs(&root_group) {
            map.insert_root(expr);
        }

        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(gid) = queue.pop_front() {
            for eid in kind.exprs(&memo.group(gid)) {
                let expr = memo.expr(eid);
                map.insert_node(eid, expr.arity());
                for (slot, &child) in expr.children.iter().enumerate() {
                    let child_group = memo.try_group(child).ok_or_else(|| {
                        OptError::GraphCorruption(format!("expression {eid} has unknown child {child}"))
                    })?;
                    for alt in kind.exprs(&child_group) {
                        map.insert_edge(eid, slot, alt)?;
                    }
                    if seen.insert(child) {
                        queue.push_back(child);
                    }
                }
            }
        }
        debug!(root, ?kind, nodes = map.len(), "plan space built");
        Ok(Self { map, kind })
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Number of distinct plans, saturating at `u64::MAX`.
    pub fn count(&mut self) -> Result<u64> {
        self.map.count()
    }

    pub fn unrank(&mut self, rank: u64, memo: &Memo) -> Result<PlanNode> {
        self.map.unrank(rank, memo)
    }

    /// `n` plans drawn uniformly at random, with replacement.
    pub fn sample<G: Rng + ?Sized>(
        &mut self,
        rng: &mut G,
        n: usize,
        memo: &Memo,
    ) -> Result<Vec<PlanNode>> {
        let count = self.count()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        (0..n)
            .map(|_| self.map.unrank(rng.gen_range(0..count), memo))
            .collect()
    }

    /// The first `limit` plans in rank order, or all of them if there are fewer.
    pub fn plans(&mut self, limit: usize, memo: &Memo) -> Result<Vec<PlanNode>> {
        let count = self.count()?.min(limit as u64);
        (0..count).map(|rank| self.map.unrank(rank, memo)).collect()
    }

    /// Plans below one expression, as of the last count.
    pub fn count_of(&self, expr: ExprId) -> Option<u64> {
        self.map.count_of(&expr)
    }
}

impl fmt::Display for PlanSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.map)
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

    fn seq_scan(name: &str) -> Operator {
        Operator::Physical(PhysicalOp::SeqScan {
            table: TableRef::new("s", name),
            columns: vec![],
            predicate: None,
        })
    }

    #[test]
    fn test_logical_and_physical_spaces() {
        let memo = Memo::new();
        let (a, _) = memo.add_expr(scan("a"), vec![]);
        let (b, _) = memo.add_expr(scan("b"), vec![]);
        memo.add_expr_to_group(a, seq_scan("a"), vec![], None);
        memo.add_expr_to_group(b, seq_scan("b"), vec![], None);
        let join = || {
            Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: Expr::equi("a", "x", "b", "y"),
            })
        };
        let (j, _) = memo.add_expr(join(), vec![a, b]);
        memo.add_expr_to_group(j, join(), vec![b, a], None);
        for build_side in [BuildSide::Left, BuildSide::Right] {
            let op = Operator::Physical(PhysicalOp::HashJoin {
                join_type: JoinType::Inner,
                build_side,
                condition: Expr::equi("a", "x", "b", "y"),
            });
            memo.add_expr_to_group(j, op, vec![a, b], None);
        }

        let mut logical = PlanSpace::build(&memo, j, PlanKind::Logical).unwrap();
        assert_eq!(logical.count().unwrap(), 2);
        let mut physical = PlanSpace::build(&memo, j, PlanKind::Physical).unwrap();
        assert_eq!(physical.count().unwrap(), 2);

        let plans = physical.plans(10, &memo).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(physical.plans(1, &memo).unwrap(), plans[..1]);
        assert_ne!(plans[0], plans[1]);
        assert!(plans.iter().all(|p| p.size() == 3 && p.op.is_physical()));
        assert!(plans[0].to_string().contains("SeqScan"));
    }
}
