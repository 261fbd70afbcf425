//! # Memo
//!
//! The memo is the search graph: a DAG of groups (equivalence classes), each owning
//! the candidate expressions known to produce the same logical output. Every
//! candidate expression references its inputs by *group*, so one expression stands
//! for every combination of alternatives below it.
//!
//! ## Ownership
//!
//! The memo is the sole owner of all groups and expressions. Both live in
//! append-only arenas and are addressed by dense `u32` indices ([`GroupId`],
//! [`ExprId`]), so child references are plain `Copy` values and nothing is ever
//! reference-counted by hand.
//!
//! ## Concurrency
//!
//! The scheduler's workers mutate the memo in parallel through `&Memo`:
//!
//! - The deduplication index is a `DashMap` keyed by (operator, child groups), so
//!   [`Memo::add_expr`] and [`Memo::add_expr_to_group`] are atomic insert-or-find
//!   operations and two workers can never insert the same shape twice.
//! - Each group has its own mutex: adding an expression to a group and setting its
//!   `explored` / `implemented` flags are serialized per group, while different
//!   groups proceed fully in parallel. The flag and the expression list sit under the
//!   same lock, which is what orders "exploration output visible" before "group
//!   marked explored".
//! - Lock order is: dedup shard, then arena, then group.

use crate::expr::Operator;
use crate::rule::{RuleId, RuleSet};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

pub type GroupId = u32;
pub type ExprId = u32;

/// A candidate expression: one operator over ordered child groups.
#[derive(Debug)]
pub struct MemoExpr {
    pub id: ExprId,
    pub group: GroupId,
    pub op: Operator,
    pub children: Vec<GroupId>,
    /// Rule that produced this expression; `None` for expressions of the input query.
    pub origin: Option<RuleId>,
    applied: Mutex<RuleSet>,
}

impl MemoExpr {
    pub fn is_logical(&self) -> bool {
        self.op.is_logical()
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }
}

/// Mutable part of a group, guarded by the group's lock.
#[derive(Debug, Default)]
struct GroupState {
    logical_exprs: Vec<ExprId>,
    physical_exprs: Vec<ExprId>,
    explored: bool,
    implemented: bool,
}

/// An equivalence class of candidate expressions.
#[derive(Debug)]
pub struct Group {
    pub id: GroupId,
    state: Mutex<GroupState>,
}

impl Group {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            state: Mutex::new(GroupState::default()),
        }
    }

    /// Snapshot of the logical expressions, in insertion order.
    pub fn logical_exprs(&self) -> Vec<ExprId> {
        self.state.lock().logical_exprs.clone()
    }

    /// Logical expressions inserted at position `start` or later.
    pub fn logical_exprs_from(&self, start: usize) -> Vec<ExprId> {
        let state = self.state.lock();
        state.logical_exprs.get(start..).unwrap_or(&[]).to_vec()
    }

    pub fn physical_exprs(&self) -> Vec<ExprId> {
        self.state.lock().physical_exprs.clone()
    }

    /// Logical then physical expressions.
    pub fn exprs(&self) -> Vec<ExprId> {
        let state = self.state.lock();
        state
            .logical_exprs
            .iter()
            .chain(state.physical_exprs.iter())
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.logical_exprs.len() + state.physical_exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_explored(&self) -> bool {
        self.state.lock().explored
    }

    pub fn is_implemented(&self) -> bool {
        self.state.lock().implemented
    }

    /// Set `explored` if the group holds no logical expression beyond the first
    /// `seen`. Returns `false` when newer expressions still need dispatching.
    pub fn seal_explored(&self, seen: usize) -> bool {
        let mut state = self.state.lock();
        if state.logical_exprs.len() > seen {
            return false;
        }
        state.explored = true;
        true
    }

    /// Same as [`Group::seal_explored`] for the `implemented` flag.
    pub fn seal_implemented(&self, seen: usize) -> bool {
        let mut state = self.state.lock();
        if state.logical_exprs.len() > seen {
            return false;
        }
        state.implemented = true;
        true
    }

    fn push(&self, expr: ExprId, logical: bool) {
        let mut state = self.state.lock();
        if logical {
            state.logical_exprs.push(expr);
        } else {
            state.physical_exprs.push(expr);
        }
    }
}

/// Outcome of inserting an expression into a specific group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// A new expression was appended to the target group.
    Added(ExprId),
    /// The target group already holds this expression.
    Duplicate(ExprId),
    /// An identical expression lives in a different group. Groups are not merged;
    /// the existing expression is reported and nothing is added.
    ElsewhereDuplicate { expr: ExprId, group: GroupId },
}

impl Insertion {
    pub fn expr(&self) -> ExprId {
        match *self {
            Insertion::Added(e) | Insertion::Duplicate(e) => e,
            Insertion::ElsewhereDuplicate { expr, .. } => expr,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Insertion::Added(_))
    }
}

type ExprKey = (Operator, Vec<GroupId>);

/// The search graph.
#[derive(Debug, Default)]
pub struct Memo {
    groups: RwLock<Vec<Arc<Group>>>,
    exprs: RwLock<Vec<Arc<MemoExpr>>>,
    index: DashMap<ExprKey, ExprId>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: GroupId) -> Arc<Group> {
        Arc::clone(&self.groups.read()[id as usize])
    }

    pub fn try_group(&self, id: GroupId) -> Option<Arc<Group>> {
        self.groups.read().get(id as usize).cloned()
    }

    pub fn expr(&self, id: ExprId) -> Arc<MemoExpr> {
        Arc::clone(&self.exprs.read()[id as usize])
    }

    pub fn try_expr(&self, id: ExprId) -> Option<Arc<MemoExpr>> {
        self.exprs.read().get(id as usize).cloned()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.read().len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.read().len()
    }

    /// Insert-or-find. A new shape gets its own new group; a known shape returns the
    /// existing (group, expression) pair.
    ///
    /// Join conditions are stored with their conjuncts in canonical order, so joins
    /// that differ only in conjunct order are one shape.
    pub fn add_expr(&self, op: Operator, children: Vec<GroupId>) -> (GroupId, ExprId) {
        self.add_expr_with_origin(op, children, None)
    }

    pub fn add_expr_with_origin(
        &self,
        op: Operator,
        children: Vec<GroupId>,
        origin: Option<RuleId>,
    ) -> (GroupId, ExprId) {
        match self.index.entry((op.canonicalized(), children)) {
            Entry::Occupied(e) => {
                let expr = self.expr(*e.get());
                (expr.group, expr.id)
            }
            Entry::Vacant(v) => {
                let group = {
                    let mut groups = self.groups.write();
                    let gid = groups.len() as GroupId;
                    groups.push(Arc::new(Group::new(gid)));
                    gid
                };
                let (op, children) = v.key().clone();
                let eid = self.push_expr(group, op, children, origin);
                v.insert(eid);
                (group, eid)
            }
        }
    }

    /// Insert an expression into `group`, deduplicating against the whole memo.
    pub fn add_expr_to_group(
        &self,
        group: GroupId,
        op: Operator,
        children: Vec<GroupId>,
        origin: Option<RuleId>,
    ) -> Insertion {
        match self.index.entry((op.canonicalized(), children)) {
            Entry::Occupied(e) => {
                let existing = self.expr(*e.get());
                if existing.group == group {
                    Insertion::Duplicate(existing.id)
                } else {
                    Insertion::ElsewhereDuplicate {
                        expr: existing.id,
                        group: existing.group,
                    }
                }
            }
            Entry::Vacant(v) => {
                let (op, children) = v.key().clone();
                let eid = self.push_expr(group, op, children, origin);
                v.insert(eid);
                Insertion::Added(eid)
            }
        }
    }

    fn push_expr(
        &self,
        group: GroupId,
        op: Operator,
        children: Vec<GroupId>,
        origin: Option<RuleId>,
    ) -> ExprId {
        let logical = op.is_logical();
        let eid = {
            let mut exprs = self.exprs.write();
            let eid = exprs.len() as ExprId;
            exprs.push(Arc::new(MemoExpr {
                id: eid,
                group,
                op,
                children,
                origin,
                applied: Mutex::new(RuleSet::new()),
            }));
            eid
        };
        self.group(group).push(eid, logical);
        eid
    }

    pub fn rule_applied(&self, expr: ExprId, rule: RuleId) -> bool {
        self.expr(expr).applied.lock().contains(rule)
    }

    /// Record that `rule` was applied to `expr`. Returns `false` if it already was,
    /// so concurrent callers agree on exactly one application.
    pub fn mark_rule_applied(&self, expr: ExprId, rule: RuleId) -> bool {
        self.expr(expr).applied.lock().insert(rule)
    }

    /// Groups reachable from `root` through child references, in BFS order.
    pub fn reachable_groups(&self, root: GroupId) -> Vec<GroupId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(gid) = queue.pop_front() {
            if !seen.insert(gid) {
                continue;
            }
            order.push(gid);
            for eid in self.group(gid).exprs() {
                queue.extend(self.expr(eid).children.iter().copied());
            }
        }
        order
    }

    /// Multi-line dump of every group and expression.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for gid in 0..self.num_groups() as GroupId {
            let group = self.group(gid);
            out.push_str(&format!(
                "group {} (explored={}, implemented={})\n",
                gid,
                group.is_explored(),
                group.is_implemented()
            ));
            for eid in group.exprs() {
                let e = self.expr(eid);
                out.push_str(&format!("  #{} {} {:?}\n", eid, e.op, e.children));
            }
        }
        out
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

    #[test]
    fn test_add_expr_deduplicates() {
        let memo = Memo::new();
        let (g1, e1) = memo.add_expr(scan("a"), vec![]);
        let (g2, e2) = memo.add_expr(scan("a"), vec![]);
        assert_eq!((g1, e1), (g2, e2));
        assert_eq!(memo.num_groups(), 1);
        assert_eq!(memo.num_exprs(), 1);
    }

    #[test]
    fn test_add_expr_to_group() {
        let memo = Memo::new();
        let (ga, _) = memo.add_expr(scan("a"), vec![]);
        let (gb, _) = memo.add_expr(scan("b"), vec![]);
        let join = |l, r| {
            (
                Operator::Logical(LogicalOp::Join {
                    join_type: JoinType::Inner,
                    condition: Expr::true_lit(),
                }),
                vec![l, r],
            )
        };
        let (op, children) = join(ga, gb);
        let (gj, _) = memo.add_expr(op, children);

        let (op, children) = join(gb, ga);
        let ins = memo.add_expr_to_group(gj, op, children, Some(RuleId(0)));
        assert!(ins.is_new());
        assert_eq!(memo.group(gj).logical_exprs().len(), 2);
        assert_eq!(memo.expr(ins.expr()).origin, Some(RuleId(0)));

        let (op, children) = join(gb, ga);
        assert_eq!(
            memo.add_expr_to_group(gj, op, children, None),
            Insertion::Duplicate(ins.expr())
        );

        // The same shape aimed at another group is reported, not copied.
        let ins = memo.add_expr_to_group(ga, scan("b"), vec![], None);
        assert!(matches!(ins, Insertion::ElsewhereDuplicate { group, .. } if group == gb));
        assert_eq!(memo.group(ga).len(), 1);
    }

    #[test]
    fn test_join_conditions_dedup_regardless_of_conjunct_order() {
        let memo = Memo::new();
        let (ga, _) = memo.add_expr(scan("a"), vec![]);
        let (gb, _) = memo.add_expr(scan("b"), vec![]);
        let join = |conjuncts: Vec<Expr>| {
            Operator::Logical(LogicalOp::Join {
                join_type: JoinType::Inner,
                condition: Expr::And(conjuncts),
            })
        };
        let x = Expr::equi("a", "x", "b", "x");
        let y = Expr::equi("a", "y", "b", "y");
        let (gj, ej) = memo.add_expr(join(vec![y.clone(), x.clone()]), vec![ga, gb]);
        assert_eq!(
            memo.add_expr_to_group(gj, join(vec![x.clone(), y.clone()]), vec![ga, gb], None),
            Insertion::Duplicate(ej)
        );
        assert_eq!(memo.add_expr(join(vec![x.clone(), y.clone()]), vec![ga, gb]), (gj, ej));
        let Operator::Logical(LogicalOp::Join { condition, .. }) = &memo.expr(ej).op else {
            panic!("expected a join");
        };
        assert_eq!(condition, &Expr::And(vec![x, y]));
    }

    #[test]
    fn test_flags_set_once() {
        let memo = Memo::new();
        let (g, e) = memo.add_expr(scan("a"), vec![]);
        let group = memo.group(g);
        // One logical expression exists, so sealing after dispatching none fails.
        assert!(!group.seal_explored(0));
        assert!(!group.is_explored());
        assert!(group.seal_explored(1));
        assert!(group.is_explored());
        assert!(!group.is_implemented());

        // A later expression does not clear a sealed flag.
        memo.add_expr_to_group(
            g,
            Operator::Logical(LogicalOp::Filter {
                predicate: Expr::true_lit(),
            }),
            vec![],
            None,
        );
        assert!(!group.seal_implemented(1));
        assert!(group.is_explored());
        assert!(!group.is_implemented());
        assert!(group.seal_implemented(2));
        assert!(group.is_implemented());

        assert!(memo.mark_rule_applied(e, RuleId(3)));
        assert!(!memo.mark_rule_applied(e, RuleId(3)));
        assert!(memo.rule_applied(e, RuleId(3)));
        assert!(!memo.rule_applied(e, RuleId(4)));
    }

    #[test]
    fn test_reachable_groups() {
        let memo = Memo::new();
        let (ga, _) = memo.add_expr(scan("a"), vec![]);
        let (_unrelated, _) = memo.add_expr(scan("z"), vec![]);
        let (gf, _) = memo.add_expr(
            Operator::Logical(LogicalOp::Filter {
                predicate: Expr::true_lit(),
            }),
            vec![ga],
        );
        assert_eq!(memo.reachable_groups(gf), vec![gf, ga]);
    }
}
