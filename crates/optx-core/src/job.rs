//! # Optimization Jobs
//!
//! A job is one resumable unit of search work. Jobs never block: a step either
//! finishes ([`JobStep::Done`]) or hands itself back together with the sub-work it
//! needs ([`JobStep::Suspend`]). The [`JobQueue`](crate::queue::JobQueue) parks a
//! suspended job until every request is satisfied and then re-enqueues it, so a
//! job's fields double as its continuation state.
//!
//! ## Job Kinds
//!
//! - [`GroupJob`]: drives one group to a [`Goal`]. It dispatches an expression job
//!   for every logical expression it has not dispatched yet, waits for them, and
//!   re-scans: rule application may have appended new expressions to the group in
//!   the meantime. Only when a scan finds nothing new does it seal the group's flag.
//!   An `Implement` goal first requires the same group's `Explore` goal.
//! - [`ExprJob`]: for one logical expression, first requires every child group to
//!   reach the same goal, then dispatches one rule-application job per applicable
//!   rule. Each of the two stages runs at most once (`children_scheduled`,
//!   `rules_scheduled`).
//! - [`ApplyRuleJob`]: applies one rule to one expression and inserts the results
//!   into the expression's group.
//!
//! ```text
//! GroupJob(g, Implement)
//!   ├─ GroupJob(g, Explore)
//!   │    └─ ExprJob(e, Explore) ─┬─ GroupJob(child, Explore) ...
//!   │                            └─ ApplyRuleJob(JoinCommutativity, e)
//!   └─ ExprJob(e, Implement) ────┬─ GroupJob(child, Implement) ...
//!                                └─ ApplyRuleJob(ImplHashJoin, e)
//! ```

use crate::catalog::Catalog;
use crate::error::{OptError, Result, RuleError};
use crate::memo::{ExprId, GroupId, Insertion, Memo, MemoExpr};
use crate::pattern::matches;
use crate::rule::{OptContext, Promise, RuleChild, RuleId, RuleRegistry, RuleResult, RuleSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

/// Phase a group or expression is driven to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Goal {
    /// All exploration rules applied to every logical expression.
    Explore,
    /// Explored, and all implementation rules applied.
    Implement,
}

impl Goal {
    pub fn reached(self, memo: &Memo, group: GroupId) -> Result<bool> {
        let group = memo
            .try_group(group)
            .ok_or_else(|| OptError::GraphCorruption(format!("unknown group {group}")))?;
        Ok(match self {
            Goal::Explore => group.is_explored(),
            Goal::Implement => group.is_implemented(),
        })
    }
}

/// Sub-work a suspended job waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Group(GroupId, Goal),
    Expression(ExprId, Goal),
    ApplyRule(RuleId, ExprId),
}

pub enum JobStep {
    Done,
    Suspend(Job, Vec<Request>),
}

/// Counters shared by all workers of one run.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub jobs_executed: AtomicUsize,
    pub rules_applied: AtomicUsize,
    pub exprs_added: AtomicUsize,
}

/// Read-only view of the run handed to every job step.
pub struct JobContext<'a> {
    pub memo: &'a Memo,
    pub registry: &'a RuleRegistry,
    pub catalog: &'a dyn Catalog,
    /// Rules active for this run's source type.
    pub mask: RuleSet,
    pub counters: RunCounters,
}

impl JobContext<'_> {
    fn opt_context(&self) -> OptContext<'_> {
        OptContext {
            catalog: self.catalog,
        }
    }
}

#[derive(Debug)]
pub enum Job {
    Group(GroupJob),
    Expression(ExprJob),
    ApplyRule(ApplyRuleJob),
}

impl Job {
    pub fn from_request(request: Request) -> Self {
        match request {
            Request::Group(group, goal) => Job::Group(GroupJob::new(group, goal)),
            Request::Expression(expr, goal) => Job::Expression(ExprJob::new(expr, goal)),
            Request::ApplyRule(rule, expr) => Job::ApplyRule(ApplyRuleJob { rule, expr }),
        }
    }

    pub fn step(self, cx: &JobContext) -> Result<JobStep> {
        cx.counters.jobs_executed.fetch_add(1, Ordering::Relaxed);
        match self {
            Job::Group(job) => job.step(cx),
            Job::Expression(job) => job.step(cx),
            Job::ApplyRule(job) => job.step(cx),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Group(j) => write!(f, "group({}, {:?})", j.group, j.goal),
            Job::Expression(j) => write!(f, "expr({}, {:?})", j.expr, j.goal),
            Job::ApplyRule(j) => write!(f, "apply({}, expr {})", j.rule, j.expr),
        }
    }
}

#[derive(Debug)]
pub struct GroupJob {
    pub group: GroupId,
    pub goal: Goal,
    explore_required: bool,
    /// Logical expressions already dispatched, in the group's insertion order.
    dispatched: usize,
}

impl GroupJob {
    pub fn new(group: GroupId, goal: Goal) -> Self {
        Self {
            group,
            goal,
            explore_required: false,
            dispatched: 0,
        }
    }

    fn step(mut self, cx: &JobContext) -> Result<JobStep> {
        if self.goal.reached(cx.memo, self.group)? {
            return Ok(JobStep::Done);
        }
        let group = cx.memo.group(self.group);

        if self.goal == Goal::Implement && !self.explore_required {
            self.explore_required = true;
            if !group.is_explored() {
                let request = Request::Group(self.group, Goal::Explore);
                return Ok(JobStep::Suspend(Job::Group(self), vec![request]));
            }
        }

        let fresh = group.logical_exprs_from(self.dispatched);
        if !fresh.is_empty() {
            trace!(
                group = self.group,
                goal = ?self.goal,
                count = fresh.len(),
                "dispatching expressions"
            );
            self.dispatched += fresh.len();
            let goal = self.goal;
            let requests = fresh
                .into_iter()
                .map(|e| Request::Expression(e, goal))
                .collect();
            return Ok(JobStep::Suspend(Job::Group(self), requests));
        }

        let sealed = match self.goal {
            Goal::Explore => group.seal_explored(self.dispatched),
            Goal::Implement => group.seal_implemented(self.dispatched),
        };
        if sealed {
            trace!(group = self.group, goal = ?self.goal, "group sealed");
            Ok(JobStep::Done)
        } else {
            // Something appeared between the scan and the seal; scan again.
            Ok(JobStep::Suspend(Job::Group(self), vec![]))
        }
    }
}

#[derive(Debug)]
pub struct ExprJob {
    pub expr: ExprId,
    pub goal: Goal,
    children_scheduled: bool,
    rules_scheduled: bool,
}

impl ExprJob {
    pub fn new(expr: ExprId, goal: Goal) -> Self {
        Self {
            expr,
            goal,
            children_scheduled: false,
            rules_scheduled: false,
        }
    }

    fn step(mut self, cx: &JobContext) -> Result<JobStep> {
        let expr = cx
            .memo
            .try_expr(self.expr)
            .ok_or_else(|| OptError::GraphCorruption(format!("unknown expression {}", self.expr)))?;

        if !self.children_scheduled {
            self.children_scheduled = true;
            let mut requests = Vec::with_capacity(expr.children.len());
            for &child in &expr.children {
                let request = Request::Group(child, self.goal);
                if !requests.contains(&request) {
                    requests.push(request);
                }
            }
            if !requests.is_empty() {
                return Ok(JobStep::Suspend(Job::Expression(self), requests));
            }
        }

        if !self.rules_scheduled {
            // Implementation rules only see a fully explored group.
            if self.goal == Goal::Implement && !Goal::Explore.reached(cx.memo, expr.group)? {
                let request = Request::Group(expr.group, Goal::Explore);
                return Ok(JobStep::Suspend(Job::Expression(self), vec![request]));
            }
            self.rules_scheduled = true;
            let requests: Vec<Request> = self
                .applicable_rules(&expr, cx)?
                .into_iter()
                .map(|rule| Request::ApplyRule(rule, self.expr))
                .collect();
            if !requests.is_empty() {
                return Ok(JobStep::Suspend(Job::Expression(self), requests));
            }
        }

        Ok(JobStep::Done)
    }

    /// Rules to dispatch for this expression, highest promise first, ties by id.
    fn applicable_rules(&self, expr: &MemoExpr, cx: &JobContext) -> Result<Vec<RuleId>> {
        let phase = match self.goal {
            Goal::Explore => cx.registry.exploration_set(),
            Goal::Implement => cx.registry.implementation_set(),
        };
        let ctx = cx.opt_context();
        let mut candidates: Vec<(Promise, RuleId)> = Vec::new();
        for id in phase.intersection(&cx.mask).iter() {
            if cx.memo.rule_applied(expr.id, id) {
                continue;
            }
            if !cx.registry.is_compatible(id, expr.origin) {
                trace!(rule = %id, expr = expr.id, "skipping incompatible rule");
                continue;
            }
            let rule = cx.registry.lookup(id)?;
            if !matches(cx.memo, expr.id, &rule.pattern()) {
                continue;
            }
            let promise = rule.promise(expr, cx.memo, &ctx);
            if promise == Promise::None {
                trace!(rule = rule.name(), expr = expr.id, "rule has no promise");
                continue;
            }
            candidates.push((promise, id));
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(candidates.into_iter().map(|(_, id)| id).collect())
    }
}

#[derive(Debug)]
pub struct ApplyRuleJob {
    pub rule: RuleId,
    pub expr: ExprId,
}

impl ApplyRuleJob {
    fn step(self, cx: &JobContext) -> Result<JobStep> {
        if !cx.memo.mark_rule_applied(self.expr, self.rule) {
            return Ok(JobStep::Done);
        }
        let rule = cx.registry.lookup(self.rule)?;
        let expr = cx.memo.expr(self.expr);
        cx.counters.rules_applied.fetch_add(1, Ordering::Relaxed);

        let results = match rule.apply(&expr, cx.memo, &cx.opt_context()) {
            Ok(results) => results,
            Err(RuleError::Recoverable(message)) => {
                warn!(rule = rule.name(), expr = expr.id, %message, "rule failed, skipping");
                return Ok(JobStep::Done);
            }
            Err(RuleError::Fatal(message)) => {
                return Err(OptError::RuleFailed {
                    rule: rule.name().to_string(),
                    group: expr.group,
                    message,
                });
            }
        };

        for result in results {
            let (op, children) = match result {
                RuleResult::Substitution(op, children) => {
                    self.check_groups(cx.memo, &children)?;
                    (op, children)
                }
                RuleResult::NewChildren(op, children) => {
                    let children = children
                        .into_iter()
                        .map(|c| self.materialize(cx.memo, c))
                        .collect::<Result<Vec<_>>>()?;
                    (op, children)
                }
            };
            let insertion = cx
                .memo
                .add_expr_to_group(expr.group, op, children, Some(self.rule));
            if let Insertion::Added(new_expr) = insertion {
                cx.counters.exprs_added.fetch_add(1, Ordering::Relaxed);
                trace!(
                    rule = rule.name(),
                    expr = new_expr,
                    group = expr.group,
                    "created expression"
                );
            }
        }
        Ok(JobStep::Done)
    }

    /// Insert a new sub-expression bottom-up and return the group holding it.
    fn materialize(&self, memo: &Memo, child: RuleChild) -> Result<GroupId> {
        match child {
            RuleChild::Group(group) => {
                self.check_groups(memo, &[group])?;
                Ok(group)
            }
            RuleChild::NewExpr(op, children) => {
                let children = children
                    .into_iter()
                    .map(|c| self.materialize(memo, c))
                    .collect::<Result<Vec<_>>>()?;
                let (group, _) = memo.add_expr_with_origin(op, children, Some(self.rule));
                Ok(group)
            }
        }
    }

    fn check_groups(&self, memo: &Memo, groups: &[GroupId]) -> Result<()> {
        match groups.iter().find(|&&g| memo.try_group(g).is_none()) {
            Some(g) => Err(OptError::GraphCorruption(format!(
                "rule {} referenced unknown group {}",
                self.rule, g
            ))),
            None => Ok(()),
        }
    }
}
