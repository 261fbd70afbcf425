//! # Search Scheduler
//!
//! Runs the Cascades search to closure: starting from the root group, every group
//! reachable from it is explored with the exploration rules and then implemented with
//! the implementation rules, until no job remains.
//!
//! ## Execution Model
//!
//! A fixed pool of worker threads shares one FIFO ready queue ([`JobQueue`]). Workers
//! pop a job, run one step of it and report the outcome back to the queue. A job
//! that needs sub-work suspends instead of blocking, so a worker is never tied up
//! waiting on another job and a pool of one thread runs the same search as a pool of
//! sixteen.
//!
//! ## Failure
//!
//! The first fatal error (a structural cycle, an exhausted job budget, a fatal rule
//! error, cancellation) stops every worker and is returned from
//! [`Scheduler::run_to_closure`]. After a failed or cancelled run the memo may hold
//! half-explored groups and must not be enumerated.

use crate::catalog::Catalog;
use crate::error::{OptError, Result};
use crate::job::{Goal, JobContext, Request, RunCounters};
use crate::memo::{GroupId, Memo};
use crate::queue::JobQueue;
use crate::rule::RuleRegistry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// Configuration knobs for one search run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Upper bound on the number of jobs created in one run.
    pub max_jobs: usize,
    /// Optional connector/source type name used to select connector-specific rules.
    pub source_type: Option<String>,
    /// Run the implementation phase after exploration.
    pub implement: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            max_jobs: 1_000_000,
            source_type: None,
            implement: true,
        }
    }
}

/// Run-scoped cancellation flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters of the last run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub jobs_created: usize,
    pub jobs_executed: usize,
    pub rules_applied: usize,
    pub exprs_added: usize,
}

pub struct Scheduler {
    pub memo: Memo,
    pub rule_registry: Arc<RuleRegistry>,
    pub catalog: Arc<dyn Catalog>,
    pub config: SearchConfig,
    cancel: CancellationToken,
    stats: RunStats,
}

impl Scheduler {
    pub fn new(
        memo: Memo,
        rule_registry: Arc<RuleRegistry>,
        catalog: Arc<dyn Catalog>,
        config: SearchConfig,
    ) -> Self {
        Self {
            memo,
            rule_registry,
            catalog,
            config,
            cancel: CancellationToken::new(),
            stats: RunStats::default(),
        }
    }

    /// Use `token` instead of the scheduler's own, so a caller that created it
    /// earlier (a timeout, a rule, another search) can stop the runs.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels the runs of this scheduler from any thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Explore (and, if configured, implement) every group reachable from `root`.
    ///
    /// Running again over the same memo is a no-op: groups already carrying their
    /// flags complete immediately and no rule is applied twice to an expression.
    pub fn run_to_closure(&mut self, root: GroupId) -> Result<()> {
        if self.memo.try_group(root).is_none() {
            return Err(OptError::GraphCorruption(format!("unknown root group {root}")));
        }
        let goal = if self.config.implement {
            Goal::Implement
        } else {
            Goal::Explore
        };
        let workers = self.config.workers.max(1);
        debug!(
            root,
            workers,
            ?goal,
            groups = self.memo.num_groups(),
            exprs = self.memo.num_exprs(),
            "starting search"
        );

        let cx = JobContext {
            memo: &self.memo,
            registry: &self.rule_registry,
            catalog: self.catalog.as_ref(),
            mask: self
                .rule_registry
                .source_mask(self.config.source_type.as_deref()),
            counters: RunCounters::default(),
        };
        let queue = JobQueue::new(self.config.max_jobs);
        let outcome = queue.seed(Request::Group(root, goal)).and_then(|()| {
            thread::scope(|s| {
                for _ in 0..workers {
                    s.spawn(|| work(&queue, &cx, &self.cancel));
                }
            });
            queue.finish()
        });

        self.stats = RunStats {
            jobs_created: queue.jobs_created(),
            jobs_executed: cx.counters.jobs_executed.load(Ordering::Relaxed),
            rules_applied: cx.counters.rules_applied.load(Ordering::Relaxed),
            exprs_added: cx.counters.exprs_added.load(Ordering::Relaxed),
        };
        match &outcome {
            Ok(()) => debug!(
                groups = self.memo.num_groups(),
                exprs = self.memo.num_exprs(),
                stats = ?self.stats,
                "search complete"
            ),
            Err(err) => debug!(%err, stats = ?self.stats, "search aborted"),
        }
        outcome
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn into_memo(self) -> Memo {
        self.memo
    }
}

fn work(queue: &JobQueue, cx: &JobContext, cancel: &CancellationToken) {
    while let Some((id, job)) = queue.next(cancel) {
        trace!(job = id, "running {job}");
        queue.settle(id, job.step(cx));
    }
}
