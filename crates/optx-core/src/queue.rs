//! Shared ready queue and pending map for the scheduler's workers.
//!
//! Every job lives in one [`JobEntry`] from creation to completion. A suspended job
//! is parked in its entry with a countdown of the requests it still waits for; the
//! last completing child puts it back on the ready queue. Requests for a group or
//! expression that already has an active job join that job as an additional waiter
//! instead of creating a second one.

use crate::error::{OptError, Result};
use crate::job::{Goal, Job, JobStep, Request};
use crate::memo::{ExprId, GroupId};
use crate::rule::RuleId;
use crate::scheduler::CancellationToken;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::trace;

pub type JobId = usize;

const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum JobKey {
    Group(GroupId, Goal),
    Expression(ExprId, Goal),
    ApplyRule(RuleId, ExprId),
}

impl From<Request> for JobKey {
    fn from(request: Request) -> Self {
        match request {
            Request::Group(g, goal) => JobKey::Group(g, goal),
            Request::Expression(e, goal) => JobKey::Expression(e, goal),
            Request::ApplyRule(r, e) => JobKey::ApplyRule(r, e),
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    /// `None` while the job is queued-and-taken or running.
    job: Option<Job>,
    key: JobKey,
    pending: usize,
    waiters: Vec<JobId>,
    waiting_on: Vec<JobId>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<JobId, JobEntry>,
    ready: VecDeque<JobId>,
    active: HashMap<JobKey, JobId>,
    next_id: JobId,
    created: usize,
    running: usize,
    root: Option<JobId>,
    finished: bool,
    failure: Option<OptError>,
}

impl QueueState {
    fn create(&mut self, request: Request, max_jobs: usize) -> Result<JobId> {
        if self.created >= max_jobs {
            return Err(OptError::ResourceExhausted { limit: max_jobs });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.created += 1;
        let key = JobKey::from(request);
        self.entries.insert(
            id,
            JobEntry {
                job: Some(Job::from_request(request)),
                key,
                pending: 0,
                waiters: Vec::new(),
                waiting_on: Vec::new(),
            },
        );
        self.active.insert(key, id);
        self.ready.push_back(id);
        Ok(id)
    }

    /// Whether `from` transitively waits on `target`.
    fn waits_on(&self, from: JobId, target: JobId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            for &next in &entry.waiting_on {
                if next == target {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }

    fn suspend(
        &mut self,
        id: JobId,
        job: Job,
        requests: Vec<Request>,
        max_jobs: usize,
    ) -> Result<()> {
        let mut edges = Vec::with_capacity(requests.len());
        for request in requests {
            let child = match self.active.get(&JobKey::from(request)) {
                Some(&active) => {
                    if active == id || self.waits_on(active, id) {
                        return Err(OptError::StructuralCycle(format!(
                            "{job} requested {request:?}, which already waits on it"
                        )));
                    }
                    active
                }
                None => self.create(request, max_jobs)?,
            };
            edges.push(child);
        }

        for &child in &edges {
            if let Some(entry) = self.entries.get_mut(&child) {
                entry.waiters.push(id);
            }
        }
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| OptError::GraphCorruption(format!("job {id} has no entry")))?;
        entry.pending = edges.len();
        entry.waiting_on = edges;
        entry.job = Some(job);
        if entry.pending == 0 {
            self.ready.push_back(id);
        }
        Ok(())
    }

    fn complete(&mut self, id: JobId) -> Result<()> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or_else(|| OptError::GraphCorruption(format!("job {id} has no entry")))?;
        self.active.remove(&entry.key);
        for waiter in entry.waiters {
            let Some(parent) = self.entries.get_mut(&waiter) else {
                continue;
            };
            parent.pending = parent.pending.saturating_sub(1);
            if let Some(pos) = parent.waiting_on.iter().position(|&w| w == id) {
                parent.waiting_on.swap_remove(pos);
            }
            if parent.pending == 0 {
                self.ready.push_back(waiter);
            }
        }
        if self.root == Some(id) {
            self.finished = true;
        }
        Ok(())
    }

    fn fail(&mut self, err: OptError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.ready.clear();
    }
}

/// The pending map plus the FIFO ready queue, shared by all workers of a run.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    wakeup: Condvar,
    max_jobs: usize,
}

impl JobQueue {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Condvar::new(),
            max_jobs,
        }
    }

    /// Enqueue the root job. The run is finished once it completes.
    pub fn seed(&self, root: Request) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.create(root, self.max_jobs)?;
        state.root = Some(id);
        Ok(())
    }

    /// Block until a job is ready. Returns `None` once the run is over, whether it
    /// finished, failed, was cancelled or stalled.
    pub fn next(&self, cancel: &CancellationToken) -> Option<(JobId, Job)> {
        let mut state = self.state.lock();
        loop {
            if state.finished || state.failure.is_some() {
                return None;
            }
            if cancel.is_cancelled() {
                state.fail(OptError::Cancelled);
                self.wakeup.notify_all();
                return None;
            }
            if let Some(id) = state.ready.pop_front() {
                if let Some(job) = state.entries.get_mut(&id).and_then(|e| e.job.take()) {
                    state.running += 1;
                    return Some((id, job));
                }
                continue;
            }
            if state.running == 0 {
                let pending = state.entries.len();
                state.fail(OptError::GraphCorruption(format!(
                    "scheduler stalled with {pending} suspended jobs"
                )));
                self.wakeup.notify_all();
                return None;
            }
            self.wakeup.wait_for(&mut state, IDLE_POLL);
        }
    }

    /// Record the outcome of one step of job `id`.
    pub fn settle(&self, id: JobId, outcome: Result<JobStep>) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        let result = match outcome {
            Ok(JobStep::Done) => state.complete(id),
            Ok(JobStep::Suspend(job, requests)) => {
                trace!(job = id, requests = requests.len(), "suspending {job}");
                state.suspend(id, job, requests, self.max_jobs)
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            state.fail(err);
        }
        self.wakeup.notify_all();
    }

    pub fn jobs_created(&self) -> usize {
        self.state.lock().created
    }

    /// Outcome of the run after every worker has returned.
    pub fn finish(&self) -> Result<()> {
        let state = self.state.lock();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        if !state.finished {
            return Err(OptError::GraphCorruption(
                "workers exited before the root job completed".into(),
            ));
        }
        Ok(())
    }
}
