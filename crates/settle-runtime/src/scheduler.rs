#![forbid(unsafe_code)]

//! Deferred-task scheduler with a virtual clock.
//!
//! # Design
//!
//! [`Scheduler`] is a cheaply cloneable handle to a shared task queue
//! (`Rc<RefCell<..>>`, single-threaded). Tasks are queued with a due time on a
//! virtual clock that only moves when the scheduler runs, which keeps every
//! run reproducible: there is no wall-clock sleeping anywhere.
//!
//! # Invariants
//!
//! 1. A task never runs inside the `defer`/`defer_after` call that queued it.
//! 2. Tasks run in `(due time, enqueue order)` order. Tasks due at the same
//!    instant are FIFO.
//! 3. The clock never moves backwards. Running a task first advances the clock
//!    to the task's due time.
//! 4. No engine borrow is held while a task runs, so tasks may freely queue
//!    more tasks.
//!
//! # Failure Modes
//!
//! - **Runaway chains**: a task that keeps re-queueing work would never let
//!   `run_until_idle` return. Each run is bounded by
//!   [`SchedulerConfig::max_tasks_per_run`]; exceeding it returns
//!   [`SchedulerError::BudgetExhausted`] with the remaining queue intact.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use thiserror::Error;
use web_time::Duration;

use crate::config::SchedulerConfig;

/// Identifier of a queued task. Increases monotonically per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Errors returned by the run loops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The run executed `limit` tasks and the queue was still not idle.
    #[error("task budget of {limit} exhausted with {pending} task(s) still queued")]
    BudgetExhausted { limit: usize, pending: usize },
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Tasks executed by this run.
    pub tasks_run: usize,
    /// Virtual time when the run returned.
    pub now: Duration,
    /// Tasks still queued (non-zero only for `run_until`).
    pub pending: usize,
}

struct QueuedTask {
    due: Duration,
    id: TaskId,
    run: Box<dyn FnOnce()>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // Reversed: `BinaryHeap` is a max-heap and the earliest task must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    now: Duration,
    queue: BinaryHeap<QueuedTask>,
    next_task: u64,
    next_deferred: u64,
}

/// Single-threaded "run later" queue.
///
/// Cloning a `Scheduler` creates a new handle to the **same** queue and clock.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Scheduler")
            .field("now", &inner.now)
            .field("pending", &inner.queue.len())
            .field("config", &inner.config)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with an explicit configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        let now = config.start_at;
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                config,
                now,
                queue: BinaryHeap::new(),
                next_task: 0,
                next_deferred: 1,
            })),
        }
    }

    /// Queue `task` to run on a later turn at the current virtual time.
    pub fn defer(&self, task: impl FnOnce() + 'static) -> TaskId {
        self.defer_after(Duration::ZERO, task)
    }

    /// Queue `task` to run once the virtual clock reaches `now + delay`.
    pub fn defer_after(&self, delay: Duration, task: impl FnOnce() + 'static) -> TaskId {
        let mut inner = self.inner.borrow_mut();
        let id = TaskId(inner.next_task);
        inner.next_task += 1;
        let due = inner.now.saturating_add(delay);
        inner.queue.push(QueuedTask {
            due,
            id,
            run: Box::new(task),
        });
        id
    }

    /// Run the earliest queued task. Returns `false` if the queue was empty.
    pub fn run_once(&self) -> bool {
        let task = {
            let mut inner = self.inner.borrow_mut();
            let Some(task) = inner.queue.pop() else {
                return false;
            };
            if task.due > inner.now {
                inner.now = task.due;
            }
            task
        };
        tracing::trace!(
            message = "scheduler.task.run",
            task = task.id.raw(),
            due_ms = duration_ms(task.due)
        );
        (task.run)();
        true
    }

    /// Run tasks until the queue is empty.
    ///
    /// Tasks queued while running are part of the same run, including timers,
    /// which advance the clock as they fire.
    pub fn run_until_idle(&self) -> Result<RunStats, SchedulerError> {
        let limit = self.budget();
        let mut tasks_run = 0;
        while !self.is_idle() {
            self.check_budget(tasks_run, limit)?;
            self.run_once();
            tasks_run += 1;
        }
        let stats = self.stats(tasks_run);
        tracing::debug!(
            message = "scheduler.run.idle",
            tasks_run,
            now_ms = duration_ms(stats.now)
        );
        Ok(stats)
    }

    /// Run every task due at or before `deadline`, then move the clock to
    /// `deadline` if it is still behind.
    pub fn run_until(&self, deadline: Duration) -> Result<RunStats, SchedulerError> {
        let limit = self.budget();
        let mut tasks_run = 0;
        while self.next_due().is_some_and(|due| due <= deadline) {
            self.check_budget(tasks_run, limit)?;
            self.run_once();
            tasks_run += 1;
        }
        {
            let mut inner = self.inner.borrow_mut();
            if inner.now < deadline {
                inner.now = deadline;
            }
        }
        Ok(self.stats(tasks_run))
    }

    /// Run every task due within the next `delta` of virtual time.
    pub fn advance(&self, delta: Duration) -> Result<RunStats, SchedulerError> {
        let deadline = self.now().saturating_add(delta);
        self.run_until(deadline)
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Whether no task is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }

    /// Due time of the earliest queued task.
    #[must_use]
    pub fn next_due(&self) -> Option<Duration> {
        self.inner.borrow().queue.peek().map(|task| task.due)
    }

    /// Allocate an identifier for a computation driven by this scheduler.
    ///
    /// Identifiers are only used for log correlation.
    pub fn next_deferred_id(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_deferred;
        inner.next_deferred += 1;
        id
    }

    /// Configuration this scheduler was built with.
    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.inner.borrow().config.clone()
    }

    /// Whether two handles share the same queue.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn budget(&self) -> usize {
        self.inner.borrow().config.max_tasks_per_run
    }

    fn check_budget(&self, tasks_run: usize, limit: usize) -> Result<(), SchedulerError> {
        if tasks_run < limit {
            return Ok(());
        }
        let pending = self.pending();
        tracing::warn!(message = "scheduler.budget.exhausted", limit, pending);
        Err(SchedulerError::BudgetExhausted { limit, pending })
    }

    fn stats(&self, tasks_run: usize) -> RunStats {
        let inner = self.inner.borrow();
        RunStats {
            tasks_run,
            now: inner.now,
            pending: inner.queue.len(),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
