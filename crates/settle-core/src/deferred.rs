#![forbid(unsafe_code)]

//! The deferred computation: a value or error supplied exactly once, later.
//!
//! # Design
//!
//! [`Deferred`] is a cheaply cloneable handle to shared interior state
//! (`Rc<RefCell<..>>`) plus the [`Scheduler`] that runs its transitions.
//! The interior holds the settlement and two ordered continuation queues.
//!
//! Settling is a two-step affair:
//!
//! 1. A settle call **locks** the computation. Only the first call wins; every
//!    later call is ignored, even while the transition is still queued.
//! 2. The transition itself (recording the outcome and draining the matching
//!    queue) runs as a scheduler task, never inside the call that triggered it.
//!
//! # Invariants
//!
//! 1. The state leaves `Pending` at most once and never changes afterwards.
//! 2. Continuations run in registration order, each exactly once.
//! 3. A computation never stores another computation as its value: settling
//!    with one adopts its eventual outcome instead.
//! 4. A computation settled with itself is rejected with
//!    [`Error::CircularReference`].
//! 5. No `RefCell` borrow is held while user code runs.
//!
//! # Failure Modes
//!
//! - **Initializer raises**: the computation is rejected with the raised
//!   value, unless it was already settled.
//! - **Foreign `then` misbehaves**: a raising `then`, or one that calls both
//!   continuations, is handled by a per-attempt one-shot guard; only the first
//!   signal counts.
//! - **Unhandled rejection**: nothing reports it; the computation just holds
//!   its error.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use settle_runtime::Scheduler;

use crate::error::Error;
use crate::value::{Function, Value, first_arg};

/// Lifecycle state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Fulfilled,
    Rejected,
}

type Continuation = Box<dyn FnOnce(Value)>;

#[derive(Debug, Clone)]
enum Settlement {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl Settlement {
    fn state(&self) -> DeferredState {
        match self {
            Self::Pending => DeferredState::Pending,
            Self::Fulfilled(_) => DeferredState::Fulfilled,
            Self::Rejected(_) => DeferredState::Rejected,
        }
    }
}

/// A queued move out of `Pending`.
enum Transition {
    Fulfill(Value),
    Reject(Value),
}

/// Shared interior for [`Deferred`].
struct DeferredInner {
    /// Scheduler-local identifier, used for log correlation only.
    id: u64,
    settlement: Settlement,
    /// Set by the first settle call; the transition may still be queued.
    locked: bool,
    fulfill_callbacks: Vec<Continuation>,
    reject_callbacks: Vec<Continuation>,
}

/// An eventual value or error.
///
/// Cloning a `Deferred` creates a new handle to the **same** computation.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<RefCell<DeferredInner>>,
    scheduler: Scheduler,
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("id", &inner.id)
            .field("state", &inner.settlement.state())
            .field("locked", &inner.locked)
            .field("fulfill_callbacks", &inner.fulfill_callbacks.len())
            .field("reject_callbacks", &inner.reject_callbacks.len())
            .finish()
    }
}

/// The two settle capabilities handed to an initializer.
///
/// Cloning is cheap; all clones settle the same computation and the first
/// call across all of them wins.
#[derive(Clone)]
pub struct Resolver {
    target: Deferred,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("target", &self.target.id())
            .finish()
    }
}

impl Resolver {
    /// Settle as success. A [`Value::Deferred`] is adopted, not stored.
    pub fn resolve(&self, value: impl Into<Value>) {
        self.target.settle_success(value.into());
    }

    /// Settle as failure.
    pub fn reject(&self, error: impl Into<Value>) {
        self.target.settle_failure(error.into());
    }

    /// Whether a settle call has already been accepted.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.target.inner.borrow().locked
    }

    /// Expose the capabilities as callable values, for handing to foreign
    /// thenables. Each function settles with its first argument.
    #[must_use]
    pub fn into_functions(self) -> (Function, Function) {
        let on_reject = self.clone();
        let resolve = Function::new(move |args| {
            self.resolve(first_arg(args));
            Ok(Value::Undefined)
        });
        let reject = Function::new(move |args| {
            on_reject.reject(first_arg(args));
            Ok(Value::Undefined)
        });
        (resolve, reject)
    }
}

/// How a value settles a target computation.
enum Resolution {
    /// The value is the target itself.
    Cycle,
    /// One of our own computations: follow it.
    Adopt(Deferred),
    /// A foreign object exposing an invokable `then`.
    Foreign(Function),
    /// Reading `then` raised.
    Failed(Value),
    /// Anything else settles the target directly.
    Plain(Value),
}

impl Resolution {
    fn classify(target: &Deferred, x: Value) -> Self {
        match x {
            Value::Deferred(d) if d.ptr_eq(target) => Self::Cycle,
            Value::Deferred(d) => Self::Adopt(d),
            Value::Object(object) => match object.callable("then") {
                Err(raised) => Self::Failed(raised),
                Ok(Some(then)) => Self::Foreign(then),
                Ok(None) => Self::Plain(Value::Object(object)),
            },
            other => Self::Plain(other),
        }
    }
}

impl Deferred {
    /// Create a computation and run `initializer` synchronously with its
    /// settle capabilities.
    ///
    /// If the initializer returns `Err`, the computation is rejected with the
    /// raised value (a no-op if it already settled).
    pub fn new<F>(scheduler: &Scheduler, initializer: F) -> Self
    where
        F: FnOnce(Resolver) -> Result<(), Value>,
    {
        let deferred = Self::pending(scheduler);
        if let Err(raised) = initializer(Resolver {
            target: deferred.clone(),
        }) {
            deferred.settle_failure(raised);
        }
        deferred
    }

    /// Create a computation settled from the outside through the returned
    /// [`Resolver`].
    #[must_use]
    pub fn pair(scheduler: &Scheduler) -> (Self, Resolver) {
        let deferred = Self::pending(scheduler);
        let resolver = Resolver {
            target: deferred.clone(),
        };
        (deferred, resolver)
    }

    pub(crate) fn pending(scheduler: &Scheduler) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                id: scheduler.next_deferred_id(),
                settlement: Settlement::Pending,
                locked: false,
                fulfill_callbacks: Vec::new(),
                reject_callbacks: Vec::new(),
            })),
            scheduler: scheduler.clone(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DeferredState {
        self.inner.borrow().settlement.state()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// The fulfillment value, once fulfilled.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match &self.inner.borrow().settlement {
            Settlement::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, once rejected.
    #[must_use]
    pub fn error(&self) -> Option<Value> {
        match &self.inner.borrow().settlement {
            Settlement::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Scheduler that runs this computation's transitions and continuations.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take the settle lock. Returns `false` if an earlier call already won.
    fn try_lock(&self, kind: &'static str) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.locked || !matches!(inner.settlement, Settlement::Pending) {
            tracing::trace!(message = "deferred.settle.ignored", deferred = inner.id, kind);
            return false;
        }
        inner.locked = true;
        true
    }

    /// Success capability. Adopts computations, schedules everything else.
    pub(crate) fn settle_success(&self, value: Value) {
        if !self.try_lock("success") {
            return;
        }
        match value {
            Value::Deferred(source) if source.ptr_eq(self) => {
                tracing::debug!(message = "deferred.cycle", deferred = self.id());
                self.schedule_transition(Transition::Reject(Error::CircularReference.into()));
            }
            Value::Deferred(source) => {
                tracing::trace!(
                    message = "deferred.adopt",
                    deferred = self.id(),
                    source = source.id()
                );
                let on_fulfilled = self.clone();
                let on_rejected = self.clone();
                source.subscribe(
                    move |value| on_fulfilled.schedule_transition(Transition::Fulfill(value)),
                    move |error| on_rejected.schedule_transition(Transition::Reject(error)),
                );
            }
            value => self.schedule_transition(Transition::Fulfill(value)),
        }
    }

    /// Failure capability.
    pub(crate) fn settle_failure(&self, error: Value) {
        if self.try_lock("failure") {
            self.schedule_transition(Transition::Reject(error));
        }
    }

    /// Settle `self` from a continuation result `x`, unwrapping thenables.
    pub(crate) fn resolve_with(&self, x: Value) {
        match Resolution::classify(self, x) {
            Resolution::Cycle => {
                tracing::debug!(message = "deferred.cycle", deferred = self.id());
                self.settle_failure(Error::CircularReference.into());
            }
            Resolution::Plain(value) => self.settle_success(value),
            Resolution::Failed(raised) => self.settle_failure(raised),
            Resolution::Adopt(source) => {
                let on_fulfilled = self.clone();
                let on_rejected = self.clone();
                source.subscribe(
                    move |value| on_fulfilled.resolve_with(value),
                    move |error| on_rejected.settle_failure(error),
                );
            }
            Resolution::Foreign(then) => self.adopt_foreign(&then),
        }
    }

    /// Call a foreign `then` with one-shot continuations.
    ///
    /// The fulfilled value is resolved on a later turn, so a thenable that
    /// keeps handing back thenables costs one task per level instead of a
    /// native stack frame, and stays under the scheduler's run budget.
    fn adopt_foreign(&self, then: &Function) {
        let called = Rc::new(Cell::new(false));

        let next = self.clone();
        let guard = Rc::clone(&called);
        let on_fulfilled = Function::new(move |args| {
            if !guard.replace(true) {
                let target = next.clone();
                let value = first_arg(args);
                next.scheduler.defer(move || target.resolve_with(value));
            }
            Ok(Value::Undefined)
        });

        let next = self.clone();
        let guard = Rc::clone(&called);
        let on_rejected = Function::new(move |args| {
            if !guard.replace(true) {
                next.settle_failure(first_arg(args));
            }
            Ok(Value::Undefined)
        });

        if let Err(raised) = then.call(&[on_fulfilled.into(), on_rejected.into()]) {
            if !called.replace(true) {
                self.settle_failure(raised);
            }
        }
    }

    /// Register raw continuations.
    ///
    /// Pending: queued in registration order. Settled: the matching
    /// continuation is scheduled on a later turn.
    pub(crate) fn subscribe(
        &self,
        on_fulfilled: impl FnOnce(Value) + 'static,
        on_rejected: impl FnOnce(Value) + 'static,
    ) {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            match &inner.settlement {
                Settlement::Pending => {
                    inner.fulfill_callbacks.push(Box::new(on_fulfilled));
                    inner.reject_callbacks.push(Box::new(on_rejected));
                    return;
                }
                Settlement::Fulfilled(value) => Ok(value.clone()),
                Settlement::Rejected(error) => Err(error.clone()),
            }
        };
        match settled {
            Ok(value) => self.scheduler.defer(move || on_fulfilled(value)),
            Err(error) => self.scheduler.defer(move || on_rejected(error)),
        };
    }

    fn schedule_transition(&self, transition: Transition) {
        let this = self.clone();
        self.scheduler.defer(move || this.transition(transition));
    }

    fn transition(&self, transition: Transition) {
        let (callbacks, discarded, payload) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.settlement, Settlement::Pending) {
                return;
            }
            let fulfill = mem::take(&mut inner.fulfill_callbacks);
            let reject = mem::take(&mut inner.reject_callbacks);
            match transition {
                Transition::Fulfill(value) => {
                    tracing::trace!(
                        message = "deferred.fulfilled",
                        deferred = inner.id,
                        continuations = fulfill.len()
                    );
                    inner.settlement = Settlement::Fulfilled(value.clone());
                    (fulfill, reject, value)
                }
                Transition::Reject(error) => {
                    tracing::trace!(
                        message = "deferred.rejected",
                        deferred = inner.id,
                        continuations = reject.len()
                    );
                    inner.settlement = Settlement::Rejected(error.clone());
                    (reject, fulfill, error)
                }
            }
        };
        drop(discarded);
        for callback in callbacks {
            callback(payload.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
