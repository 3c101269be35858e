#![forbid(unsafe_code)]

//! Combinators that build computations from known values or collections.
//!
//! # Invariants
//!
//! 1. `all` fulfils with results in input order, not completion order.
//! 2. `all` rejects with the first member rejection without waiting for the
//!    remaining members.
//! 3. `race` settles with whichever member settles first; later outcomes are
//!    ignored. An empty race never settles.
//! 4. `finally` never changes the outcome it passes through unless its own
//!    callback raises or its returned computation rejects.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use settle_runtime::Scheduler;

use crate::deferred::Deferred;
use crate::value::{Outcome, Value};

impl Deferred {
    /// A computation for `value`.
    ///
    /// Values exposing both `then` and `catch` capabilities (our own
    /// computations, or foreign objects shaped like one) are adopted;
    /// anything else fulfils as is.
    pub fn resolve(scheduler: &Scheduler, value: impl Into<Value>) -> Deferred {
        let value = value.into();
        Deferred::new(scheduler, move |resolver| {
            if let Value::Object(object) = &value {
                if object.has_callable("catch")? {
                    if let Some(then) = object.callable("then")? {
                        let (on_fulfilled, on_rejected) = resolver.into_functions();
                        then.call(&[on_fulfilled.into(), on_rejected.into()])?;
                        return Ok(());
                    }
                }
            }
            resolver.resolve(value);
            Ok(())
        })
    }

    /// An already-rejected computation.
    pub fn reject(scheduler: &Scheduler, error: impl Into<Value>) -> Deferred {
        let error = error.into();
        Deferred::new(scheduler, move |resolver| {
            resolver.reject(error);
            Ok(())
        })
    }

    /// Wait for every member, or the first rejection.
    ///
    /// Fulfils with a list of member values in input order. An empty input
    /// fulfils with an empty list.
    pub fn all<I>(scheduler: &Scheduler, items: I) -> Deferred
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let members: Vec<Value> = items.into_iter().map(Into::into).collect();
        let member_scheduler = scheduler.clone();
        Deferred::new(scheduler, move |resolver| {
            if members.is_empty() {
                resolver.resolve(Value::list([]));
                return Ok(());
            }
            let total = members.len();
            let results = Rc::new(RefCell::new(vec![Value::Undefined; total]));
            let remaining = Rc::new(Cell::new(total));
            for (index, member) in members.into_iter().enumerate() {
                let results = Rc::clone(&results);
                let remaining = Rc::clone(&remaining);
                let on_fulfilled = resolver.clone();
                let on_rejected = resolver.clone();
                Deferred::resolve(&member_scheduler, member).subscribe(
                    move |value| {
                        results.borrow_mut()[index] = value;
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let values = std::mem::take(&mut *results.borrow_mut());
                            on_fulfilled.resolve(Value::from(values));
                        }
                    },
                    move |error| on_rejected.reject(error),
                );
            }
            Ok(())
        })
    }

    /// Settle like whichever member settles first.
    pub fn race<I>(scheduler: &Scheduler, items: I) -> Deferred
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let members: Vec<Value> = items.into_iter().map(Into::into).collect();
        let member_scheduler = scheduler.clone();
        Deferred::new(scheduler, move |resolver| {
            if members.is_empty() {
                tracing::debug!(message = "deferred.race.empty");
            }
            for member in members {
                let on_fulfilled = resolver.clone();
                let on_rejected = resolver.clone();
                Deferred::resolve(&member_scheduler, member).subscribe(
                    move |value| on_fulfilled.resolve(value),
                    move |error| on_rejected.reject(error),
                );
            }
            Ok(())
        })
    }

    /// Run `on_settle` once `self` settles, whatever the outcome, then pass
    /// the source's value or error through.
    ///
    /// If `on_settle` returns a computation, it is waited for first. If it
    /// raises, or its computation rejects, that error replaces the outcome.
    pub fn finally(&self, on_settle: impl FnOnce() -> Outcome + 'static) -> Deferred {
        let callback = Rc::new(RefCell::new(Some(on_settle)));
        let callback_on_error = Rc::clone(&callback);
        let scheduler = self.scheduler().clone();
        let scheduler_on_error = scheduler.clone();
        self.then_with(
            move |value| {
                let produced = take_and_call(&callback)?;
                Ok(Deferred::resolve(&scheduler, produced)
                    .then_with(move |_| Ok(value), Err)
                    .into())
            },
            move |error| {
                let produced = take_and_call(&callback_on_error)?;
                Ok(Deferred::resolve(&scheduler_on_error, produced)
                    .then_with(move |_| Err(error), Err)
                    .into())
            },
        )
    }
}

fn take_and_call<F: FnOnce() -> Outcome>(slot: &RefCell<Option<F>>) -> Outcome {
    let callback = slot.borrow_mut().take();
    match callback {
        Some(callback) => callback(),
        None => Ok(Value::Undefined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::DeferredState;
    use crate::error::Error;
    use crate::value::{Function, Object};
    use web_time::Duration;

    fn run(sched: &Scheduler) {
        sched.run_until_idle().unwrap();
    }

    fn after(sched: &Scheduler, ms: u64, value: impl Into<Value>) -> Deferred {
        let value = value.into();
        let timer = sched.clone();
        Deferred::new(sched, move |r| {
            timer.defer_after(Duration::from_millis(ms), move || r.resolve(value));
            Ok(())
        })
    }

    #[test]
    fn resolve_invokes_handler_once_asynchronously() {
        let sched = Scheduler::new();
        let calls = Rc::new(Cell::new(0));
        let calls_clone = Rc::clone(&calls);
        Deferred::resolve(&sched, "v").then(move |v| {
            assert_eq!(v, Value::from("v"));
            calls_clone.set(calls_clone.get() + 1);
            Ok(Value::Undefined)
        });
        assert_eq!(calls.get(), 0);
        run(&sched);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn resolve_flattens_nested_computations() {
        let sched = Scheduler::new();
        let nested = Deferred::resolve(
            &sched,
            Deferred::resolve(&sched, Deferred::resolve(&sched, 5)),
        );
        let seen = Rc::new(RefCell::new(Value::Undefined));
        let seen_clone = Rc::clone(&seen);
        nested.then(move |v| {
            *seen_clone.borrow_mut() = v;
            Ok(Value::Undefined)
        });
        run(&sched);
        assert_eq!(*seen.borrow(), Value::from(5));
        assert_eq!(nested.value(), Some(Value::from(5)));
    }

    #[test]
    fn resolve_adopts_promise_shaped_objects() {
        let sched = Scheduler::new();
        let shaped = Object::new()
            .with(
                "then",
                Function::new(|args| args[0].call(&[Value::from("adopted")])),
            )
            .with("catch", Function::new(|_| Ok(Value::Undefined)));
        let d = Deferred::resolve(&sched, shaped);
        run(&sched);
        assert_eq!(d.value(), Some(Value::from("adopted")));
    }

    #[test]
    fn resolve_keeps_then_only_objects_as_values() {
        let sched = Scheduler::new();
        let then_only = Object::new().with(
            "then",
            Function::new(|args| args[0].call(&[Value::from("unused")])),
        );
        let d = Deferred::resolve(&sched, then_only.clone());
        run(&sched);
        assert_eq!(d.value(), Some(Value::from(then_only)));
    }

    #[test]
    fn resolve_rejects_when_capability_read_raises() {
        let sched = Scheduler::new();
        let hostile = Object::new().with_getter("catch", Function::new(|_| Err(Value::from("no"))));
        let d = Deferred::resolve(&sched, hostile);
        run(&sched);
        assert_eq!(d.error(), Some(Value::from("no")));
    }

    #[test]
    fn reject_is_already_rejected() {
        let sched = Scheduler::new();
        let d = Deferred::reject(&sched, "err");
        run(&sched);
        assert_eq!(d.state(), DeferredState::Rejected);
        assert_eq!(d.error(), Some(Value::from("err")));
    }

    #[test]
    fn all_preserves_input_order() {
        let sched = Scheduler::new();
        let d = Deferred::all(
            &sched,
            [
                Value::from(after(&sched, 30, 1)),
                Value::from(after(&sched, 10, 2)),
                Value::from(3),
            ],
        );
        run(&sched);
        assert_eq!(d.value(), Some(Value::list([1.into(), 2.into(), 3.into()])));
    }

    #[test]
    fn all_of_resolved_members() {
        let sched = Scheduler::new();
        let members: Vec<Deferred> = (1..=3).map(|n| Deferred::resolve(&sched, n)).collect();
        let d = Deferred::all(&sched, members);
        run(&sched);
        assert_eq!(d.value(), Some(Value::list([1.into(), 2.into(), 3.into()])));
    }

    #[test]
    fn all_fails_fast() {
        let sched = Scheduler::new();
        let (never, _keep) = Deferred::pair(&sched);
        let d = Deferred::all(
            &sched,
            [
                Deferred::resolve(&sched, 1),
                Deferred::reject(&sched, "e"),
                never,
            ],
        );
        run(&sched);
        assert_eq!(d.error(), Some(Value::from("e")));
    }

    #[test]
    fn all_reports_first_rejection_only() {
        let sched = Scheduler::new();
        let d = Deferred::all(
            &sched,
            [
                Value::from(Deferred::reject(&sched, "first")),
                Value::from(Deferred::reject(&sched, "second")),
            ],
        );
        run(&sched);
        assert_eq!(d.error(), Some(Value::from("first")));
    }

    #[test]
    fn all_of_empty_fulfils_with_empty_list() {
        let sched = Scheduler::new();
        let d = Deferred::all(&sched, Vec::<Value>::new());
        run(&sched);
        assert_eq!(d.value(), Some(Value::list([])));
    }

    #[test]
    fn all_accepts_dynamic_iterables() {
        let sched = Scheduler::new();
        let d = Deferred::all(&sched, Value::from("ab").to_list().unwrap());
        run(&sched);
        assert_eq!(d.value(), Some(Value::list(["a".into(), "b".into()])));
        assert_eq!(
            Value::from(3).to_list().unwrap_err(),
            Error::NotIterable { type_name: "number" }
        );
    }

    #[test]
    fn race_takes_the_earliest() {
        let sched = Scheduler::new();
        let d = Deferred::race(&sched, [after(&sched, 50, "a"), after(&sched, 10, "b")]);
        run(&sched);
        assert_eq!(d.value(), Some(Value::from("b")));
    }

    #[test]
    fn race_propagates_earliest_rejection() {
        let sched = Scheduler::new();
        let timer = sched.clone();
        let failing = Deferred::new(&sched, move |r| {
            timer.defer_after(Duration::from_millis(5), move || r.reject("fast failure"));
            Ok(())
        });
        let d = Deferred::race(&sched, [Value::from(after(&sched, 20, "slow")), failing.into()]);
        run(&sched);
        assert_eq!(d.error(), Some(Value::from("fast failure")));
    }

    #[test]
    fn race_of_empty_never_settles() {
        let sched = Scheduler::new();
        let d = Deferred::race(&sched, Vec::<Value>::new());
        run(&sched);
        assert!(d.is_pending());
    }

    #[test]
    fn finally_passes_value_through() {
        let sched = Scheduler::new();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        let d = Deferred::resolve(&sched, 1).finally(move || {
            ran_clone.set(true);
            Ok(Value::from("ignored"))
        });
        run(&sched);
        assert!(ran.get());
        assert_eq!(d.value(), Some(Value::from(1)));
    }

    #[test]
    fn finally_reraises_error() {
        let sched = Scheduler::new();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        let d = Deferred::reject(&sched, "e").finally(move || {
            ran_clone.set(true);
            Ok(Value::Undefined)
        });
        run(&sched);
        assert!(ran.get());
        assert_eq!(d.error(), Some(Value::from("e")));
    }

    #[test]
    fn finally_waits_for_returned_computation() {
        let sched = Scheduler::new();
        let cleanup_done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cleanup_done);
        let timer = sched.clone();
        let d = Deferred::resolve(&sched, "value").finally(move || {
            let flag = Rc::clone(&flag);
            let cleanup = Deferred::new(&timer.clone(), move |r| {
                timer.defer_after(Duration::from_millis(40), move || {
                    flag.set(true);
                    r.resolve(Value::Undefined);
                });
                Ok(())
            });
            Ok(cleanup.into())
        });

        sched.run_until(Duration::from_millis(39)).unwrap();
        assert!(d.is_pending());
        run(&sched);
        assert!(cleanup_done.get());
        assert_eq!(d.value(), Some(Value::from("value")));
    }

    #[test]
    fn finally_callback_error_replaces_outcome() {
        let sched = Scheduler::new();
        let d = Deferred::resolve(&sched, 1).finally(|| Err(Value::from("cleanup failed")));
        run(&sched);
        assert_eq!(d.error(), Some(Value::from("cleanup failed")));
    }

    #[test]
    fn finally_rejected_cleanup_replaces_outcome() {
        let sched = Scheduler::new();
        let cleanup_sched = sched.clone();
        let d = Deferred::resolve(&sched, 1)
            .finally(move || Ok(Deferred::reject(&cleanup_sched, "cleanup rejected").into()));
        run(&sched);
        assert_eq!(d.error(), Some(Value::from("cleanup rejected")));
    }
}
