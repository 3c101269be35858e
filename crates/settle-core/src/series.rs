#![forbid(unsafe_code)]

//! Sequential composition.

use std::collections::VecDeque;

use settle_runtime::Scheduler;

use crate::deferred::{Deferred, Resolver};
use crate::value::{Outcome, Value};

/// Thread a value through `steps`, one after another.
///
/// Equivalent to folding `then` over the steps, starting from a computation
/// fulfilled with `Undefined`. Like `then`, a rejection reaching a step is
/// handed to it as its input.
pub fn run_in_series<I, F>(scheduler: &Scheduler, steps: I) -> Deferred
where
    I: IntoIterator<Item = F>,
    F: FnOnce(Value) -> Outcome + 'static,
{
    steps
        .into_iter()
        .fold(Deferred::resolve(scheduler, Value::Undefined), |acc, step| {
            acc.then(step)
        })
}

/// Start each task only after the previous one fulfilled, collecting results.
///
/// Fulfils with the list of results in task order. The first rejection
/// rejects the aggregate and no later task is started.
pub fn merge_sequential<I, F>(scheduler: &Scheduler, tasks: I) -> Deferred
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Deferred + 'static,
{
    let queue: VecDeque<F> = tasks.into_iter().collect();
    Deferred::new(scheduler, move |resolver| {
        step(queue, Vec::new(), resolver);
        Ok(())
    })
}

fn step<F>(mut remaining: VecDeque<F>, mut results: Vec<Value>, resolver: Resolver)
where
    F: FnOnce() -> Deferred + 'static,
{
    let Some(task) = remaining.pop_front() else {
        resolver.resolve(Value::from(results));
        return;
    };
    let on_rejected = resolver.clone();
    task().subscribe(
        move |value| {
            results.push(value);
            step(remaining, results, resolver);
        },
        move |error| on_rejected.reject(error),
    );
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use web_time::Duration;

    use super::*;
    use crate::timing::delayed;

    type Task = Box<dyn FnOnce() -> Deferred>;

    #[test]
    fn series_threads_values() {
        let sched = Scheduler::new();
        let steps: Vec<Box<dyn FnOnce(Value) -> Outcome>> = vec![
            Box::new(|_| Ok(Value::from(1))),
            Box::new(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) + 10.0))),
            Box::new(|v| Ok(Value::from(format!("total {v}")))),
        ];
        let d = run_in_series(&sched, steps);
        sched.run_until_idle().unwrap();
        assert_eq!(d.value(), Some(Value::from("total 11")));
    }

    #[test]
    fn series_waits_for_returned_computations() {
        let sched = Scheduler::new();
        let s1 = sched.clone();
        let s2 = sched.clone();
        let steps: Vec<Box<dyn FnOnce(Value) -> Outcome>> = vec![
            Box::new(move |_| Ok(delayed(&s1, Duration::from_millis(1000), "a").into())),
            Box::new(move |_| Ok(delayed(&s2, Duration::from_millis(2000), "b").into())),
        ];
        let d = run_in_series(&sched, steps);
        let stats = sched.run_until_idle().unwrap();
        assert_eq!(d.value(), Some(Value::from("b")));
        assert_eq!(stats.now, Duration::from_millis(3000));
    }

    #[test]
    fn series_of_nothing_is_undefined() {
        let sched = Scheduler::new();
        let d = run_in_series(&sched, Vec::<Box<dyn FnOnce(Value) -> Outcome>>::new());
        sched.run_until_idle().unwrap();
        assert_eq!(d.value(), Some(Value::Undefined));
    }

    #[test]
    fn merge_runs_in_order_and_collects() {
        let sched = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let tasks: Vec<Task> = [(2000, 1), (1000, 2), (2000, 3)]
            .into_iter()
            .map(|(ms, n)| {
                let s = sched.clone();
                let log = Rc::clone(&log);
                Box::new(move || {
                    delayed(&s, Duration::from_millis(ms), n).then(move |v| {
                        log.borrow_mut().push(v.clone());
                        Ok(v)
                    })
                }) as Task
            })
            .collect();

        let d = merge_sequential(&sched, tasks);
        let stats = sched.run_until_idle().unwrap();
        assert_eq!(d.value(), Some(Value::list([1.into(), 2.into(), 3.into()])));
        assert_eq!(*log.borrow(), vec![Value::from(1), Value::from(2), Value::from(3)]);
        // Sequential: 2000 + 1000 + 2000.
        assert_eq!(stats.now, Duration::from_millis(5000));
    }

    #[test]
    fn merge_stops_at_first_rejection() {
        let sched = Scheduler::new();
        let started = Rc::new(RefCell::new(Vec::new()));
        let make = |name: &'static str, fail: bool| -> Task {
            let s = sched.clone();
            let started = Rc::clone(&started);
            Box::new(move || {
                started.borrow_mut().push(name);
                if fail {
                    Deferred::reject(&s, name)
                } else {
                    Deferred::resolve(&s, name)
                }
            })
        };
        let tasks = vec![make("a", false), make("b", true), make("c", false)];
        let d = merge_sequential(&sched, tasks);
        sched.run_until_idle().unwrap();
        assert_eq!(d.error(), Some(Value::from("b")));
        assert_eq!(*started.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn merge_of_nothing_is_empty_list() {
        let sched = Scheduler::new();
        let d = merge_sequential(&sched, Vec::<Task>::new());
        sched.run_until_idle().unwrap();
        assert_eq!(d.value(), Some(Value::list([])));
    }
}
