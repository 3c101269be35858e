#![forbid(unsafe_code)]

//! Timer-backed computations.
//!
//! The core has no timeout primitive: a deadline is expressed by racing a
//! computation against a timer, which is what [`timeout`] does.
//!
//! Timers are scheduler tasks on the virtual clock. A timer that loses a race
//! stays queued and still fires (harmlessly) when the scheduler reaches it.

use settle_runtime::Scheduler;
use web_time::Duration;

use crate::deferred::Deferred;
use crate::error::Error;
use crate::value::Value;

/// Fulfil with `Undefined` after `duration`.
pub fn sleep(scheduler: &Scheduler, duration: Duration) -> Deferred {
    delayed(scheduler, duration, Value::Undefined)
}

/// Fulfil with `value` after `duration`.
pub fn delayed(scheduler: &Scheduler, duration: Duration, value: impl Into<Value>) -> Deferred {
    let value = value.into();
    let timer = scheduler.clone();
    Deferred::new(scheduler, move |resolver| {
        timer.defer_after(duration, move || resolver.resolve(value));
        Ok(())
    })
}

/// Reject with `error` after `duration`.
pub fn delayed_rejection(
    scheduler: &Scheduler,
    duration: Duration,
    error: impl Into<Value>,
) -> Deferred {
    let error = error.into();
    let timer = scheduler.clone();
    Deferred::new(scheduler, move |resolver| {
        timer.defer_after(duration, move || resolver.reject(error));
        Ok(())
    })
}

/// Settle like `source`, or reject with [`Error::TimedOut`] if `source` is
/// still pending after `after`.
pub fn timeout(source: &Deferred, after: Duration) -> Deferred {
    let scheduler = source.scheduler();
    let timer = delayed_rejection(scheduler, after, Error::timed_out(after));
    Deferred::race(scheduler, [source.clone(), timer])
}
