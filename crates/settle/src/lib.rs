#![forbid(unsafe_code)]

//! Settle public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use settle_core::{
    Deferred, DeferredState, Error, Function, Object, Outcome, Property, Resolver, Value,
    first_arg,
};
pub use settle_runtime::{RunStats, Scheduler, SchedulerConfig, SchedulerError};

pub mod prelude {
    pub use settle_core as core;
    pub use settle_core::series::{merge_sequential, run_in_series};
    pub use settle_core::timing::{delayed, delayed_rejection, sleep, timeout};
    pub use settle_core::{Deferred, DeferredState, Error, Outcome, Resolver, Value};
    pub use settle_runtime as runtime;
    pub use settle_runtime::Scheduler;
}
