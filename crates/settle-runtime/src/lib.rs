#![forbid(unsafe_code)]

//! Runtime: the deferred-task queue that drives settlement.
//!
//! Everything in settle happens on one thread. Work that must not run inside
//! the current call stack is handed to a [`Scheduler`], which runs it on a
//! later turn in `(due time, enqueue order)` order.

pub mod config;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use scheduler::{RunStats, Scheduler, SchedulerError, TaskId};
