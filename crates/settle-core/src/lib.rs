#![forbid(unsafe_code)]

//! Core: deferred computations, chaining, thenable adoption and combinators.
//!
//! A [`Deferred`] is a placeholder for a value that becomes available later.
//! It settles exactly once, either fulfilled with a value or rejected with an
//! error, and every state change and handler invocation runs on a later turn
//! of the [`Scheduler`] it was created with.

pub mod chain;
pub mod combinators;
pub mod deferred;
pub mod error;
pub mod series;
pub mod timing;
pub mod value;

pub use deferred::{Deferred, DeferredState, Resolver};
pub use error::Error;
pub use settle_runtime::Scheduler;
pub use value::{Function, Object, Outcome, Property, Value, first_arg};
