#![forbid(unsafe_code)]

//! Chaining: deriving a new computation from an existing one.
//!
//! Every chaining call returns a fresh pending [`Deferred`] right away. When
//! the source settles, the matching handler runs on a later turn and its
//! result goes through the thenable resolution procedure against the derived
//! computation. A handler returning `Err` rejects the derived computation.
//!
//! A missing rejection handler *returns* the error rather than re-raising it,
//! so `reject(e).then(f)` calls `f(e)`. Use [`Deferred::then_with`] or
//! [`Deferred::catch`] to keep a rejection on the error channel.

use crate::deferred::Deferred;
use crate::value::{Outcome, Value};

type Handler = Box<dyn FnOnce(Value) -> Outcome>;

fn passthrough(value: Value) -> Outcome {
    Ok(value)
}

fn run_handler(next: &Deferred, handler: Handler, input: Value) {
    match handler(input) {
        Ok(x) => next.resolve_with(x),
        Err(raised) => next.settle_failure(raised),
    }
}

impl Deferred {
    /// Derive a computation from this one's fulfillment.
    ///
    /// The default rejection handler returns its input, which turns a
    /// rejection of `self` into a fulfillment of the result.
    pub fn then(&self, on_fulfilled: impl FnOnce(Value) -> Outcome + 'static) -> Deferred {
        self.chain(Box::new(on_fulfilled), Box::new(passthrough))
    }

    /// Derive a computation with both a fulfillment and a rejection handler.
    pub fn then_with(
        &self,
        on_fulfilled: impl FnOnce(Value) -> Outcome + 'static,
        on_rejected: impl FnOnce(Value) -> Outcome + 'static,
    ) -> Deferred {
        self.chain(Box::new(on_fulfilled), Box::new(on_rejected))
    }

    /// Derive a computation from this one's rejection. Fulfillment passes
    /// through unchanged and never invokes `on_rejected`.
    pub fn catch(&self, on_rejected: impl FnOnce(Value) -> Outcome + 'static) -> Deferred {
        self.chain(Box::new(passthrough), Box::new(on_rejected))
    }

    fn chain(&self, on_fulfilled: Handler, on_rejected: Handler) -> Deferred {
        let next = Deferred::pending(self.scheduler());
        let fulfilled_next = next.clone();
        let rejected_next = next.clone();
        self.subscribe(
            move |value| run_handler(&fulfilled_next, on_fulfilled, value),
            move |error| run_handler(&rejected_next, on_rejected, error),
        );
        next
    }
}
