#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use settle_core::{Deferred, DeferredState, Function, Object, Resolver, Value};
use settle_runtime::{Scheduler, SchedulerConfig};
use web_time::Duration;

#[derive(Arbitrary, Debug)]
enum Op {
    Pair,
    Resolve { target: u8, value: i16 },
    Reject { target: u8, value: i16 },
    ResolveWith { target: u8, source: u8 },
    Then { source: u8 },
    Catch { source: u8 },
    ThenThenable { source: u8, depth: u8 },
    All { from: u8, len: u8 },
    Race { from: u8, len: u8 },
    Step,
    Advance { ms: u8 },
}

impl Op {
    fn adds_slot(&self) -> bool {
        matches!(
            self,
            Op::Pair
                | Op::Then { .. }
                | Op::Catch { .. }
                | Op::ThenThenable { .. }
                | Op::All { .. }
                | Op::Race { .. }
        )
    }
}

const MAX_SLOTS: usize = 64;

/// A foreign thenable that hands back `levels` more thenables before a value.
fn nested_thenable(levels: u8) -> Value {
    if levels == 0 {
        return Value::from(0);
    }
    Object::new()
        .with(
            "then",
            Function::new(move |args| args[0].call(&[nested_thenable(levels - 1)])),
        )
        .into()
}

struct Slot {
    deferred: Deferred,
    resolver: Option<Resolver>,
    settled_as: Option<DeferredState>,
}

fn pick(slots: &[Slot], index: u8) -> Option<&Slot> {
    if slots.is_empty() {
        None
    } else {
        slots.get(usize::from(index) % slots.len())
    }
}

fn window(slots: &[Slot], from: u8, len: u8) -> Vec<Deferred> {
    if slots.is_empty() {
        return Vec::new();
    }
    let start = usize::from(from) % slots.len();
    slots
        .iter()
        .cycle()
        .skip(start)
        .take(usize::from(len) % 8)
        .map(|slot| slot.deferred.clone())
        .collect()
}

fn check_stable(slots: &mut [Slot]) {
    for slot in slots.iter_mut() {
        let state = slot.deferred.state();
        match slot.settled_as {
            Some(previous) => assert_eq!(previous, state, "settled computation changed state"),
            None if state != DeferredState::Pending => slot.settled_as = Some(state),
            None => {}
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let sched = Scheduler::with_config(SchedulerConfig::default().with_max_tasks_per_run(20_000));
    let mut slots: Vec<Slot> = Vec::new();
    let handler_calls = Rc::new(Cell::new(0usize));
    let mut handlers = 0usize;

    for op in ops.into_iter().take(256) {
        if op.adds_slot() && slots.len() >= MAX_SLOTS {
            continue;
        }
        match op {
            Op::Pair => {
                let (deferred, resolver) = Deferred::pair(&sched);
                slots.push(Slot { deferred, resolver: Some(resolver), settled_as: None });
            }
            Op::Resolve { target, value } => {
                if let Some(r) = pick(&slots, target).and_then(|s| s.resolver.as_ref()) {
                    r.resolve(i32::from(value));
                }
            }
            Op::Reject { target, value } => {
                if let Some(r) = pick(&slots, target).and_then(|s| s.resolver.as_ref()) {
                    r.reject(i32::from(value));
                }
            }
            Op::ResolveWith { target, source } => {
                let source = pick(&slots, source).map(|s| s.deferred.clone());
                if let (Some(r), Some(source)) =
                    (pick(&slots, target).and_then(|s| s.resolver.as_ref()), source)
                {
                    r.resolve(source);
                }
            }
            Op::Then { source } => {
                if let Some(slot) = pick(&slots, source) {
                    let calls = Rc::clone(&handler_calls);
                    handlers += 1;
                    let deferred = slot.deferred.then(move |v| {
                        calls.set(calls.get() + 1);
                        Ok(v)
                    });
                    slots.push(Slot { deferred, resolver: None, settled_as: None });
                }
            }
            Op::Catch { source } => {
                if let Some(slot) = pick(&slots, source) {
                    let deferred = slot.deferred.catch(|e| Ok(Value::from(format!("caught {e}"))));
                    slots.push(Slot { deferred, resolver: None, settled_as: None });
                }
            }
            Op::ThenThenable { source, depth } => {
                if let Some(slot) = pick(&slots, source) {
                    let deferred = slot.deferred.then(move |_| Ok(nested_thenable(depth)));
                    slots.push(Slot { deferred, resolver: None, settled_as: None });
                }
            }
            Op::All { from, len } => {
                let members = window(&slots, from, len);
                let deferred = Deferred::all(&sched, members);
                slots.push(Slot { deferred, resolver: None, settled_as: None });
            }
            Op::Race { from, len } => {
                let members = window(&slots, from, len);
                let deferred = Deferred::race(&sched, members);
                slots.push(Slot { deferred, resolver: None, settled_as: None });
            }
            Op::Step => {
                let _ = sched.run_once();
            }
            Op::Advance { ms } => {
                let until = sched.now() + Duration::from_millis(u64::from(ms));
                let _ = sched.run_until(until);
            }
        }
        check_stable(&mut slots);
    }

    let _ = sched.run_until_idle();
    check_stable(&mut slots);
    assert!(handler_calls.get() <= handlers, "a handler ran more than once");
});
