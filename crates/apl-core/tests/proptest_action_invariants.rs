//! Property-based invariant tests for the action graph.
//!
//! 1. Every action settles at most once (at most one notification per action).
//! 2. The notification outcome agrees with the host handle's final state.
//! 3. Terminating every root leaves no pending actions and no timers.
//! 4. Timers fire in deadline order.

use std::collections::HashMap;
use std::time::Duration;

use apl_core::action::{ActionGraph, ActionId, ActionRef, Outcome};
use apl_core::timers::Timers;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Timer(u64),
    Pending,
    Resolve(usize),
    Terminate(usize),
    HostResolve(usize),
    All(Vec<usize>),
    Any(Vec<usize>),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..200).prop_map(Op::Timer),
        Just(Op::Pending),
        any::<usize>().prop_map(Op::Resolve),
        any::<usize>().prop_map(Op::Terminate),
        any::<usize>().prop_map(Op::HostResolve),
        prop::collection::vec(any::<usize>(), 0..4).prop_map(Op::All),
        prop::collection::vec(any::<usize>(), 0..4).prop_map(Op::Any),
        (0u64..150).prop_map(Op::Advance),
    ]
}

struct Harness {
    graph: ActionGraph<ActionId>,
    actions: Vec<(ActionId, ActionRef)>,
    settled: HashMap<ActionId, Vec<Outcome>>,
}

impl Harness {
    fn track(&mut self, id: ActionId) {
        self.graph.then(id, id);
        self.graph.on_terminate(id, id);
        let handle = self.graph.action_ref(id);
        self.actions.push((id, handle));
    }

    fn pick(&self, i: usize) -> Option<ActionId> {
        (!self.actions.is_empty()).then(|| self.actions[i % self.actions.len()].0)
    }

    fn drain(&mut self) {
        self.graph.apply_host_signals();
        for note in self.graph.drain_notifications() {
            self.settled.entry(note.waiter).or_default().push(note.outcome);
        }
    }
}

proptest! {
    #[test]
    fn actions_settle_at_most_once(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut h = Harness {
            graph: ActionGraph::new(),
            actions: Vec::new(),
            settled: HashMap::new(),
        };
        for op in ops {
            match op {
                Op::Timer(d) => {
                    let id = h.graph.make_timer(Duration::from_millis(d));
                    h.track(id);
                }
                Op::Pending => {
                    let id = h.graph.make_pending();
                    h.track(id);
                }
                Op::Resolve(i) => if let Some(id) = h.pick(i) { h.graph.resolve(id) },
                Op::Terminate(i) => if let Some(id) = h.pick(i) { h.graph.terminate(id) },
                Op::HostResolve(i) => if !h.actions.is_empty() {
                    let n = h.actions.len();
                    h.actions[i % n].1.resolve();
                },
                Op::All(idx) => {
                    let children: Vec<ActionId> = idx.iter().filter_map(|i| h.pick(*i)).collect();
                    if let Some(id) = h.graph.make_all(&children) {
                        h.track(id);
                    }
                }
                Op::Any(idx) => {
                    let children: Vec<ActionId> = idx.iter().filter_map(|i| h.pick(*i)).collect();
                    if let Some(id) = h.graph.make_any(&children) {
                        h.track(id);
                    }
                }
                Op::Advance(d) => {
                    let target = h.graph.now() + Duration::from_millis(d);
                    while let Some(deadline) = h.graph.next_deadline() {
                        if deadline > target {
                            break;
                        }
                        h.graph.advance_to(deadline);
                        h.graph.fire_due();
                    }
                    h.graph.advance_to(target);
                }
            }
            h.drain();
        }

        for (id, handle) in &h.actions {
            let outcomes = h.settled.get(id).cloned().unwrap_or_default();
            prop_assert!(outcomes.len() <= 1, "{id} settled {} times", outcomes.len());
            match outcomes.first() {
                Some(Outcome::Resolved(_)) => prop_assert!(handle.is_resolved()),
                Some(Outcome::Terminated) => prop_assert!(handle.is_terminated()),
                None => prop_assert!(handle.is_pending() && h.graph.is_pending(*id)),
            }
        }

        let roots: Vec<ActionId> = h.actions.iter().map(|(id, _)| *id).collect();
        for id in roots {
            h.graph.terminate(id);
        }
        h.drain();
        prop_assert_eq!(h.graph.pending_count(), 0);
        prop_assert_eq!(h.graph.timer_count(), 0);
    }

    #[test]
    fn timers_fire_in_deadline_order(delays in prop::collection::vec(0u64..1000, 1..40)) {
        let mut timers = Timers::new();
        for (i, d) in delays.iter().enumerate() {
            timers.set_timeout(Duration::from_millis(*d), i);
        }
        timers.advance_to(Duration::from_millis(1000));
        let mut last = (0u64, 0usize);
        let mut count = 0;
        while let Some((_, i)) = timers.pop_due() {
            let key = (delays[i], i);
            prop_assert!(count == 0 || key > last);
            last = key;
            count += 1;
        }
        prop_assert_eq!(count, delays.len());
    }
}
