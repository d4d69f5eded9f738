//! Scenario tests for the action graph: composites, timers and host handles.

use std::time::Duration;

use apl_core::action::{ActionGraph, ActionState, Notification, Outcome};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn waiters<W: Clone>(notes: &[Notification<W>]) -> Vec<W> {
    notes.iter().map(|n| n.waiter.clone()).collect()
}

/// Advance the graph clock to `t`, firing timers in order.
fn run_to(graph: &mut ActionGraph<&'static str>, t: Duration) {
    while let Some(deadline) = graph.next_deadline() {
        if deadline > t {
            break;
        }
        graph.advance_to(deadline);
        graph.fire_due();
    }
    graph.advance_to(t);
}

#[test]
fn timer_resolves_when_clock_reaches_deadline() {
    let mut graph = ActionGraph::new();
    let timer = graph.make_timer(ms(100));
    graph.then(timer, "done");

    run_to(&mut graph, ms(99));
    assert!(graph.is_pending(timer));
    assert!(graph.drain_notifications().is_empty());

    run_to(&mut graph, ms(100));
    assert!(!graph.is_pending(timer));
    assert_eq!(waiters(&graph.drain_notifications()), vec!["done"]);
}

#[test]
fn all_resolves_after_every_child() {
    let mut graph = ActionGraph::new();
    let a = graph.make_timer(ms(10));
    let b = graph.make_timer(ms(30));
    let all = graph.make_all(&[a, b]).expect("two pending children");
    graph.then(all, "all");

    run_to(&mut graph, ms(10));
    assert!(graph.is_pending(all));
    run_to(&mut graph, ms(30));
    assert!(!graph.is_pending(all));
    assert_eq!(waiters(&graph.drain_notifications()), vec!["all"]);
}

#[test]
fn all_over_settled_children_is_immediately_complete() {
    let mut graph: ActionGraph<()> = ActionGraph::new();
    let a = graph.make_pending();
    graph.resolve(a);
    assert!(graph.make_all(&[a]).is_none());
    assert!(graph.make_any(&[]).is_none());
}

#[test]
fn terminating_all_cascades_to_children() {
    let mut graph = ActionGraph::new();
    let a = graph.make_timer(ms(10));
    let b = graph.make_pending();
    graph.on_terminate(a, "a");
    graph.on_terminate(b, "b");
    let all = graph.make_all(&[a, b]).expect("pending");
    graph.on_terminate(all, "all");

    graph.terminate(all);
    assert_eq!(graph.pending_count(), 0);
    assert_eq!(graph.timer_count(), 0);
    assert_eq!(waiters(&graph.drain_notifications()), vec!["all", "a", "b"]);
}

#[test]
fn externally_terminated_child_terminates_all() {
    let mut graph = ActionGraph::new();
    let a = graph.make_pending();
    let b = graph.make_pending();
    let all = graph.make_all(&[a, b]).expect("pending");
    graph.on_terminate(all, "all");
    graph.on_terminate(b, "b");

    graph.terminate(a);
    assert!(!graph.is_pending(all));
    assert!(!graph.is_pending(b));
    assert_eq!(waiters(&graph.drain_notifications()), vec!["all", "b"]);
}

#[test]
fn any_resolves_with_first_child_and_terminates_rest() {
    let mut graph = ActionGraph::new();
    let fast = graph.make_timer(ms(5));
    let slow = graph.make_timer(ms(50));
    graph.on_terminate(slow, "slow-terminated");
    let any = graph.make_any(&[fast, slow]).expect("pending");
    graph.then(any, "any");

    run_to(&mut graph, ms(5));
    assert!(!graph.is_pending(any));
    assert_eq!(graph.timer_count(), 0);
    assert_eq!(
        waiters(&graph.drain_notifications()),
        vec!["any", "slow-terminated"]
    );
}

#[test]
fn any_terminates_once_every_child_is_gone() {
    let mut graph = ActionGraph::new();
    let a = graph.make_pending();
    let b = graph.make_pending();
    let any = graph.make_any(&[a, b]).expect("pending");
    graph.on_terminate(any, "any");

    graph.terminate(a);
    assert!(graph.is_pending(any));
    graph.terminate(b);
    assert!(!graph.is_pending(any));
    assert_eq!(waiters(&graph.drain_notifications()), vec!["any"]);
}

#[test]
fn waiters_attached_after_settling_hear_the_matching_outcome() {
    let mut graph = ActionGraph::new();
    let resolved = graph.make_pending();
    let terminated = graph.make_pending();
    graph.resolve_with(resolved, 3);
    graph.terminate(terminated);
    assert!(graph.drain_notifications().is_empty());

    assert!(!graph.then(resolved, "then-late"));
    assert!(!graph.on_terminate(resolved, "terminate-late"));
    let notes = graph.drain_notifications();
    assert_eq!(waiters(&notes), vec!["then-late"]);
    assert_eq!(notes[0].outcome, Outcome::Resolved(Some(3)));

    assert!(!graph.then(terminated, "then-gone"));
    assert!(!graph.on_terminate(terminated, "terminate-gone"));
    let notes = graph.drain_notifications();
    assert_eq!(waiters(&notes), vec!["terminate-gone"]);
    assert_eq!(notes[0].outcome, Outcome::Terminated);
}

#[test]
fn action_ref_resolves_exactly_once() {
    let mut graph = ActionGraph::new();
    let (id, handle) = graph.make_host();
    graph.then(id, "then");
    graph.on_terminate(id, "terminate");

    assert!(handle.is_pending());
    handle.resolve_with(23);
    handle.resolve();
    handle.terminate();
    assert!(handle.is_resolved());
    assert_eq!(handle.argument(), Some(23));

    assert_eq!(graph.apply_host_signals(), 1);
    let notes = graph.drain_notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].outcome, Outcome::Resolved(Some(23)));
    assert_eq!(graph.state(id), None);
}

#[test]
fn action_ref_after_engine_terminated_is_a_noop() {
    let mut graph: ActionGraph<&str> = ActionGraph::new();
    let (id, handle) = graph.make_host();
    graph.terminate(id);
    assert!(handle.is_terminated());
    handle.resolve();
    assert!(handle.is_terminated());
    assert_eq!(graph.apply_host_signals(), 0);
}

#[test]
fn empty_and_expired_refs_are_inert() {
    let handle = {
        let mut graph: ActionGraph<()> = ActionGraph::new();
        let id = graph.make_pending();
        assert_eq!(graph.state(id), Some(ActionState::Pending));
        graph.action_ref(id)
    };
    // The graph is gone; the request is dropped.
    handle.resolve();
    assert!(handle.is_resolved());

    let empty = apl_core::action::ActionRef::empty();
    empty.resolve();
    assert!(empty.is_empty());
    assert!(!empty.is_pending());
    assert!(!empty.is_resolved());
}
