#![forbid(unsafe_code)]

//! Composable completion actions.
//!
//! An action is one outstanding unit of asynchronous work: a timer, a host
//! round-trip, or a composite wait over other actions. Actions live in an
//! [`ActionGraph`] arena keyed by [`ActionId`]; composite parents own their
//! children by id and children point back at their parent by id, so there
//! are no reference cycles and termination is a plain recursive walk.
//!
//! Continuations are data, not closures. A caller registers a waiter value
//! `W` with [`ActionGraph::then`] or [`ActionGraph::on_terminate`]; when the
//! action settles, a [`Notification`] carrying that waiter is queued and the
//! owner drains the queue with [`ActionGraph::drain_notifications`].
//!
//! # Invariants
//!
//! 1. An action settles at most once: Pending -> Resolved or Pending -> Terminated.
//! 2. Resolving or terminating a settled action is a silent no-op.
//! 3. `then` waiters are only notified on resolution; `on_terminate` waiters
//!    only on termination. A waiter registered after the action settled is
//!    notified right away if the outcome matches.
//! 4. Terminating a composite terminates every still-pending child first.
//! 5. An ALL composite resolves once every child resolved and terminates as
//!    soon as one child is terminated from outside.
//! 6. An ANY composite resolves with the first child to resolve (terminating
//!    the others) and terminates once every child was terminated.
//!
//! # Host handles
//!
//! [`ActionRef`] is the host-facing handle. It shares a small status cell with
//! the graph node and posts resolve/terminate requests into an inbox that the
//! owner applies with [`ActionGraph::apply_host_signals`]. The handle flips
//! its status immediately, so a second `resolve()` is ignored even before
//! the graph has processed the first.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::timers::{TimeoutId, Timers};

/// Stable identifier of an action inside an [`ActionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action#{}", self.0)
    }
}

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Pending,
    Resolved,
    Terminated,
}

/// How an action settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resolved, optionally with a host-supplied argument.
    Resolved(Option<i64>),
    Terminated,
}

/// A settled action paired with the waiter that asked to hear about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<W> {
    pub action: ActionId,
    pub outcome: Outcome,
    pub waiter: W,
}

// ---------------------------------------------------------------------------
// Host handle
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ActionStatus {
    id: ActionId,
    state: Cell<ActionState>,
    argument: Cell<Option<i64>>,
}

#[derive(Debug, Clone, Copy)]
enum HostSignal {
    Resolve(Option<i64>),
    Terminate,
}

type Inbox = RefCell<Vec<(ActionId, HostSignal)>>;

/// Host-facing, idempotent handle to an action.
///
/// An empty reference (see [`ActionRef::empty`]) answers every query with
/// `false` and ignores `resolve`/`terminate`.
#[derive(Clone, Default)]
pub struct ActionRef {
    status: Option<Rc<ActionStatus>>,
    inbox: Weak<Inbox>,
}

impl ActionRef {
    /// A reference bound to nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if this reference is not bound to an action.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
    }

    /// Identifier of the referenced action.
    pub fn id(&self) -> Option<ActionId> {
        self.status.as_ref().map(|s| s.id)
    }

    fn state(&self) -> Option<ActionState> {
        self.status.as_ref().map(|s| s.state.get())
    }

    pub fn is_pending(&self) -> bool {
        self.state() == Some(ActionState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        self.state() == Some(ActionState::Resolved)
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == Some(ActionState::Terminated)
    }

    /// Argument the action was resolved with, if any.
    pub fn argument(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.argument.get())
    }

    /// Resolve the action without an argument.
    pub fn resolve(&self) {
        self.signal(HostSignal::Resolve(None));
    }

    /// Resolve the action with a command-specific argument.
    pub fn resolve_with(&self, argument: i64) {
        self.signal(HostSignal::Resolve(Some(argument)));
    }

    /// Terminate the action.
    pub fn terminate(&self) {
        self.signal(HostSignal::Terminate);
    }

    fn signal(&self, signal: HostSignal) {
        let Some(status) = &self.status else {
            return;
        };
        if status.state.get() != ActionState::Pending {
            return;
        }
        match signal {
            HostSignal::Resolve(argument) => {
                status.state.set(ActionState::Resolved);
                status.argument.set(argument);
            }
            HostSignal::Terminate => status.state.set(ActionState::Terminated),
        }
        if let Some(inbox) = self.inbox.upgrade() {
            inbox.borrow_mut().push((status.id, signal));
        }
    }
}

impl fmt::Debug for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            None => f.write_str("ActionRef(empty)"),
            Some(s) => write!(f, "ActionRef({}, {:?})", s.id, s.state.get()),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Kind {
    Plain,
    Timer(TimeoutId),
    All { pending: usize, children: Vec<ActionId> },
    Any { pending: usize, children: Vec<ActionId> },
}

struct Node<W> {
    status: Rc<ActionStatus>,
    kind: Kind,
    parent: Option<ActionId>,
    then: Vec<W>,
    on_terminate: Vec<W>,
}

/// Outcomes of settled actions: one bit per id for termination, plus any
/// resolve argument.
#[derive(Debug, Default)]
struct SettledLog {
    terminated: Vec<u64>,
    arguments: HashMap<ActionId, i64>,
}

impl SettledLog {
    fn record(&mut self, id: ActionId, outcome: Outcome) {
        match outcome {
            Outcome::Resolved(Some(argument)) => {
                self.arguments.insert(id, argument);
            }
            Outcome::Resolved(None) => {}
            Outcome::Terminated => {
                let (word, bit) = Self::slot(id);
                if self.terminated.len() <= word {
                    self.terminated.resize(word + 1, 0);
                }
                self.terminated[word] |= bit;
            }
        }
    }

    fn outcome(&self, id: ActionId) -> Outcome {
        let (word, bit) = Self::slot(id);
        if self.terminated.get(word).is_some_and(|w| w & bit != 0) {
            Outcome::Terminated
        } else {
            Outcome::Resolved(self.arguments.get(&id).copied())
        }
    }

    fn slot(id: ActionId) -> (usize, u64) {
        let index = usize::try_from(id.0).unwrap_or(usize::MAX);
        (index / 64, 1 << (index % 64))
    }
}

/// Arena of pending actions plus the timer queue that drives timed ones.
///
/// Only pending actions are stored; a node is removed the moment it settles
/// and only its outcome is remembered.
pub struct ActionGraph<W> {
    nodes: HashMap<ActionId, Node<W>>,
    settled: SettledLog,
    next_id: u64,
    timers: Timers<ActionId>,
    inbox: Rc<Inbox>,
    notifications: VecDeque<Notification<W>>,
}

impl<W> Default for ActionGraph<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> fmt::Debug for ActionGraph<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionGraph")
            .field("pending", &self.nodes.len())
            .field("timers", &self.timers.len())
            .field("now", &self.timers.now())
            .field("queued_notifications", &self.notifications.len())
            .finish()
    }
}

impl<W> ActionGraph<W> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            settled: SettledLog::default(),
            next_id: 1,
            timers: Timers::new(),
            inbox: Rc::new(RefCell::new(Vec::new())),
            notifications: VecDeque::new(),
        }
    }

    fn insert(&mut self, kind: Kind) -> ActionId {
        let id = ActionId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                status: Rc::new(ActionStatus {
                    id,
                    state: Cell::new(ActionState::Pending),
                    argument: Cell::new(None),
                }),
                kind,
                parent: None,
                then: Vec::new(),
                on_terminate: Vec::new(),
            },
        );
        id
    }

    /// A pending action settled explicitly by its owner or by the host.
    pub fn make_pending(&mut self) -> ActionId {
        self.insert(Kind::Plain)
    }

    /// A pending action plus a host handle to it.
    pub fn make_host(&mut self) -> (ActionId, ActionRef) {
        let id = self.make_pending();
        (id, self.action_ref(id))
    }

    /// An action that resolves once `delay` has elapsed on the fake clock.
    pub fn make_timer(&mut self, delay: Duration) -> ActionId {
        let id = self.insert(Kind::Plain);
        let timeout = self.timers.set_timeout(delay, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.kind = Kind::Timer(timeout);
        }
        id
    }

    /// Composite that resolves when every pending child resolves.
    ///
    /// Children that already settled are ignored. Returns `None` when no
    /// child is pending: the composite would be complete immediately.
    pub fn make_all(&mut self, children: &[ActionId]) -> Option<ActionId> {
        let live = self.adopt_pending(children)?;
        let id = self.insert(Kind::All {
            pending: live.len(),
            children: live.clone(),
        });
        self.set_parent(&live, id);
        Some(id)
    }

    /// Composite that resolves with the first child to resolve.
    ///
    /// Returns `None` when no child is pending.
    pub fn make_any(&mut self, children: &[ActionId]) -> Option<ActionId> {
        let live = self.adopt_pending(children)?;
        let id = self.insert(Kind::Any {
            pending: live.len(),
            children: live.clone(),
        });
        self.set_parent(&live, id);
        Some(id)
    }

    fn adopt_pending(&self, children: &[ActionId]) -> Option<Vec<ActionId>> {
        let mut live: Vec<ActionId> = Vec::with_capacity(children.len());
        for child in children {
            if self.nodes.contains_key(child) && !live.contains(child) {
                live.push(*child);
            }
        }
        (!live.is_empty()).then_some(live)
    }

    fn set_parent(&mut self, children: &[ActionId], parent: ActionId) {
        for child in children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(parent);
            }
        }
    }

    /// Register a waiter notified when `id` resolves.
    ///
    /// Returns `false` if the action has already settled; if it resolved,
    /// the waiter is notified right away.
    pub fn then(&mut self, id: ActionId, waiter: W) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.then.push(waiter);
            return true;
        }
        if let Some(outcome @ Outcome::Resolved(_)) = self.settled_outcome(id) {
            self.notifications.push_back(Notification {
                action: id,
                outcome,
                waiter,
            });
        }
        false
    }

    /// Register a waiter notified when `id` is terminated.
    ///
    /// Returns `false` if the action has already settled; if it was
    /// terminated, the waiter is notified right away.
    pub fn on_terminate(&mut self, id: ActionId, waiter: W) -> bool {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.on_terminate.push(waiter);
            return true;
        }
        if let Some(Outcome::Terminated) = self.settled_outcome(id) {
            self.notifications.push_back(Notification {
                action: id,
                outcome: Outcome::Terminated,
                waiter,
            });
        }
        false
    }

    /// How `id` settled; `None` while it is pending or if it never existed.
    pub fn settled_outcome(&self, id: ActionId) -> Option<Outcome> {
        let known = id.0 > 0 && id.0 < self.next_id;
        (known && !self.nodes.contains_key(&id)).then(|| self.settled.outcome(id))
    }

    /// Resolve a pending action.
    pub fn resolve(&mut self, id: ActionId) {
        self.settle(id, Outcome::Resolved(None));
    }

    /// Resolve a pending action with an argument.
    pub fn resolve_with(&mut self, id: ActionId, argument: i64) {
        self.settle(id, Outcome::Resolved(Some(argument)));
    }

    /// Terminate a pending action and every pending child below it.
    pub fn terminate(&mut self, id: ActionId) {
        self.settle(id, Outcome::Terminated);
    }

    /// Terminate every pending action, outermost first.
    ///
    /// Returns how many actions were terminated directly.
    pub fn terminate_all(&mut self) -> usize {
        let mut pending: Vec<(bool, ActionId)> = self
            .nodes
            .iter()
            .map(|(id, node)| (node.parent.is_some(), *id))
            .collect();
        pending.sort_unstable();
        let mut count = 0;
        for (_, id) in pending {
            if self.nodes.contains_key(&id) {
                self.terminate(id);
                count += 1;
            }
        }
        count
    }

    fn settle(&mut self, id: ActionId, outcome: Outcome) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        self.settled.record(id, outcome);
        match outcome {
            Outcome::Resolved(argument) => {
                node.status.state.set(ActionState::Resolved);
                node.status.argument.set(argument);
                for waiter in node.then {
                    self.notifications.push_back(Notification {
                        action: id,
                        outcome,
                        waiter,
                    });
                }
            }
            Outcome::Terminated => {
                node.status.state.set(ActionState::Terminated);
                for waiter in node.on_terminate {
                    self.notifications.push_back(Notification {
                        action: id,
                        outcome,
                        waiter,
                    });
                }
            }
        }
        match node.kind {
            Kind::Timer(timeout) => {
                self.timers.clear_timeout(timeout);
            }
            Kind::All { children, .. } | Kind::Any { children, .. } => {
                for child in children {
                    self.settle(child, Outcome::Terminated);
                }
            }
            Kind::Plain => {}
        }
        if let Some(parent) = node.parent {
            self.child_settled(parent, outcome);
        }
    }

    fn child_settled(&mut self, parent: ActionId, outcome: Outcome) {
        let Some(node) = self.nodes.get_mut(&parent) else {
            return;
        };
        let settle_parent = match (&mut node.kind, outcome) {
            (Kind::All { pending, .. }, Outcome::Resolved(_)) => {
                *pending -= 1;
                (*pending == 0).then_some(Outcome::Resolved(None))
            }
            (Kind::All { .. }, Outcome::Terminated) => Some(Outcome::Terminated),
            (Kind::Any { .. }, Outcome::Resolved(argument)) => Some(Outcome::Resolved(argument)),
            (Kind::Any { pending, .. }, Outcome::Terminated) => {
                *pending -= 1;
                (*pending == 0).then_some(Outcome::Terminated)
            }
            _ => None,
        };
        if let Some(outcome) = settle_parent {
            self.settle(parent, outcome);
        }
    }

    /// Current state of a pending action, `None` once it settled.
    pub fn state(&self, id: ActionId) -> Option<ActionState> {
        self.nodes.get(&id).map(|n| n.status.state.get())
    }

    /// True while `id` has not settled.
    pub fn is_pending(&self, id: ActionId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Host handle for `id`. Empty if the action already settled.
    pub fn action_ref(&self, id: ActionId) -> ActionRef {
        match self.nodes.get(&id) {
            Some(node) => ActionRef {
                status: Some(Rc::clone(&node.status)),
                inbox: Rc::downgrade(&self.inbox),
            },
            None => ActionRef::empty(),
        }
    }

    /// Number of pending actions.
    pub fn pending_count(&self) -> usize {
        self.nodes.len()
    }

    // -- Clock --------------------------------------------------------------

    /// Current fake-clock time.
    pub fn now(&self) -> Duration {
        self.timers.now()
    }

    /// Deadline of the next timer action.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    /// Number of scheduled timer actions.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Move the clock to `time` without firing anything.
    pub fn advance_to(&mut self, time: Duration) {
        self.timers.advance_to(time);
    }

    /// Resolve every timer action whose deadline has passed. Returns how many fired.
    pub fn fire_due(&mut self) -> usize {
        let mut fired = 0;
        while let Some((_, id)) = self.timers.pop_due() {
            // The timeout is already gone; make sure settle does not clear it twice.
            if let Some(node) = self.nodes.get_mut(&id) {
                node.kind = Kind::Plain;
            }
            self.settle(id, Outcome::Resolved(None));
            fired += 1;
        }
        fired
    }

    // -- Draining -----------------------------------------------------------

    /// Apply resolve/terminate requests posted through [`ActionRef`]s.
    /// Returns how many requests were applied to still-pending actions.
    pub fn apply_host_signals(&mut self) -> usize {
        let signals = std::mem::take(&mut *self.inbox.borrow_mut());
        let mut applied = 0;
        for (id, signal) in signals {
            if !self.nodes.contains_key(&id) {
                crate::trace!(action = %id, "host signal for settled action ignored");
                continue;
            }
            applied += 1;
            match signal {
                HostSignal::Resolve(argument) => self.settle(id, Outcome::Resolved(argument)),
                HostSignal::Terminate => self.settle(id, Outcome::Terminated),
            }
        }
        applied
    }

    /// True if host requests are waiting to be applied.
    pub fn has_host_signals(&self) -> bool {
        !self.inbox.borrow().is_empty()
    }

    /// Take every queued notification, oldest first.
    pub fn drain_notifications(&mut self) -> Vec<Notification<W>> {
        std::mem::take(&mut self.notifications).into()
    }

    /// True if notifications are queued.
    pub fn has_notifications(&self) -> bool {
        !self.notifications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_notifies_then_waiters_only() {
        let mut graph = ActionGraph::new();
        let id = graph.make_pending();
        assert!(graph.then(id, "then"));
        assert!(graph.on_terminate(id, "term"));
        graph.resolve(id);
        let notes = graph.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].waiter, "then");
        assert_eq!(notes[0].outcome, Outcome::Resolved(None));
        assert!(!graph.then(id, "late"));
        assert!(!graph.on_terminate(id, "late-term"));
        let late = graph.drain_notifications();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].waiter, "late");
    }

    #[test]
    fn terminate_all_leaves_nothing_pending() {
        let mut graph = ActionGraph::new();
        let a = graph.make_pending();
        let b = graph.make_timer(Duration::from_millis(10));
        let all = graph.make_all(&[a, b]).expect("pending children");
        let lone = graph.make_pending();
        graph.on_terminate(lone, "lone");
        graph.on_terminate(all, "all");

        assert_eq!(graph.terminate_all(), 2);
        for id in [a, b, all, lone] {
            assert!(!graph.is_pending(id));
        }
        let mut heard: Vec<_> = graph.drain_notifications().into_iter().map(|n| n.waiter).collect();
        heard.sort_unstable();
        assert_eq!(heard, vec!["all", "lone"]);
        assert_eq!(graph.terminate_all(), 0);
    }

    #[test]
    fn settled_outcomes_are_remembered() {
        let mut graph: ActionGraph<()> = ActionGraph::new();
        let resolved = graph.make_pending();
        let terminated = graph.make_pending();
        let pending = graph.make_pending();
        graph.resolve_with(resolved, 7);
        graph.terminate(terminated);
        assert_eq!(graph.settled_outcome(resolved), Some(Outcome::Resolved(Some(7))));
        assert_eq!(graph.settled_outcome(terminated), Some(Outcome::Terminated));
        assert_eq!(graph.settled_outcome(pending), None);
        assert_eq!(graph.settled_outcome(ActionId(999)), None);
    }

    #[test]
    fn settling_twice_is_ignored() {
        let mut graph = ActionGraph::new();
        let id = graph.make_pending();
        graph.on_terminate(id, 1);
        graph.terminate(id);
        graph.terminate(id);
        graph.resolve(id);
        assert_eq!(graph.drain_notifications().len(), 1);
    }

    #[test]
    fn terminating_a_timer_clears_its_timeout() {
        let mut graph: ActionGraph<()> = ActionGraph::new();
        let id = graph.make_timer(Duration::from_millis(10));
        assert_eq!(graph.timer_count(), 1);
        graph.terminate(id);
        assert_eq!(graph.timer_count(), 0);
        assert_eq!(graph.pending_count(), 0);
    }
}
