#![forbid(unsafe_code)]

//! Explicit fake-clock timer queue.
//!
//! The engine never reads a wall clock. Time only moves when the host calls
//! [`Timers::advance_to`], which makes every schedule in this crate
//! deterministic and testable.
//!
//! # Invariants
//!
//! 1. Timeouts fire in deadline order; equal deadlines fire in scheduling order.
//! 2. `now()` never decreases.
//! 3. A cleared timeout never fires.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Handle for a scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeoutId(u64);

/// A deadline-ordered queue of payloads.
#[derive(Debug)]
pub struct Timers<T> {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), T>,
    deadlines: HashMap<TimeoutId, Duration>,
}

impl<T> Default for Timers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Timers<T> {
    /// Create an empty queue at time zero.
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current fake-clock time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Schedule `payload` to fire `delay` after the current time.
    pub fn set_timeout(&mut self, delay: Duration, payload: T) -> TimeoutId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = self.now + delay;
        self.queue.insert((deadline, seq), payload);
        let id = TimeoutId(seq);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a timeout, returning its payload if it had not fired yet.
    pub fn clear_timeout(&mut self, id: TimeoutId) -> Option<T> {
        let deadline = self.deadlines.remove(&id)?;
        self.queue.remove(&(deadline, id.0))
    }

    /// Deadline of the next timeout, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Pop the earliest timeout whose deadline is at or before `now()`.
    pub fn pop_due(&mut self) -> Option<(TimeoutId, T)> {
        let (&(deadline, seq), _) = self.queue.iter().next()?;
        if deadline > self.now {
            return None;
        }
        let payload = self.queue.remove(&(deadline, seq))?;
        let id = TimeoutId(seq);
        self.deadlines.remove(&id);
        Some((id, payload))
    }

    /// Move the clock forward to `time`. Moving backwards is ignored.
    pub fn advance_to(&mut self, time: Duration) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Number of timeouts still scheduled.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
