//! Virtual-time event scheduling.
//!
//! The cache never arms per-entry timers; it asks a [Scheduler] for one
//! shared callback slot and remembers the returned [TimerToken]. Dispatch is
//! data-driven: the loop that owns the scheduler pops due tokens with
//! [EventScheduler::advance] and routes each one to the subsystem that
//! scheduled it. No boxed callbacks cross the scheduler boundary.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use log::trace;

use crate::time::{Duration, Instant};

/// Opaque, monotonically increasing handle for a scheduled timer.
///
/// Tokens are never reused; a fired or cancelled token never becomes
/// pending again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    /// A sentinel token that never matches any scheduled timer.
    pub const INVALID: TimerToken = TimerToken(0);
}

/// The narrow clock-and-timer capability the cache depends on.
///
/// Implemented by [EventScheduler]; tests are free to substitute their own
/// implementation, the cache only ever calls these four methods.
pub trait Scheduler {
    /// Current time on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Arrange for a timer to fire `delay` from now.
    fn schedule(&mut self, delay: Duration) -> TimerToken;

    /// Cancel a scheduled timer. Cancelling a token that already fired is a
    /// no-op.
    fn cancel(&mut self, token: TimerToken);

    /// Query whether a timer is scheduled and has not yet fired.
    fn is_pending(&self, token: TimerToken) -> bool;
}

/// A single-threaded run queue over a virtual clock.
///
/// Events are totally ordered by `(deadline, token)`, so two timers due at
/// the same instant fire in the order they were scheduled. Cancelled
/// entries stay in the heap and are skipped when they surface.
#[derive(Debug)]
pub struct EventScheduler {
    now: Instant,
    queue: BinaryHeap<Reverse<(Instant, TimerToken)>>,
    live: HashSet<TimerToken>,
    next_token: u64,
}

impl EventScheduler {
    pub fn new() -> EventScheduler {
        EventScheduler {
            now: Instant::ZERO,
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            next_token: 1,
        }
    }

    /// Pop the next live timer, moving the clock to its deadline.
    ///
    /// Returns `None` when no live timer remains; the clock does not move
    /// in that case.
    pub fn advance(&mut self) -> Option<TimerToken> {
        while let Some(Reverse((at, token))) = self.queue.pop() {
            if !self.live.remove(&token) {
                continue;
            }
            debug_assert!(at >= self.now);
            self.now = at;
            trace!("fire {:?} at {}", token, at);
            return Some(token);
        }
        None
    }

    /// Deadline of the next live timer, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((at, token))) = self.queue.peek() {
            if self.live.contains(&token) {
                return Some(at);
            }
            self.queue.pop();
        }
        None
    }

    /// Number of timers scheduled and not yet fired or cancelled.
    pub fn pending_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for EventScheduler {
    fn default() -> EventScheduler {
        EventScheduler::new()
    }
}

impl Scheduler for EventScheduler {
    fn now(&self) -> Instant {
        self.now
    }

    fn schedule(&mut self, delay: Duration) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        let at = self.now + delay;
        self.queue.push(Reverse((at, token)));
        self.live.insert(token);
        trace!("schedule {:?} at {}", token, at);
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if self.live.remove(&token) {
            trace!("cancel {:?}", token);
        }
    }

    fn is_pending(&self, token: TimerToken) -> bool {
        self.live.contains(&token)
    }
}
