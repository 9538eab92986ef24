// src/timer.rs

//! Deadline-ordered timer structure: a min-heap of `(deadline, id)` keys
//! plus a liveness map keyed by id.
//!
//! Cancellation only erases the map entry; the heap key goes stale and is
//! discarded lazily when it surfaces. Ids are monotonic and owned by the
//! queue instance, so two timers with equal deadlines fire in registration
//! order.

use crate::error::Error;
use crate::event_loop::TimerHandler;
use log::trace;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// Opaque handle to a scheduled timer, local to one event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    deadline: Instant,
    id: u64,
}

struct TimerState {
    period: Duration,
    /// Remaining fire count; negative means repeat forever.
    repeat: i32,
    handler: TimerHandler,
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerKey>>,
    live: HashMap<TimerId, TimerState>,
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn insert(
        &mut self,
        delay: Duration,
        repeat: i32,
        handler: TimerHandler,
    ) -> Result<TimerId, Error> {
        if repeat == 0 {
            return Err(Error::InvalidArgument("timer repeat count must be non-zero"));
        }
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.live.insert(
            id,
            TimerState {
                period: delay,
                repeat,
                handler,
            },
        );
        self.heap.push(Reverse(TimerKey {
            deadline: Instant::now() + delay,
            id: id.0,
        }));
        trace!("scheduled {} (delay {:?}, repeat {})", id, delay, repeat);
        Ok(id)
    }

    /// Erases the timer from the liveness map. Safe to call from within the
    /// timer's own handler; the stale heap key is discarded lazily.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let was_live = self.live.remove(&id).is_some();
        if was_live {
            trace!("cancelled {}", id);
        }
        was_live
    }

    pub(crate) fn is_live(&self, id: TimerId) -> bool {
        self.live.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    /// Earliest live deadline, pruning stale heap tops so a cancelled timer
    /// cannot force an early wakeup.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.live.contains_key(&TimerId(top.id)) {
                return Some(top.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops every live key with deadline at or before `now`, in strict
    /// deadline order. Draining before firing means a zero-period timer that
    /// reschedules itself lands back in the heap without being revisited
    /// until the next cycle.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<(TimerId, Instant)> {
        let mut due = Vec::new();
        loop {
            match self.heap.peek() {
                Some(Reverse(top)) if top.deadline <= now => {}
                _ => break,
            }
            if let Some(Reverse(key)) = self.heap.pop() {
                let id = TimerId(key.id);
                if self.live.contains_key(&id) {
                    due.push((id, key.deadline));
                }
            }
        }
        due
    }

    pub(crate) fn handler(&self, id: TimerId) -> Option<TimerHandler> {
        self.live.get(&id).map(|state| state.handler.clone())
    }

    /// Post-fire bookkeeping: reschedule at `deadline + period` if
    /// iterations remain, otherwise erase. A timer that cancelled itself
    /// during its own handler is already gone and is left alone.
    pub(crate) fn finish_fire(&mut self, id: TimerId, deadline: Instant) {
        let (expired, period) = match self.live.get_mut(&id) {
            None => return,
            Some(state) => {
                if state.repeat == 1 {
                    (true, Duration::ZERO)
                } else {
                    if state.repeat > 1 {
                        state.repeat -= 1;
                    }
                    (false, state.period)
                }
            }
        };
        if expired {
            self.live.remove(&id);
            trace!("{} completed", id);
            return;
        }
        self.heap.push(Reverse(TimerKey {
            deadline: deadline + period,
            id: id.0,
        }));
    }
}
