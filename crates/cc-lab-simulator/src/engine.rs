//! Discrete-event scheduler.
//!
//! A min-heap keyed by `(time, id)`: the earliest event pops first and
//! events sharing a timestamp pop in the order they were scheduled.
//! Cancellation removes the id from the pending set; the heap entry is
//! discarded lazily when it reaches the top.

use cc_lab_abstract::{EventId, SimTime};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

use crate::error::SimError;

#[derive(Debug)]
enum Slot<E> {
    Event(E),
    Stop,
}

#[derive(Debug)]
struct Entry<E> {
    time: SimTime,
    id: EventId,
    slot: Slot<E>,
}

// Custom Ord for Min-Heap (smallest time pops first)
impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

pub struct Scheduler<E> {
    now: SimTime,
    queue: BinaryHeap<Entry<E>>,
    next_id: u64,
    pending: HashSet<EventId>,
    stopped: bool,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            queue: BinaryHeap::new(),
            next_id: 0,
            pending: HashSet::new(),
            stopped: false,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    fn mint_id(&mut self) -> EventId {
        let id = EventId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn push(&mut self, time: SimTime, slot: Slot<E>) -> EventId {
        let id = self.mint_id();
        self.queue.push(Entry { time, id, slot });
        id
    }

    /// Schedule `event` to fire `delay` after the current time.
    pub fn schedule(&mut self, delay: SimTime, event: E) -> EventId {
        let at = self.now.saturating_add(delay);
        let id = self.push(at, Slot::Event(event));
        self.pending.insert(id);
        id
    }

    /// Schedule `event` at an absolute time, which must not be in the past.
    pub fn schedule_at(&mut self, at: SimTime, event: E) -> Result<EventId, SimError> {
        if at < self.now {
            return Err(SimError::NonCausal {
                requested: at,
                now: self.now,
            });
        }
        let id = self.push(at, Slot::Event(event));
        self.pending.insert(id);
        Ok(id)
    }

    /// Stop delivering events once the clock reaches `at`. Events already
    /// scheduled for exactly `at` still fire; anything scheduled later,
    /// including at the same timestamp, does not.
    pub fn stop_at(&mut self, at: SimTime) -> Result<(), SimError> {
        if at < self.now {
            return Err(SimError::NonCausal {
                requested: at,
                now: self.now,
            });
        }
        self.push(at, Slot::Stop);
        Ok(())
    }

    /// Returns true if the event was still pending.
    pub fn cancel(&mut self, id: EventId) -> bool {
        let was_pending = self.pending.remove(&id);
        if was_pending {
            debug!("Cancelled {}", id);
        }
        was_pending
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains(&id)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Number of live (not cancelled, not fired) events.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn peek_next_time(&self) -> Option<SimTime> {
        if self.stopped {
            return None;
        }
        self.queue.peek().map(|e| e.time)
    }

    /// Advance the clock to the next live event and return it.
    /// Returns `None` once the queue is drained or the stop marker is reached.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        if self.stopped {
            return None;
        }
        while let Some(entry) = self.queue.pop() {
            match entry.slot {
                Slot::Stop => {
                    self.now = entry.time;
                    self.stopped = true;
                    debug!("Stop marker reached at {}", self.now);
                    return None;
                }
                Slot::Event(event) => {
                    if !self.pending.remove(&entry.id) {
                        continue;
                    }
                    self.now = entry.time;
                    return Some((entry.time, event));
                }
            }
        }
        None
    }
}
