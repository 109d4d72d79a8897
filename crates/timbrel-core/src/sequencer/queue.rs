//! Bounded priority queue of pending sequencer events.

use super::event::{ClientId, SeqEventType, SequencerEvent};
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Queued {
    time: u64,
    priority: u8,
    seq: u64,
    event: SequencerEvent,
}

impl Queued {
    #[inline]
    fn key(&self) -> (u64, u8, u64) {
        (self.time, self.priority, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Reversed: BinaryHeap is a max-heap and the earliest key must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Events ordered by `(time, priority, insertion)`.
pub(crate) struct EventQueue {
    heap: BinaryHeap<Queued>,
    capacity: usize,
    next_seq: u64,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn push(&mut self, event: SequencerEvent) -> Result<()> {
        if self.heap.len() >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued {
            time: event.time,
            priority: event.kind.priority(),
            seq,
            event,
        });
        Ok(())
    }

    /// Pop the earliest event if it is due at `tick`.
    pub(crate) fn pop_due(&mut self, tick: u64) -> Option<SequencerEvent> {
        if self.heap.peek()?.time > tick {
            return None;
        }
        self.heap.pop().map(|q| q.event)
    }

    /// Drop every event matching all given filters (`None` matches
    /// anything). Returns how many were removed.
    pub(crate) fn remove(
        &mut self,
        source: Option<ClientId>,
        dest: Option<ClientId>,
        event_type: Option<SeqEventType>,
    ) -> usize {
        let before = self.heap.len();
        self.heap.retain(|q| {
            let e = &q.event;
            let matches = source.is_none_or(|s| e.source == Some(s))
                && dest.is_none_or(|d| e.dest == d)
                && event_type.is_none_or(|t| e.event_type() == t);
            !matches
        });
        before - self.heap.len()
    }
}
