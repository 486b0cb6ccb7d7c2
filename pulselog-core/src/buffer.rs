//! Capacity-bounded buffer of pending events with a delivery watermark
//!
//! ## Invariants
//!
//! - Ids are assigned inside the append critical section, so id order equals
//!   insertion order and every snapshot is a gap-free ascending run.
//! - Every buffered record has `id > watermark`.
//! - `len() <= capacity()`. An append that would exceed the capacity clears
//!   the whole buffer instead; the id counter keeps counting.
//! - The watermark never moves backward.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{EventDraft, EventRecord};

/// Raised when the pending count reaches a positive multiple of the flush threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSignal {
    /// Pending count at the moment of the crossing
    pub pending: usize,
}

/// What [`EventBuffer::append`] did with a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Id assigned to the new record
    pub id: u64,
    /// Present when this append crossed a threshold multiple
    pub signal: Option<FlushSignal>,
    /// True when this append overflowed the capacity and cleared the buffer
    pub overflowed: bool,
}

struct BufferState {
    records: VecDeque<EventRecord>,
    next_id: u64,
    watermark: Option<u64>,
    overflow_count: u64,
}

/// Ordered store of events awaiting delivery
pub struct EventBuffer {
    capacity: usize,
    threshold: usize,
    state: Mutex<BufferState>,
}

impl EventBuffer {
    /// Create an empty buffer.
    ///
    /// `threshold` is clamped to at least 1; config validation rejects 0 earlier.
    pub fn new(capacity: usize, threshold: usize) -> Self {
        Self {
            capacity,
            threshold: threshold.max(1),
            state: Mutex::new(BufferState {
                records: VecDeque::with_capacity(capacity.min(1024)),
                next_id: 1,
                watermark: None,
                overflow_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign the next id to `draft` and buffer it
    pub fn append(&self, draft: EventDraft) -> Appended {
        let mut state = self.lock();

        let id = state.next_id;
        state.next_id += 1;
        state.records.push_back(draft.into_record(id));

        let size = state.records.len();
        if size > self.capacity {
            state.records.clear();
            state.overflow_count += 1;
            tracing::warn!(
                dropped = size,
                capacity = self.capacity,
                last_id = id,
                "Event buffer overflowed; pending events discarded"
            );
            return Appended {
                id,
                signal: None,
                overflowed: true,
            };
        }

        let signal = (size % self.threshold == 0).then_some(FlushSignal { pending: size });
        Appended {
            id,
            signal,
            overflowed: false,
        }
    }

    /// Copy of every pending record, in id order
    pub fn pending_snapshot(&self) -> Vec<EventRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// Advance the watermark to `upto_id` (never backward) and prune delivered records
    pub fn acknowledge(&self, upto_id: u64) {
        let mut state = self.lock();

        let watermark = state.watermark.map_or(upto_id, |w| w.max(upto_id));
        state.watermark = Some(watermark);

        let before = state.records.len();
        while state
            .records
            .front()
            .is_some_and(|record| record.id <= watermark)
        {
            state.records.pop_front();
        }

        tracing::trace!(
            watermark,
            pruned = before - state.records.len(),
            remaining = state.records.len(),
            "Acknowledged events"
        );
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Highest acknowledged id, `None` until the first acknowledgement
    pub fn watermark(&self) -> Option<u64> {
        self.lock().watermark
    }

    /// Number of times the buffer has been cleared by overflow
    pub fn overflow_count(&self) -> u64 {
        self.lock().overflow_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}
