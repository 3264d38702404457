//! Deadline queue for deferred callbacks.
//!
//! The logger never sleeps. Work that must happen "later" (the sweep of
//! pending overlap ends) is recorded here as a deadline plus a key naming
//! what to resume. The host's frame tick drains every entry whose deadline
//! has passed and the logger dispatches on the key.
//!
//! Cancellation is lazy: [`TimerQueue::cancel`] forgets the handle and the
//! stale heap entry is skipped when it surfaces.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

/// Handle of a scheduled entry, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

/// A heap entry. Ordered by deadline, then by scheduling order.
#[derive(Debug)]
struct Entry<K> {
    deadline: f64,
    seq: u64,
    handle: TimerHandle,
    key: K,
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K> Eq for Entry<K> {}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .total_cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Min-heap of deadlines, each carrying a resumption key.
#[derive(Debug)]
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<Entry<K>>>,
    /// Live handles and their deadlines.
    live: BTreeMap<TimerHandle, f64>,
    next_seq: u64,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TimerQueue<K> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `key` to fire at `deadline`.
    pub fn schedule(&mut self, key: K, deadline: f64) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let handle = TimerHandle(seq);
        self.live.insert(handle, deadline);
        self.heap.push(Reverse(Entry {
            deadline,
            seq,
            handle,
            key,
        }));
        handle
    }

    /// Cancel a scheduled entry. Returns `false` if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle).is_some()
    }

    /// Deadline of an entry still waiting to fire.
    pub fn deadline(&self, handle: TimerHandle) -> Option<f64> {
        self.live.get(&handle).copied()
    }

    /// Earliest live deadline, if any.
    pub fn next_deadline(&mut self) -> Option<f64> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Pop the earliest entry whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(TimerHandle, K)> {
        self.discard_cancelled();
        let due = self
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.deadline <= now);
        if !due {
            return None;
        }
        let Reverse(entry) = self.heap.pop()?;
        self.live.remove(&entry.handle);
        Some((entry.handle, entry.key))
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.live.contains_key(&entry.handle) {
                break;
            }
            self.heap.pop();
        }
    }
}
