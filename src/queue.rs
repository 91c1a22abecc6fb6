//! Lock-free SPSC frame queue with a drop-oldest overwrite policy.
//!
//! Bridges the two independently scheduled roles of the pipeline: the
//! producer (the stream source's delivery thread) enqueues completed
//! frames, the consumer (a poll loop) drains them. Neither side ever
//! blocks; a rate mismatch is absorbed by overwriting the oldest unread
//! frame, because for a live view recency beats completeness.
//!
//! Occupancy is tracked with two monotonically increasing counters,
//! `head` (next write) and `tail` (next read). Tail advancement goes
//! through a compare-exchange so the producer's drop-oldest and the
//! consumer's dequeue can never claim the same entry.
//!
//! Slot hand-off uses per-slot sequence stamps in the style of Vyukov's
//! bounded queue: for entry `i`, stamp `i` means the slot is writable,
//! `i + 1` means it holds entry `i`, and the reader republishes the stamp
//! only after it has finished with the slot. Storage carries one spare
//! slot beyond the logical capacity, so even at full occupancy the
//! producer's write target is physically distinct from the slot a
//! concurrent dequeue may still be reading; a slot is reused only once
//! its reader has stamped it free.
//!
//! # Contract
//!
//! Exactly one thread may call [`enqueue`](FrameQueue::enqueue) and one
//! thread may call [`try_dequeue`](FrameQueue::try_dequeue) concurrently.
//! [`len`](FrameQueue::len) is advisory and may be momentarily stale; it
//! must not drive correctness decisions.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

/// One ring slot: the frame cell plus its hand-off stamp.
///
/// Stamp states for the entry `e` mapped to this slot: `e` writable,
/// `e + 1` occupied, `e + slot_count` consumed (equals the writable stamp
/// of the next entry mapped here).
struct Slot {
    seq: AtomicUsize,
    frame: UnsafeCell<Option<Bytes>>,
}

/// Fixed-capacity single-producer/single-consumer frame ring.
pub struct FrameQueue {
    /// `capacity + 1` slots; entry `i` lives in slot `i % slots.len()`.
    slots: Box<[Slot]>,
    /// Logical capacity: the bound on unread frames.
    capacity: usize,
    /// Next write position (monotonic, producer-only writes).
    head: AtomicUsize,
    /// Next read position (monotonic, CAS-advanced by either side).
    tail: AtomicUsize,
}

// A slot's frame cell is touched only between claiming it (stamp match,
// plus a tail CAS on the read side) and republishing its stamp, with
// Release/Acquire pairs on the stamp ordering the data. Active entries
// span less than one slot-ring revolution, so no two claims alias. One
// producer and one consumer, per contract.
unsafe impl Send for FrameQueue {}
unsafe impl Sync for FrameQueue {}

impl FrameQueue {
    /// Create a queue with the given capacity (0 falls back to the default).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        let slots = (0..capacity + 1)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                frame: UnsafeCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Enqueue a frame; never fails, never blocks on the consumer's pace.
    ///
    /// When full, the oldest unread frame is dropped first. Must only be
    /// called from the single producer.
    pub fn enqueue(&self, frame: Bytes) {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head % self.slots.len()];
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if head - tail >= self.capacity {
                // Full: claim the oldest entry and drop its frame. A
                // failed CAS means the consumer freed an entry for us.
                if self
                    .tail
                    .compare_exchange(tail, tail + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // The claim gives exclusive access to entry `tail`;
                    // its stamp is `tail + 1`, our own publish.
                    let oldest = &self.slots[tail % self.slots.len()];
                    unsafe { (*oldest.frame.get()).take() };
                    oldest.seq.store(tail + self.slots.len(), Ordering::Release);
                }
                continue;
            }

            if slot.seq.load(Ordering::Acquire) == head {
                // The slot's previous occupant has been stamped free.
                break;
            }
            // The consumer claimed the previous occupant but has not
            // republished the stamp yet; its remaining work is one take
            // and one store.
            std::hint::spin_loop();
        }

        unsafe { *slot.frame.get() = Some(frame) };
        slot.seq.store(head + 1, Ordering::Release);
        self.head.store(head + 1, Ordering::Release);
    }

    /// Dequeue the oldest frame, or `None` when the queue is empty.
    ///
    /// Never blocks. Must only be called from the single consumer.
    pub fn try_dequeue(&self) -> Option<Bytes> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let slot = &self.slots[tail % self.slots.len()];
            let seq = slot.seq.load(Ordering::Acquire);

            if seq == tail + 1 {
                // Entry `tail` is readable; claim it. A failed CAS means
                // the producer's drop-oldest took it.
                if self
                    .tail
                    .compare_exchange(tail, tail + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let frame = unsafe { (*slot.frame.get()).take() };
                    // Republish only after the read: this is what keeps
                    // the producer out of the slot until we are done.
                    slot.seq.store(tail + self.slots.len(), Ordering::Release);
                    return frame;
                }
                continue;
            }

            if seq == tail && self.head.load(Ordering::Acquire) == tail {
                return None;
            }
            // Stale tail, or the producer is mid-write of entry `tail`.
            std::hint::spin_loop();
        }
    }

    /// Advisory occupancy; may be momentarily inconsistent.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    /// Check if the queue appears empty (advisory).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bound on unread frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
