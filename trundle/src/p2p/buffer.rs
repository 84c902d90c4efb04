// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Bounded per-priority FIFO over preallocated slots.
//!
//! Producers reserve the write-head slot of a level, fill it in place, then commit it.
//! Consumers always see the oldest value of the highest non-empty level. The write head of a
//! level stays put across consumes, so a partially filled reservation survives while older
//! packets are drained.

use crate::p2p::packet::P2pPriority;

struct Level<ValueType, const CAPACITY: usize> {
    values: [ValueType; CAPACITY],
    oldest: usize,
    size: usize,
}

impl<ValueType: Default, const CAPACITY: usize> Level<ValueType, CAPACITY> {
    fn new() -> Self {
        Self {
            values: core::array::from_fn(|_| ValueType::default()),
            oldest: 0,
            size: 0,
        }
    }

    #[inline]
    fn write_head(&self) -> usize {
        (self.oldest + self.size) % CAPACITY
    }
}

/// Fixed-capacity ring buffer partitioned by [`P2pPriority`], `CAPACITY` slots per level.
pub struct PriorityRingBuffer<ValueType, const CAPACITY: usize> {
    levels: [Level<ValueType, CAPACITY>; P2pPriority::NUM_LEVELS],
}

impl<ValueType: Default, const CAPACITY: usize> PriorityRingBuffer<ValueType, CAPACITY> {
    pub fn new() -> Self {
        Self {
            levels: core::array::from_fn(|_| Level::new()),
        }
    }

    /// Number of slots per priority level.
    #[inline]
    pub fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Number of committed values at `priority`.
    #[inline]
    pub fn size(&self, priority: P2pPriority) -> usize {
        self.levels[priority.index()].size
    }

    /// The reserved (not yet committed) slot at the write head of `priority`. Callers must
    /// check that the level is not full before writing through this reference.
    pub fn reserved_value(&mut self, priority: P2pPriority) -> &mut ValueType {
        let level = &mut self.levels[priority.index()];
        let write_head = level.write_head();
        &mut level.values[write_head]
    }

    /// Commits the reserved slot at `priority`, making it visible to the consumer side.
    /// Returns `false` if the level is full.
    pub fn commit(&mut self, priority: P2pPriority) -> bool {
        let level = &mut self.levels[priority.index()];
        if level.size >= CAPACITY {
            return false;
        }
        level.size += 1;
        true
    }

    /// The oldest value of the highest non-empty priority level, if any.
    pub fn oldest_value(&self) -> Option<&ValueType> {
        self.levels
            .iter()
            .rev()
            .find(|level| level.size > 0)
            .map(|level| &level.values[level.oldest])
    }

    /// Removes the oldest value of the highest non-empty priority level. Returns `false` if
    /// the buffer is empty.
    pub fn consume(&mut self) -> bool {
        for level in self.levels.iter_mut().rev() {
            if level.size > 0 {
                level.oldest = (level.oldest + 1) % CAPACITY;
                level.size -= 1;
                return true;
            }
        }
        false
    }

    /// Removes the oldest value of the given level. Returns `false` if that level is empty.
    pub fn consume_priority(&mut self, priority: P2pPriority) -> bool {
        let level = &mut self.levels[priority.index()];
        if level.size == 0 {
            return false;
        }
        level.oldest = (level.oldest + 1) % CAPACITY;
        level.size -= 1;
        true
    }
}

impl<ValueType: Default, const CAPACITY: usize> Default
    for PriorityRingBuffer<ValueType, CAPACITY>
{
    fn default() -> Self {
        Self::new()
    }
}
