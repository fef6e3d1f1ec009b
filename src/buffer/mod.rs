// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded buffer for work queued while the session is offline.
//!
//! Publishes issued while disconnected are kept here and flushed in FIFO
//! order once the connection is back. When the buffer is full the configured
//! [`OverflowPolicy`] decides what happens; nothing is ever dropped silently.
//! Contents live in memory only.

use std::collections::VecDeque;

use crate::error::{BufferError, ValueError};

/// Default number of entries held while offline.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// What to do with a new entry when the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OverflowPolicy {
    /// Evict the oldest entry to make room.
    #[default]
    DropOldest,
    /// Refuse the new entry.
    RejectNew,
}

/// Capacity and overflow policy of an [`OfflineBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineBufferConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Behaviour when full.
    pub policy: OverflowPolicy,
}

impl Default for OfflineBufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            policy: OverflowPolicy::default(),
        }
    }
}

/// A bounded FIFO queue with an explicit overflow policy.
///
/// # Examples
///
/// ```
/// use mqtt_session::buffer::{OfflineBuffer, OverflowPolicy};
///
/// let mut buffer = OfflineBuffer::new(2, OverflowPolicy::DropOldest).unwrap();
/// buffer.push("a").unwrap();
/// buffer.push("b").unwrap();
/// let evicted = buffer.push("c").unwrap();
///
/// assert_eq!(evicted, Some("a"));
/// assert_eq!(buffer.drain().collect::<Vec<_>>(), vec!["b", "c"]);
/// ```
#[derive(Debug, Clone)]
pub struct OfflineBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl<T> OfflineBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::ZeroCapacity` if `capacity` is zero.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self, ValueError> {
        if capacity == 0 {
            return Err(ValueError::ZeroCapacity("offline buffer"));
        }
        Ok(Self {
            items: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_CAPACITY)),
            capacity,
            policy,
            dropped: 0,
        })
    }

    /// Creates an empty buffer from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::ZeroCapacity` if the configured capacity is zero.
    pub fn from_config(config: OfflineBufferConfig) -> Result<Self, ValueError> {
        Self::new(config.capacity, config.policy)
    }

    /// Appends an entry.
    ///
    /// Under [`OverflowPolicy::DropOldest`] a full buffer evicts and returns
    /// its oldest entry.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::Full` under [`OverflowPolicy::RejectNew`] when
    /// the buffer is full.
    pub fn push(&mut self, item: T) -> Result<Option<T>, BufferError> {
        let mut evicted = None;
        if self.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::RejectNew => {
                    return Err(BufferError::Full {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DropOldest => {
                    evicted = self.items.pop_front();
                    self.dropped += 1;
                }
            }
        }
        self.items.push_back(item);
        Ok(evicted)
    }

    /// Removes and yields every entry, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    /// Puts entries that could not be sent back at the head of the buffer,
    /// ahead of anything queued meanwhile.
    ///
    /// If the result exceeds capacity the newest entries are discarded, so
    /// the oldest work survives; they are counted as dropped.
    pub fn requeue_front(&mut self, items: impl IntoIterator<Item = T>) {
        let mut restored: VecDeque<T> = items.into_iter().collect();
        restored.append(&mut self.items);
        while restored.len() > self.capacity {
            restored.pop_back();
            self.dropped += 1;
        }
        self.items = restored;
    }

    /// Returns the oldest entry without removing it.
    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Iterates over the entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Returns the number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the overflow policy.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Returns how many entries were evicted or discarded so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            OfflineBuffer::<u32>::new(0, OverflowPolicy::DropOldest).unwrap_err(),
            ValueError::ZeroCapacity("offline buffer")
        );
    }

    #[test]
    fn drop_oldest_keeps_most_recent_in_order() {
        let mut buffer = OfflineBuffer::new(100, OverflowPolicy::DropOldest).unwrap();
        for i in 0..150 {
            buffer.push(i).unwrap();
        }

        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.dropped(), 50);
        let kept: Vec<i32> = buffer.drain().collect();
        assert_eq!(kept, (50..150).collect::<Vec<_>>());
        assert!(buffer.is_empty());
    }

    #[test]
    fn reject_new_refuses_when_full() {
        let mut buffer = OfflineBuffer::new(2, OverflowPolicy::RejectNew).unwrap();
        assert_eq!(buffer.push('a'), Ok(None));
        assert_eq!(buffer.push('b'), Ok(None));
        assert_eq!(buffer.push('c'), Err(BufferError::Full { capacity: 2 }));
        assert_eq!(buffer.iter().copied().collect::<String>(), "ab");
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn drop_oldest_returns_evicted_entry() {
        let mut buffer = OfflineBuffer::new(1, OverflowPolicy::DropOldest).unwrap();
        assert_eq!(buffer.push(1), Ok(None));
        assert_eq!(buffer.push(2), Ok(Some(1)));
        assert_eq!(buffer.front(), Some(&2));
    }

    #[test]
    fn requeue_front_preserves_order() {
        let mut buffer = OfflineBuffer::new(5, OverflowPolicy::DropOldest).unwrap();
        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        let taken: Vec<i32> = buffer.drain().collect();
        buffer.push(3).unwrap();

        buffer.requeue_front(taken);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn requeue_front_trims_newest_beyond_capacity() {
        let mut buffer = OfflineBuffer::new(2, OverflowPolicy::DropOldest).unwrap();
        buffer.push(3).unwrap();
        buffer.requeue_front([1, 2]);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn default_config() {
        let config = OfflineBufferConfig::default();
        assert_eq!(config.capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.policy, OverflowPolicy::DropOldest);
        let buffer = OfflineBuffer::<u8>::from_config(config).unwrap();
        assert_eq!(buffer.capacity(), 100);
        assert_eq!(buffer.policy(), OverflowPolicy::DropOldest);
    }
}
