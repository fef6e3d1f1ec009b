// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast channel that replays its last value to new receivers.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Predicate applied by a receiver before yielding an event.
pub(crate) type EventFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A broadcast channel remembering the most recently published value.
///
/// `publish` and `subscribe` take the same lock, so a new receiver observes
/// the replayed value followed by exactly the events published after it.
pub(crate) struct ReplayChannel<T> {
    last: Mutex<Option<T>>,
    sender: broadcast::Sender<T>,
}

impl<T: Clone> ReplayChannel<T> {
    /// Creates a channel buffering up to `capacity` events per receiver.
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            last: Mutex::new(None),
            sender,
        }
    }

    /// Stores `value` as the last value and delivers it to every receiver.
    ///
    /// Returns the number of receivers the value was queued for.
    pub(crate) fn publish(&self, value: T) -> usize {
        let mut last = self.last.lock();
        *last = Some(value.clone());
        self.sender.send(value).unwrap_or(0)
    }

    /// Creates a receiver, optionally filtered.
    pub(crate) fn subscribe(&self, filter: Option<EventFilter<T>>) -> EventReceiver<T> {
        let last = self.last.lock();
        EventReceiver {
            replay: last.clone(),
            rx: Some(self.sender.subscribe()),
            filter,
            skipped: 0,
        }
    }

    /// Returns the last published value.
    pub(crate) fn latest(&self) -> Option<T> {
        self.last.lock().clone()
    }

    /// Returns the number of open receivers.
    pub(crate) fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving side of an event channel.
///
/// The first call to [`recv`](Self::recv) yields the value that was current
/// when the receiver was created (if any and if it passes the filter), then
/// live events in publish order. When the receiver falls more than the
/// channel capacity behind, the oldest unread events are dropped and counted
/// in [`skipped`](Self::skipped).
pub struct EventReceiver<T> {
    replay: Option<T>,
    rx: Option<broadcast::Receiver<T>>,
    filter: Option<EventFilter<T>>,
    skipped: u64,
}

impl<T: Clone> EventReceiver<T> {
    /// Waits for the next event.
    ///
    /// Returns `None` once the receiver is closed or the bus is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take()
            && passes(self.filter.as_ref(), &value)
        {
            return Some(value);
        }

        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(value) => {
                    if passes(self.filter.as_ref(), &value) {
                        return Some(value);
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    self.skipped += count;
                    tracing::warn!(skipped = count, "Listener lagging, oldest events dropped");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        if let Some(value) = self.replay.take()
            && passes(self.filter.as_ref(), &value)
        {
            return Some(value);
        }

        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(value) => {
                    if passes(self.filter.as_ref(), &value) {
                        return Some(value);
                    }
                }
                Err(TryRecvError::Lagged(count)) => {
                    self.skipped += count;
                    tracing::warn!(skipped = count, "Listener lagging, oldest events dropped");
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stops delivery to this receiver. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.replay = None;
        self.rx = None;
    }

    /// Returns true once the receiver has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    /// Returns how many events were dropped because this receiver lagged.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<T> fmt::Debug for EventReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver")
            .field("closed", &self.rx.is_none())
            .field("filtered", &self.filter.is_some())
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

fn passes<T>(filter: Option<&EventFilter<T>>, value: &T) -> bool {
    filter.is_none_or(|f| f(value))
}
