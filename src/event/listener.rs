// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback listeners driven by a background task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::AbortHandle;

use super::{EventReceiver, ListenerId};

/// Handle to a callback registered on the event bus.
///
/// The callback keeps running until [`cancel`](Self::cancel) is called;
/// dropping the handle does not stop it. After `cancel` returns, the
/// callback is not invoked again, except for an invocation that was already
/// running at that moment.
#[derive(Debug)]
#[must_use = "dropping the handle leaves the listener running; keep it to cancel later"]
pub struct ListenerHandle {
    id: ListenerId,
    active: Arc<AtomicBool>,
    task: AbortHandle,
}

impl ListenerHandle {
    /// Spawns a task feeding every event from `receiver` into `callback`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<T, F>(mut receiver: EventReceiver<T>, mut callback: F) -> Self
    where
        T: Clone + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let id = ListenerId::new();
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);

        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                callback(event);
            }
            tracing::trace!(listener = %id, "Listener task finished");
        });

        tracing::debug!(listener = %id, "Listener registered");

        Self {
            id,
            active,
            task: task.abort_handle(),
        }
    }

    /// Returns the listener identifier.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Stops delivery to this listener. Calling it again is a no-op.
    pub fn cancel(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.task.abort();
            tracing::debug!(listener = %self.id, "Listener cancelled");
        }
    }

    /// Returns true until the listener is cancelled or its source closes.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.task.is_finished()
    }
}
