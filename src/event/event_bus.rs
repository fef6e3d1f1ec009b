// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting inbound messages and connection states.

use std::fmt;
use std::sync::Arc;

use crate::state::ConnectionState;
use crate::types::TopicFilterSet;

use super::replay::{EventFilter, ReplayChannel};
use super::{EventReceiver, ListenerHandle, TopicMessage};

/// Default per-listener buffer for the message channel.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 64;

/// Default per-listener buffer for the state channel.
pub const DEFAULT_STATE_CAPACITY: usize = 32;

/// Event bus with one channel for inbound messages and one for connection
/// state transitions.
///
/// Both channels remember their last value: a listener registered after a
/// transition has happened first observes that transition, then live events.
/// Publishing never waits for listeners; a listener that falls more than the
/// channel capacity behind loses its oldest unread events.
///
/// `EventBus` is cheaply cloneable and clones share the same channels.
///
/// # Examples
///
/// ```
/// use mqtt_session::ConnectionState;
/// use mqtt_session::event::EventBus;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = EventBus::new();
/// bus.publish_state(ConnectionState::Connecting);
/// bus.publish_state(ConnectionState::Connected);
///
/// // A late joiner still learns the current state
/// let mut states = bus.subscribe_states();
/// assert_eq!(states.recv().await, Some(ConnectionState::Connected));
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    messages: ReplayChannel<TopicMessage>,
    states: ReplayChannel<ConnectionState>,
}

impl EventBus {
    /// Creates a new event bus with default capacities.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_CAPACITY, DEFAULT_STATE_CAPACITY)
    }

    /// Creates a new event bus with the given per-listener capacities.
    ///
    /// Zero capacities are raised to one.
    #[must_use]
    pub fn with_capacity(message_capacity: usize, state_capacity: usize) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                messages: ReplayChannel::new(message_capacity),
                states: ReplayChannel::new(state_capacity),
            }),
        }
    }

    /// Publishes an inbound message to all message listeners.
    ///
    /// Returns the number of listeners the message was queued for.
    pub fn publish_message(&self, message: TopicMessage) -> usize {
        self.inner.messages.publish(message)
    }

    /// Publishes a connection state transition to all state listeners.
    pub fn publish_state(&self, state: ConnectionState) -> usize {
        self.inner.states.publish(state)
    }

    /// Creates a receiver for messages whose topic matches `filters`.
    ///
    /// An empty filter set receives every message.
    #[must_use]
    pub fn subscribe_messages(&self, filters: TopicFilterSet) -> EventReceiver<TopicMessage> {
        let filter: Option<EventFilter<TopicMessage>> = if filters.is_empty() {
            None
        } else {
            Some(Arc::new(move |msg: &TopicMessage| filters.matches(msg.topic())))
        };
        self.inner.messages.subscribe(filter)
    }

    /// Creates a receiver for connection state transitions.
    #[must_use]
    pub fn subscribe_states(&self) -> EventReceiver<ConnectionState> {
        self.inner.states.subscribe(None)
    }

    /// Registers a callback invoked once per matching inbound message.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen_messages<F>(&self, filters: TopicFilterSet, callback: F) -> ListenerHandle
    where
        F: FnMut(TopicMessage) + Send + 'static,
    {
        ListenerHandle::spawn(self.subscribe_messages(filters), callback)
    }

    /// Registers a callback invoked once per state transition, starting
    /// with the current state if one has been published.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen_states<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        ListenerHandle::spawn(self.subscribe_states(), callback)
    }

    /// Returns the last published message.
    #[must_use]
    pub fn last_message(&self) -> Option<TopicMessage> {
        self.inner.messages.latest()
    }

    /// Returns the last published connection state.
    #[must_use]
    pub fn last_state(&self) -> Option<ConnectionState> {
        self.inner.states.latest()
    }

    /// Returns the number of open message receivers.
    #[must_use]
    pub fn message_listener_count(&self) -> usize {
        self.inner.messages.receiver_count()
    }

    /// Returns the number of open state receivers.
    #[must_use]
    pub fn state_listener_count(&self) -> usize {
        self.inner.states.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("message_listeners", &self.message_listener_count())
            .field("state_listeners", &self.state_listener_count())
            .field("last_state", &self.last_state())
            .finish()
    }
}
