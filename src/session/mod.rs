// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The application-facing session handle.
//!
//! A [`Session`] is built once at the composition root and cloned wherever
//! it is needed. All clones share one background task that owns the broker
//! connection; the task stops after the last clone is dropped.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//! use mqtt_session::{ConnectionState, QoS, Session};
//!
//! # async fn example() -> mqtt_session::Result<()> {
//! let session = Session::init("mqtt://192.168.1.50:1883", None, None, None, false).await?;
//!
//! let handle = session.listen(["sensors/+/temperature"], |msg| {
//!     println!("{}: {:?}", msg.topic(), msg.payload_str());
//! })?;
//!
//! session.subscribe([("sensors/#", QoS::AtLeastOnce)], false).await?;
//! session
//!     .wait_for_state(ConnectionState::Connected, Duration::from_secs(5))
//!     .await?;
//! session.publish("sensors/kitchen/cmd", "ping", QoS::AtMostOnce, false).await?;
//!
//! session.unlisten(&handle);
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod config;

pub use config::{DEFAULT_REQUEST_CAPACITY, DiagnosticCallback, SessionBuilder, SessionConfig};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::event::{EventBus, EventReceiver, ListenerHandle, TopicMessage};
use crate::protocol::OutboundMessage;
use crate::state::ConnectionState;
use crate::supervisor::driver::{Command, Driver};
use crate::types::{QoS, TopicFilter, TopicFilterSet};

/// Capacity of the command queue between handles and the connection task.
const COMMAND_CAPACITY: usize = 32;

/// How a publish request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishOutcome {
    /// Handed to the live connection.
    Sent,
    /// Queued in the offline buffer until the connection is back.
    Buffered,
}

/// A supervised MQTT session.
///
/// Cheaply cloneable; every clone controls the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
    config: Arc<SessionConfig>,
}

impl Session {
    /// Creates a builder for configuring a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Configures a session and starts the first connection attempt.
    ///
    /// Uses a persistent broker session, automatic reconnection and the
    /// default offline buffer. A missing or empty `client_id` is replaced by
    /// a generated one; `password` defaults to empty when only a username is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidAddress` for a malformed endpoint.
    /// An unreachable broker is not an error here; it is reported as a
    /// diagnostic and retried.
    pub async fn init(
        endpoint: &str,
        client_id: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        debug: bool,
    ) -> Result<Self> {
        let mut builder = Self::builder().endpoint(endpoint).debug(debug);
        if let Some(id) = client_id {
            builder = builder.client_id(id);
        }
        if let Some(username) = username {
            builder = builder.credentials(username, password.unwrap_or_default());
        }
        builder.build().await
    }

    /// Spawns the connection task for a validated configuration.
    pub(crate) fn from_config(config: SessionConfig) -> Self {
        let config = Arc::new(config);
        let bus = EventBus::with_capacity(config.message_capacity(), config.state_capacity());
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);

        let driver = Driver::new(Arc::clone(&config), bus.clone(), receiver);
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(SessionInner {
                commands,
                bus,
                config,
            }),
        }
    }

    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Starts connecting if no connection is up or in progress.
    ///
    /// Returns once the attempt has started; observe
    /// [`connection_states`](Self::connection_states) for the outcome.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the connection task has stopped.
    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect { reply }).await
    }

    /// Disconnects from the broker and disables automatic reconnection
    /// until the next [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the connection task has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Adds subscriptions to the desired set and sends them if connected.
    ///
    /// With `reset_existing`, the desired set is replaced and every
    /// subscription known to the broker is removed first. Subscriptions
    /// made while disconnected are sent on the next connect, and all of
    /// them are restored after every reconnect. Per-filter failures are
    /// reported as diagnostics.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for an invalid filter, in which case nothing is
    /// changed.
    pub async fn subscribe<I, S>(&self, topics: I, reset_existing: bool) -> Result<()>
    where
        I: IntoIterator<Item = (S, QoS)>,
        S: Into<String>,
    {
        let entries = topics
            .into_iter()
            .map(|(filter, qos)| TopicFilter::new(filter).map(|f| (f, qos)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.request(|reply| Command::Subscribe {
            entries,
            reset: reset_existing,
            reply,
        })
        .await
    }

    /// Removes filters from the desired set and unsubscribes if connected.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for an invalid filter.
    pub async fn unsubscribe<I, S>(&self, filters: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filters = filters
            .into_iter()
            .map(TopicFilter::new)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.request(|reply| Command::Unsubscribe { filters, reply })
            .await
    }

    /// Publishes a message, or buffers it while disconnected.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for an invalid topic, `BufferError::Full` when
    /// the offline buffer rejects the message, `Error::NotConnected` when
    /// disconnected without a buffer, and `ProtocolError` if the client
    /// refuses the request.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishOutcome> {
        let message = OutboundMessage::new(topic, payload, qos, retain)?;
        self.request(|reply| Command::Publish { message, reply })
            .await?
    }

    /// Calls `callback` for every inbound message matching `filters`.
    ///
    /// An empty filter list selects every topic. The callback first receives
    /// the most recent message if it matches. Dropping the returned handle
    /// does not stop the listener; use [`unlisten`](Self::unlisten).
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for an invalid filter.
    pub fn listen<I, S, F>(&self, filters: I, callback: F) -> Result<ListenerHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(TopicMessage) + Send + 'static,
    {
        let filters = TopicFilterSet::new(filters)?;
        Ok(self.inner.bus.listen_messages(filters, callback))
    }

    /// Calls `callback` for every connection state, starting with the
    /// current one.
    pub fn listen_connection_state<F>(&self, callback: F) -> ListenerHandle
    where
        F: FnMut(ConnectionState) + Send + 'static,
    {
        self.inner.bus.listen_states(callback)
    }

    /// Stops a listener. Unknown or already stopped handles are ignored.
    pub fn unlisten(&self, handle: &ListenerHandle) {
        handle.cancel();
    }

    /// Returns a receiver of inbound messages matching `filters`.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for an invalid filter.
    pub fn messages<I, S>(&self, filters: I) -> Result<EventReceiver<TopicMessage>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filters = TopicFilterSet::new(filters)?;
        Ok(self.inner.bus.subscribe_messages(filters))
    }

    /// Returns a receiver of connection states, starting with the current one.
    #[must_use]
    pub fn connection_states(&self) -> EventReceiver<ConnectionState> {
        self.inner.bus.subscribe_states()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.bus.last_state().unwrap_or_default()
    }

    /// Returns true if the session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Waits until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if `target` is not reached in time and
    /// `Error::SessionClosed` if the session stops first.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> Result<()> {
        let mut states = self.inner.bus.subscribe_states();
        if self.state() == target {
            return Ok(());
        }

        let wait = async {
            while let Some(state) = states.recv().await {
                if state == target {
                    return Ok(());
                }
            }
            Err(Error::SessionClosed)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))?
    }

    /// Returns the desired subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the connection task has stopped.
    pub async fn subscriptions(&self) -> Result<BTreeMap<TopicFilter, QoS>> {
        self.request(|reply| Command::Subscriptions { reply }).await
    }

    /// Returns how many publishes wait in the offline buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the connection task has stopped.
    pub async fn buffered_count(&self) -> Result<usize> {
        self.request(|reply| Command::BufferedCount { reply }).await
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the event bus shared by all clones.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.config.endpoint().to_string())
            .field("client_id", &self.inner.config.client_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
