// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session configuration and builder.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::Session;
use crate::buffer::{OfflineBufferConfig, OverflowPolicy};
use crate::error::{Error, ProtocolError, SessionError, ValueError};
use crate::event::{DEFAULT_MESSAGE_CAPACITY, DEFAULT_STATE_CAPACITY};
use crate::protocol::Endpoint;
use crate::supervisor::ReconnectionPolicy;

/// Default capacity of the request queue between the session and the client.
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Longest client identifier every MQTT 3.1.1 broker must accept.
const CLIENT_ID_MAX_PORTABLE: usize = 23;
const CLIENT_ID_PREFIX: &str = "session_";

/// Callback receiving every diagnostic reported by the connection task.
pub type DiagnosticCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Validated configuration of a [`Session`].
///
/// Built through [`SessionBuilder::into_config`]; every field has already
/// passed validation.
#[derive(Clone)]
pub struct SessionConfig {
    endpoint: Endpoint,
    client_id: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    clean_session: bool,
    connection_timeout: Duration,
    reconnection: ReconnectionPolicy,
    offline_buffer: Option<OfflineBufferConfig>,
    message_capacity: usize,
    state_capacity: usize,
    request_capacity: usize,
    debug: bool,
    on_diagnostic: Option<DiagnosticCallback>,
}

impl SessionConfig {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Returns the broker endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the username and password if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns whether authentication is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns whether the broker should discard session state on connect.
    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Returns how long a connection attempt may wait for CONNACK.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns the reconnection policy.
    #[must_use]
    pub fn reconnection(&self) -> &ReconnectionPolicy {
        &self.reconnection
    }

    /// Returns the offline buffer settings, or `None` if buffering is off.
    #[must_use]
    pub fn offline_buffer(&self) -> Option<OfflineBufferConfig> {
        self.offline_buffer
    }

    /// Returns how many messages a slow listener may lag behind.
    #[must_use]
    pub fn message_capacity(&self) -> usize {
        self.message_capacity
    }

    /// Returns how many state changes a slow listener may lag behind.
    #[must_use]
    pub fn state_capacity(&self) -> usize {
        self.state_capacity
    }

    /// Returns the capacity of the client request queue.
    #[must_use]
    pub fn request_capacity(&self) -> usize {
        self.request_capacity
    }

    /// Returns true if verbose logging is enabled.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    pub(crate) fn diagnostic_callback(&self) -> Option<DiagnosticCallback> {
        self.on_diagnostic.clone()
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("has_credentials", &self.has_credentials())
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("connection_timeout", &self.connection_timeout)
            .field("reconnection", &self.reconnection)
            .field("offline_buffer", &self.offline_buffer)
            .field("message_capacity", &self.message_capacity)
            .field("state_capacity", &self.state_capacity)
            .field("request_capacity", &self.request_capacity)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Session`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use mqtt_session::{ReconnectionPolicy, Session};
/// use mqtt_session::buffer::OverflowPolicy;
///
/// # async fn example() -> mqtt_session::Result<()> {
/// let session = Session::builder()
///     .endpoint("mqtt://192.168.1.50:1883")
///     .client_id("kitchen_panel")
///     .credentials("user", "password")
///     .keep_alive(Duration::from_secs(60))
///     .reconnection(ReconnectionPolicy::new().with_max_delay(Duration::from_secs(30)))
///     .offline_buffer(500, OverflowPolicy::RejectNew)
///     .on_diagnostic(|e| eprintln!("session: {e}"))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct SessionBuilder {
    endpoint: String,
    client_id: Option<String>,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    clean_session: bool,
    connection_timeout: Duration,
    reconnection: ReconnectionPolicy,
    offline_buffer: Option<OfflineBufferConfig>,
    message_capacity: usize,
    state_capacity: usize,
    request_capacity: usize,
    debug: bool,
    on_diagnostic: Option<DiagnosticCallback>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            client_id: None,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            clean_session: false,
            connection_timeout: Duration::from_secs(10),
            reconnection: ReconnectionPolicy::default(),
            offline_buffer: Some(OfflineBufferConfig::default()),
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            state_capacity: DEFAULT_STATE_CAPACITY,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            debug: false,
            on_diagnostic: None,
        }
    }
}

impl SessionBuilder {
    /// Sets the broker endpoint (`mqtt://host:port`, `tcp://host:port` or
    /// `host[:port]`).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the client identifier. A random one is generated when unset or
    /// empty.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets authentication credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets whether the broker discards session state (default: false).
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Sets how long an attempt may wait for CONNACK (default: 10 seconds).
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Sets the reconnection policy.
    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Configures the offline publish buffer (default: 100, drop oldest).
    pub fn offline_buffer(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.offline_buffer = Some(OfflineBufferConfig { capacity, policy });
        self
    }

    /// Disables offline buffering; publishing while disconnected fails.
    pub fn without_offline_buffer(mut self) -> Self {
        self.offline_buffer = None;
        self
    }

    /// Sets how many messages a slow listener may lag behind (default: 64).
    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity;
        self
    }

    /// Sets how many state changes a slow listener may lag behind
    /// (default: 32).
    pub fn state_capacity(mut self, capacity: usize) -> Self {
        self.state_capacity = capacity;
        self
    }

    /// Sets the client request queue capacity (default: 64).
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Logs every message and transition at debug level.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Registers a callback for diagnostics from the connection task.
    ///
    /// The callback runs on the connection task and must not block.
    pub fn on_diagnostic<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.on_diagnostic = Some(Arc::new(callback));
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidAddress` for a missing or malformed
    /// endpoint and `ValueError::ZeroCapacity` for any zero capacity.
    pub fn into_config(self) -> Result<SessionConfig, Error> {
        if self.endpoint.trim().is_empty() {
            return Err(ProtocolError::InvalidAddress("MQTT broker endpoint is required".to_string()).into());
        }
        let endpoint = Endpoint::parse(&self.endpoint)?;

        for (name, capacity) in [
            ("message channel", self.message_capacity),
            ("state channel", self.state_capacity),
            ("request queue", self.request_capacity),
        ] {
            if capacity == 0 {
                return Err(ValueError::ZeroCapacity(name).into());
            }
        }
        if self.offline_buffer.is_some_and(|b| b.capacity == 0) {
            return Err(ValueError::ZeroCapacity("offline buffer").into());
        }

        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_client_id);

        Ok(SessionConfig {
            endpoint,
            client_id,
            credentials: self.credentials,
            keep_alive: self.keep_alive,
            clean_session: self.clean_session,
            connection_timeout: self.connection_timeout,
            reconnection: self.reconnection,
            offline_buffer: self.offline_buffer,
            message_capacity: self.message_capacity,
            state_capacity: self.state_capacity,
            request_capacity: self.request_capacity,
            debug: self.debug,
            on_diagnostic: self.on_diagnostic,
        })
    }

    /// Builds the session and starts connecting.
    ///
    /// Returns once the first attempt is under way; connection failures are
    /// reported as diagnostics and retried according to the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn build(self) -> Result<Session, Error> {
        let session = self.build_without_connect()?;
        session.connect().await?;
        Ok(session)
    }

    /// Builds the session without connecting.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build_without_connect(self) -> Result<Session, Error> {
        Ok(Session::from_config(self.into_config()?))
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("has_credentials", &self.credentials.is_some())
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("connection_timeout", &self.connection_timeout)
            .field("reconnection", &self.reconnection)
            .field("offline_buffer", &self.offline_buffer)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

fn generate_client_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    let take = CLIENT_ID_MAX_PORTABLE - CLIENT_ID_PREFIX.len();
    format!("{CLIENT_ID_PREFIX}{}", &hex[..take])
}
