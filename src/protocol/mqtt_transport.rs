// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rumqttc`-backed transport.

use std::fmt;
use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions};

use super::{OutboundMessage, Transport};
use crate::error::ProtocolError;
use crate::session::SessionConfig;
use crate::types::{QoS, TopicFilter};

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Smallest keep-alive interval the client accepts.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Broker host and port parsed from an endpoint string.
///
/// Accepted forms are `mqtt://host:port`, `tcp://host:port` and
/// `host[:port]`. The port defaults to 1883.
///
/// # Examples
///
/// ```
/// use mqtt_session::protocol::Endpoint;
///
/// let ep = Endpoint::parse("tcp://broker.local:8883").unwrap();
/// assert_eq!(ep.host(), "broker.local");
/// assert_eq!(ep.port(), 8883);
///
/// assert_eq!(Endpoint::parse("10.0.0.2").unwrap().port(), 1883);
/// assert!(Endpoint::parse("ssl://broker:8883").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses an endpoint string.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidAddress` for an empty host, a
    /// non-numeric port or an unsupported scheme.
    pub fn parse(endpoint: &str) -> Result<Self, ProtocolError> {
        let endpoint = endpoint.trim();
        let rest = match endpoint.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(ProtocolError::InvalidAddress(format!(
                    "unsupported scheme: {scheme}"
                )));
            }
            None => endpoint,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((h, p)) if !h.ends_with(':') => {
                let port = p
                    .parse()
                    .map_err(|_| ProtocolError::InvalidAddress(format!("Invalid port: {p}")))?;
                (h, port)
            }
            _ => (rest, DEFAULT_PORT),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport over one `rumqttc` client.
///
/// Each instance belongs to a single connection epoch; a reconnect opens a
/// fresh client and event loop so requests queued for the old connection are
/// discarded with it.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    /// Creates a client and its event loop from the session configuration.
    ///
    /// No network activity happens until the event loop is polled.
    pub(crate) fn open(config: &SessionConfig) -> (Self, EventLoop) {
        let endpoint = config.endpoint();
        let mut options = MqttOptions::new(config.client_id(), endpoint.host(), endpoint.port());
        options.set_keep_alive(config.keep_alive().max(MIN_KEEP_ALIVE));
        options.set_clean_session(config.clean_session());

        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, config.request_capacity());
        (Self { client }, event_loop)
    }

    /// Queues a DISCONNECT packet.
    pub(crate) fn disconnect(&self) -> Result<(), ProtocolError> {
        self.client.try_disconnect().map_err(ProtocolError::Mqtt)
    }
}

impl Transport for MqttTransport {
    fn subscribe(&self, filter: &TopicFilter, qos: QoS) -> Result<(), ProtocolError> {
        self.client
            .try_subscribe(filter.as_str(), qos.into())
            .map_err(ProtocolError::Mqtt)
    }

    fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), ProtocolError> {
        self.client
            .try_unsubscribe(filter.as_str())
            .map_err(ProtocolError::Mqtt)
    }

    fn publish(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        self.client
            .try_publish(
                message.topic(),
                message.qos().into(),
                message.retain(),
                message.payload().to_vec(),
            )
            .map_err(ProtocolError::Mqtt)
    }
}
