// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport boundary between the session and the MQTT client.
//!
//! The session never speaks the wire protocol itself. Everything it needs
//! from a live connection goes through the [`Transport`] trait, implemented
//! for the `rumqttc` client by [`MqttTransport`].

mod mqtt_transport;

pub use mqtt_transport::{Endpoint, MqttTransport};

use crate::error::{ProtocolError, ValueError};
use crate::types::{QoS, TopicFilter, validate_topic};

/// A message to be published to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
}

impl OutboundMessage {
    /// Creates an outbound message.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` if the topic is empty or contains wildcards.
    pub fn new(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<Self, ValueError> {
        let topic = topic.into();
        validate_topic(&topic)?;
        Ok(Self {
            topic,
            payload: payload.into(),
            qos,
            retain,
        })
    }

    /// Returns the destination topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the requested QoS.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Returns true if the broker should retain the message.
    #[must_use]
    pub fn retain(&self) -> bool {
        self.retain
    }
}

/// Operations the session needs from a live broker connection.
///
/// Calls only enqueue the request; acknowledgements arrive asynchronously
/// through the connection's event loop. Implementations must not block.
pub trait Transport {
    /// Requests a subscription to `filter` at `qos`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the request cannot be queued.
    fn subscribe(&self, filter: &TopicFilter, qos: QoS) -> Result<(), ProtocolError>;

    /// Requests removal of the subscription to `filter`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the request cannot be queued.
    fn unsubscribe(&self, filter: &TopicFilter) -> Result<(), ProtocolError>;

    /// Requests publication of `message`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the request cannot be queued.
    fn publish(&self, message: &OutboundMessage) -> Result<(), ProtocolError>;
}
