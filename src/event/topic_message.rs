// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound message type.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::ParseError;
use crate::types::QoS;

/// A message received from the broker.
///
/// Messages are immutable once created. The payload is reference counted so
/// that fanning a message out to many listeners does not copy it.
///
/// # Examples
///
/// ```
/// use mqtt_session::event::TopicMessage;
///
/// let msg = TopicMessage::new("sensors/kitchen", br#"{"temp":21.5}"#.to_vec());
/// assert_eq!(msg.topic(), "sensors/kitchen");
///
/// let value: serde_json::Value = msg.parse().unwrap();
/// assert_eq!(value["temp"], 21.5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMessage {
    topic: String,
    payload: Arc<[u8]>,
    qos: QoS,
    retain: bool,
    received_at: DateTime<Utc>,
}

impl TopicMessage {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: Arc::from(payload.into()),
            qos: QoS::AtMostOnce,
            retain: false,
            received_at: Utc::now(),
        }
    }

    /// Sets the delivery QoS.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Marks the message as a retained message.
    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Builds a message from an incoming transport publish.
    pub(crate) fn from_publish(publish: &rumqttc::Publish) -> Self {
        Self::new(publish.topic.clone(), publish.payload.to_vec())
            .with_qos(publish.qos.into())
            .with_retain(publish.retain)
    }

    /// Returns the topic the message was published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Utf8` if the payload is not valid UTF-8.
    pub fn payload_str(&self) -> Result<&str, ParseError> {
        std::str::from_utf8(&self.payload).map_err(Into::into)
    }

    /// Decodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Json` if the payload cannot be decoded into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ParseError> {
        serde_json::from_slice(&self.payload).map_err(Into::into)
    }

    /// Returns the QoS the broker delivered the message with.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Returns true if the broker flagged the message as retained.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        self.retain
    }

    /// Returns when the message was received.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
