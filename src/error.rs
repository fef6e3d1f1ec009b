// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the session library.
//!
//! Two families live here. [`Error`] and its sub-enums are returned from
//! request-scoped operations (building a session, subscribing, publishing).
//! [`SessionError`] is the diagnostic taxonomy reported by the background
//! connection task through `tracing` and the optional diagnostic callback;
//! it never terminates the process.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A value failed validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred during protocol communication.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while decoding a payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The offline buffer refused a message.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// The session is not connected and no offline buffer is configured.
    #[error("session is not connected")]
    NotConnected,

    /// The background connection task has stopped.
    #[error("session is closed")]
    SessionClosed,

    /// Waiting for a condition timed out.
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Errors related to value validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// QoS must be 0, 1 or 2.
    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    /// Topics and topic filters cannot be empty.
    #[error("topic cannot be empty")]
    EmptyTopic,

    /// A topic filter uses a wildcard in an illegal position.
    #[error("invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter {
        /// The rejected filter.
        filter: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A publish topic contains a wildcard character.
    #[error("topic '{0}' must not contain wildcards")]
    WildcardInTopic(String),

    /// A capacity setting must be at least one.
    #[error("{0} capacity must be greater than zero")]
    ZeroCapacity(&'static str),
}

/// Errors related to MQTT communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker endpoint.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ProtocolError {
    /// Returns true if the client refused a request only because its request
    /// queue is full. Such requests can be retried once the event loop has
    /// drained the queue.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Mqtt(rumqttc::ClientError::TryRequest(_)))
    }
}

/// Errors related to decoding message payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON decoding failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Errors raised by the offline buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer is full and configured to reject new entries.
    #[error("offline buffer is full ({capacity} entries)")]
    Full {
        /// Configured capacity of the buffer.
        capacity: usize,
    },
}

/// Diagnostics reported by the connection task.
///
/// Connection failures and losses move the session to
/// [`ConnectionState::Disconnected`](crate::ConnectionState::Disconnected)
/// and arm the reconnect policy. Subscribe and publish failures never
/// change the connection state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A connection attempt failed (bad endpoint, credentials or network).
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// An established connection dropped unexpectedly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Subscribing to a single filter failed.
    #[error("subscribe to '{filter}' failed: {reason}")]
    SubscribeFailure {
        /// The filter that could not be subscribed.
        filter: String,
        /// Failure description.
        reason: String,
    },

    /// Publishing a single message failed.
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailure {
        /// Topic of the message.
        topic: String,
        /// Failure description.
        reason: String,
    },
}

impl SessionError {
    /// Returns true for failures that affect the connection state.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionFailure(_) | Self::ConnectionLost(_))
    }
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::InvalidQos(3);
        assert_eq!(err.to_string(), "invalid QoS level 3, expected 0, 1 or 2");
    }

    #[test]
    fn error_from_value_error() {
        let err: Error = ValueError::EmptyTopic.into();
        assert!(matches!(err, Error::Value(ValueError::EmptyTopic)));
    }

    #[test]
    fn buffer_error_display() {
        let err = BufferError::Full { capacity: 100 };
        assert_eq!(err.to_string(), "offline buffer is full (100 entries)");
    }

    #[test]
    fn session_error_classification() {
        assert!(SessionError::ConnectionLost("reset".into()).is_connection_error());
        assert!(SessionError::ConnectionFailure("refused".into()).is_connection_error());
        let sub = SessionError::SubscribeFailure {
            filter: "a/b".into(),
            reason: "denied".into(),
        };
        assert!(!sub.is_connection_error());
        assert_eq!(sub.to_string(), "subscribe to 'a/b' failed: denied");
    }
}
