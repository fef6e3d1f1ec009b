// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection state machine.

use std::time::Duration;

use crate::error::SessionError;
use crate::event::EventBus;
use crate::state::ConnectionState;

use super::ReconnectionPolicy;

/// What the supervisor wants done after a connection error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Open a new connection after `delay`.
    Retry {
        /// One-based number of the upcoming retry.
        attempt: u32,
        /// Backoff to wait first.
        delay: Duration,
    },
    /// Stay disconnected until the application connects again.
    GiveUp,
}

/// Owns the [`ConnectionState`] of one broker connection.
///
/// The supervisor does no I/O. The connection task reports what happened
/// on the wire and the supervisor decides the next state, publishes every
/// transition exactly once on the [`EventBus`], and tells the task whether
/// and when to retry.
///
/// # Examples
///
/// ```
/// use mqtt_session::{ConnectionState, ReconnectionPolicy};
/// use mqtt_session::event::EventBus;
/// use mqtt_session::supervisor::{ConnectionSupervisor, Recovery};
///
/// let bus = EventBus::new();
/// let mut supervisor = ConnectionSupervisor::new(ReconnectionPolicy::default(), bus.clone());
///
/// supervisor.begin_connect();
/// supervisor.on_connected();
/// assert_eq!(bus.last_state(), Some(ConnectionState::Connected));
///
/// let (_error, recovery) = supervisor.on_connection_error("reset by peer");
/// assert!(matches!(recovery, Recovery::Retry { attempt: 1, .. }));
/// ```
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    policy: ReconnectionPolicy,
    bus: EventBus,
    /// Retries since the last successful connect.
    attempt: u32,
    /// Incremented for every connection opened.
    epoch: u64,
    manual_disconnect: bool,
    verbose: bool,
}

impl ConnectionSupervisor {
    /// Creates a supervisor in the `Disconnected` state.
    #[must_use]
    pub fn new(policy: ReconnectionPolicy, bus: EventBus) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            bus,
            attempt: 0,
            epoch: 0,
            manual_disconnect: false,
            verbose: false,
        }
    }

    /// Logs transitions at debug instead of trace level.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the number of the current connection epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns how many retries happened since the last successful connect.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns true if the application asked to stay disconnected.
    #[must_use]
    pub fn is_manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }

    /// Starts a connection requested by the application.
    ///
    /// Clears any previous deliberate disconnect and the retry counter.
    /// Returns the new epoch.
    pub fn begin_connect(&mut self) -> u64 {
        self.manual_disconnect = false;
        self.attempt = 0;
        self.open_epoch()
    }

    /// Starts a retry after the backoff delay elapsed.
    pub fn begin_retry(&mut self) -> u64 {
        self.open_epoch()
    }

    fn open_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.transition(ConnectionState::Connecting);
        self.epoch
    }

    /// Records that the broker acknowledged the connection.
    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.transition(ConnectionState::Connected);
    }

    /// Records a failed attempt or a lost connection.
    ///
    /// Returns the diagnostic to report and the recovery to perform.
    pub fn on_connection_error(&mut self, reason: impl Into<String>) -> (SessionError, Recovery) {
        let reason = reason.into();
        let error = if self.state.is_connected() {
            SessionError::ConnectionLost(reason)
        } else {
            SessionError::ConnectionFailure(reason)
        };
        self.transition(ConnectionState::Disconnected);

        let recovery = if !self.manual_disconnect && self.policy.should_retry(self.attempt) {
            let delay = self.policy.delay_for_attempt(self.attempt);
            self.attempt += 1;
            Recovery::Retry {
                attempt: self.attempt,
                delay,
            }
        } else {
            Recovery::GiveUp
        };

        (error, recovery)
    }

    /// Records a deliberate disconnect. No retry follows.
    pub fn on_disconnect_requested(&mut self) {
        self.manual_disconnect = true;
        self.attempt = 0;
        self.transition(ConnectionState::Disconnected);
    }

    /// Moves to `next`, publishing it unless it equals the current state.
    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }
        let previous = std::mem::replace(&mut self.state, next);
        if self.verbose {
            tracing::debug!(from = %previous, to = %next, epoch = self.epoch, "Connection state changed");
        } else {
            tracing::trace!(from = %previous, to = %next, epoch = self.epoch, "Connection state changed");
        }
        self.bus.publish_state(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventReceiver;

    fn drain(rx: &mut EventReceiver<ConnectionState>) -> Vec<ConnectionState> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    fn supervisor(policy: ReconnectionPolicy) -> (ConnectionSupervisor, EventReceiver<ConnectionState>) {
        let bus = EventBus::new();
        let rx = bus.subscribe_states();
        (ConnectionSupervisor::new(policy, bus), rx)
    }

    #[test]
    fn successful_connect_publishes_connecting_then_connected() {
        let (mut sup, mut rx) = supervisor(ReconnectionPolicy::default());

        assert_eq!(sup.begin_connect(), 1);
        sup.on_connected();

        assert_eq!(
            drain(&mut rx),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[test]
    fn lost_connection_then_reconnect() {
        let (mut sup, mut rx) = supervisor(ReconnectionPolicy::default());
        sup.begin_connect();
        sup.on_connected();
        drain(&mut rx);

        let (error, recovery) = sup.on_connection_error("broken pipe");
        assert_eq!(error, SessionError::ConnectionLost("broken pipe".into()));
        assert_eq!(
            recovery,
            Recovery::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        assert_eq!(sup.begin_retry(), 2);
        sup.on_connected();
        assert_eq!(sup.attempt(), 0);

        assert_eq!(
            drain(&mut rx),
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[test]
    fn failed_attempts_back_off() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        let (mut sup, mut rx) = supervisor(policy);
        sup.begin_connect();

        let mut delays = Vec::new();
        for _ in 0..4 {
            let (error, recovery) = sup.on_connection_error("refused");
            assert!(matches!(error, SessionError::ConnectionFailure(_)));
            let Recovery::Retry { delay, .. } = recovery else {
                panic!("expected a retry");
            };
            delays.push(delay.as_millis());
            sup.begin_retry();
        }

        assert_eq!(delays, vec![100, 200, 350, 350]);
        // Every failure and retry is observed, none coalesced
        assert_eq!(drain(&mut rx).len(), 1 + 4 * 2);
    }

    #[test]
    fn deliberate_disconnect_never_retries() {
        let (mut sup, mut rx) = supervisor(ReconnectionPolicy::default());
        sup.begin_connect();
        sup.on_connected();
        sup.on_disconnect_requested();
        assert!(sup.is_manually_disconnected());

        let (_, recovery) = sup.on_connection_error("closed");
        assert_eq!(recovery, Recovery::GiveUp);
        assert_eq!(
            drain(&mut rx),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );

        sup.begin_connect();
        assert!(!sup.is_manually_disconnected());
    }

    #[test]
    fn exhausted_retries_give_up() {
        let (mut sup, _rx) = supervisor(ReconnectionPolicy::new().with_max_retries(1));
        sup.begin_connect();

        assert!(matches!(
            sup.on_connection_error("x").1,
            Recovery::Retry { attempt: 1, .. }
        ));
        sup.begin_retry();
        assert_eq!(sup.on_connection_error("x").1, Recovery::GiveUp);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn same_state_is_not_republished() {
        let (mut sup, mut rx) = supervisor(ReconnectionPolicy::disabled());
        sup.on_disconnect_requested();
        sup.on_disconnect_requested();
        assert!(drain(&mut rx).is_empty());
    }
}
