// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background task owning the broker connection.
//!
//! Exactly one task per session drives the `rumqttc` event loop and owns the
//! supervisor, the subscription registry and the offline buffer. Session
//! handles talk to it through a command channel, so none of that state is
//! shared behind locks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Event, EventLoop, Outgoing, Packet, SubscribeReasonCode};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{ConnectionSupervisor, Recovery};
use crate::buffer::OfflineBuffer;
use crate::error::{Error, ProtocolError, SessionError};
use crate::event::{EventBus, TopicMessage};
use crate::protocol::{MqttTransport, OutboundMessage, Transport};
use crate::session::{DiagnosticCallback, PublishOutcome, SessionConfig};
use crate::subscription::SubscriptionRegistry;
use crate::types::{QoS, TopicFilter};

/// Time allowed for a DISCONNECT packet to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Requests sent from session handles to the connection task.
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        entries: Vec<(TopicFilter, QoS)>,
        reset: bool,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        filters: Vec<TopicFilter>,
        reply: oneshot::Sender<()>,
    },
    Publish {
        message: OutboundMessage,
        reply: oneshot::Sender<Result<PublishOutcome, Error>>,
    },
    Subscriptions {
        reply: oneshot::Sender<BTreeMap<TopicFilter, QoS>>,
    },
    BufferedCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Logs diagnostics and forwards them to the application callback.
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    callback: Option<DiagnosticCallback>,
}

impl Diagnostics {
    pub(crate) fn new(callback: Option<DiagnosticCallback>) -> Self {
        Self { callback }
    }

    pub(crate) fn report(&self, error: &SessionError) {
        if error.is_connection_error() {
            tracing::warn!(error = %error, "Connection problem");
        } else {
            tracing::error!(error = %error, "Request failed");
        }
        if let Some(callback) = &self.callback {
            callback(error);
        }
    }
}

/// One connection epoch: a client, its event loop and in-flight bookkeeping.
struct Link {
    transport: MqttTransport,
    event_loop: EventLoop,
    opened_at: Instant,
    /// Filters whose SUBSCRIBE has been queued but not yet written.
    pending_subscribes: VecDeque<TopicFilter>,
    /// Filters awaiting a SUBACK, by packet id.
    inflight_subscribes: HashMap<u16, TopicFilter>,
}

impl Link {
    fn new(transport: MqttTransport, event_loop: EventLoop) -> Self {
        Self {
            transport,
            event_loop,
            opened_at: Instant::now(),
            pending_subscribes: VecDeque::new(),
            inflight_subscribes: HashMap::new(),
        }
    }
}

enum Phase {
    /// No connection and none scheduled.
    Idle,
    /// Backing off before the next attempt.
    Waiting { until: Instant },
    /// A connection is being established or is up.
    Live(Box<Link>),
}

/// The connection task.
pub(crate) struct Driver {
    config: Arc<SessionConfig>,
    supervisor: ConnectionSupervisor,
    registry: SubscriptionRegistry,
    buffer: Option<OfflineBuffer<OutboundMessage>>,
    bus: EventBus,
    diagnostics: Diagnostics,
    commands: mpsc::Receiver<Command>,
    phase: Phase,
}

impl Driver {
    pub(crate) fn new(
        config: Arc<SessionConfig>,
        bus: EventBus,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let supervisor = ConnectionSupervisor::new(config.reconnection().clone(), bus.clone())
            .verbose(config.debug());
        // Zero capacities are rejected when the configuration is built
        let buffer = config
            .offline_buffer()
            .and_then(|cfg| OfflineBuffer::from_config(cfg).ok());
        let diagnostics = Diagnostics::new(config.diagnostic_callback());

        Self {
            config,
            supervisor,
            registry: SubscriptionRegistry::new(),
            buffer,
            bus,
            diagnostics,
            commands,
            phase: Phase::Idle,
        }
    }

    /// Runs until every session handle has been dropped.
    pub(crate) async fn run(mut self) {
        tracing::debug!(
            endpoint = %self.config.endpoint(),
            client_id = %self.config.client_id(),
            "Session task started"
        );

        loop {
            match &mut self.phase {
                Phase::Idle => {
                    let Some(command) = self.commands.recv().await else {
                        break;
                    };
                    self.handle_command(command).await;
                }
                Phase::Waiting { until } => {
                    let until = *until;
                    tokio::select! {
                        biased;
                        command = self.commands.recv() => match command {
                            Some(command) => self.handle_command(command).await,
                            None => break,
                        },
                        () = tokio::time::sleep_until(until) => self.open_link(false),
                    }
                }
                Phase::Live(link) => {
                    let timeout = self.config.connection_timeout();
                    let deadline = (!self.supervisor.state().is_connected())
                        .then(|| (link.opened_at + timeout, timeout));
                    tokio::select! {
                        biased;
                        command = self.commands.recv() => match command {
                            Some(command) => self.handle_command(command).await,
                            None => break,
                        },
                        event = poll_link(&mut link.event_loop, deadline) => self.handle_event(event),
                    }
                }
            }
        }

        self.close_link().await;
        tracing::debug!(client_id = %self.config.client_id(), "Session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                if !matches!(self.phase, Phase::Live(_)) {
                    self.open_link(true);
                }
                let _ = reply.send(());
            }
            Command::Disconnect { reply } => {
                self.close_link().await;
                let _ = reply.send(());
            }
            Command::Subscribe {
                entries,
                reset,
                reply,
            } => {
                if reset {
                    self.registry.replace_all(entries);
                } else {
                    for (filter, qos) in entries {
                        self.registry.add(filter, qos);
                    }
                }
                self.resync();
                let _ = reply.send(());
            }
            Command::Unsubscribe { filters, reply } => {
                for filter in &filters {
                    self.registry.remove(filter);
                }
                self.resync();
                let _ = reply.send(());
            }
            Command::Publish { message, reply } => {
                let _ = reply.send(self.publish(message));
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::BufferedCount { reply } => {
                let _ = reply.send(self.buffer.as_ref().map_or(0, OfflineBuffer::len));
            }
        }
    }

    fn handle_event(&mut self, event: Result<Event, String>) {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                self.supervisor.on_connected();
                tracing::info!(
                    endpoint = %self.config.endpoint(),
                    session_present = ack.session_present,
                    epoch = self.supervisor.epoch(),
                    "Connected to MQTT broker"
                );
                self.registry.mark_stale();
                self.resync();
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = TopicMessage::from_publish(&publish);
                if self.config.debug() {
                    tracing::debug!(topic = %message.topic(), bytes = message.payload().len(), "Message received");
                } else {
                    tracing::trace!(topic = %message.topic(), bytes = message.payload().len(), "Message received");
                }
                self.bus.publish_message(message);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => self.on_suback(ack.pkid, &ack.return_codes),
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                if let Phase::Live(link) = &mut self.phase
                    && let Some(filter) = link.pending_subscribes.pop_front()
                {
                    link.inflight_subscribes.insert(pkid, filter);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                self.on_link_error("broker closed the connection".to_string());
            }
            Ok(_) => {}
            Err(reason) => self.on_link_error(reason),
        }

        // Every event may have freed room in the request queue
        if self.registry.has_deferred() {
            self.resync();
        }
        self.flush_buffer();
    }

    fn on_suback(&mut self, pkid: u16, codes: &[SubscribeReasonCode]) {
        let Phase::Live(link) = &mut self.phase else {
            return;
        };
        let Some(filter) = link.inflight_subscribes.remove(&pkid) else {
            return;
        };

        if codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            self.registry.forget(&filter);
            self.diagnostics.report(&SessionError::SubscribeFailure {
                filter: filter.to_string(),
                reason: "rejected by broker".to_string(),
            });
        } else {
            tracing::debug!(filter = %filter, "Subscription acknowledged");
        }
    }

    /// Handles a failed attempt or a dropped connection.
    fn on_link_error(&mut self, reason: String) {
        let (error, recovery) = self.supervisor.on_connection_error(reason);
        self.diagnostics.report(&error);
        self.registry.mark_stale();

        self.phase = match recovery {
            Recovery::Retry { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling reconnect"
                );
                Phase::Waiting {
                    until: Instant::now() + delay,
                }
            }
            Recovery::GiveUp => {
                tracing::warn!(
                    endpoint = %self.config.endpoint(),
                    "Giving up on reconnecting"
                );
                Phase::Idle
            }
        };
    }

    /// Opens a new connection epoch.
    fn open_link(&mut self, requested: bool) {
        let epoch = if requested {
            self.supervisor.begin_connect()
        } else {
            self.supervisor.begin_retry()
        };
        tracing::info!(
            endpoint = %self.config.endpoint(),
            epoch,
            attempt = self.supervisor.attempt(),
            "Connecting to MQTT broker"
        );

        let (transport, event_loop) = MqttTransport::open(&self.config);
        self.phase = Phase::Live(Box::new(Link::new(transport, event_loop)));
    }

    /// Tears the connection down without scheduling a retry.
    async fn close_link(&mut self) {
        let was_connected = self.supervisor.state().is_connected();
        self.supervisor.on_disconnect_requested();
        self.registry.mark_stale();

        let Phase::Live(mut link) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        if !was_connected {
            return;
        }

        if let Err(e) = link.transport.disconnect() {
            tracing::warn!(error = %e, "Failed to queue DISCONNECT");
            return;
        }
        let flush = async {
            loop {
                match link.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
            tracing::debug!("DISCONNECT not flushed within grace period");
        }
        tracing::info!(endpoint = %self.config.endpoint(), "Disconnected from MQTT broker");
    }

    /// Sends pending subscription changes if a connection is up.
    fn resync(&mut self) {
        if !self.supervisor.state().is_connected() {
            return;
        }
        let Phase::Live(link) = &mut self.phase else {
            return;
        };

        let report = self.registry.resync(&link.transport);
        link.pending_subscribes
            .extend(report.subscribed.into_iter().map(|(filter, _)| filter));
        for failure in &report.failures {
            self.diagnostics.report(failure);
        }
        if !report.deferred.is_empty() {
            tracing::debug!(
                deferred = report.deferred.len(),
                "Request queue full, resync continues on the next event"
            );
        }
    }

    fn publish(&mut self, message: OutboundMessage) -> Result<PublishOutcome, Error> {
        if self.supervisor.state().is_connected()
            && let Phase::Live(link) = &self.phase
        {
            match link.transport.publish(&message) {
                Ok(()) => {
                    if self.config.debug() {
                        tracing::debug!(topic = %message.topic(), qos = %message.qos(), "Message published");
                    }
                    return Ok(PublishOutcome::Sent);
                }
                // Request queue full: keep it for the next flush
                Err(e) if e.is_backpressure() => {}
                Err(e) => {
                    self.diagnostics.report(&SessionError::PublishFailure {
                        topic: message.topic().to_string(),
                        reason: e.to_string(),
                    });
                    return Err(e.into());
                }
            }
        }

        let Some(buffer) = self.buffer.as_mut() else {
            return Err(Error::NotConnected);
        };
        let topic = message.topic().to_string();
        match buffer.push(message) {
            Ok(None) => {
                tracing::debug!(topic = %topic, queued = buffer.len(), "Message buffered while offline");
                Ok(PublishOutcome::Buffered)
            }
            Ok(Some(evicted)) => {
                self.diagnostics.report(&SessionError::PublishFailure {
                    topic: evicted.topic().to_string(),
                    reason: "evicted from full offline buffer".to_string(),
                });
                Ok(PublishOutcome::Buffered)
            }
            Err(e) => {
                self.diagnostics.report(&SessionError::PublishFailure {
                    topic,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Sends buffered messages in FIFO order while connected.
    fn flush_buffer(&mut self) {
        if !self.supervisor.state().is_connected() {
            return;
        }
        let Phase::Live(link) = &self.phase else {
            return;
        };
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        if buffer.is_empty() {
            return;
        }

        let queued: Vec<OutboundMessage> = buffer.drain().collect();
        let mut remaining = queued.into_iter();
        let mut sent = 0_usize;
        while let Some(message) = remaining.next() {
            match link.transport.publish(&message) {
                Ok(()) => sent += 1,
                Err(e) if e.is_backpressure() => {
                    buffer.requeue_front(std::iter::once(message).chain(remaining));
                    break;
                }
                Err(e) => self.diagnostics.report(&SessionError::PublishFailure {
                    topic: message.topic().to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        if sent > 0 {
            tracing::debug!(sent, remaining = buffer.len(), "Flushed offline buffer");
        }
    }
}

/// Polls the event loop, bounded by a deadline while still connecting.
async fn poll_link(
    event_loop: &mut EventLoop,
    deadline: Option<(Instant, Duration)>,
) -> Result<Event, String> {
    match deadline {
        Some((deadline, timeout)) => match tokio::time::timeout_at(deadline, event_loop.poll()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => {
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                Err(ProtocolError::Timeout(ms).to_string())
            }
        },
        None => event_loop.poll().await.map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn diagnostics_forward_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DiagnosticCallback = Arc::new(move |e: &SessionError| {
            sink.lock().unwrap().push(e.clone());
        });
        let diagnostics = Diagnostics::new(Some(callback));

        diagnostics.report(&SessionError::ConnectionFailure("refused".into()));
        diagnostics.report(&SessionError::PublishFailure {
            topic: "a".into(),
            reason: "full".into(),
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_connection_error());
        assert!(!seen[1].is_connection_error());
    }

    #[test]
    fn diagnostics_without_callback_only_log() {
        Diagnostics::default().report(&SessionError::ConnectionLost("eof".into()));
    }

    #[test]
    fn only_full_request_queue_counts_as_backpressure() {
        assert!(!ProtocolError::ConnectionFailed("x".into()).is_backpressure());
        assert!(!ProtocolError::Timeout(10).is_backpressure());
    }
}
