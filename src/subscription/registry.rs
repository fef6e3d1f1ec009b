// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Desired subscriptions and their reconciliation with the broker.

use std::collections::BTreeMap;

use crate::error::SessionError;
use crate::protocol::Transport;
use crate::types::{QoS, TopicFilter};

/// Outcome of a [`SubscriptionRegistry::resync`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Filters a subscribe request was issued for.
    pub subscribed: Vec<(TopicFilter, QoS)>,
    /// Filters an unsubscribe request was issued for.
    pub unsubscribed: Vec<TopicFilter>,
    /// Per-filter failures. None of them aborted the pass.
    pub failures: Vec<SessionError>,
    /// Filters left for a later pass because the request queue was full.
    pub deferred: Vec<TopicFilter>,
}

impl ResyncReport {
    /// Returns true if the pass issued no requests at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.subscribed.is_empty()
            && self.unsubscribed.is_empty()
            && self.failures.is_empty()
            && self.deferred.is_empty()
    }
}

/// The set of topic filters the application wants to be subscribed to.
///
/// The desired set is the single source of truth. The registry also tracks
/// which filters it has requested from the current connection, so that
/// [`resync`](Self::resync) only sends what is missing and repeated calls
/// without changes issue no requests.
///
/// # Examples
///
/// ```
/// use mqtt_session::{QoS, TopicFilter};
/// use mqtt_session::subscription::SubscriptionRegistry;
///
/// let mut registry = SubscriptionRegistry::new();
/// registry.add(TopicFilter::new("a/b").unwrap(), QoS::AtLeastOnce);
/// assert_eq!(registry.len(), 1);
/// assert!(!registry.is_converged());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Filters the application asked for.
    desired: BTreeMap<TopicFilter, QoS>,
    /// Filters requested from the broker on the current connection.
    applied: BTreeMap<TopicFilter, QoS>,
    /// Set when the connection changed and every entry must be re-sent.
    stale: bool,
    /// Set when every known broker-side filter must be dropped first.
    reset_requested: bool,
    /// Set when the last pass left requests behind on a full queue.
    deferred: bool,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates a desired subscription.
    ///
    /// Returns the previous QoS if the filter was already present.
    pub fn add(&mut self, filter: TopicFilter, qos: QoS) -> Option<QoS> {
        self.desired.insert(filter, qos)
    }

    /// Removes a desired subscription.
    ///
    /// Returns the QoS it had, or `None` if it was not present.
    pub fn remove(&mut self, filter: &TopicFilter) -> Option<QoS> {
        self.desired.remove(filter)
    }

    /// Replaces the desired set and requests a broker-side reset.
    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = (TopicFilter, QoS)>) {
        self.desired = entries.into_iter().collect();
        self.request_reset();
    }

    /// Makes the next resync unsubscribe every known broker-side filter
    /// before subscribing the desired set.
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// Marks the broker-side view as unknown, e.g. after reconnecting.
    ///
    /// The next resync re-sends every desired entry.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Drops a filter from the broker-side view so the next resync retries
    /// it. Used when the broker rejects a subscription.
    pub fn forget(&mut self, filter: &TopicFilter) {
        self.applied.remove(filter);
    }

    /// Returns the desired QoS for a filter.
    #[must_use]
    pub fn get(&self, filter: &TopicFilter) -> Option<QoS> {
        self.desired.get(filter).copied()
    }

    /// Returns true if the filter is desired.
    #[must_use]
    pub fn contains(&self, filter: &TopicFilter) -> bool {
        self.desired.contains_key(filter)
    }

    /// Returns the number of desired filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.desired.len()
    }

    /// Returns true if nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }

    /// Iterates over the desired set in filter order.
    pub fn iter(&self) -> impl Iterator<Item = (&TopicFilter, QoS)> {
        self.desired.iter().map(|(f, q)| (f, *q))
    }

    /// Returns a copy of the desired set.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<TopicFilter, QoS> {
        self.desired.clone()
    }

    /// Returns true if the last resync could not queue every request and
    /// should be repeated once the transport has made room.
    #[must_use]
    pub fn has_deferred(&self) -> bool {
        self.deferred
    }

    /// Returns true if the broker-side view matches the desired set.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.stale && !self.reset_requested && self.applied == self.desired
    }

    /// Brings the connection's subscriptions in line with the desired set.
    ///
    /// 1. If a reset was requested, unsubscribes every known filter.
    /// 2. Unsubscribes known filters that are no longer desired.
    /// 3. Subscribes desired filters that are missing, stale or whose QoS
    ///    changed.
    ///
    /// A failure for one filter is recorded in the report and does not stop
    /// the others. Failed filters are retried on the next pass. A filter
    /// refused only because the transport's request queue is full is not a
    /// failure: it is listed as deferred and [`has_deferred`](Self::has_deferred)
    /// stays set until a later pass queues it.
    pub fn resync<T: Transport + ?Sized>(&mut self, transport: &T) -> ResyncReport {
        let mut report = ResyncReport::default();

        if self.reset_requested {
            let known: Vec<TopicFilter> = self.applied.keys().cloned().collect();
            for filter in known {
                self.unsubscribe_one(transport, filter, &mut report);
            }
            self.reset_requested = false;
            self.stale = true;
        }

        let obsolete: Vec<TopicFilter> = self
            .applied
            .keys()
            .filter(|f| !self.desired.contains_key(*f))
            .cloned()
            .collect();
        for filter in obsolete {
            self.unsubscribe_one(transport, filter, &mut report);
        }

        let stale = self.stale;
        let missing: Vec<(TopicFilter, QoS)> = self
            .desired
            .iter()
            .filter(|(f, q)| stale || self.applied.get(*f) != Some(*q))
            .map(|(f, q)| (f.clone(), *q))
            .collect();

        for (filter, qos) in missing {
            match transport.subscribe(&filter, qos) {
                Ok(()) => {
                    tracing::debug!(filter = %filter, qos = %qos, "Subscription requested");
                    self.applied.insert(filter.clone(), qos);
                    report.subscribed.push((filter, qos));
                }
                Err(e) if e.is_backpressure() => {
                    tracing::debug!(filter = %filter, "Request queue full, subscription deferred");
                    self.applied.remove(&filter);
                    report.deferred.push(filter);
                }
                Err(e) => {
                    tracing::warn!(filter = %filter, error = %e, "Failed to subscribe");
                    self.applied.remove(&filter);
                    report.failures.push(SessionError::SubscribeFailure {
                        filter: filter.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.stale = false;
        self.deferred = !report.deferred.is_empty();
        report
    }

    fn unsubscribe_one<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        filter: TopicFilter,
        report: &mut ResyncReport,
    ) {
        match transport.unsubscribe(&filter) {
            Ok(()) => {
                tracing::debug!(filter = %filter, "Unsubscription requested");
                self.applied.remove(&filter);
                report.unsubscribed.push(filter);
            }
            Err(e) if e.is_backpressure() => {
                tracing::debug!(filter = %filter, "Request queue full, unsubscription deferred");
                report.deferred.push(filter);
            }
            Err(e) => {
                tracing::warn!(filter = %filter, error = %e, "Failed to unsubscribe");
                report.failures.push(SessionError::SubscribeFailure {
                    filter: filter.to_string(),
                    reason: format!("unsubscribe failed: {e}"),
                });
            }
        }
    }
}
