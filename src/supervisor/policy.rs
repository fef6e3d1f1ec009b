// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection backoff policy.

use std::time::Duration;

/// Shortest delay ever returned by [`ReconnectionPolicy::delay_for_attempt`].
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Configuration for automatic reconnection.
///
/// Delays grow exponentially from `initial_delay` by `backoff_multiplier`
/// and are capped at `max_delay`. No delay is shorter than
/// [`MIN_RETRY_DELAY`], even with a zero `initial_delay` or `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mqtt_session::ReconnectionPolicy;
///
/// // Default policy (enabled, retries forever with exponential backoff)
/// let policy = ReconnectionPolicy::default();
/// assert!(policy.should_retry(1_000));
///
/// // Disable reconnection
/// let policy = ReconnectionPolicy::disabled();
/// assert!(!policy.should_retry(0));
///
/// // Custom policy
/// let policy = ReconnectionPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Maximum number of retries before giving up (None = infinite).
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any retry delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f32,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection policy.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets infinite retries.
    #[must_use]
    pub fn with_infinite_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Sets the delay before the first retry.
    ///
    /// Values below [`MIN_RETRY_DELAY`] are raised to it.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between retries.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 are treated as 1.0.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before retry number `attempt` (zero based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay).max(MIN_RETRY_DELAY);
        }

        let multiplier = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        // Precision loss only matters for delays far beyond any sane max_delay
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f32 * multiplier;

        // The product is non-negative; infinities saturate and are capped below
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay).max(MIN_RETRY_DELAY)
    }

    /// Returns true if retry number `attempt` (zero based) should happen.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retries_forever() {
        let policy = ReconnectionPolicy::default();

        assert!(policy.enabled);
        assert_eq!(policy.max_retries, None);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert!(policy.should_retry(u32::MAX - 1));
    }

    #[test]
    fn disabled_policy_never_retries() {
        let policy = ReconnectionPolicy::disabled();

        assert!(!policy.enabled);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn delay_grows_exponentially_and_is_capped() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn multiplier_below_one_does_not_shrink_delay() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_millis(200))
            .with_backoff_multiplier(0.5);

        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(200));
    }

    #[test]
    fn zero_delays_are_raised_to_floor() {
        let policy = ReconnectionPolicy::new().with_initial_delay(Duration::ZERO);
        for attempt in [0, 1, 5, u32::MAX] {
            assert_eq!(policy.delay_for_attempt(attempt), MIN_RETRY_DELAY);
        }

        let policy = ReconnectionPolicy::new().with_max_delay(Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(3), MIN_RETRY_DELAY);
    }

    #[test]
    fn bounded_retries() {
        let policy = ReconnectionPolicy::new().with_max_retries(3);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let policy = policy.with_infinite_retries();
        assert!(policy.should_retry(1000));
    }
}
