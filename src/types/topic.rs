// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic names and topic filters.
//!
//! A [`TopicFilter`] is validated at construction so that wildcards only
//! appear where MQTT allows them. Matching follows broker semantics: `+`
//! matches exactly one level, a trailing `#` matches the parent level and
//! everything below it, and neither wildcard matches a `$`-prefixed topic
//! from the first level.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// A validated MQTT topic filter.
///
/// # Examples
///
/// ```
/// use mqtt_session::TopicFilter;
///
/// let filter = TopicFilter::new("sensors/+/temperature").unwrap();
/// assert!(filter.matches("sensors/kitchen/temperature"));
/// assert!(!filter.matches("sensors/kitchen/humidity"));
///
/// let all = TopicFilter::new("sensors/#").unwrap();
/// assert!(all.matches("sensors"));
/// assert!(all.matches("sensors/kitchen/humidity"));
///
/// assert!(TopicFilter::new("sensors/#/bad").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Creates a filter after validating wildcard placement.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::EmptyTopic` for an empty string and
    /// `ValueError::InvalidTopicFilter` for misplaced wildcards or NUL
    /// characters.
    pub fn new(filter: impl Into<String>) -> Result<Self, ValueError> {
        let filter = filter.into();
        validate_filter(&filter)?;
        Ok(Self(filter))
    }

    /// Returns the filter string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the filter contains `+` or `#`.
    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.0.contains(['+', '#'])
    }

    /// Returns true if `topic` is matched by this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$') && self.0.starts_with(['+', '#']) {
            return false;
        }

        let mut filter_levels = self.0.split('/');
        let mut topic_levels = topic.split('/');

        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) | (None, None) => return true,
                (Some("+"), Some(_)) => {}
                (Some(f), Some(t)) if f == t => {}
                _ => return false,
            }
        }
    }
}

fn validate_filter(filter: &str) -> Result<(), ValueError> {
    let invalid = |reason| ValueError::InvalidTopicFilter {
        filter: filter.to_string(),
        reason,
    };

    if filter.is_empty() {
        return Err(ValueError::EmptyTopic);
    }
    if filter.contains('\0') {
        return Err(invalid("contains a NUL character"));
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err(invalid("'#' must be the whole last level"));
        }
        if level.contains('+') && level != "+" {
            return Err(invalid("'+' must occupy a whole level"));
        }
    }
    Ok(())
}

/// Validates a topic name used for publishing.
///
/// # Errors
///
/// Returns `ValueError::EmptyTopic` for an empty topic and
/// `ValueError::WildcardInTopic` if it contains `+`, `#` or NUL.
pub fn validate_topic(topic: &str) -> Result<(), ValueError> {
    if topic.is_empty() {
        return Err(ValueError::EmptyTopic);
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(ValueError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

impl TryFrom<String> for TopicFilter {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = ValueError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicFilter> for String {
    fn from(filter: TopicFilter) -> Self {
        filter.0
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of filters selecting which inbound messages a listener receives.
///
/// An empty set matches every topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicFilterSet {
    filters: Vec<TopicFilter>,
}

impl TopicFilterSet {
    /// Creates a set that matches every topic.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a set from filter strings.
    ///
    /// Duplicate filters are kept once.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn new<I, S>(filters: I) -> Result<Self, ValueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for filter in filters {
            let filter = TopicFilter::new(filter)?;
            if !set.filters.contains(&filter) {
                set.filters.push(filter);
            }
        }
        Ok(set)
    }

    /// Returns true if `topic` is selected by this set.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.matches(topic))
    }

    /// Returns true if the set matches every topic.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns the number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Iterates over the filters.
    pub fn iter(&self) -> impl Iterator<Item = &TopicFilter> {
        self.filters.iter()
    }
}

impl From<TopicFilter> for TopicFilterSet {
    fn from(filter: TopicFilter) -> Self {
        Self {
            filters: vec![filter],
        }
    }
}
