// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Listener identifier type.

use std::fmt;

use uuid::Uuid;

/// Unique identifier for a registered listener.
///
/// Returned by [`ListenerHandle::id`](super::ListenerHandle::id) and used in
/// log output to correlate a listener with its lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique listener identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0.simple())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex characters are enough to tell listeners apart in logs
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }

    #[test]
    fn display_is_short() {
        let id = ListenerId::new();
        assert_eq!(id.to_string().len(), 8);
        assert!(format!("{id:?}").starts_with("ListenerId("));
    }
}
