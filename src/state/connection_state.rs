// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker connection state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a session.
///
/// Reconnect attempts are reported as [`Connecting`](Self::Connecting);
/// there is no separate reconnecting state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection, and none is being attempted right now.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The broker acknowledged the connection.
    Connected,
}

impl ConnectionState {
    /// Returns true if the session is connected.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the session is disconnected.
    #[must_use]
    pub fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}
