// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection lifecycle management.
//!
//! The lifecycle follows a small state machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --CONNACK--> Connected
//!      ^                        |                      |
//!      +------- failure --------+------- lost ---------+
//!      |
//!      +-- backoff elapsed --> Connecting (new epoch)
//! ```
//!
//! [`ConnectionSupervisor`] decides transitions and backoff without doing any
//! I/O. The connection task that drives the `rumqttc` event loop is private
//! to the crate and reports wire events to the supervisor.

pub(crate) mod driver;
mod machine;
mod policy;

pub use machine::{ConnectionSupervisor, Recovery};
pub use policy::{MIN_RETRY_DELAY, ReconnectionPolicy};
