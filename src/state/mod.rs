// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection state of a session.
//!
//! Exactly one [`ConnectionState`] is current at any time. Transitions are
//! made only by the connection supervisor and published, in order, on the
//! state channel of the [`EventBus`](crate::event::EventBus).

mod connection_state;

pub use connection_state::ConnectionState;
