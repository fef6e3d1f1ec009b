// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic subscription bookkeeping.
//!
//! The [`SubscriptionRegistry`] holds the filters the application wants and
//! reconciles them with the live connection after every (re)connect. The
//! session owns one registry and mutates it only from its connection task.

mod registry;

pub use registry::{ResyncReport, SubscriptionRegistry};
