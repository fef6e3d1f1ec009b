// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared across the session.
//!
//! Each type validates its input at construction time so that invalid
//! topics or QoS levels never reach the transport.
//!
//! # Types
//!
//! - [`QoS`] - Delivery guarantee (0, 1 or 2)
//! - [`TopicFilter`] - Subscription filter with `+`/`#` wildcards
//! - [`TopicFilterSet`] - Listener selection; empty means every topic

mod qos;
mod topic;

pub use qos::QoS;
pub use topic::{TopicFilter, TopicFilterSet, validate_topic};
