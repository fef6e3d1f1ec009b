// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event streams for inbound messages and connection state.
//!
//! The [`EventBus`] owns two independent broadcast channels. Consumers either
//! pull from an [`EventReceiver`] or register a callback and keep the
//! returned [`ListenerHandle`] to cancel it later.
//!
//! # Examples
//!
//! ```
//! use mqtt_session::event::{EventBus, TopicMessage};
//! use mqtt_session::TopicFilterSet;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe_messages(TopicFilterSet::new(["sensors/#"]).unwrap());
//!
//! bus.publish_message(TopicMessage::new("sensors/door", "open"));
//! assert_eq!(rx.recv().await.unwrap().topic(), "sensors/door");
//! # }
//! ```

mod event_bus;
mod listener;
mod listener_id;
mod replay;
mod topic_message;

pub use event_bus::{DEFAULT_MESSAGE_CAPACITY, DEFAULT_STATE_CAPACITY, EventBus};
pub use listener::ListenerHandle;
pub use listener_id::ListenerId;
pub use replay::EventReceiver;
pub use topic_message::TopicMessage;
