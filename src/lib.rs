// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `mqtt_session` - A supervised MQTT session for async Rust applications.
//!
//! This library keeps a single broker connection alive on behalf of an
//! application and hides the transport's lifecycle behind a small API.
//!
//! # Features
//!
//! - **Supervised connection**: `Disconnected → Connecting → Connected`
//!   state machine with exponential-backoff reconnection
//! - **Durable subscriptions**: the desired subscription set is restored
//!   after every reconnect, without duplicates
//! - **Replaying event streams**: late listeners immediately receive the
//!   latest message and connection state
//! - **Offline buffering**: publishes made while disconnected are flushed in
//!   order once the connection is back
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_session::{ConnectionState, QoS, Session};
//!
//! #[tokio::main]
//! async fn main() -> mqtt_session::Result<()> {
//!     let session = Session::init(
//!         "mqtt://192.168.1.50:1883",
//!         Some("living_room_panel"),
//!         Some("user"),
//!         Some("password"),
//!         false,
//!     )
//!     .await?;
//!
//!     let _states = session.listen_connection_state(|state| {
//!         println!("connection is now {state}");
//!     });
//!
//!     let _messages = session.listen(["home/+/temperature"], |msg| {
//!         println!("{} = {:?}", msg.topic(), msg.payload_str());
//!     })?;
//!
//!     session.subscribe([("home/#", QoS::AtLeastOnce)], false).await?;
//!     session.publish("home/panel/online", "1", QoS::AtLeastOnce, true).await?;
//!
//!     if session.state() == ConnectionState::Connected {
//!         session.disconnect().await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Diagnostics
//!
//! Failures on the background connection never surface as panics. They are
//! logged through `tracing` and, when registered with
//! [`SessionBuilder::on_diagnostic`], passed to the application as
//! [`SessionError`] values.

pub mod buffer;
pub mod error;
pub mod event;
pub mod protocol;
mod session;
pub mod state;
pub mod subscription;
pub mod supervisor;
pub mod types;

pub use buffer::{OfflineBufferConfig, OverflowPolicy};
pub use error::{
    BufferError, Error, ParseError, ProtocolError, Result, SessionError, ValueError,
};
pub use event::{EventBus, EventReceiver, ListenerHandle, ListenerId, TopicMessage};
pub use session::{
    DEFAULT_REQUEST_CAPACITY, DiagnosticCallback, PublishOutcome, Session, SessionBuilder,
    SessionConfig,
};
pub use state::ConnectionState;
pub use supervisor::ReconnectionPolicy;
pub use types::{QoS, TopicFilter, TopicFilterSet};
