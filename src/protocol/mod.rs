// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish/subscribe transports.
//!
//! Devices never talk to a broker directly. They hold an
//! `Arc<dyn Transport>` and use three non-blocking primitives: subscribe a
//! handler to a topic filter, unsubscribe it, and publish a payload.
//!
//! # Transports
//!
//! - [`LocalBroker`]: in-process broker with MQTT topic matching, retained
//!   messages and session tracking
//! - [`MqttTransport`]: client of an external MQTT broker (feature `mqtt`)
//!
//! # Session lifecycle
//!
//! Transports report device sessions to registered [`SessionHook`]s. The
//! [`DeviceProvisioner`](crate::manager::DeviceProvisioner) is the hook that
//! turns sessions into registered devices.

mod listeners;
mod local;
#[cfg(feature = "mqtt")]
mod mqtt;
pub mod topic;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use local::{INLINE_CLIENT_ID, LocalBroker};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttTransport, MqttTransportBuilder};
pub use topic::TopicScheme;

use crate::error::TransportError;

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Exactly-once handshake.
    ExactlyOnce,
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Handle of a registered topic listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

/// A message delivered to a topic listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Session that published the message, empty when the transport cannot
    /// tell (an external broker does not forward publisher ids).
    pub client_id: String,
    /// Listener the message is delivered to.
    pub listener_id: ListenerId,
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Callback invoked for every message matching a listener's filter.
///
/// Handlers run on the transport's delivery path and must not block.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Publish/subscribe primitive used by devices.
///
/// All methods are synchronous and must not block, so they can be called
/// from any context, including from inside a [`MessageHandler`].
pub trait Transport: Send + Sync + fmt::Debug {
    /// Registers `handler` for every message whose topic matches `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Subscribe`] if the filter is invalid or the
    /// transport cannot take the subscription.
    fn subscribe(&self, filter: &str, handler: MessageHandler)
    -> Result<ListenerId, TransportError>;

    /// Removes a listener. Returns `false` if it was not registered.
    fn unsubscribe(&self, listener: ListenerId) -> bool;

    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message cannot be queued.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError>;
}

/// Observer of transport session lifecycle.
pub trait SessionHook: Send + Sync {
    /// Called when a device session is established.
    ///
    /// # Errors
    ///
    /// An error rejects the session.
    fn on_session_established(&self, session_id: &str) -> crate::Result<()>;

    /// Called when a device session ends.
    fn on_disconnect(&self, session_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_default_is_at_most_once() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn qos_serde_names() {
        let qos: QoS = serde_json::from_str("\"at_least_once\"").unwrap();
        assert_eq!(qos, QoS::AtLeastOnce);
    }

    #[cfg(feature = "mqtt")]
    #[test]
    fn qos_maps_to_rumqttc() {
        assert_eq!(rumqttc::QoS::from(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn listener_id_display() {
        assert_eq!(ListenerId::new(3).to_string(), "Listener(3)");
    }
}
