// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport-backed device.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::{Device, DeviceFault, FaultKind};
use crate::codec::PayloadCodec;
use crate::config::RelayOptions;
use crate::error::{Error, Result};
use crate::protocol::{InboundMessage, ListenerId, MessageHandler, QoS, Transport};
use crate::subscription::{Fanout, Subscription};
use crate::types::{Command, CommandDescriptor, DeviceId, State};

/// A device reached through a publish/subscribe transport.
///
/// The device listens on its state topic and publishes commands on its
/// command topic. Everything specific to the device kind (command table,
/// payload formats) comes from the codec `C`.
///
/// # Inbound state
///
/// Each message on the state topic is decoded and, on success, replaces the
/// stored snapshot before the new snapshot is announced to subscribers. A
/// payload that fails to decode is dropped: the previous state is kept and
/// a [`FaultKind::Decode`] fault is emitted.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use relayhub::codec::PowerRelayCodec;
/// use relayhub::config::RelayOptions;
/// use relayhub::device::{Device, RelayDevice};
/// use relayhub::protocol::{LocalBroker, QoS, Transport};
/// use relayhub::types::Command;
///
/// # fn main() -> relayhub::Result<()> {
/// let broker = LocalBroker::new();
/// let device = RelayDevice::attach(
///     "psu1",
///     PowerRelayCodec::new(),
///     Arc::new(broker.clone()),
///     &RelayOptions::default(),
/// )?;
///
/// broker.publish("devices/psu1/state", &[120, 2], false, QoS::AtMostOnce)?;
/// assert_eq!(device.state().get("voltage"), Some("120"));
///
/// device.send_command(&Command::new("power", ["on"]))?;
/// assert_eq!(broker.retained("devices/psu1/command"), Some(vec![0x01]));
/// # Ok(())
/// # }
/// ```
pub struct RelayDevice<C> {
    id: DeviceId,
    codec: C,
    transport: Arc<dyn Transport>,
    state_topic: String,
    command_topic: String,
    retain: bool,
    qos: QoS,
    state: RwLock<Arc<State>>,
    state_changes: Fanout<Arc<State>>,
    faults: Fanout<DeviceFault>,
    listener: Mutex<Option<ListenerId>>,
    closed: AtomicBool,
}

impl<C: PayloadCodec> RelayDevice<C> {
    /// Creates the device and subscribes it to its state topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the transport rejects the
    /// subscription; no device exists in that case.
    pub fn attach(
        id: impl Into<DeviceId>,
        codec: C,
        transport: Arc<dyn Transport>,
        options: &RelayOptions,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        let device = Arc::new(Self {
            state_topic: options.topics.state_topic(id.as_str()),
            command_topic: options.topics.command_topic(id.as_str()),
            retain: options.command_retain,
            qos: options.command_qos,
            state: RwLock::new(Arc::new(State::new())),
            state_changes: Fanout::with_capacity(options.broadcast_capacity),
            faults: Fanout::with_capacity(options.broadcast_capacity),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            id,
            codec,
            transport,
        });

        let weak: Weak<Self> = Arc::downgrade(&device);
        let handler: MessageHandler = Arc::new(move |message: &InboundMessage| {
            if let Some(device) = weak.upgrade() {
                device.handle_state_report(&message.payload);
            }
        });
        let listener = device.transport.subscribe(&device.state_topic, handler)?;
        *device.listener.lock() = Some(listener);

        tracing::debug!(
            device = %device.id,
            codec = device.codec.name(),
            topic = %device.state_topic,
            "Device attached"
        );
        Ok(device)
    }

    /// Returns the codec.
    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns the topic state reports arrive on.
    #[must_use]
    pub fn state_topic(&self) -> &str {
        &self.state_topic
    }

    /// Returns the topic commands are published on.
    #[must_use]
    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Returns `true` once the device has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn handle_state_report(&self, payload: &[u8]) {
        if self.is_closed() {
            return;
        }

        match self.codec.decode_state(payload) {
            Ok(state) => {
                let state = Arc::new(state);
                // Publish under the lock so notification order matches swap order.
                let mut current = self.state.write();
                *current = Arc::clone(&state);
                let reached = self.state_changes.publish(state);
                tracing::debug!(device = %self.id, subscribers = reached, "State replaced");
            }
            Err(e) => {
                tracing::warn!(
                    device = %self.id,
                    codec = self.codec.name(),
                    error = %e,
                    "Dropping undecodable state report"
                );
                self.faults.publish(DeviceFault::new(
                    self.id.clone(),
                    FaultKind::Decode,
                    e.to_string(),
                ));
            }
        }
    }

    fn detach(&self) {
        if let Some(listener) = self.listener.lock().take() {
            self.transport.unsubscribe(listener);
        }
    }
}

impl<C: PayloadCodec> Device for RelayDevice<C> {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn list_commands(&self) -> &[CommandDescriptor] {
        self.codec.commands()
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DeviceNotFound(self.id.clone()));
        }

        let payload = self.codec.encode_command(command)?;
        self.transport
            .publish(&self.command_topic, &payload, self.retain, self.qos)?;

        tracing::debug!(
            device = %self.id,
            command = %command,
            topic = %self.command_topic,
            "Command sent"
        );
        Ok(())
    }

    fn state(&self) -> Arc<State> {
        Arc::clone(&self.state.read())
    }

    fn subscribe_state_changes(&self) -> Subscription<Arc<State>> {
        self.state_changes.subscribe()
    }

    fn subscribe_errors(&self) -> Subscription<DeviceFault> {
        self.faults.subscribe()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.detach();
        self.state_changes.close();
        self.faults.close();
        tracing::debug!(device = %self.id, "Device closed");
    }
}

impl<C> Drop for RelayDevice<C> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            self.transport.unsubscribe(listener);
        }
    }
}

impl<C: PayloadCodec> fmt::Debug for RelayDevice<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayDevice")
            .field("id", &self.id)
            .field("codec", &self.codec.name())
            .field("state_topic", &self.state_topic)
            .field("command_topic", &self.command_topic)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
