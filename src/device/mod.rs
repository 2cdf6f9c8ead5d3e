// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device contract and its transport-backed implementation.
//!
//! Every connected device, whatever its wire encoding, is seen by the rest of
//! the crate through the [`Device`] trait:
//!
//! | Operation | Method |
//! |-----------|--------|
//! | Identity | [`Device::id`] |
//! | Command table | [`Device::list_commands`] |
//! | Command dispatch | [`Device::send_command`] |
//! | Current state | [`Device::state`] |
//! | State notifications | [`Device::subscribe_state_changes`] |
//! | Fault notifications | [`Device::subscribe_errors`] |
//!
//! [`RelayDevice`] implements it on top of any [`Transport`](crate::protocol::Transport)
//! and [`PayloadCodec`](crate::codec::PayloadCodec). [`DeviceProfile`] picks
//! the codec from configuration.

mod profile;
mod relay;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use profile::DeviceProfile;
pub use relay::RelayDevice;

use crate::error::Result;
use crate::subscription::Subscription;
use crate::types::{Command, CommandDescriptor, DeviceId, State};

/// Uniform capability contract of a connected device.
///
/// Implementations must be cheap to query: [`state`](Self::state) and the
/// `subscribe_*` methods never block.
pub trait Device: Send + Sync + fmt::Debug {
    /// Returns the device identifier.
    fn id(&self) -> &DeviceId;

    /// Returns the commands this device accepts.
    fn list_commands(&self) -> &[CommandDescriptor];

    /// Validates and sends a command.
    ///
    /// Validation happens before any transport I/O.
    ///
    /// # Errors
    ///
    /// - [`Error::Command`](crate::Error::Command) if the command is not in
    ///   the table or its arguments are invalid
    /// - [`Error::Transport`](crate::Error::Transport) if publishing fails
    /// - [`Error::DeviceNotFound`](crate::Error::DeviceNotFound) once the
    ///   device has been closed
    fn send_command(&self, command: &Command) -> Result<()>;

    /// Returns the last reported state (empty before the first report).
    fn state(&self) -> Arc<State>;

    /// Subscribes to state replacements, delivered in the order they happen.
    ///
    /// Only replacements that happen after the call are delivered.
    fn subscribe_state_changes(&self) -> Subscription<Arc<State>>;

    /// Subscribes to asynchronous faults.
    fn subscribe_errors(&self) -> Subscription<DeviceFault>;

    /// Detaches the device from its transport and ends its subscriptions.
    ///
    /// Idempotent.
    fn close(&self) {}
}

/// A device shared between the registry and its consumers.
pub type SharedDevice = Arc<dyn Device>;

/// Category of a [`DeviceFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// An inbound payload could not be decoded.
    Decode,
    /// The transport failed outside of a caller-visible operation.
    Transport,
    /// A session could not be turned into a registered device.
    Provisioning,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Decode => "decode",
            Self::Transport => "transport",
            Self::Provisioning => "provisioning",
        })
    }
}

/// An asynchronous malfunction reported by a device or on its behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFault {
    /// Device the fault concerns.
    pub device_id: DeviceId,
    /// Fault category.
    pub kind: FaultKind,
    /// Human-readable description.
    pub message: String,
    /// When the fault was observed.
    pub occurred_at: DateTime<Utc>,
}

impl DeviceFault {
    /// Creates a fault stamped with the current time.
    #[must_use]
    pub fn new(device_id: DeviceId, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            device_id,
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault on {}: {}", self.kind, self.device_id, self.message)
    }
}
