// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Payload codecs.
//!
//! A codec is the only thing that differs between device kinds: it knows the
//! command table a device accepts and how states and commands look on the
//! wire. [`RelayDevice`](crate::device::RelayDevice) is generic over it.
//!
//! | Codec | State payload | Command payload |
//! |-------|---------------|-----------------|
//! | [`JsonCodec`] | JSON object of scalars | `{"name": .., "args": [..]}` |
//! | [`PowerRelayCodec`] | 2 bytes `[voltage, current]` | 1 byte `0x01`/`0x00` |
//!
//! Codecs are symmetric. Besides the hub side (`decode_state`,
//! `encode_command`) they implement the device side (`encode_state`,
//! `decode_command`), used by simulators and tests.

mod json;
mod power_relay;

use std::fmt::Debug;

pub use json::JsonCodec;
pub use power_relay::PowerRelayCodec;

use crate::error::{CommandError, DecodeError};
use crate::types::{Command, CommandDescriptor, State};

/// Encoding strategy for one kind of device.
pub trait PayloadCodec: Send + Sync + Debug + 'static {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Commands a device using this codec accepts.
    fn commands(&self) -> &[CommandDescriptor];

    /// Decodes an inbound state report.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is malformed.
    fn decode_state(&self, payload: &[u8]) -> Result<State, DecodeError>;

    /// Validates a command against [`commands`](Self::commands) and encodes it.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if validation or serialization fails.
    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, CommandError>;

    /// Encodes a state report as a device would send it.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the state cannot be represented.
    fn encode_state(&self, state: &State) -> Result<Vec<u8>, DecodeError>;

    /// Decodes a command payload as a device would receive it.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is malformed.
    fn decode_command(&self, payload: &[u8]) -> Result<Command, DecodeError>;
}
