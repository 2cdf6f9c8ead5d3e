// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared by devices, codecs, and the registry.
//!
//! # Types
//!
//! - [`DeviceId`] - Session-scoped device identifier
//! - [`Command`] - Named command with positional string arguments
//! - [`CommandDescriptor`] / [`Parameter`] - Advertised command table entries
//! - [`State`] - Immutable snapshot of reported properties
//! - [`PowerState`] - On/Off token of the relay `power` command

mod command;
mod device_id;
mod power;
mod state;

pub use command::{Command, CommandDescriptor, Parameter, validate_command};
pub use device_id::DeviceId;
pub use power::PowerState;
pub use state::State;
