// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device kinds selectable from configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{RelayDevice, SharedDevice};
use crate::codec::{JsonCodec, PowerRelayCodec};
use crate::config::RelayOptions;
use crate::error::Result;
use crate::protocol::Transport;
use crate::types::{CommandDescriptor, DeviceId};

/// Which codec a newly connected device is built with.
///
/// In configuration files the variant is selected by the `codec` key:
///
/// ```json
/// {"codec": "power_relay"}
/// {"codec": "json", "commands": [{"name": "mode", "parameters": [{"name": "m", "allowed": ["eco", "max"]}]}]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum DeviceProfile {
    /// Minimal relay: 2-byte state, 1-byte `power` command.
    #[default]
    PowerRelay,
    /// Generic JSON device with its own command table.
    Json {
        /// Commands the device accepts.
        #[serde(default)]
        commands: Vec<CommandDescriptor>,
    },
}

impl DeviceProfile {
    /// Returns the codec label of this profile.
    #[must_use]
    pub fn codec_name(&self) -> &'static str {
        match self {
            Self::PowerRelay => "power_relay",
            Self::Json { .. } => "json",
        }
    }

    /// Builds and attaches a device for `id`.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot subscribe to its state topic.
    pub fn build(
        &self,
        id: DeviceId,
        transport: Arc<dyn Transport>,
        options: &RelayOptions,
    ) -> Result<SharedDevice> {
        let device: SharedDevice = match self {
            Self::PowerRelay => {
                RelayDevice::attach(id, PowerRelayCodec::new(), transport, options)?
            }
            Self::Json { commands } => {
                RelayDevice::attach(id, JsonCodec::new(commands.clone()), transport, options)?
            }
        };
        Ok(device)
    }
}
