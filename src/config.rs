// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hub configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```json
//! {
//!   "topics": {"prefix": "devices"},
//!   "broadcast_capacity": 64,
//!   "command_retain": true,
//!   "command_qos": "at_most_once",
//!   "default_profile": {"codec": "power_relay"},
//!   "profiles": {
//!     "thermo1": {"codec": "json", "commands": [{"name": "mode", "parameters": [{"name": "m"}]}]}
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::DeviceProfile;
use crate::error::ConfigError;
use crate::protocol::{QoS, TopicScheme};
use crate::subscription::DEFAULT_CAPACITY;

/// Configuration of the device hub.
///
/// # Examples
///
/// ```
/// use relayhub::config::HubConfig;
/// use relayhub::device::DeviceProfile;
///
/// let config = HubConfig::from_json_str(
///     r#"{"broadcast_capacity": 16, "profiles": {"th1": {"codec": "json"}}}"#,
/// )
/// .unwrap();
///
/// assert_eq!(config.broadcast_capacity, 16);
/// assert_eq!(config.profile_for("psu1"), &DeviceProfile::PowerRelay);
/// assert_eq!(config.profile_for("th1").codec_name(), "json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Device topic layout.
    pub topics: TopicScheme,
    /// Per-subscriber buffer size of every fanout.
    pub broadcast_capacity: usize,
    /// Whether commands are published as retained messages.
    pub command_retain: bool,
    /// QoS used for commands.
    pub command_qos: QoS,
    /// Profile for devices without an entry in `profiles`.
    pub default_profile: DeviceProfile,
    /// Per-device profile overrides, keyed by device id.
    pub profiles: BTreeMap<String, DeviceProfile>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            topics: TopicScheme::default(),
            broadcast_capacity: DEFAULT_CAPACITY,
            command_retain: true,
            command_qos: QoS::AtMostOnce,
            default_profile: DeviceProfile::PowerRelay,
            profiles: BTreeMap::new(),
        }
    }
}

impl HubConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed input and
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Self::from_json_str(&json)
    }

    /// Checks value domains.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero broadcast capacity or an
    /// unusable topic prefix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "broadcast_capacity must be greater than zero".to_string(),
            ));
        }
        self.topics.validate()
    }

    /// Returns the profile for a device id.
    #[must_use]
    pub fn profile_for(&self, device_id: &str) -> &DeviceProfile {
        self.profiles
            .get(device_id)
            .unwrap_or(&self.default_profile)
    }

    /// Returns the options every relay device is built with.
    #[must_use]
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            topics: self.topics.clone(),
            command_retain: self.command_retain,
            command_qos: self.command_qos,
            broadcast_capacity: self.broadcast_capacity,
        }
    }

    /// Sets the topic layout.
    #[must_use]
    pub fn with_topics(mut self, topics: TopicScheme) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the per-subscriber buffer size.
    #[must_use]
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Sets whether commands are retained.
    #[must_use]
    pub fn with_command_retain(mut self, retain: bool) -> Self {
        self.command_retain = retain;
        self
    }

    /// Sets the command QoS.
    #[must_use]
    pub fn with_command_qos(mut self, qos: QoS) -> Self {
        self.command_qos = qos;
        self
    }

    /// Sets the profile used when no override matches.
    #[must_use]
    pub fn with_default_profile(mut self, profile: DeviceProfile) -> Self {
        self.default_profile = profile;
        self
    }

    /// Adds a per-device profile override.
    #[must_use]
    pub fn with_profile(mut self, device_id: impl Into<String>, profile: DeviceProfile) -> Self {
        self.profiles.insert(device_id.into(), profile);
        self
    }
}

/// Options shared by every [`RelayDevice`](crate::device::RelayDevice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Device topic layout.
    pub topics: TopicScheme,
    /// Whether commands are published as retained messages.
    pub command_retain: bool,
    /// QoS used for commands.
    pub command_qos: QoS,
    /// Per-subscriber buffer size of the device's fanouts.
    pub broadcast_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        HubConfig::default().relay_options()
    }
}
