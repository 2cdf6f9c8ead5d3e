// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic filters and the device topic layout.
//!
//! ```text
//! {prefix}/{device_id}/state     device → hub   state reports
//! {prefix}/{device_id}/command   hub → device   commands (retained)
//! {prefix}/{device_id}/status    device → hub   presence: online / offline
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const STATE_SUFFIX: &str = "state";
const COMMAND_SUFFIX: &str = "command";
const STATUS_SUFFIX: &str = "status";

/// Returns `true` if `topic` matches the MQTT topic `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches any number of
/// levels including none (`a/#` matches `a`). Wildcards at the first level
/// never match topics starting with `$`.
///
/// # Examples
///
/// ```
/// use relayhub::protocol::topic::matches;
///
/// assert!(matches("devices/+/state", "devices/psu1/state"));
/// assert!(matches("devices/#", "devices"));
/// assert!(!matches("devices/+/state", "devices/psu1/command"));
/// assert!(!matches("#", "$SYS/uptime"));
/// ```
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) | (None, None) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            _ => return false,
        }
    }
}

/// Checks that `filter` is a well-formed MQTT topic filter.
///
/// # Errors
///
/// Returns a short reason when the filter is empty, a wildcard shares a
/// level with other characters, or `#` is not the last level.
pub fn validate_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("empty topic filter");
    }
    if filter.contains('\0') {
        return Err("topic filter contains NUL");
    }
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err("'#' must be the whole last level");
        }
        if level.contains('+') && level != "+" {
            return Err("'+' must occupy a whole level");
        }
    }
    Ok(())
}

/// Checks that `topic` is a valid topic name to publish on.
///
/// # Errors
///
/// Returns a short reason when the topic is empty or contains wildcards.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("empty topic");
    }
    if topic.contains(['+', '#']) {
        return Err("wildcards are not allowed in topic names");
    }
    if topic.contains('\0') {
        return Err("topic contains NUL");
    }
    Ok(())
}

/// Topic layout shared by the hub and its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicScheme {
    /// First topic level of every device topic.
    pub prefix: String,
}

impl TopicScheme {
    /// Default first topic level.
    pub const DEFAULT_PREFIX: &'static str = "devices";

    /// Creates a scheme with a custom prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Topic a device reports its state on.
    #[must_use]
    pub fn state_topic(&self, device_id: &str) -> String {
        format!("{}/{device_id}/{STATE_SUFFIX}", self.prefix)
    }

    /// Topic a device receives commands on.
    #[must_use]
    pub fn command_topic(&self, device_id: &str) -> String {
        format!("{}/{device_id}/{COMMAND_SUFFIX}", self.prefix)
    }

    /// Topic a device announces its presence on.
    #[must_use]
    pub fn presence_topic(&self, device_id: &str) -> String {
        format!("{}/{device_id}/{STATUS_SUFFIX}", self.prefix)
    }

    /// Filter matching the presence topic of every device.
    #[must_use]
    pub fn presence_filter(&self) -> String {
        format!("{}/+/{STATUS_SUFFIX}", self.prefix)
    }

    /// Extracts the session id from a presence topic.
    ///
    /// Returns `None` if `topic` is not a presence topic of this scheme.
    #[must_use]
    pub fn session_from_presence_topic<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let id = topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_suffix(STATUS_SUFFIX)?
            .strip_suffix('/')?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }

    /// Checks that the prefix is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty prefix or one holding
    /// wildcards.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_topic(&self.prefix)
            .map_err(|reason| ConfigError::Invalid(format!("topic prefix: {reason}")))
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}
