// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Power state of a minimal relay.

use std::fmt;

/// On/off state carried by the `power` command of a minimal relay.
///
/// # Examples
///
/// ```
/// use relayhub::types::PowerState;
///
/// assert_eq!(PowerState::On.as_str(), "on");
/// assert_eq!(PowerState::On.as_byte(), 0x01);
/// assert_eq!(PowerState::from_token("off"), Some(PowerState::Off));
/// assert_eq!(PowerState::from_byte(0x07), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    /// Power is off.
    Off,
    /// Power is on.
    On,
}

impl PowerState {
    /// Argument tokens accepted by the `power` command.
    pub const TOKENS: [&'static str; 2] = ["on", "off"];

    /// Returns the command argument token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
        }
    }

    /// Returns the single-byte wire encoding.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::On => 0x01,
        }
    }

    /// Parses a command argument token. Tokens are case-sensitive.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// Parses the single-byte wire encoding.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Off),
            0x01 => Some(Self::On),
            _ => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<bool> for PowerState {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        for token in PowerState::TOKENS {
            let state = PowerState::from_token(token).unwrap();
            assert_eq!(state.as_str(), token);
        }
    }

    #[test]
    fn tokens_are_case_sensitive() {
        assert_eq!(PowerState::from_token("ON"), None);
    }

    #[test]
    fn bytes_round_trip() {
        assert_eq!(PowerState::from_byte(PowerState::On.as_byte()), Some(PowerState::On));
        assert_eq!(PowerState::from_byte(PowerState::Off.as_byte()), Some(PowerState::Off));
    }

    #[test]
    fn from_bool() {
        assert_eq!(PowerState::from(true), PowerState::On);
        assert_eq!(PowerState::from(false), PowerState::Off);
    }
}
