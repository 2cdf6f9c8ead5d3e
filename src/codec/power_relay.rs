// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary codec for the minimal power relay.

use super::PayloadCodec;
use crate::error::{CommandError, DecodeError};
use crate::types::{Command, CommandDescriptor, Parameter, PowerState, State, validate_command};

/// Name of the relay's only command.
pub const POWER_COMMAND: &str = "power";

/// State property holding the measured voltage.
pub const VOLTAGE: &str = "voltage";

/// State property holding the measured current.
pub const CURRENT: &str = "current";

const STATE_LEN: usize = 2;
const COMMAND_LEN: usize = 1;

/// Codec for the minimal power relay.
///
/// - State: exactly two bytes `[voltage, current]`, exposed as the decimal
///   properties `voltage` and `current`.
/// - Commands: `power on` is the byte `0x01`, `power off` the byte `0x00`.
///
/// # Examples
///
/// ```
/// use relayhub::codec::{PayloadCodec, PowerRelayCodec};
/// use relayhub::types::Command;
///
/// let codec = PowerRelayCodec::new();
///
/// let state = codec.decode_state(&[120, 2]).unwrap();
/// assert_eq!(state.get("voltage"), Some("120"));
/// assert_eq!(state.get("current"), Some("2"));
///
/// let bytes = codec.encode_command(&Command::new("power", ["on"])).unwrap();
/// assert_eq!(bytes, [0x01]);
/// ```
#[derive(Debug, Clone)]
pub struct PowerRelayCodec {
    commands: Vec<CommandDescriptor>,
}

impl PowerRelayCodec {
    /// Creates the codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: vec![
                CommandDescriptor::new(POWER_COMMAND)
                    .with_parameter(Parameter::one_of("state", PowerState::TOKENS)),
            ],
        }
    }
}

impl Default for PowerRelayCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadCodec for PowerRelayCodec {
    fn name(&self) -> &'static str {
        "power_relay"
    }

    fn commands(&self) -> &[CommandDescriptor] {
        &self.commands
    }

    fn decode_state(&self, payload: &[u8]) -> Result<State, DecodeError> {
        let [voltage, current] = payload else {
            return Err(DecodeError::PayloadLength {
                expected: STATE_LEN,
                actual: payload.len(),
            });
        };
        Ok(State::new()
            .with(VOLTAGE, voltage.to_string())
            .with(CURRENT, current.to_string()))
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, CommandError> {
        validate_command(&self.commands, command)?;
        let power = command
            .arguments()
            .first()
            .and_then(|arg| PowerState::from_token(arg))
            .ok_or_else(|| CommandError::Encode("missing power state".to_string()))?;
        Ok(vec![power.as_byte()])
    }

    fn encode_state(&self, state: &State) -> Result<Vec<u8>, DecodeError> {
        Ok(vec![byte_property(state, VOLTAGE)?, byte_property(state, CURRENT)?])
    }

    fn decode_command(&self, payload: &[u8]) -> Result<Command, DecodeError> {
        let [byte] = payload else {
            return Err(DecodeError::PayloadLength {
                expected: COMMAND_LEN,
                actual: payload.len(),
            });
        };
        let power = PowerState::from_byte(*byte).ok_or_else(|| DecodeError::InvalidValue {
            field: POWER_COMMAND.to_string(),
            message: format!("unknown power byte 0x{byte:02x}"),
        })?;
        Ok(Command::new(POWER_COMMAND, [power.as_str()]))
    }
}

fn byte_property(state: &State, key: &str) -> Result<u8, DecodeError> {
    let value = state.get(key).ok_or_else(|| DecodeError::InvalidValue {
        field: key.to_string(),
        message: "missing".to_string(),
    })?;
    value.parse().map_err(|e| DecodeError::InvalidValue {
        field: key.to_string(),
        message: format!("{value:?} is not a byte: {e}"),
    })
}
