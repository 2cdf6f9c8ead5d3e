// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON codec for generic devices.

use serde_json::Value;

use super::PayloadCodec;
use crate::error::{CommandError, DecodeError};
use crate::types::{Command, CommandDescriptor, State, validate_command};

/// Codec for devices that speak JSON.
///
/// State reports are JSON objects. String values are kept verbatim, numbers
/// and booleans are stored in their JSON text form, anything else is
/// rejected. Commands are encoded as `{"name": .., "args": [..]}` after
/// validation against the configured command table.
///
/// # Examples
///
/// ```
/// use relayhub::codec::{JsonCodec, PayloadCodec};
///
/// let codec = JsonCodec::new(Vec::new());
/// let state = codec.decode_state(br#"{"mode":"eco","level":3,"armed":true}"#).unwrap();
///
/// assert_eq!(state.get("mode"), Some("eco"));
/// assert_eq!(state.get("level"), Some("3"));
/// assert_eq!(state.get("armed"), Some("true"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    commands: Vec<CommandDescriptor>,
}

impl JsonCodec {
    /// Creates a codec accepting the given command table.
    #[must_use]
    pub fn new(commands: Vec<CommandDescriptor>) -> Self {
        Self { commands }
    }
}

impl PayloadCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn commands(&self) -> &[CommandDescriptor] {
        &self.commands
    }

    fn decode_state(&self, payload: &[u8]) -> Result<State, DecodeError> {
        let Value::Object(map) = serde_json::from_slice::<Value>(payload)? else {
            return Err(DecodeError::InvalidValue {
                field: "state".to_string(),
                message: "expected a JSON object".to_string(),
            });
        };

        map.into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null | Value::Array(_) | Value::Object(_) => {
                        return Err(DecodeError::InvalidValue {
                            field: key,
                            message: "expected a string, number or boolean".to_string(),
                        });
                    }
                };
                Ok((key, text))
            })
            .collect()
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, CommandError> {
        validate_command(&self.commands, command)?;
        serde_json::to_vec(command).map_err(|e| CommandError::Encode(e.to_string()))
    }

    fn encode_state(&self, state: &State) -> Result<Vec<u8>, DecodeError> {
        Ok(serde_json::to_vec(state)?)
    }

    fn decode_command(&self, payload: &[u8]) -> Result<Command, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
