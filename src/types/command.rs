// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Commands and the command tables devices advertise.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// A command addressed to a device.
///
/// Commands are immutable values: a name plus an ordered list of string
/// arguments. On the generic JSON wire they look like
/// `{"name": "power", "args": ["on"]}`.
///
/// # Examples
///
/// ```
/// use relayhub::types::Command;
///
/// let cmd = Command::new("power", ["on"]);
/// assert_eq!(cmd.name(), "power");
/// assert_eq!(cmd.arguments(), ["on"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    name: String,
    #[serde(rename = "args", default)]
    arguments: Vec<String>,
}

impl Command {
    /// Creates a command from a name and its arguments.
    pub fn new<I, S>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the arguments in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.arguments {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One positional parameter of a command.
///
/// A parameter with an empty allow-list accepts any value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    allowed: Vec<String>,
}

impl Parameter {
    /// A parameter that accepts any value.
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allowed: Vec::new(),
        }
    }

    /// A parameter restricted to the given values.
    pub fn one_of<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            allowed: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the allow-list (empty when any value is accepted).
    #[must_use]
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Returns `true` if `value` is acceptable for this parameter.
    #[must_use]
    pub fn accepts(&self, value: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|v| v == value)
    }
}

/// Describes one command a device accepts.
///
/// # Examples
///
/// ```
/// use relayhub::types::{Command, CommandDescriptor, Parameter};
///
/// let power = CommandDescriptor::new("power")
///     .with_parameter(Parameter::one_of("state", ["on", "off"]));
///
/// assert!(power.validate(&Command::new("power", ["on"])).is_ok());
/// assert!(power.validate(&Command::new("power", ["dim"])).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    name: String,
    #[serde(default)]
    parameters: Vec<Parameter>,
}

impl CommandDescriptor {
    /// Creates a descriptor for a command without parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Appends a positional parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Returns the command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the positional parameters.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Checks arity and argument values of `command` against this descriptor.
    ///
    /// The command name is not compared; see [`validate_command`] for table
    /// lookup.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidArgumentCount`] or
    /// [`CommandError::InvalidArgumentValue`].
    pub fn validate(&self, command: &Command) -> Result<(), CommandError> {
        let actual = command.arguments().len();
        if actual != self.parameters.len() {
            return Err(CommandError::InvalidArgumentCount {
                command: self.name.clone(),
                expected: self.parameters.len(),
                actual,
            });
        }

        for (parameter, value) in self.parameters.iter().zip(command.arguments()) {
            if !parameter.accepts(value) {
                return Err(CommandError::InvalidArgumentValue {
                    command: self.name.clone(),
                    parameter: parameter.name.clone(),
                    value: value.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Looks `command` up in `table` and validates it.
///
/// Returns the matching descriptor on success.
///
/// # Errors
///
/// Returns [`CommandError::UnknownCommand`] when no descriptor has the
/// command's name, otherwise whatever [`CommandDescriptor::validate`] reports.
pub fn validate_command<'a>(
    table: &'a [CommandDescriptor],
    command: &Command,
) -> Result<&'a CommandDescriptor, CommandError> {
    let descriptor = table
        .iter()
        .find(|d| d.name == command.name())
        .ok_or_else(|| CommandError::UnknownCommand(command.name().to_string()))?;
    descriptor.validate(command)?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<CommandDescriptor> {
        vec![
            CommandDescriptor::new("power")
                .with_parameter(Parameter::one_of("state", ["on", "off"])),
            CommandDescriptor::new("label").with_parameter(Parameter::any("text")),
            CommandDescriptor::new("reset"),
        ]
    }

    #[test]
    fn json_uses_args_key() {
        let cmd = Command::new("power", ["on"]);
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"name":"power","args":["on"]}"#);
    }

    #[test]
    fn missing_args_defaults_to_empty() {
        let cmd: Command = serde_json::from_str(r#"{"name":"reset"}"#).unwrap();
        assert_eq!(cmd, Command::new("reset", Vec::<String>::new()));
    }

    #[test]
    fn display_joins_arguments() {
        assert_eq!(Command::new("power", ["on"]).to_string(), "power on");
        assert_eq!(Command::new("reset", [""; 0]).to_string(), "reset");
    }

    #[test]
    fn unknown_command_rejected() {
        let err = validate_command(&table(), &Command::new("reboot", [""; 0])).unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("reboot".to_string()));
    }

    #[test]
    fn wrong_arity_rejected() {
        let err = validate_command(&table(), &Command::new("power", ["on", "extra"])).unwrap_err();
        assert_eq!(
            err,
            CommandError::InvalidArgumentCount {
                command: "power".to_string(),
                expected: 1,
                actual: 2,
            }
        );
    }

    #[test]
    fn value_outside_allow_list_rejected() {
        let err = validate_command(&table(), &Command::new("power", ["dim"])).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidArgumentValue { ref parameter, ref value, .. }
                if parameter == "state" && value == "dim"
        ));
    }

    #[test]
    fn free_parameter_accepts_anything() {
        let table = table();
        let found = validate_command(&table, &Command::new("label", ["kitchen"])).unwrap();
        assert_eq!(found.name(), "label");
    }

    #[test]
    fn descriptor_deserializes_without_allow_list() {
        let d: CommandDescriptor =
            serde_json::from_str(r#"{"name":"label","parameters":[{"name":"text"}]}"#).unwrap();
        assert!(d.parameters()[0].accepts("anything"));
    }
}
