// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `relayhub` library.
//!
//! The hierarchy mirrors the layers of the crate: command validation,
//! payload decoding, transport I/O, configuration, and registry lookups.

use thiserror::Error;

use crate::types::DeviceId;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// No device with this id is registered (or it was removed meanwhile).
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// A command was rejected before reaching the transport.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// A payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The publish/subscribe transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A background task was requested outside of a Tokio runtime.
    #[error("no Tokio runtime available to run background tasks")]
    RuntimeUnavailable,
}

/// Errors raised while validating or encoding a command.
///
/// Validation always happens before any transport I/O, so none of these
/// errors has a side effect on the device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The device does not know a command with this name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command carries the wrong number of arguments.
    #[error("command {command} expects {expected} argument(s), got {actual}")]
    InvalidArgumentCount {
        /// The command name.
        command: String,
        /// Number of arguments the command accepts.
        expected: usize,
        /// Number of arguments that were provided.
        actual: usize,
    },

    /// An argument is not in the allow-list of its parameter.
    #[error("invalid value {value:?} for parameter {parameter} of command {command}")]
    InvalidArgumentValue {
        /// The command name.
        command: String,
        /// The parameter that rejected the value.
        parameter: String,
        /// The rejected value.
        value: String,
    },

    /// The command passed validation but could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(String),
}

/// Errors related to decoding (or re-encoding) wire payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// JSON parsing failed.
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A fixed-size binary payload had the wrong length.
    #[error("expected a {expected} byte payload, got {actual} byte(s)")]
    PayloadLength {
        /// Required payload length.
        expected: usize,
        /// Received payload length.
        actual: usize,
    },

    /// A field is present but its value cannot be represented.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The offending field.
        field: String,
        /// Description of the problem.
        message: String,
    },
}

/// Errors related to the publish/subscribe transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Publishing a message failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// The target topic.
        topic: String,
        /// Why the publish failed.
        reason: String,
    },

    /// Registering a topic listener failed.
    #[error("subscribe to {filter} failed: {reason}")]
    Subscribe {
        /// The requested topic filter.
        filter: String,
        /// Why the subscription failed.
        reason: String,
    },

    /// MQTT client communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connecting to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid broker URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A session-established hook refused the session.
    #[error("session {session} rejected: {reason}")]
    SessionRejected {
        /// The rejected session (client) id.
        session: String,
        /// Why the session was rejected.
        reason: String,
    },

    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
}

/// Errors related to loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document is not valid JSON for the schema.
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A value is outside its allowed domain.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
