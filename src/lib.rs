// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `relayhub` - Registry and state fan-out for publish/subscribe devices.
//!
//! Devices attached to an MQTT-style broker come and go. This library keeps
//! track of the ones currently connected, exposes every one of them through
//! the same [`Device`](device::Device) contract, and broadcasts their state
//! changes to any number of independent consumers.
//!
//! # Features
//!
//! - **Registry**: add, list, look up and remove devices by id
//! - **Uniform devices**: command table, command dispatch with validation,
//!   current state, state and fault notifications
//! - **Pluggable codecs**: generic JSON devices and a 2-byte power relay
//! - **Bounded fan-out**: slow consumers drop old notifications instead of
//!   stalling anyone else
//! - **Transports**: an in-process [`LocalBroker`](protocol::LocalBroker) and
//!   an MQTT client ([`MqttTransport`](protocol::MqttTransport), feature
//!   `mqtt`)
//!
//! # Quick Start
//!
//! ## In-process broker
//!
//! ```
//! use std::sync::Arc;
//! use relayhub::{DeviceProvisioner, DeviceRegistry, HubConfig};
//! use relayhub::protocol::LocalBroker;
//! use relayhub::types::Command;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> relayhub::Result<()> {
//!     let broker = LocalBroker::new();
//!     let registry = Arc::new(DeviceRegistry::new());
//!     broker.add_hook(Arc::new(DeviceProvisioner::new(
//!         Arc::new(broker.clone()),
//!         Arc::clone(&registry),
//!         HubConfig::default(),
//!     )));
//!
//!     // A relay connects and reports 120 V, 2 A
//!     broker.connect("dev1")?;
//!     broker.publish_from("dev1", "devices/dev1/state", &[120, 2], false)?;
//!
//!     let state = registry.state("dev1").unwrap();
//!     assert_eq!(state.get("voltage"), Some("120"));
//!
//!     // Switch it on: publishes 0x01 to devices/dev1/command
//!     registry.send_command("dev1", &Command::new("power", ["on"]))?;
//!     assert_eq!(broker.retained("devices/dev1/command"), Some(vec![0x01]));
//!
//!     broker.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## External MQTT broker
//!
//! ```no_run
//! use std::sync::Arc;
//! use relayhub::{DeviceProvisioner, DeviceRegistry, HubConfig};
//! use relayhub::protocol::MqttTransport;
//!
//! #[tokio::main]
//! async fn main() -> relayhub::Result<()> {
//!     let config = HubConfig::default();
//!     let transport = MqttTransport::builder()
//!         .url("mqtt://192.168.1.50:1883")
//!         .build()
//!         .await?;
//!
//!     let registry = Arc::new(DeviceRegistry::with_capacity(config.broadcast_capacity));
//!     transport.add_hook(Arc::new(DeviceProvisioner::new(
//!         Arc::new(transport.clone()),
//!         Arc::clone(&registry),
//!         config,
//!     )));
//!
//!     // Devices announce themselves with "online" on devices/{id}/status
//!     let mut changes = registry.subscribe_state_changes();
//!     while let Some(device) = changes.recv().await {
//!         println!("{} -> {:?}", device.id(), device.state());
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod service;
pub mod subscription;
pub mod types;

pub use config::{HubConfig, RelayOptions};
pub use device::{Device, DeviceFault, DeviceProfile, FaultKind, RelayDevice, SharedDevice};
pub use error::{CommandError, ConfigError, DecodeError, Error, Result, TransportError};
pub use manager::{DeviceProvisioner, DeviceRegistry};
pub use subscription::{Subscription, SubscriptionId};
pub use types::{Command, CommandDescriptor, DeviceId, Parameter, PowerState, State};
