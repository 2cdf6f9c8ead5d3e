// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry and session-driven provisioning.
//!
//! # Overview
//!
//! The [`DeviceRegistry`] is the hub's single source of truth for which
//! devices are connected. It provides:
//!
//! - **Membership**: add, list, look up and remove devices by id
//! - **Command dispatch**: route a [`Command`](crate::types::Command) to the
//!   device that owns an id
//! - **Fan-out**: subscribe to new devices, to state changes of any device,
//!   and to faults
//!
//! The [`DeviceProvisioner`] plugs the registry into a transport: it is a
//! [`SessionHook`](crate::protocol::SessionHook), so a session that comes up
//! becomes a registered device and a session that goes away removes it.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use relayhub::{DeviceProvisioner, DeviceRegistry, HubConfig};
//! use relayhub::protocol::MqttTransport;
//!
//! #[tokio::main]
//! async fn main() -> relayhub::Result<()> {
//!     let config = HubConfig::from_json_file("relayhub.json")?;
//!     let transport = MqttTransport::builder()
//!         .url("mqtt://192.168.1.50:1883")
//!         .topics(config.topics.clone())
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
//!     let mut added = registry.subscribe_new_devices();
//!     while let Some(device) = added.recv().await {
//!         println!("{} connected", device.id());
//!     }
//!     Ok(())
//! }
//! ```

mod provisioner;
mod registry;

pub use provisioner::DeviceProvisioner;
pub use registry::DeviceRegistry;
