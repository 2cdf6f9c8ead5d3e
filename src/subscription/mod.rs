// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription system for device and registry events.
//!
//! Every stream of events in this crate (a device's state replacements, its
//! faults, the registry's "device added" and "device changed" notices) is a
//! [`Fanout`]. Consumers call `subscribe_*` and get a [`Subscription`] they
//! drain at their own pace.
//!
//! # Usage
//!
//! ```no_run
//! use relayhub::DeviceRegistry;
//!
//! # async fn example(registry: &DeviceRegistry) {
//! let mut changes = registry.subscribe_state_changes();
//! while let Some(device) = changes.recv().await {
//!     println!("{} now reports {:?}", device.id(), device.state());
//! }
//! # }
//! ```
//!
//! # Slow consumers
//!
//! Buffers are bounded. A consumer that falls behind misses the oldest
//! notifications rather than slowing down producers; since notifications
//! carry the device (or a full snapshot), reading the current state after a
//! gap is always consistent.

mod fanout;

pub use fanout::{DEFAULT_CAPACITY, Fanout, Subscription, SubscriptionId};
