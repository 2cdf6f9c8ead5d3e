// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of connected devices.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::runtime::Handle;

use crate::device::{DeviceFault, SharedDevice};
use crate::error::{Error, Result};
use crate::subscription::{DEFAULT_CAPACITY, Fanout, Subscription};
use crate::types::{Command, DeviceId, State};

/// Registry of the devices currently connected.
///
/// A device is "connected" exactly when it can be reached from the registry.
/// The registry owns the id → device map and three fanouts:
///
/// - **new devices**: every device passed to [`add_device`](Self::add_device)
/// - **state changes**: the device itself, each time its state is replaced
/// - **errors**: faults reported by any device, plus provisioning failures
///
/// Each registered device gets one relay task on the Tokio runtime that
/// forwards its notifications to the registry fanouts. The task ends by
/// itself once the device is closed.
///
/// # Examples
///
/// ```no_run
/// use relayhub::DeviceRegistry;
/// use relayhub::types::Command;
///
/// # async fn example(registry: DeviceRegistry) -> relayhub::Result<()> {
/// let mut changes = registry.subscribe_state_changes();
/// tokio::spawn(async move {
///     while let Some(device) = changes.recv().await {
///         println!("{}: {:?}", device.id(), device.state());
///     }
/// });
///
/// registry.send_command("psu1", &Command::new("power", ["on"]))?;
/// # Ok(())
/// # }
/// ```
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, SharedDevice>>,
    added: Fanout<SharedDevice>,
    state_changes: Arc<Fanout<SharedDevice>>,
    errors: Arc<Fanout<DeviceFault>>,
    relays: Arc<AtomicUsize>,
}

impl DeviceRegistry {
    /// Creates an empty registry with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty registry whose subscribers buffer up to `capacity`
    /// notifications.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            added: Fanout::with_capacity(capacity),
            state_changes: Arc::new(Fanout::with_capacity(capacity)),
            errors: Arc::new(Fanout::with_capacity(capacity)),
            relays: Arc::new(AtomicUsize::new(0)),
        }
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Registers a device and starts relaying its notifications.
    ///
    /// A different device already registered under the same id is replaced
    /// and closed. Adding the very same device twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeUnavailable`] when called outside a Tokio
    /// runtime; nothing is registered in that case.
    pub fn add_device(&self, device: SharedDevice) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;
        let id = device.id().clone();

        let replaced = {
            let mut devices = self.devices.write();
            if let Some(existing) = devices.get(&id)
                && Arc::ptr_eq(existing, &device)
            {
                return Ok(());
            }
            self.spawn_relay(&runtime, Arc::clone(&device));
            devices.insert(id.clone(), Arc::clone(&device))
        };

        if let Some(previous) = replaced {
            tracing::warn!(device = %id, "Replacing device registered under the same id");
            previous.close();
        }

        tracing::info!(device = %id, commands = device.list_commands().len(), "Device added");
        self.added.publish(device);
        Ok(())
    }

    /// Removes and closes a device.
    ///
    /// Returns `false` if no device was registered under `id`.
    pub fn remove_device(&self, id: &str) -> bool {
        let removed = self.devices.write().remove(id);
        match removed {
            Some(device) => {
                device.close();
                tracing::info!(device = %id, "Device removed");
                true
            }
            None => {
                tracing::debug!(device = %id, "Remove ignored, device not registered");
                false
            }
        }
    }

    /// Removes and closes every device. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<SharedDevice> = self.devices.write().drain().map(|(_, d)| d).collect();
        for device in &drained {
            device.close();
        }
        tracing::info!(count = drained.len(), "Registry cleared");
        drained.len()
    }

    /// Returns a snapshot of the registered devices, ordered by id.
    #[must_use]
    pub fn list_devices(&self) -> Vec<SharedDevice> {
        let mut devices: Vec<SharedDevice> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    /// Returns the device registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SharedDevice> {
        self.devices.read().get(id).cloned()
    }

    /// Returns `true` if a device is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns `true` if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Returns the number of relay tasks still running.
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.relays.load(Ordering::Acquire)
    }

    // =========================================================================
    // Device operations
    // =========================================================================

    /// Returns the current state of a device.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<Arc<State>> {
        self.get(id).map(|device| device.state())
    }

    /// Forwards a command to a device.
    ///
    /// The registry lock is released before the device is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id, otherwise the
    /// device's own result.
    pub fn send_command(&self, id: &str, command: &Command) -> Result<()> {
        let device = self
            .get(id)
            .ok_or_else(|| Error::DeviceNotFound(DeviceId::from(id)))?;
        device.send_command(command)
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to newly added devices.
    #[must_use]
    pub fn subscribe_new_devices(&self) -> Subscription<SharedDevice> {
        self.added.subscribe()
    }

    /// Subscribes to state changes of every device.
    ///
    /// Each notification carries the device whose state was replaced. Read
    /// [`Device::state`](crate::device::Device::state) for the value: it may
    /// already be newer than the change that triggered the notification.
    #[must_use]
    pub fn subscribe_state_changes(&self) -> Subscription<SharedDevice> {
        self.state_changes.subscribe()
    }

    /// Subscribes to faults of every device.
    #[must_use]
    pub fn subscribe_errors(&self) -> Subscription<DeviceFault> {
        self.errors.subscribe()
    }

    /// Publishes a fault on the registry error stream.
    pub fn report_fault(&self, fault: DeviceFault) -> usize {
        self.errors.publish(fault)
    }

    fn spawn_relay(&self, runtime: &Handle, device: SharedDevice) {
        let mut states = device.subscribe_state_changes();
        let mut faults = device.subscribe_errors();
        let state_out = Arc::clone(&self.state_changes);
        let error_out = Arc::clone(&self.errors);
        let relays = Arc::clone(&self.relays);

        relays.fetch_add(1, Ordering::AcqRel);
        runtime.spawn(async move {
            tracing::debug!(device = %device.id(), "Relay started");
            let mut faults_open = true;
            loop {
                tokio::select! {
                    state = states.recv() => {
                        if state.is_none() {
                            break;
                        }
                        state_out.publish(Arc::clone(&device));
                    }
                    fault = faults.recv(), if faults_open => match fault {
                        Some(fault) => {
                            error_out.publish(fault);
                        }
                        None => faults_open = false,
                    },
                }
            }
            relays.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!(
                device = %device.id(),
                skipped = states.skipped(),
                "Relay stopped"
            );
        });
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.len())
            .field("relays", &self.relay_count())
            .finish_non_exhaustive()
    }
}
