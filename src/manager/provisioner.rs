// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns transport sessions into registered devices.

use std::fmt;
use std::sync::Arc;

use super::DeviceRegistry;
use crate::config::HubConfig;
use crate::device::{DeviceFault, FaultKind};
use crate::error::Result;
use crate::protocol::{SessionHook, Transport};
use crate::types::DeviceId;

/// Session hook that provisions a device for every established session.
///
/// The session id is the device id. The device kind comes from
/// [`HubConfig::profile_for`]. A device is only registered once it is fully
/// attached to the transport.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use relayhub::{DeviceProvisioner, DeviceRegistry, HubConfig};
/// use relayhub::protocol::LocalBroker;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> relayhub::Result<()> {
/// let broker = LocalBroker::new();
/// let registry = Arc::new(DeviceRegistry::new());
/// broker.add_hook(Arc::new(DeviceProvisioner::new(
///     Arc::new(broker.clone()),
///     Arc::clone(&registry),
///     HubConfig::default(),
/// )));
///
/// broker.connect("psu1")?;
/// assert!(registry.contains("psu1"));
///
/// broker.disconnect("psu1");
/// assert!(registry.is_empty());
/// # broker.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct DeviceProvisioner {
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    config: HubConfig,
}

impl DeviceProvisioner {
    /// Creates a provisioner building devices on `transport`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<DeviceRegistry>,
        config: HubConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
        }
    }

    /// Returns the registry devices are added to.
    #[must_use]
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    fn provision(&self, session_id: &str) -> Result<()> {
        let profile = self.config.profile_for(session_id);
        let device = profile.build(
            DeviceId::from(session_id),
            Arc::clone(&self.transport),
            &self.config.relay_options(),
        )?;
        // Closes the device if registration fails, so nothing stays attached.
        if let Err(e) = self.registry.add_device(Arc::clone(&device)) {
            device.close();
            return Err(e);
        }
        tracing::debug!(device = %session_id, codec = profile.codec_name(), "Device provisioned");
        Ok(())
    }
}

impl SessionHook for DeviceProvisioner {
    fn on_session_established(&self, session_id: &str) -> Result<()> {
        self.provision(session_id).inspect_err(|e| {
            tracing::error!(device = %session_id, error = %e, "Provisioning failed");
            self.registry.report_fault(DeviceFault::new(
                DeviceId::from(session_id),
                FaultKind::Provisioning,
                e.to_string(),
            ));
        })
    }

    fn on_disconnect(&self, session_id: &str) {
        self.registry.remove_device(session_id);
    }
}

impl fmt::Debug for DeviceProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProvisioner")
            .field("transport", &self.transport)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
