//! Device manager.
//!
//! [`Manager`] owns attached devices by id and the raw-input bus their reader threads
//! broadcast on.
//!
//! ### Example
//! ```
//! use hidclass::backends::virtual_input::VirtualMinidriver;
//! use hidclass::{DeviceConfig, EventFilter, Logger, Manager};
//!
//! let mgr = Manager::new();
//! mgr.bus().lock().add_listener(Logger::new(), EventFilter::All, None);
//!
//! let pad = VirtualMinidriver::gamepad();
//! let device = mgr.attach("pad", pad.clone(), DeviceConfig::default()).unwrap();
//! let file = device.open().unwrap();
//! pad.feed(&[0x01, 0x01, 0x00, 0x00, 0x08]);
//! let report = file.read_timeout(5, std::time::Duration::from_secs(1)).unwrap();
//! assert_eq!(report[1], 0x01);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::DeviceConfig;
use crate::device::HidDevice;
use crate::error::AttachError;
use crate::eventbus::{RawInputBus, SharedBus};
use crate::metadata::DeviceMeta;
use crate::minidriver::Minidriver;

pub struct Manager {
    devices: Mutex<BTreeMap<String, Arc<HidDevice>>>,
    bus: SharedBus,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            bus: RawInputBus::shared(),
        }
    }

    /// Attaches every device `hidapi` can open, with `config`.
    ///
    /// Devices that fail to attach (e.g. with a malformed descriptor) are logged and skipped.
    #[cfg(feature = "hid")]
    #[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
    pub fn discover(config: DeviceConfig) -> Result<Self, hidapi::HidError> {
        let api = hidapi::HidApi::new()?;
        let mgr = Self::new();
        for (id, md) in crate::backends::hid::probe_devices(&api) {
            if let Err(e) = mgr.attach(id.clone(), Arc::new(md), config.clone()) {
                tracing::warn!(device = %id, error = %e, "attach failed");
            }
        }
        info!(devices = mgr.devices.lock().len(), "discovery finished");
        Ok(mgr)
    }

    /// Shared raw-input bus.
    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn attach(
        &self,
        id: impl Into<String>,
        minidriver: Arc<dyn Minidriver>,
        config: DeviceConfig,
    ) -> Result<Arc<HidDevice>, AttachError> {
        let id = id.into();
        let mut devices = self.devices.lock();
        if devices.contains_key(&id) {
            return Err(AttachError::DuplicateId(id));
        }
        let device = Arc::new(HidDevice::attach_with_bus(
            id.clone(),
            minidriver,
            config,
            Some(Arc::clone(&self.bus)),
        )?);
        devices.insert(id, Arc::clone(&device));
        Ok(device)
    }

    pub fn device(&self, id: &str) -> Option<Arc<HidDevice>> {
        self.devices.lock().get(id).cloned()
    }

    /// Surprise-removes a device. Returns `false` for unknown ids.
    pub fn remove(&self, id: &str) -> bool {
        let Some(device) = self.devices.lock().remove(id) else {
            return false;
        };
        device.remove();
        true
    }

    pub fn remove_all(&self) {
        let devices = std::mem::take(&mut *self.devices.lock());
        for device in devices.values() {
            device.remove();
        }
        info!(count = devices.len(), "all devices removed");
    }

    /// Metadata of every attached device, ordered by id.
    pub fn devices(&self) -> Vec<DeviceMeta> {
        self.devices
            .lock()
            .values()
            .map(|d| d.meta().clone())
            .collect()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.remove_all();
    }
}
