//! Device metadata snapshot.
//!
//! [`DeviceMeta`] is a lightweight, cloneable description of an attached device suitable
//! for UI display, logging, and persistence. It is filled at attach time from the
//! minidriver's attributes and string descriptors and from the top-level collection of
//! the parsed descriptor. Strings the minidriver does not provide remain `None`.
//!
//! # Example
//! ```
//! use hidclass::backends::virtual_input::VirtualMinidriver;
//! use hidclass::{DeviceConfig, Manager};
//!
//! let mgr = Manager::new();
//! mgr.attach("pad", VirtualMinidriver::gamepad(), DeviceConfig::default()).unwrap();
//! for meta in mgr.devices() {
//!     println!("{meta}");
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of metadata describing a single device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMeta {
    /// Id the device was attached under.
    pub id: String,

    /// High-level bus classification (e.g., `"usb"`, `"virtual"`), if known.
    pub bus: Option<String>,

    pub vid: u16,
    pub pid: u16,
    /// Device release number (bcdDevice).
    pub version: u16,

    pub manufacturer_string: Option<String>,
    pub product_string: Option<String>,
    pub serial_number: Option<String>,

    /// Top-level collection usage page (e.g., `0x01` for Generic Desktop).
    pub usage_page: u16,
    /// Top-level collection usage (e.g., `0x04` Joystick, `0x05` Gamepad).
    pub usage: u16,

    /// Opaque platform path, diagnostic only.
    pub path: Option<String>,
}

impl DeviceMeta {
    /// Generic Desktop mouse or keyboard; these never go to the raw-input bus.
    pub fn is_mouse_or_keyboard(&self) -> bool {
        self.usage_page == 0x01 && matches!(self.usage, 0x02 | 0x06)
    }
}

impl fmt::Display for DeviceMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] {}",
            self.id,
            self.vid,
            self.pid,
            self.product_string.as_deref().unwrap_or("Unknown")
        )
    }
}
