//! `hidapi`-backed minidriver.
//!
//! [`HidapiMinidriver`] forwards transfer packets to a `hidapi::HidDevice`. `ReadReport`
//! polls `read_timeout` in short slices so that `cancel_io` and concurrent set requests
//! are never starved by a blocked read.

use std::sync::atomic::{AtomicBool, Ordering};

use hidapi::{DeviceInfo, HidApi, HidError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::NtStatus;
use crate::minidriver::{encode_string, DeviceAttributes, Minidriver, MinidriverIoctl, StringId};

/// Slice of a blocking read between cancellation checks.
const READ_SLICE_MS: i32 = 100;
/// hidapi's descriptor buffer size (`HID_API_MAX_REPORT_DESCRIPTOR_SIZE`).
const MAX_DESCRIPTOR_SIZE: usize = 4096;

pub struct HidapiMinidriver {
    device: Mutex<hidapi::HidDevice>,
    attributes: DeviceAttributes,
    path: String,
    cancelled: AtomicBool,
}

fn map_err(e: HidError) -> NtStatus {
    debug!(error = %e, "hidapi request failed");
    NtStatus::Unsuccessful
}

impl HidapiMinidriver {
    /// Opens the device behind a `hidapi` enumeration entry.
    pub fn open(info: &DeviceInfo, api: &HidApi) -> Result<Self, NtStatus> {
        let device = info.open_device(api).map_err(map_err)?;
        Ok(Self {
            device: Mutex::new(device),
            attributes: DeviceAttributes {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                version: info.release_number(),
            },
            path: info.path().to_string_lossy().into_owned(),
            cancelled: AtomicBool::new(false),
        })
    }

    fn read_report(&self, output: &mut [u8]) -> Result<usize, NtStatus> {
        while !self.cancelled.load(Ordering::Acquire) {
            let n = self
                .device
                .lock()
                .read_timeout(output, READ_SLICE_MS)
                .map_err(map_err)?;
            if n > 0 {
                return Ok(n);
            }
        }
        Err(NtStatus::DeviceNotConnected)
    }

    /// `hidapi` wants `[report_id, data...]` for every transfer, including report ID 0.
    fn get_report(
        &self,
        code: MinidriverIoctl,
        report_id: u8,
        output: &mut [u8],
    ) -> Result<usize, NtStatus> {
        let mut buf = vec![0u8; output.len() + 1];
        buf[0] = report_id;
        let device = self.device.lock();
        let n = match code {
            MinidriverIoctl::GetFeature => device.get_feature_report(&mut buf),
            _ => device.get_input_report(&mut buf),
        }
        .map_err(map_err)?;

        let report = if report_id == 0 {
            &buf[1..n.max(1)]
        } else {
            &buf[..n]
        };
        let n = report.len().min(output.len());
        output[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }

    fn set_report(&self, code: MinidriverIoctl, input: &[u8]) -> Result<usize, NtStatus> {
        let (&report_id, wire) = input.split_first().ok_or(NtStatus::InvalidParameter)?;
        let mut buf = Vec::with_capacity(wire.len() + 1);
        if report_id == 0 {
            buf.push(0);
        }
        buf.extend_from_slice(wire);

        let device = self.device.lock();
        match code {
            MinidriverIoctl::SetFeature => {
                device.send_feature_report(&buf).map_err(map_err)?;
                Ok(wire.len())
            }
            _ => {
                let n = device.write(&buf).map_err(map_err)?;
                Ok(if report_id == 0 { n.saturating_sub(1) } else { n })
            }
        }
    }

    fn get_string(&self, id: StringId) -> Result<Option<String>, NtStatus> {
        let device = self.device.lock();
        match id {
            StringId::Manufacturer => device.get_manufacturer_string(),
            StringId::Product => device.get_product_string(),
            StringId::SerialNumber => device.get_serial_number_string(),
            StringId::Indexed(i) => device.get_indexed_string(i as i32),
        }
        .map_err(map_err)
    }
}

impl Minidriver for HidapiMinidriver {
    fn call(&self, code: MinidriverIoctl, input: &[u8], output: &mut [u8]) -> Result<usize, NtStatus> {
        match code {
            MinidriverIoctl::GetDeviceAttributes => {
                let bytes = self.attributes.to_bytes();
                let out = output
                    .get_mut(..bytes.len())
                    .ok_or(NtStatus::BufferTooSmall)?;
                out.copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            MinidriverIoctl::GetReportDescriptor => {
                let mut buf = [0u8; MAX_DESCRIPTOR_SIZE];
                let n = self
                    .device
                    .lock()
                    .get_report_descriptor(&mut buf)
                    .map_err(map_err)?;
                let out = output.get_mut(..n).ok_or(NtStatus::BufferTooSmall)?;
                out.copy_from_slice(&buf[..n]);
                Ok(n)
            }
            MinidriverIoctl::ReadReport => self.read_report(output),
            MinidriverIoctl::GetInputReport | MinidriverIoctl::GetFeature => {
                let report_id = *input.first().ok_or(NtStatus::InvalidParameter)?;
                self.get_report(code, report_id, output)
            }
            MinidriverIoctl::SetFeature
            | MinidriverIoctl::SetOutputReport
            | MinidriverIoctl::WriteReport => self.set_report(code, input),
            MinidriverIoctl::GetString(id) => match self.get_string(id)? {
                Some(s) => encode_string(&s, output),
                None => Err(NtStatus::NotSupported),
            },
        }
    }

    fn cancel_io(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn bus(&self) -> Option<String> {
        Some("usb".into())
    }

    fn path(&self) -> Option<String> {
        Some(self.path.clone())
    }
}

/// Opens every device `hidapi` enumerates. Ids are `vid:pid:path`.
pub fn probe_devices(api: &HidApi) -> Vec<(String, HidapiMinidriver)> {
    let mut found = Vec::new();
    for info in api.device_list() {
        let id = format!(
            "{:04x}:{:04x}:{}",
            info.vendor_id(),
            info.product_id(),
            info.path().to_string_lossy()
        );
        match HidapiMinidriver::open(info, api) {
            Ok(md) => found.push((id, md)),
            Err(e) => warn!(device = %id, error = %e, "failed to open HID device"),
        }
    }
    found
}
