//! Minidriver transfer interface.
//!
//! The coordinator never talks to hardware directly. Every request goes through
//! [`Minidriver::call`], a generic `(code, input, output) → status` primitive.
//!
//! ## Transfer packets
//! Report transfers use a fixed layout:
//! - Set requests (`SetFeature`, `SetOutputReport`, `WriteReport`):
//!   `input = [report_id, payload...]`, where `payload` is the report as it goes on the
//!   wire (no ID byte when `report_id == 0`).
//! - Get requests (`GetFeature`, `GetInputReport`): `input = [report_id]`; the minidriver
//!   writes the wire report into `output` (starting with the ID byte iff `report_id != 0`).
//! - `ReadReport`: no input; the next interrupt report in wire format.
//!
//! Return value is the number of bytes transferred.

use crate::error::NtStatus;

/// String descriptors a minidriver can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringId {
    Manufacturer,
    Product,
    SerialNumber,
    Indexed(u16),
}

/// Request codes understood by [`Minidriver::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinidriverIoctl {
    /// 6-byte record: vendor id, product id, version (all `u16` LE).
    GetDeviceAttributes,
    GetReportDescriptor,
    /// Blocks until the next interrupt-in report.
    ReadReport,
    GetInputReport,
    GetFeature,
    SetFeature,
    SetOutputReport,
    WriteReport,
    /// UTF-16LE string, without terminator.
    GetString(StringId),
}

/// Hardware-specific layer below the class driver.
pub trait Minidriver: Send + Sync {
    /// Performs one request. See the module docs for the packet layouts.
    fn call(&self, code: MinidriverIoctl, input: &[u8], output: &mut [u8]) -> Result<usize, NtStatus>;

    /// Wake up a `ReadReport` blocked in [`call`](Self::call); the device is going away.
    fn cancel_io(&self) {}

    /// Bus the device sits on (`"usb"`, `"virtual"`, ...), if known.
    fn bus(&self) -> Option<String> {
        None
    }

    /// Platform path of the device, if it has one.
    fn path(&self) -> Option<String> {
        None
    }
}

/// Vendor/product/version as reported by the minidriver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
}

impl DeviceAttributes {
    pub const SIZE: usize = 6;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.vendor_id.to_le_bytes());
        out[2..4].copy_from_slice(&self.product_id.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Some(Self {
            vendor_id: word(0),
            product_id: word(2),
            version: word(4),
        })
    }
}

const DESCRIPTOR_INITIAL_SIZE: usize = 256;
const DESCRIPTOR_MAX_SIZE: usize = 64 * 1024;
const STRING_MAX_CHARS: usize = 127;

pub fn get_device_attributes(minidriver: &dyn Minidriver) -> Result<DeviceAttributes, NtStatus> {
    let mut out = [0u8; DeviceAttributes::SIZE];
    let n = minidriver.call(MinidriverIoctl::GetDeviceAttributes, &[], &mut out)?;
    DeviceAttributes::from_bytes(&out[..n]).ok_or(NtStatus::Unsuccessful)
}

/// Fetches the raw report descriptor, growing the buffer while the minidriver answers
/// `BufferTooSmall`.
pub fn get_report_descriptor(minidriver: &dyn Minidriver) -> Result<Vec<u8>, NtStatus> {
    let mut size = DESCRIPTOR_INITIAL_SIZE;
    loop {
        let mut buf = vec![0u8; size];
        match minidriver.call(MinidriverIoctl::GetReportDescriptor, &[], &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(NtStatus::BufferTooSmall) if size < DESCRIPTOR_MAX_SIZE => size *= 2,
            Err(e) => return Err(e),
        }
    }
}

/// Fetches and decodes a string descriptor.
pub fn get_string(minidriver: &dyn Minidriver, id: StringId) -> Result<String, NtStatus> {
    let mut buf = [0u8; STRING_MAX_CHARS * 2];
    let n = minidriver.call(MinidriverIoctl::GetString(id), &[], &mut buf)?;
    let units: Vec<u16> = buf[..n & !1]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Encodes a string the way [`get_string`] expects it.
pub fn encode_string(s: &str, output: &mut [u8]) -> Result<usize, NtStatus> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = units.len() * 2;
    if output.len() < len {
        return Err(NtStatus::BufferTooSmall);
    }
    for (chunk, unit) in output.chunks_exact_mut(2).zip(&units) {
        chunk.copy_from_slice(&unit.to_le_bytes());
    }
    Ok(len)
}
