//! Byte-level request dispatch for OS-style callers.
//!
//! [`HidFile::ioctl`] maps an [`IoctlCode`] plus raw input/output buffers onto the typed
//! handle operations. Integer payloads are `u32` little endian; strings are UTF-16LE.

use crate::device::HidFile;
use crate::error::NtStatus;
use crate::minidriver::{encode_string, StringId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCode {
    GetPollFrequencyMsec,
    SetPollFrequencyMsec,
    GetNumDeviceInputBuffers,
    SetNumDeviceInputBuffers,
    GetCollectionInformation,
    GetCollectionDescriptor,
    FlushQueue,
    /// Output buffer byte 0 selects the report ID.
    GetFeature,
    SetFeature,
    /// Output buffer byte 0 selects the report ID.
    GetInputReport,
    SetOutputReport,
    GetManufacturerString,
    GetProductString,
    GetSerialNumberString,
    /// Input holds the string index.
    GetIndexedString,
}

/// Fixed-layout answer to `GetCollectionInformation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInformation {
    /// Size of the collection descriptor blob.
    pub descriptor_size: u32,
    pub polled: bool,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
}

impl CollectionInformation {
    pub const SIZE: usize = 12;

    /// `u32 size, u8 polled, u8 pad, u16 vid, u16 pid, u16 version`, little endian.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.descriptor_size.to_le_bytes());
        out[4] = self.polled as u8;
        out[6..8].copy_from_slice(&self.vendor_id.to_le_bytes());
        out[8..10].copy_from_slice(&self.product_id.to_le_bytes());
        out[10..12].copy_from_slice(&self.version.to_le_bytes());
        out
    }
}

fn read_u32(input: &[u8]) -> Result<u32, NtStatus> {
    let bytes: [u8; 4] = input
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(NtStatus::BufferTooSmall)?;
    Ok(u32::from_le_bytes(bytes))
}

fn write_u32(output: &mut [u8], value: u32) -> Result<usize, NtStatus> {
    let out = output.get_mut(..4).ok_or(NtStatus::BufferTooSmall)?;
    out.copy_from_slice(&value.to_le_bytes());
    Ok(4)
}

impl HidFile {
    /// Dispatches one request. Returns the number of bytes written to `output`
    /// (or transferred, for set requests).
    pub fn ioctl(&self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> Result<usize, NtStatus> {
        match code {
            IoctlCode::GetPollFrequencyMsec => write_u32(output, self.poll_interval()?),
            IoctlCode::SetPollFrequencyMsec => {
                self.set_poll_interval(read_u32(input)?)?;
                Ok(0)
            }
            IoctlCode::GetNumDeviceInputBuffers => write_u32(output, self.input_buffers()? as u32),
            IoctlCode::SetNumDeviceInputBuffers => {
                self.set_input_buffers(read_u32(input)? as usize)?;
                Ok(0)
            }
            IoctlCode::GetCollectionInformation => {
                let info = self.collection_information()?.to_bytes();
                let out = output
                    .get_mut(..CollectionInformation::SIZE)
                    .ok_or(NtStatus::BufferTooSmall)?;
                out.copy_from_slice(&info);
                Ok(CollectionInformation::SIZE)
            }
            IoctlCode::GetCollectionDescriptor => self.collection_descriptor(output),
            IoctlCode::FlushQueue => {
                self.flush_queue()?;
                Ok(0)
            }
            IoctlCode::GetFeature => self.get_feature(output),
            IoctlCode::SetFeature => self.set_feature(input),
            IoctlCode::GetInputReport => self.get_input_report(output),
            IoctlCode::SetOutputReport => self.set_output_report(input),
            IoctlCode::GetManufacturerString => {
                encode_string(&self.get_string(StringId::Manufacturer)?, output)
            }
            IoctlCode::GetProductString => encode_string(&self.get_string(StringId::Product)?, output),
            IoctlCode::GetSerialNumberString => {
                encode_string(&self.get_string(StringId::SerialNumber)?, output)
            }
            IoctlCode::GetIndexedString => {
                let index = u16::try_from(read_u32(input)?).map_err(|_| NtStatus::InvalidParameter)?;
                encode_string(&self.get_string(StringId::Indexed(index))?, output)
            }
        }
    }
}
