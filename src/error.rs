//! Error types.
//!
//! Each layer has its own error enum:
//! - [`ParseError`] for report descriptor parsing (non-recoverable for that descriptor)
//! - [`BufferError`] for the report ring buffer (bad capacity vs. allocation failure)
//! - [`HidpError`] for report queries against a capability table
//! - [`ConfigError`] for device configuration loading
//! - [`AttachError`] for bringing a device up
//!
//! Everything the device coordinator hands back to a caller is an [`NtStatus`], the
//! NT-status style taxonomy used at the I/O boundary. Lower-level errors convert into it.

use thiserror::Error;

/// Failure while parsing a HID report descriptor.
///
/// `offset` is the byte offset of the offending item prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("item at offset {offset} declares {needed} data bytes but only {available} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unsupported item 0x{prefix:02x} at offset {offset}")]
    UnsupportedItem { offset: usize, prefix: u8 },

    #[error("delimiter item at offset {offset} is not supported")]
    Delimiter { offset: usize },

    #[error("global push at offset {offset} exceeds the stack depth of {depth}")]
    GlobalStackOverflow { offset: usize, depth: usize },

    #[error("global pop at offset {offset} with an empty stack")]
    GlobalStackUnderflow { offset: usize },

    #[error("collection at offset {offset} exceeds the nesting depth of {depth}")]
    CollectionStackOverflow { offset: usize, depth: usize },

    #[error("end collection at offset {offset} without an open collection")]
    CollectionStackUnderflow { offset: usize },

    #[error("usage at offset {offset} overflows the local usage list")]
    UsageOverflow { offset: usize },

    #[error("report id {value} at offset {offset} does not fit in a byte")]
    InvalidReportId { offset: usize, value: u32 },

    #[error("main item at offset {offset} makes the report longer than {max} bytes")]
    ReportTooLong { offset: usize, max: usize },

    #[error("report size {value} at offset {offset} is wider than {max} bits")]
    InvalidReportSize { offset: usize, value: u32, max: u32 },

    #[error("report count {value} at offset {offset} does not fit in 16 bits")]
    InvalidReportCount { offset: usize, value: u32 },

    #[error("main item at offset {offset} takes the capability count past {max}")]
    TooManyCaps { offset: usize, max: usize },

    #[error("collection at offset {offset} takes the collection count past {max}")]
    TooManyCollections { offset: usize, max: usize },
}

/// Failure from the report ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("capacity {0} is outside the supported range")]
    InvalidCapacity(usize),

    #[error("out of memory")]
    NoMemory,

    #[error("cursor {0} is not in use")]
    InvalidCursor(usize),
}

/// Failure from a report query (`report` module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HidpError {
    #[error("report length {actual} does not match the expected {expected}")]
    InvalidReportLength { expected: usize, actual: usize },

    #[error("report id {0} has no matching usage")]
    IncompatibleReportId(u8),

    #[error("usage not found")]
    UsageNotFound,

    #[error("value out of range")]
    ValueOutOfRange,

    #[error("output buffer too small")]
    BufferTooSmall,

    #[error("usage is a button, not a value")]
    NotValueUsage,

    #[error("physical range is not defined for this usage")]
    BadLogPhyValues,
}

/// Failure while loading a [`DeviceConfig`](crate::config::DeviceConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{field} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Failure while attaching a device.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("minidriver request failed: {0}")]
    Minidriver(#[from] NtStatus),

    #[error("invalid report descriptor: {0}")]
    Descriptor(#[from] ParseError),

    #[error("report buffer: {0}")]
    Buffer(#[from] BufferError),

    #[error("invalid device config: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to serialize the capability table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to start the reader thread: {0}")]
    Thread(#[source] std::io::Error),

    #[error("device id {0:?} is already attached")]
    DuplicateId(String),
}

/// NT-status style completion code returned by the device coordinator and minidrivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum NtStatus {
    #[error("unsuccessful")]
    Unsuccessful,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid device request")]
    InvalidDeviceRequest,
    #[error("no memory")]
    NoMemory,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("delete pending")]
    DeletePending,
    #[error("device not connected")]
    DeviceNotConnected,
    #[error("not supported")]
    NotSupported,
    #[error("invalid user buffer")]
    InvalidUserBuffer,
    #[error("cancelled")]
    Cancelled,
    #[error("timeout")]
    Timeout,
    #[error("status 0x{0:08x}")]
    Other(u32),
}

impl NtStatus {
    /// Numeric NT status code.
    pub fn code(self) -> u32 {
        match self {
            NtStatus::Unsuccessful => 0xC000_0001,
            NtStatus::NotImplemented => 0xC000_0002,
            NtStatus::InvalidParameter => 0xC000_000D,
            NtStatus::InvalidDeviceRequest => 0xC000_0010,
            NtStatus::NoMemory => 0xC000_0017,
            NtStatus::BufferTooSmall => 0xC000_0023,
            NtStatus::DeletePending => 0xC000_0056,
            NtStatus::DeviceNotConnected => 0xC000_009D,
            NtStatus::NotSupported => 0xC000_00BB,
            NtStatus::InvalidUserBuffer => 0xC000_00E8,
            NtStatus::Cancelled => 0xC000_0120,
            NtStatus::Timeout => 0x0000_0102,
            NtStatus::Other(code) => code,
        }
    }

    /// Inverse of [`code`](Self::code); unknown codes map to [`NtStatus::Other`].
    pub fn from_code(code: u32) -> Self {
        match code {
            0xC000_0001 => NtStatus::Unsuccessful,
            0xC000_0002 => NtStatus::NotImplemented,
            0xC000_000D => NtStatus::InvalidParameter,
            0xC000_0010 => NtStatus::InvalidDeviceRequest,
            0xC000_0017 => NtStatus::NoMemory,
            0xC000_0023 => NtStatus::BufferTooSmall,
            0xC000_0056 => NtStatus::DeletePending,
            0xC000_009D => NtStatus::DeviceNotConnected,
            0xC000_00BB => NtStatus::NotSupported,
            0xC000_00E8 => NtStatus::InvalidUserBuffer,
            0xC000_0120 => NtStatus::Cancelled,
            0x0000_0102 => NtStatus::Timeout,
            other => NtStatus::Other(other),
        }
    }
}

impl From<BufferError> for NtStatus {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::InvalidCapacity(_) | BufferError::InvalidCursor(_) => {
                NtStatus::InvalidParameter
            }
            BufferError::NoMemory => NtStatus::NoMemory,
        }
    }
}

impl From<ParseError> for NtStatus {
    fn from(_: ParseError) -> Self {
        NtStatus::Unsuccessful
    }
}

impl From<HidpError> for NtStatus {
    fn from(e: HidpError) -> Self {
        match e {
            HidpError::BufferTooSmall => NtStatus::BufferTooSmall,
            _ => NtStatus::InvalidParameter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_through_from_code() {
        for status in [
            NtStatus::BufferTooSmall,
            NtStatus::DeletePending,
            NtStatus::Cancelled,
            NtStatus::InvalidParameter,
        ] {
            assert_eq!(NtStatus::from_code(status.code()), status);
        }
        assert_eq!(NtStatus::from_code(0xC000_1234), NtStatus::Other(0xC000_1234));
    }

    #[test]
    fn buffer_errors_keep_no_memory_distinct() {
        assert_eq!(NtStatus::from(BufferError::NoMemory), NtStatus::NoMemory);
        assert_eq!(
            NtStatus::from(BufferError::InvalidCapacity(1)),
            NtStatus::InvalidParameter
        );
    }
}
