//! Raw input events.
//!
//! A [`RawInputEvent`] is a complete input report as read from the minidriver, broadcast
//! on the [`RawInputBus`](crate::eventbus::RawInputBus) by the reader thread before the
//! report is buffered for readers.

use std::time::Instant;

/// One input report broadcast by a device's reader thread.
///
/// `report` always starts with the report ID byte (0 for devices without report IDs).
#[derive(Clone, Debug)]
pub struct RawInputEvent {
    /// Id the device was attached under.
    pub device_id: String,
    pub report_id: u8,
    pub report: Vec<u8>,
    /// Capture time (monotonic).
    pub at: Instant,
}
