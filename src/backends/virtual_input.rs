//! Scriptable in-memory minidriver.
//!
//! [`VirtualMinidriver`] answers every [`MinidriverIoctl`] from state the host sets up:
//! reports are fed into an interrupt queue ([`feed`](VirtualMinidriver::feed)) or stored
//! per report ID for `GetInputReport` / `GetFeature`, and every set request is recorded.
//! `ReadReport` blocks until a report is fed or the device is cancelled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::NtStatus;
use crate::minidriver::{encode_string, DeviceAttributes, Minidriver, MinidriverIoctl, StringId};

/// Gamepad with report ID 1: four buttons, signed X/Y bytes and an 8-way hat.
///
/// Input report layout: `[0x01, buttons(4 bits), x, y, hat(4 bits)]`.
pub const GAMEPAD_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Gamepad)
    0xa1, 0x01, // Collection (Application)
    0x85, 0x01, //   Report ID (1)
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, 0x29, 0x04, // Usage Minimum (1), Usage Maximum (4)
    0x15, 0x00, 0x25, 0x01, // Logical Minimum (0), Logical Maximum (1)
    0x75, 0x01, 0x95, 0x04, 0x81, 0x02, // 4 x 1 bit, Input (Data,Var,Abs)
    0x75, 0x04, 0x95, 0x01, 0x81, 0x03, // padding
    0x05, 0x01, 0x09, 0x30, 0x09, 0x31, // Usage (X), Usage (Y)
    0x15, 0x81, 0x25, 0x7f, // Logical Minimum (-127), Logical Maximum (127)
    0x75, 0x08, 0x95, 0x02, 0x81, 0x02, // 2 x 8 bits, Input (Data,Var,Abs)
    0x09, 0x39, 0x15, 0x00, 0x25, 0x07, // Usage (Hat Switch), 0..7
    0x75, 0x04, 0x95, 0x01, 0x81, 0x42, // 1 x 4 bits, Input (Data,Var,Abs,Null)
    0x75, 0x04, 0x95, 0x01, 0x81, 0x03, // padding
    0x85, 0x02, //   Report ID (2)
    0x09, 0x48, 0x15, 0x00, 0x26, 0xff, 0x00, // Usage (Resolution Multiplier), 0..255
    0x75, 0x08, 0x95, 0x02, 0xb1, 0x02, // 2 x 8 bits, Feature (Data,Var,Abs)
    0x05, 0x08, 0x19, 0x01, 0x29, 0x03, // Usage Page (LED), Usage 1..3
    0x15, 0x00, 0x25, 0x01, 0x75, 0x01, 0x95, 0x03, 0x91, 0x02, // Output (Data,Var,Abs)
    0x75, 0x05, 0x95, 0x01, 0x91, 0x03, // padding
    0xc0, // End Collection
];

#[derive(Default)]
struct VirtualState {
    interrupt: VecDeque<Vec<u8>>,
    input_reports: HashMap<u8, Vec<u8>>,
    features: HashMap<u8, Vec<u8>>,
    requests: Vec<(MinidriverIoctl, Vec<u8>)>,
    failures: Vec<(MinidriverIoctl, NtStatus)>,
    input_report_requests: usize,
    halted: bool,
}

pub struct VirtualMinidriver {
    attributes: DeviceAttributes,
    descriptor: Vec<u8>,
    strings: HashMap<StringId, String>,
    state: Mutex<VirtualState>,
    ready: Condvar,
}

impl VirtualMinidriver {
    pub fn new(descriptor: impl Into<Vec<u8>>) -> Self {
        Self {
            attributes: DeviceAttributes::default(),
            descriptor: descriptor.into(),
            strings: HashMap::new(),
            state: Mutex::new(VirtualState::default()),
            ready: Condvar::new(),
        }
    }

    /// Virtual gamepad (see [`GAMEPAD_DESCRIPTOR`]).
    pub fn gamepad() -> Arc<Self> {
        Arc::new(
            Self::new(GAMEPAD_DESCRIPTOR)
                .with_attributes(0x1209, 0x0001, 0x0100)
                .with_string(StringId::Manufacturer, "hidclass")
                .with_string(StringId::Product, "Virtual Gamepad"),
        )
    }

    pub fn with_attributes(mut self, vendor_id: u16, product_id: u16, version: u16) -> Self {
        self.attributes = DeviceAttributes {
            vendor_id,
            product_id,
            version,
        };
        self
    }

    pub fn with_string(mut self, id: StringId, value: impl Into<String>) -> Self {
        self.strings.insert(id, value.into());
        self
    }

    /// Queues one interrupt report (wire format) and wakes `ReadReport`.
    pub fn feed(&self, report: &[u8]) {
        self.state.lock().interrupt.push_back(report.to_vec());
        self.ready.notify_all();
    }

    /// Sets what `GetInputReport` answers for `report_id` (wire format).
    pub fn set_input_report(&self, report_id: u8, report: &[u8]) {
        self.state.lock().input_reports.insert(report_id, report.to_vec());
    }

    /// Sets what `GetFeature` answers for `report_id` (wire format).
    pub fn set_feature(&self, report_id: u8, report: &[u8]) {
        self.state.lock().features.insert(report_id, report.to_vec());
    }

    /// The next request with `code` fails with `status`.
    pub fn fail_next(&self, code: MinidriverIoctl, status: NtStatus) {
        self.state.lock().failures.push((code, status));
        self.ready.notify_all();
    }

    /// Set requests received so far, as `(code, transfer packet)`.
    pub fn requests(&self) -> Vec<(MinidriverIoctl, Vec<u8>)> {
        self.state.lock().requests.clone()
    }

    /// Number of `GetInputReport` requests served.
    pub fn input_report_requests(&self) -> usize {
        self.state.lock().input_report_requests
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }
}

fn take_failure(state: &mut VirtualState, code: MinidriverIoctl) -> Result<(), NtStatus> {
    match state.failures.iter().position(|&(c, _)| c == code) {
        Some(i) => Err(state.failures.remove(i).1),
        None => Ok(()),
    }
}

fn copy_out(data: &[u8], output: &mut [u8]) -> Result<usize, NtStatus> {
    if output.len() < data.len() {
        return Err(NtStatus::BufferTooSmall);
    }
    output[..data.len()].copy_from_slice(data);
    Ok(data.len())
}

impl Minidriver for VirtualMinidriver {
    fn call(&self, code: MinidriverIoctl, input: &[u8], output: &mut [u8]) -> Result<usize, NtStatus> {
        let mut state = self.state.lock();
        if code != MinidriverIoctl::ReadReport {
            take_failure(&mut state, code)?;
        }

        match code {
            MinidriverIoctl::GetDeviceAttributes => copy_out(&self.attributes.to_bytes(), output),
            MinidriverIoctl::GetReportDescriptor => copy_out(&self.descriptor, output),
            MinidriverIoctl::ReadReport => loop {
                if state.halted {
                    return Err(NtStatus::DeviceNotConnected);
                }
                take_failure(&mut state, code)?;
                if let Some(report) = state.interrupt.pop_front() {
                    let n = report.len().min(output.len());
                    output[..n].copy_from_slice(&report[..n]);
                    return Ok(n);
                }
                self.ready.wait(&mut state);
            },
            MinidriverIoctl::GetInputReport => {
                let report_id = *input.first().ok_or(NtStatus::InvalidParameter)?;
                state.input_report_requests += 1;
                let report = state
                    .input_reports
                    .get(&report_id)
                    .ok_or(NtStatus::Unsuccessful)?;
                copy_out(report, output)
            }
            MinidriverIoctl::GetFeature => {
                let report_id = *input.first().ok_or(NtStatus::InvalidParameter)?;
                let report = state.features.get(&report_id).ok_or(NtStatus::Unsuccessful)?;
                copy_out(report, output)
            }
            MinidriverIoctl::SetFeature
            | MinidriverIoctl::SetOutputReport
            | MinidriverIoctl::WriteReport => {
                let (&report_id, wire) = input.split_first().ok_or(NtStatus::InvalidParameter)?;
                if code == MinidriverIoctl::SetFeature {
                    state.features.insert(report_id, wire.to_vec());
                }
                state.requests.push((code, input.to_vec()));
                Ok(wire.len())
            }
            MinidriverIoctl::GetString(id) => match self.strings.get(&id) {
                Some(s) => encode_string(s, output),
                None => Err(NtStatus::NotSupported),
            },
        }
    }

    fn cancel_io(&self) {
        self.state.lock().halted = true;
        self.ready.notify_all();
    }

    fn bus(&self) -> Option<String> {
        Some("virtual".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::ReportType;
    use crate::descriptor::parse_descriptor;

    #[test]
    fn gamepad_descriptor_layout() {
        let preparsed = parse_descriptor(GAMEPAD_DESCRIPTOR).unwrap();
        let caps = preparsed.caps();
        assert_eq!(caps.usage_page, 0x01);
        assert_eq!(caps.usage, 0x05);
        assert_eq!(caps.input_report_byte_length, 5);
        assert_eq!(caps.feature_report_byte_length, 3);
        assert_eq!(caps.output_report_byte_length, 2);
        assert_eq!(preparsed.report_length(ReportType::Feature, 2), Some(3));
        assert_eq!(preparsed.report_length(ReportType::Input, 2), None);
    }

    #[test]
    fn read_report_unblocks_on_cancel() {
        let md = Arc::new(VirtualMinidriver::new(GAMEPAD_DESCRIPTOR));
        let reader = {
            let md = Arc::clone(&md);
            std::thread::spawn(move || md.call(MinidriverIoctl::ReadReport, &[], &mut [0u8; 8]))
        };
        md.cancel_io();
        assert_eq!(reader.join().unwrap(), Err(NtStatus::DeviceNotConnected));
    }

    #[test]
    fn failures_apply_to_their_code_only() {
        let md = VirtualMinidriver::new(GAMEPAD_DESCRIPTOR);
        md.fail_next(MinidriverIoctl::WriteReport, NtStatus::Timeout);
        assert_eq!(md.call(MinidriverIoctl::SetFeature, &[2, 1, 1], &mut []), Ok(2));
        assert_eq!(
            md.call(MinidriverIoctl::WriteReport, &[2, 7], &mut []),
            Err(NtStatus::Timeout)
        );
        assert_eq!(md.call(MinidriverIoctl::WriteReport, &[2, 7], &mut []), Ok(1));
    }
}
