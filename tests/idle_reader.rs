//! Runs alone in its own binary: it installs the global tracing subscriber.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use hidclass::backends::virtual_input::VirtualMinidriver;
use hidclass::{DeviceConfig, HidDevice, NtStatus};

/// LED output report only; nothing to read.
const OUTPUT_ONLY: &[u8] = &[
    0x05, 0x08, // USAGE_PAGE (LEDs)
    0x09, 0x4b, // USAGE (Generic Indicator)
    0xa1, 0x01, // COLLECTION (Application)
    0x09, 0x4b, //   USAGE (Generic Indicator)
    0x15, 0x00, //   LOGICAL_MINIMUM (0)
    0x25, 0x01, //   LOGICAL_MAXIMUM (1)
    0x75, 0x08, //   REPORT_SIZE (8)
    0x95, 0x01, //   REPORT_COUNT (1)
    0x91, 0x02, //   OUTPUT (Data,Var,Abs)
    0xc0, // END_COLLECTION
];

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn polled_device_without_inputs_never_polls() {
    let logs = Captured::default();
    let writer = logs.clone();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .init();

    let md = Arc::new(VirtualMinidriver::new(OUTPUT_ONLY));
    let device = HidDevice::attach("leds", md.clone(), DeviceConfig::polled(10)).unwrap();
    assert_eq!(device.preparsed().caps().input_report_byte_length, 0);

    // Several poll intervals.
    thread::sleep(Duration::from_millis(100));

    let file = device.open().unwrap();
    assert!(matches!(file.read(8), Err(NtStatus::InvalidDeviceRequest)));
    assert_eq!(file.write(&[0, 1]), Ok(2));
    drop(file);
    device.remove();

    let text = String::from_utf8_lossy(&logs.0.lock()).into_owned();
    assert!(text.contains("no input reports to poll"), "{text}");
    assert!(!text.contains("GetInputReport failed"), "{text}");
    assert!(text.contains("reader thread stopped"), "{text}");
    assert_eq!(md.input_report_requests(), 0);
}
