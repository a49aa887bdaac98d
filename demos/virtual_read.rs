//! Attaches the virtual gamepad, feeds it a few reports and decodes what a handle reads.

use std::time::Duration;

use hidclass::backends::virtual_input::VirtualMinidriver;
use hidclass::{DeviceConfig, EventFilter, Logger, Manager, ReportType};

const GENERIC_DESKTOP: u16 = 0x01;
const BUTTON: u16 = 0x09;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mgr = Manager::new();
    mgr.bus()
        .lock()
        .add_listener(Logger::new(), EventFilter::All, None);

    let pad = VirtualMinidriver::gamepad();
    let device = mgr
        .attach("virtual:pad", pad.clone(), DeviceConfig::default())
        .expect("attach virtual gamepad");
    println!("{}", device.meta());

    let file = device.open().expect("open handle");
    let preparsed = device.preparsed().clone();
    for caps in preparsed.value_caps(ReportType::Input) {
        println!(
            "  value {:#04x}:{:#04x} {} bits, {}..={}",
            caps.usage_page, caps.usage_min, caps.bit_size, caps.logical_min, caps.logical_max
        );
    }

    // buttons, x, y, hat (8 = centered)
    let frames: [[u8; 5]; 4] = [
        [0x01, 0b0001, 0x00, 0x00, 0x08],
        [0x01, 0b0011, 0x7f, 0x00, 0x00],
        [0x01, 0b0010, 0x7f, 0x81, 0x02],
        [0x01, 0b0000, 0x00, 0x00, 0x08],
    ];
    for frame in frames {
        pad.feed(&frame);
        let report = match file.read_timeout(frame.len(), Duration::from_secs(1)) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("read failed: {e}");
                break;
            }
        };

        let buttons = preparsed.get_usages(ReportType::Input, BUTTON, None, &report);
        let axis = |usage| {
            preparsed.get_scaled_usage_value(ReportType::Input, GENERIC_DESKTOP, None, usage, &report)
        };
        println!(
            "buttons {:?} x {:?} y {:?} hat {:?}",
            buttons,
            axis(0x30),
            axis(0x31),
            axis(0x39)
        );
    }
}
