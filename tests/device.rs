use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use hidclass::backends::virtual_input::VirtualMinidriver;
use hidclass::{
    AttachError, CollectionInformation, DeviceConfig, EventFilter, HidDevice, IoctlCode, Manager,
    MinidriverIoctl, NtStatus, Preparsed, RawInputBus, RawInputEvent, RawInputListener,
    ReadOutcome,
};

const WAIT: Duration = Duration::from_secs(2);

/// Vendor device without report IDs: 2 input bytes, 2 output bytes.
const VENDOR_DESCRIPTOR: &[u8] = &[
    0x06, 0x00, 0xff, // USAGE_PAGE (Vendor Defined 0xFF00)
    0x09, 0x01, // USAGE (1)
    0xa1, 0x01, // COLLECTION (Application)
    0x09, 0x02, //   USAGE (2)
    0x15, 0x00, //   LOGICAL_MINIMUM (0)
    0x26, 0xff, 0x00, // LOGICAL_MAXIMUM (255)
    0x75, 0x08, //   REPORT_SIZE (8)
    0x95, 0x02, //   REPORT_COUNT (2)
    0x81, 0x02, //   INPUT (Data,Var,Abs)
    0x09, 0x03, //   USAGE (3)
    0x91, 0x02, //   OUTPUT (Data,Var,Abs)
    0xc0, // END_COLLECTION
];

fn attach(pad: &Arc<VirtualMinidriver>, config: DeviceConfig) -> HidDevice {
    HidDevice::attach("pad", pad.clone(), config).unwrap()
}

fn pending(outcome: ReadOutcome) -> Arc<hidclass::PendingRead> {
    match outcome {
        ReadOutcome::Pending(read) => read,
        ReadOutcome::Complete(report) => panic!("read completed early with {report:?}"),
    }
}

#[test]
fn attach_reads_attributes_and_strings() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());

    let meta = device.meta();
    assert_eq!((meta.vid, meta.pid, meta.version), (0x1209, 0x0001, 0x0100));
    assert_eq!(meta.product_string.as_deref(), Some("Virtual Gamepad"));
    assert_eq!(meta.serial_number, None);
    assert_eq!((meta.usage_page, meta.usage), (0x01, 0x05));
    assert_eq!(meta.bus.as_deref(), Some("virtual"));
    assert_eq!(meta.path, None);
    assert_eq!(device.preparsed().caps().input_report_byte_length, 5);
}

#[test]
fn bad_descriptor_fails_attach() {
    let md = Arc::new(VirtualMinidriver::new(vec![0xc0]));
    assert!(matches!(
        HidDevice::attach("bad", md, DeviceConfig::default()),
        Err(AttachError::Descriptor(_))
    ));

    let pad = VirtualMinidriver::gamepad();
    pad.fail_next(MinidriverIoctl::GetDeviceAttributes, NtStatus::Unsuccessful);
    assert!(matches!(
        HidDevice::attach("pad", pad, DeviceConfig::default()),
        Err(AttachError::Minidriver(NtStatus::Unsuccessful))
    ));
}

#[test]
fn queued_read_completes_when_a_report_arrives() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();

    let read = pending(file.read(5).unwrap());
    assert!(!read.is_complete());
    assert_eq!(file.read(5).unwrap_err(), NtStatus::InvalidDeviceRequest);

    pad.feed(&[0x01, 0x01, 0x10, 0x20, 0x08]);
    assert_eq!(read.wait_timeout(WAIT), Some(Ok(vec![0x01, 0x01, 0x10, 0x20, 0x08])));

    // A handle opened now only sees later reports.
    let late = device.open().unwrap();
    pad.feed(&[0x01, 0x02, 0, 0, 0x08]);
    assert_eq!(file.read_timeout(5, WAIT), Ok(vec![0x01, 0x02, 0, 0, 0x08]));
    assert_eq!(late.read_timeout(5, WAIT), Ok(vec![0x01, 0x02, 0, 0, 0x08]));
}

#[test]
fn short_read_buffers_are_rejected() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();
    assert_eq!(file.read(4).unwrap_err(), NtStatus::BufferTooSmall);
}

#[test]
fn cancelled_read_leaves_the_report_for_the_next_read() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();

    let read = pending(file.read(5).unwrap());
    assert!(read.cancel());
    assert!(!read.cancel());
    assert_eq!(read.try_result(), Some(Err(NtStatus::Cancelled)));

    pad.feed(&[0x01, 0x04, 0, 0, 0x08]);
    assert_eq!(file.read_timeout(5, WAIT), Ok(vec![0x01, 0x04, 0, 0, 0x08]));
}

#[test]
fn cancel_racing_completion_finishes_each_read_once() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();

    for i in 0..50u8 {
        let report = [0x01, i & 0x0f, i, 0, 0x08];
        let read = pending(file.read(5).unwrap());

        let feeder = {
            let pad = pad.clone();
            thread::spawn(move || pad.feed(&report))
        };
        let cancelled = read.cancel();
        feeder.join().unwrap();

        let result = read.wait();
        if cancelled {
            assert_eq!(result, Err(NtStatus::Cancelled));
            // The report was not consumed by the cancelled read.
            assert_eq!(file.read_timeout(5, WAIT), Ok(report.to_vec()));
        } else {
            assert_eq!(result, Ok(report.to_vec()));
        }
    }
}

#[test]
fn read_timeout_cancels_the_queued_read() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();

    assert_eq!(
        file.read_timeout(5, Duration::from_millis(20)),
        Err(NtStatus::Timeout)
    );
    // Nothing is left outstanding.
    let read = pending(file.read(5).unwrap());
    read.cancel();
}

#[test]
fn removal_fails_pending_and_later_requests() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();
    let read = pending(file.read(5).unwrap());

    device.remove();
    assert!(device.is_removed());
    assert!(pad.is_halted());
    assert_eq!(read.wait_timeout(WAIT), Some(Err(NtStatus::DeletePending)));

    assert_eq!(device.open().unwrap_err(), NtStatus::DeletePending);
    assert_eq!(file.read(5).unwrap_err(), NtStatus::DeletePending);
    assert_eq!(file.write(&[2, 1]), Err(NtStatus::DeletePending));
    assert_eq!(file.poll_interval(), Err(NtStatus::DeletePending));

    // Idempotent.
    device.remove();
}

#[test]
fn dropping_a_handle_cancels_its_read() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();
    let read = pending(file.read(5).unwrap());

    drop(file);
    assert_eq!(read.try_result(), Some(Err(NtStatus::Cancelled)));
}

#[test]
fn set_requests_carry_the_report_id_first() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();

    // Clamped to the 2-byte output report.
    assert_eq!(file.write(&[2, 0x05, 0xff, 0xff]), Ok(2));
    assert_eq!(file.set_output_report(&[2, 0x03]), Ok(2));
    assert_eq!(file.set_feature(&[2, 10, 20]), Ok(3));
    assert_eq!(
        pad.requests(),
        vec![
            (MinidriverIoctl::WriteReport, vec![2, 2, 0x05]),
            (MinidriverIoctl::SetOutputReport, vec![2, 2, 0x03]),
            (MinidriverIoctl::SetFeature, vec![2, 2, 10, 20]),
        ]
    );

    assert_eq!(file.write(&[]), Err(NtStatus::InvalidUserBuffer));
    assert_eq!(file.write(&[7, 1]), Err(NtStatus::InvalidParameter));
    assert_eq!(file.set_feature(&[1, 0, 0]), Err(NtStatus::InvalidParameter));

    let mut feature = [2u8, 0, 0];
    assert_eq!(file.get_feature(&mut feature), Ok(3));
    assert_eq!(feature, [2, 10, 20]);
    assert_eq!(file.get_feature(&mut [2u8, 0]), Err(NtStatus::BufferTooSmall));
}

#[test]
fn report_id_zero_is_stripped_on_the_wire() {
    let md = Arc::new(VirtualMinidriver::new(VENDOR_DESCRIPTOR));
    let device = HidDevice::attach("vendor", md.clone(), DeviceConfig::default()).unwrap();
    let file = device.open().unwrap();

    assert_eq!(file.write(&[0, 0xaa, 0xbb]), Ok(3));
    assert_eq!(
        md.requests(),
        vec![(MinidriverIoctl::WriteReport, vec![0, 0xaa, 0xbb])]
    );

    md.set_input_report(0, &[0x11, 0x22]);
    let mut report = [0u8; 3];
    assert_eq!(file.get_input_report(&mut report), Ok(3));
    assert_eq!(report, [0, 0x11, 0x22]);

    // Interrupt reports gain a zero ID byte.
    md.feed(&[0x33, 0x44]);
    assert_eq!(file.read_timeout(3, WAIT), Ok(vec![0, 0x33, 0x44]));
}

#[test]
fn polled_device_fetches_input_reports() {
    let pad = VirtualMinidriver::gamepad();
    pad.set_input_report(1, &[0x01, 0x08, 0, 0, 0x08]);
    let device = attach(&pad, DeviceConfig::polled(10));
    let file = device.open().unwrap();

    assert_eq!(file.read_timeout(5, WAIT), Ok(vec![0x01, 0x08, 0, 0, 0x08]));
    assert!(pad.input_report_requests() >= 1);
}

#[test]
fn opportunistic_reads_never_queue() {
    let pad = VirtualMinidriver::gamepad();
    pad.set_input_report(1, &[0x01, 0x0f, 0, 0, 0x08]);
    let device = attach(&pad, DeviceConfig::polled(0));
    let file = device.open().unwrap();

    for _ in 0..3 {
        match file.read(5).unwrap() {
            ReadOutcome::Complete(report) => assert_eq!(report, vec![0x01, 0x0f, 0, 0, 0x08]),
            ReadOutcome::Pending(_) => panic!("opportunistic read was queued"),
        }
    }
}

#[test]
fn overrun_is_counted_per_handle() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();
    let watcher = device.open().unwrap();
    file.set_input_buffers(2).unwrap();

    for i in 0..5u8 {
        pad.feed(&[0x01, i, 0, 0, 0x08]);
    }
    // Once the watcher has seen the last report, all five are buffered.
    while watcher.read_timeout(5, WAIT).unwrap()[1] != 4 {}

    assert_eq!(file.read_timeout(5, WAIT), Ok(vec![0x01, 3, 0, 0, 0x08]));
    assert_eq!(file.take_dropped(), Ok(3));
    assert_eq!(file.take_dropped(), Ok(0));
    assert_eq!(file.read_timeout(5, WAIT), Ok(vec![0x01, 4, 0, 0, 0x08]));
}

struct Collect(Arc<Mutex<Vec<RawInputEvent>>>);

impl RawInputListener for Collect {
    fn on_report(&mut self, event: &RawInputEvent) {
        self.0.lock().push(event.clone());
    }
}

#[test]
fn reports_are_broadcast_unless_disabled() {
    let bus = RawInputBus::shared();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.lock()
        .add_listener(Collect(seen.clone()), EventFilter::ReportId(1), None);

    let pad = VirtualMinidriver::gamepad();
    let device =
        HidDevice::attach_with_bus("pad", pad.clone(), DeviceConfig::default(), Some(bus.clone()))
            .unwrap();
    let file = device.open().unwrap();
    pad.feed(&[0x01, 0x01, 0, 0, 0x08]);
    file.read_timeout(5, WAIT).unwrap();

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].device_id, "pad");
        assert_eq!(seen[0].report, vec![0x01, 0x01, 0, 0, 0x08]);
    }

    let quiet = VirtualMinidriver::gamepad();
    let config = DeviceConfig {
        broadcast_raw_input: false,
        ..DeviceConfig::default()
    };
    let device = HidDevice::attach_with_bus("quiet", quiet.clone(), config, Some(bus)).unwrap();
    let file = device.open().unwrap();
    quiet.feed(&[0x01, 0x01, 0, 0, 0x08]);
    file.read_timeout(5, WAIT).unwrap();
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn ioctl_requests() {
    let pad = VirtualMinidriver::gamepad();
    let device = attach(&pad, DeviceConfig::default());
    let file = device.open().unwrap();
    let mut out = [0u8; 4];

    assert_eq!(
        file.ioctl(IoctlCode::SetPollFrequencyMsec, &10_001u32.to_le_bytes(), &mut []),
        Err(NtStatus::InvalidParameter)
    );
    file.ioctl(IoctlCode::SetPollFrequencyMsec, &8u32.to_le_bytes(), &mut [])
        .unwrap();
    assert_eq!(file.ioctl(IoctlCode::GetPollFrequencyMsec, &[], &mut out), Ok(4));
    assert_eq!(u32::from_le_bytes(out), 8);

    assert_eq!(file.ioctl(IoctlCode::GetNumDeviceInputBuffers, &[], &mut out), Ok(4));
    assert_eq!(u32::from_le_bytes(out), 32);
    assert_eq!(
        file.ioctl(IoctlCode::SetNumDeviceInputBuffers, &1u32.to_le_bytes(), &mut []),
        Err(NtStatus::InvalidParameter)
    );
    file.ioctl(IoctlCode::SetNumDeviceInputBuffers, &64u32.to_le_bytes(), &mut [])
        .unwrap();
    assert_eq!(file.input_buffers(), Ok(64));

    let mut info = [0u8; CollectionInformation::SIZE];
    file.ioctl(IoctlCode::GetCollectionInformation, &[], &mut info)
        .unwrap();
    let size = u32::from_le_bytes([info[0], info[1], info[2], info[3]]) as usize;
    assert_eq!(info[4], 0, "not polled");
    assert_eq!(u16::from_le_bytes([info[6], info[7]]), 0x1209);

    let mut blob = vec![0u8; size];
    assert_eq!(
        file.ioctl(IoctlCode::GetCollectionDescriptor, &[], &mut blob[..size - 1]),
        Err(NtStatus::BufferTooSmall)
    );
    assert_eq!(file.ioctl(IoctlCode::GetCollectionDescriptor, &[], &mut blob), Ok(size));
    assert_eq!(Preparsed::from_json(&blob).unwrap(), **device.preparsed());

    let mut name = [0u8; 64];
    let n = file.ioctl(IoctlCode::GetProductString, &[], &mut name).unwrap();
    let units: Vec<u16> = name[..n]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(String::from_utf16(&units).unwrap(), "Virtual Gamepad");
    assert_eq!(
        file.ioctl(IoctlCode::GetSerialNumberString, &[], &mut name),
        Err(NtStatus::NotSupported)
    );

    file.ioctl(IoctlCode::FlushQueue, &[], &mut []).unwrap();
}

#[test]
fn manager_tracks_devices_by_id() {
    let mgr = Manager::new();
    mgr.attach("b", VirtualMinidriver::gamepad(), DeviceConfig::default())
        .unwrap();
    mgr.attach("a", VirtualMinidriver::gamepad(), DeviceConfig::default())
        .unwrap();
    assert!(matches!(
        mgr.attach("a", VirtualMinidriver::gamepad(), DeviceConfig::default()),
        Err(AttachError::DuplicateId(id)) if id == "a"
    ));

    let ids: Vec<_> = mgr.devices().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let a = mgr.device("a").unwrap();
    assert!(mgr.remove("a"));
    assert!(!mgr.remove("a"));
    assert!(a.is_removed());
    assert!(mgr.device("a").is_none());

    mgr.remove_all();
    assert!(mgr.devices().is_empty());
}
