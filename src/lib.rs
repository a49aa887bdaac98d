//! hidclass: HID class-driver core.
//!
//! Parses HID report descriptors into a capability table, buffers input reports for
//! any number of readers, and coordinates a per-device reader thread with queued,
//! cancellable reads on top of a pluggable minidriver.

pub mod backends;
pub mod buffer;
pub mod caps;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod filtered_listener;
pub mod ioctl;
pub mod logger;
pub mod manager;
pub mod metadata;
pub mod minidriver;
pub mod report;

pub use buffer::RingBuffer;
pub use caps::{Caps, CollectionNode, Preparsed, ReportType, ValueCaps};
pub use config::DeviceConfig;
pub use descriptor::parse_descriptor;
pub use device::{HidDevice, HidFile, PendingRead, ReadOutcome};
pub use error::*;
pub use event::*;
pub use eventbus::*;
pub use filtered_listener::FilteredListener;
pub use ioctl::{CollectionInformation, IoctlCode};
pub use logger::Logger;
pub use manager::*;
pub use metadata::DeviceMeta;
pub use minidriver::{DeviceAttributes, Minidriver, MinidriverIoctl, StringId};
