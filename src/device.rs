//! Device I/O coordinator.
//!
//! [`HidDevice`] owns everything attached to one minidriver: the parsed capability
//! table, the report ring buffer, the pending-read queue and the reader thread.
//! Clients talk to it through [`HidFile`] handles returned by [`HidDevice::open`].
//!
//! ## Reader thread
//! - **Polled** devices: `GetInputReport` on a timer. The thread waits on the halt
//!   channel for the poll interval between requests (interval 0 waits the default).
//!   A polled device without Input reports is never polled.
//! - **Interrupt** devices: blocking `ReadReport`. The halt channel is checked without
//!   blocking after every report; failures back off briefly.
//!
//! Every fetched report is broadcast on the raw-input bus, written to the ring buffer
//! and then used to complete queued reads.
//!
//! ## Reads
//! A read completes at once when the handle's cursor has an unread report. Otherwise it
//! is queued as a [`PendingRead`] (one per handle) and completed by the reader thread,
//! or completes immediately from the latest report / a direct `GetInputReport` when the
//! device is polled with interval 0 ("opportunistic" mode).
//!
//! A queued read is completed exactly once. The reader thread, [`PendingRead::cancel`]
//! and device removal all race for it under the read's own lock; losers do nothing.
//!
//! ## Removal
//! [`HidDevice::remove`] (also run on drop) is terminal: the reader thread is stopped,
//! every queued read completes with `DeletePending`, and every later request on the
//! device or its handles fails with `DeletePending`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::buffer::RingBuffer;
use crate::caps::{Preparsed, ReportType};
use crate::config::{DeviceConfig, DEFAULT_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS};
use crate::descriptor::parse_descriptor;
use crate::error::{AttachError, NtStatus};
use crate::event::RawInputEvent;
use crate::eventbus::SharedBus;
use crate::ioctl::CollectionInformation;
use crate::metadata::DeviceMeta;
use crate::minidriver::{self, DeviceAttributes, Minidriver, MinidriverIoctl, StringId};

/// Back-off after a failed `ReadReport`.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by the device, its handles and its reader thread.
pub(crate) struct DeviceShared {
    id: String,
    minidriver: Arc<dyn Minidriver>,
    preparsed: Arc<Preparsed>,
    descriptor_size: usize,
    attributes: DeviceAttributes,
    meta: DeviceMeta,
    polled: bool,
    uses_report_ids: bool,
    broadcast: bool,
    poll_interval_ms: AtomicU32,
    buffer: RingBuffer,
    pending: Mutex<VecDeque<Arc<PendingRead>>>,
    removed: Mutex<bool>,
    bus: Option<SharedBus>,
    collection_descriptor: Vec<u8>,
}

impl std::fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceShared").field("id", &self.id).finish_non_exhaustive()
    }
}

/// One attached device. See the module docs.
pub struct HidDevice {
    shared: Arc<DeviceShared>,
    halt: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HidDevice {
    /// Brings a device up without a raw-input bus.
    pub fn attach(
        id: impl Into<String>,
        minidriver: Arc<dyn Minidriver>,
        config: DeviceConfig,
    ) -> Result<Self, AttachError> {
        Self::attach_with_bus(id, minidriver, config, None)
    }

    /// Brings a device up.
    ///
    /// ### Behavior
    /// - Queries attributes and the report descriptor; a descriptor that does not parse
    ///   fails the attach.
    /// - Sizes the ring buffer to the input report length and `config.input_buffers`.
    /// - Reads the manufacturer/product/serial strings when the minidriver has them.
    /// - Starts the reader thread.
    pub fn attach_with_bus(
        id: impl Into<String>,
        minidriver: Arc<dyn Minidriver>,
        config: DeviceConfig,
        bus: Option<SharedBus>,
    ) -> Result<Self, AttachError> {
        let id = id.into();
        config.validate()?;

        let attributes = minidriver::get_device_attributes(minidriver.as_ref())?;
        let descriptor = minidriver::get_report_descriptor(minidriver.as_ref())?;
        let preparsed = parse_descriptor(&descriptor).map_err(|e| {
            error!(device = %id, error = %e, "report descriptor rejected");
            e
        })?;

        let caps = preparsed.caps();
        let meta = DeviceMeta {
            id: id.clone(),
            bus: minidriver.bus(),
            vid: attributes.vendor_id,
            pid: attributes.product_id,
            version: attributes.version,
            manufacturer_string: minidriver::get_string(minidriver.as_ref(), StringId::Manufacturer).ok(),
            product_string: minidriver::get_string(minidriver.as_ref(), StringId::Product).ok(),
            serial_number: minidriver::get_string(minidriver.as_ref(), StringId::SerialNumber).ok(),
            usage_page: caps.usage_page,
            usage: caps.usage,
            path: minidriver.path(),
        };

        let buffer = RingBuffer::new(caps.input_report_byte_length as usize)?;
        buffer.set_capacity(config.input_buffers)?;

        let shared = Arc::new(DeviceShared {
            collection_descriptor: preparsed.to_json()?,
            uses_report_ids: preparsed.uses_report_ids(),
            broadcast: config.broadcast_raw_input && !meta.is_mouse_or_keyboard(),
            polled: config.polled,
            poll_interval_ms: AtomicU32::new(config.poll_interval_ms),
            preparsed: Arc::new(preparsed),
            descriptor_size: descriptor.len(),
            attributes,
            meta,
            buffer,
            pending: Mutex::new(VecDeque::new()),
            removed: Mutex::new(false),
            bus,
            minidriver,
            id,
        });

        let (halt_tx, halt_rx) = bounded(1);
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("hid-reader-{}", shared.id))
            .spawn(move || reader_thread(thread_shared, halt_rx))
            .map_err(AttachError::Thread)?;

        info!(
            device = %shared.id,
            vid = shared.attributes.vendor_id,
            pid = shared.attributes.product_id,
            polled = shared.polled,
            input_len = shared.preparsed.caps().input_report_byte_length,
            "device attached"
        );

        Ok(Self {
            shared,
            halt: Mutex::new(Some(halt_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn meta(&self) -> &DeviceMeta {
        &self.shared.meta
    }

    pub fn preparsed(&self) -> &Arc<Preparsed> {
        &self.shared.preparsed
    }

    pub fn is_removed(&self) -> bool {
        *self.shared.removed.lock()
    }

    /// Opens a handle with its own read cursor.
    pub fn open(&self) -> Result<HidFile, NtStatus> {
        self.shared.check_removed()?;
        let cursor = self.shared.buffer.add_cursor()?;
        Ok(HidFile {
            shared: Arc::clone(&self.shared),
            cursor,
            outstanding: Mutex::new(None),
        })
    }

    /// Surprise removal. Idempotent.
    pub fn remove(&self) {
        {
            let mut removed = self.shared.removed.lock();
            if *removed {
                return;
            }
            *removed = true;
        }

        if let Some(halt) = self.halt.lock().take() {
            let _ = halt.send(());
        }
        self.shared.minidriver.cancel_io();

        if let Some(handle) = self.thread.lock().take() {
            // Removal triggered from a listener on the reader thread itself.
            let on_reader = handle.thread().id() == thread::current().id();
            if !on_reader && handle.join().is_err() {
                warn!(device = %self.shared.id, "reader thread panicked");
            }
        }

        let drained = self.shared.fail_pending(NtStatus::DeletePending);
        info!(device = %self.shared.id, pending = drained, "device removed");
    }
}

impl Drop for HidDevice {
    fn drop(&mut self) {
        self.remove();
    }
}

impl DeviceShared {
    fn check_removed(&self) -> Result<(), NtStatus> {
        if *self.removed.lock() {
            Err(NtStatus::DeletePending)
        } else {
            Ok(())
        }
    }

    fn input_report_len(&self) -> usize {
        self.preparsed.caps().input_report_byte_length as usize
    }

    fn poll_interval(&self) -> u32 {
        self.poll_interval_ms.load(Ordering::Relaxed)
    }

    /// Polled with interval 0: reads never queue.
    fn is_opportunistic(&self) -> bool {
        self.polled && self.poll_interval() == 0
    }

    /// Report ID the reader thread asks for on polled devices.
    fn default_input_report_id(&self) -> u8 {
        self.preparsed
            .report_lengths()
            .iter()
            .find(|r| r.report_type == ReportType::Input)
            .map_or(0, |r| r.report_id)
    }

    /// Forwards a user report (byte 0 = report ID) to a set request.
    ///
    /// ### Behavior
    /// - Empty buffer: `InvalidUserBuffer`.
    /// - Report ID unknown for `report_type`: `InvalidParameter`.
    /// - The buffer is clamped to the report's length; report ID 0 is not sent on the wire.
    /// - Returns the minidriver's count, plus the ID byte when it was stripped.
    fn set_report(
        &self,
        code: MinidriverIoctl,
        report_type: ReportType,
        buffer: &[u8],
    ) -> Result<usize, NtStatus> {
        let report_id = *buffer.first().ok_or(NtStatus::InvalidUserBuffer)?;
        let len = self
            .preparsed
            .report_length(report_type, report_id)
            .ok_or(NtStatus::InvalidParameter)? as usize;
        let report = &buffer[..buffer.len().min(len)];
        let wire = if report_id == 0 { &report[1..] } else { report };

        let mut packet = Vec::with_capacity(1 + wire.len());
        packet.push(report_id);
        packet.extend_from_slice(wire);

        let n = self.minidriver.call(code, &packet, &mut [])?;
        Ok(if report_id == 0 { n + 1 } else { n })
    }

    /// Fetches a report into a user buffer (byte 0 = report ID).
    fn get_report(
        &self,
        code: MinidriverIoctl,
        report_type: ReportType,
        buffer: &mut [u8],
    ) -> Result<usize, NtStatus> {
        let report_id = *buffer.first().ok_or(NtStatus::InvalidUserBuffer)?;
        let len = self
            .preparsed
            .report_length(report_type, report_id)
            .ok_or(NtStatus::InvalidParameter)? as usize;
        if buffer.len() < len {
            return Err(NtStatus::BufferTooSmall);
        }

        if report_id == 0 {
            let n = self.minidriver.call(code, &[0], &mut buffer[1..len])?;
            Ok(n + 1)
        } else {
            self.minidriver.call(code, &[report_id], &mut buffer[..len])
        }
    }

    /// One input report of full length, report ID first.
    fn fetch_input_report(&self, report_id: u8) -> Result<Vec<u8>, NtStatus> {
        let mut report = vec![0u8; self.input_report_len().max(1)];
        report[0] = report_id;
        self.get_report(MinidriverIoctl::GetInputReport, ReportType::Input, &mut report)?;
        Ok(report)
    }

    /// Broadcast, buffer, then complete whatever reads can be completed.
    fn publish(&self, report: &[u8]) {
        if self.broadcast {
            if let Some(bus) = &self.bus {
                let event = RawInputEvent {
                    device_id: self.id.clone(),
                    report_id: report.first().copied().unwrap_or(0),
                    report: report.to_vec(),
                    at: Instant::now(),
                };
                bus.lock().emit(&event);
            }
        }

        self.buffer.write(report);
        self.drain_pending();
    }

    /// Tries every queued read against its cursor; reads with nothing new go back to the
    /// front of the queue in their original order.
    fn drain_pending(&self) {
        let queued: Vec<Arc<PendingRead>> = self.pending.lock().drain(..).collect();
        if queued.is_empty() {
            return;
        }

        let mut requeue = Vec::new();
        for read in queued {
            if !read.try_fill(&self.buffer) {
                requeue.push(read);
            }
        }
        if requeue.is_empty() {
            return;
        }

        let mut pending = self.pending.lock();
        if *self.removed.lock() {
            drop(pending);
            for read in requeue {
                read.complete(Err(NtStatus::DeletePending));
            }
            return;
        }
        for read in requeue.into_iter().rev() {
            pending.push_front(read);
        }
    }

    /// Completes every queued read with `status`. Returns how many were queued.
    fn fail_pending(&self, status: NtStatus) -> usize {
        let queued: Vec<Arc<PendingRead>> = self.pending.lock().drain(..).collect();
        let n = queued.len();
        for read in queued {
            read.complete(Err(status));
        }
        n
    }

    fn enqueue(&self, read: Arc<PendingRead>) -> Result<(), NtStatus> {
        let mut pending = self.pending.lock();
        if *self.removed.lock() {
            return Err(NtStatus::DeletePending);
        }
        pending.push_back(read);
        Ok(())
    }

    fn dequeue(&self, read: &Arc<PendingRead>) {
        self.pending.lock().retain(|r| !Arc::ptr_eq(r, read));
    }
}

// --------------------- reader thread ---------------------

fn reader_thread(shared: Arc<DeviceShared>, halt: Receiver<()>) {
    debug!(device = %shared.id, polled = shared.polled, "reader thread started");
    if shared.polled && shared.input_report_len() == 0 {
        debug!(device = %shared.id, "no input reports to poll");
        let _ = halt.recv();
    } else if shared.polled {
        poll_loop(&shared, &halt);
    } else {
        interrupt_loop(&shared, &halt);
    }
    debug!(device = %shared.id, "reader thread stopped");
}

fn poll_loop(shared: &DeviceShared, halt: &Receiver<()>) {
    let report_id = shared.default_input_report_id();
    loop {
        match shared.fetch_input_report(report_id) {
            Ok(report) => shared.publish(&report),
            Err(e) => warn!(device = %shared.id, error = %e, "GetInputReport failed"),
        }

        let interval = match shared.poll_interval() {
            0 => DEFAULT_POLL_INTERVAL_MS,
            ms => ms,
        };
        match halt.recv_timeout(Duration::from_millis(interval as u64)) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn interrupt_loop(shared: &DeviceShared, halt: &Receiver<()>) {
    let len = shared.input_report_len().max(1);
    let mut wire = vec![0u8; len];
    loop {
        match shared.minidriver.call(MinidriverIoctl::ReadReport, &[], &mut wire) {
            Ok(n) => {
                let n = n.min(len);
                if shared.uses_report_ids {
                    shared.publish(&wire[..n]);
                } else {
                    let mut report = Vec::with_capacity(n + 1);
                    report.push(0);
                    report.extend_from_slice(&wire[..n]);
                    shared.publish(&report);
                }
            }
            Err(e) => {
                if shared.check_removed().is_err() {
                    break;
                }
                warn!(device = %shared.id, error = %e, "ReadReport failed");
                match halt.recv_timeout(READ_ERROR_BACKOFF) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        match halt.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

// --------------------- pending reads ---------------------

#[derive(Debug)]
enum ReadState {
    Waiting,
    Done(Result<Vec<u8>, NtStatus>),
}

/// A queued read. Completed exactly once, by data, cancellation or removal.
#[derive(Debug)]
pub struct PendingRead {
    cursor: usize,
    len: usize,
    state: Mutex<ReadState>,
    done: Condvar,
    device: Weak<DeviceShared>,
}

impl PendingRead {
    /// Claims the read with `result`. Returns `false` if it was already completed.
    fn complete(&self, result: Result<Vec<u8>, NtStatus>) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, ReadState::Waiting) {
            return false;
        }
        *state = ReadState::Done(result);
        self.done.notify_all();
        true
    }

    /// Completes the read from its cursor if there is data. Returns `false` when the read
    /// is still waiting. Data is only consumed once the claim is held.
    fn try_fill(&self, buffer: &RingBuffer) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, ReadState::Waiting) {
            return true;
        }
        let mut out = vec![0u8; self.len];
        let result = match buffer.read_new(self.cursor, &mut out) {
            Ok(0) => return false,
            Ok(n) => {
                out.truncate(n);
                Ok(out)
            }
            Err(e) => Err(NtStatus::from(e)),
        };
        *state = ReadState::Done(result);
        self.done.notify_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock(), ReadState::Done(_))
    }

    /// Result if completed.
    pub fn try_result(&self) -> Option<Result<Vec<u8>, NtStatus>> {
        match &*self.state.lock() {
            ReadState::Waiting => None,
            ReadState::Done(result) => Some(result.clone()),
        }
    }

    /// Blocks until the read completes.
    pub fn wait(&self) -> Result<Vec<u8>, NtStatus> {
        let mut state = self.state.lock();
        loop {
            if let ReadState::Done(result) = &*state {
                return result.clone();
            }
            self.done.wait(&mut state);
        }
    }

    /// Blocks until the read completes or `timeout` elapses (`None`).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Vec<u8>, NtStatus>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let ReadState::Done(result) = &*state {
                return Some(result.clone());
            }
            if self.done.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    ReadState::Done(result) => Some(result.clone()),
                    ReadState::Waiting => None,
                };
            }
        }
    }

    /// Cancels the read. Returns `true` if this call completed it with `Cancelled`,
    /// `false` if it had already completed.
    pub fn cancel(&self) -> bool {
        if let Some(device) = self.device.upgrade() {
            let mut pending = device.pending.lock();
            pending.retain(|r| !std::ptr::eq(Arc::as_ptr(r), self));
        }
        self.complete(Err(NtStatus::Cancelled))
    }
}

/// Result of [`HidFile::read`].
#[derive(Debug)]
pub enum ReadOutcome {
    Complete(Vec<u8>),
    Pending(Arc<PendingRead>),
}

// --------------------- handles ---------------------

/// An open handle on a device: one ring buffer cursor and at most one queued read.
#[derive(Debug)]
pub struct HidFile {
    shared: Arc<DeviceShared>,
    cursor: usize,
    outstanding: Mutex<Option<Arc<PendingRead>>>,
}

impl HidFile {
    pub fn preparsed(&self) -> &Arc<Preparsed> {
        &self.shared.preparsed
    }

    /// Reads one input report into a buffer of `buffer_len` bytes.
    ///
    /// ### Errors
    /// - `DeletePending` after removal.
    /// - `InvalidDeviceRequest` if the device has no input reports, or a read is
    ///   already queued on this handle.
    /// - `BufferTooSmall` if `buffer_len` is below the input report length.
    pub fn read(&self, buffer_len: usize) -> Result<ReadOutcome, NtStatus> {
        let shared = &self.shared;
        shared.check_removed()?;

        let len = shared.input_report_len();
        if len == 0 {
            return Err(NtStatus::InvalidDeviceRequest);
        }
        if buffer_len < len {
            return Err(NtStatus::BufferTooSmall);
        }

        let mut outstanding = self.outstanding.lock();
        if outstanding.as_ref().is_some_and(|r| !r.is_complete()) {
            return Err(NtStatus::InvalidDeviceRequest);
        }

        let mut out = vec![0u8; len];
        if shared.buffer.read_new(self.cursor, &mut out)? > 0 {
            return Ok(ReadOutcome::Complete(out));
        }

        if shared.is_opportunistic() {
            if shared.buffer.read_latest(self.cursor, &mut out)? > 0 {
                return Ok(ReadOutcome::Complete(out));
            }
            let report = shared.fetch_input_report(shared.default_input_report_id())?;
            return Ok(ReadOutcome::Complete(report));
        }

        let read = Arc::new(PendingRead {
            cursor: self.cursor,
            len,
            state: Mutex::new(ReadState::Waiting),
            done: Condvar::new(),
            device: Arc::downgrade(shared),
        });
        shared.enqueue(Arc::clone(&read))?;
        *outstanding = Some(Arc::clone(&read));
        drop(outstanding);

        // A report may have landed between the buffer check and the enqueue.
        if shared.buffer.pending(self.cursor)? > 0 {
            shared.drain_pending();
        }
        debug!(device = %shared.id, cursor = self.cursor, "read queued");
        Ok(ReadOutcome::Pending(read))
    }

    /// [`read`](Self::read), waiting up to `timeout` for a queued read.
    ///
    /// On timeout the read is cancelled and `Timeout` is returned, unless it completed
    /// in the meantime.
    pub fn read_timeout(&self, buffer_len: usize, timeout: Duration) -> Result<Vec<u8>, NtStatus> {
        match self.read(buffer_len)? {
            ReadOutcome::Complete(report) => Ok(report),
            ReadOutcome::Pending(read) => {
                if let Some(result) = read.wait_timeout(timeout) {
                    return result;
                }
                if read.cancel() {
                    Err(NtStatus::Timeout)
                } else {
                    read.wait()
                }
            }
        }
    }

    /// Reports lost by this handle to buffer overruns since the last call.
    pub fn take_dropped(&self) -> Result<u64, NtStatus> {
        Ok(self.shared.buffer.take_dropped(self.cursor)?)
    }

    /// Output report via `WriteReport`. `buffer[0]` is the report ID.
    pub fn write(&self, buffer: &[u8]) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        self.shared
            .set_report(MinidriverIoctl::WriteReport, ReportType::Output, buffer)
    }

    pub fn set_output_report(&self, buffer: &[u8]) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        self.shared
            .set_report(MinidriverIoctl::SetOutputReport, ReportType::Output, buffer)
    }

    pub fn set_feature(&self, buffer: &[u8]) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        self.shared
            .set_report(MinidriverIoctl::SetFeature, ReportType::Feature, buffer)
    }

    /// `buffer[0]` selects the report ID on input.
    pub fn get_feature(&self, buffer: &mut [u8]) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        self.shared
            .get_report(MinidriverIoctl::GetFeature, ReportType::Feature, buffer)
    }

    /// `buffer[0]` selects the report ID on input.
    pub fn get_input_report(&self, buffer: &mut [u8]) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        self.shared
            .get_report(MinidriverIoctl::GetInputReport, ReportType::Input, buffer)
    }

    pub fn poll_interval(&self) -> Result<u32, NtStatus> {
        self.shared.check_removed()?;
        Ok(self.shared.poll_interval())
    }

    pub fn set_poll_interval(&self, ms: u32) -> Result<(), NtStatus> {
        self.shared.check_removed()?;
        if ms > MAX_POLL_INTERVAL_MS {
            return Err(NtStatus::InvalidParameter);
        }
        self.shared.poll_interval_ms.store(ms, Ordering::Relaxed);
        Ok(())
    }

    pub fn input_buffers(&self) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        Ok(self.shared.buffer.capacity())
    }

    /// Resizes the ring buffer; buffered reports are discarded for every handle.
    pub fn set_input_buffers(&self, n: usize) -> Result<(), NtStatus> {
        self.shared.check_removed()?;
        Ok(self.shared.buffer.set_capacity(n)?)
    }

    pub fn collection_information(&self) -> Result<CollectionInformation, NtStatus> {
        self.shared.check_removed()?;
        let shared = &self.shared;
        Ok(CollectionInformation {
            descriptor_size: shared.collection_descriptor.len() as u32,
            polled: shared.polled,
            vendor_id: shared.attributes.vendor_id,
            product_id: shared.attributes.product_id,
            version: shared.attributes.version,
        })
    }

    /// Copies the serialized capability table into `output`.
    pub fn collection_descriptor(&self, output: &mut [u8]) -> Result<usize, NtStatus> {
        self.shared.check_removed()?;
        let blob = &self.shared.collection_descriptor;
        if output.len() < blob.len() {
            return Err(NtStatus::BufferTooSmall);
        }
        output[..blob.len()].copy_from_slice(blob);
        Ok(blob.len())
    }

    /// Size in bytes of the raw report descriptor.
    pub fn report_descriptor_size(&self) -> usize {
        self.shared.descriptor_size
    }

    pub fn get_string(&self, id: StringId) -> Result<String, NtStatus> {
        self.shared.check_removed()?;
        minidriver::get_string(self.shared.minidriver.as_ref(), id)
    }

    /// Skips every report buffered for this handle.
    pub fn flush_queue(&self) -> Result<(), NtStatus> {
        self.shared.check_removed()?;
        Ok(self.shared.buffer.flush_cursor(self.cursor)?)
    }
}

impl Drop for HidFile {
    fn drop(&mut self) {
        if let Some(read) = self.outstanding.lock().take() {
            self.shared.dequeue(&read);
            read.complete(Err(NtStatus::Cancelled));
        }
        self.shared.buffer.remove_cursor(self.cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn queued_read(cursor: usize) -> Arc<PendingRead> {
        Arc::new(PendingRead {
            cursor,
            len: 1,
            state: Mutex::new(ReadState::Waiting),
            done: Condvar::new(),
            device: Weak::new(),
        })
    }

    #[test]
    fn fill_and_cancel_claim_a_read_exactly_once() {
        let buffer = Arc::new(RingBuffer::new(1).unwrap());
        let (mut filled, mut cancelled) = (0, 0);

        for i in 0..500u32 {
            let cursor = buffer.add_cursor().unwrap();
            buffer.write(&[i as u8]);
            let read = queued_read(cursor);
            let barrier = Arc::new(Barrier::new(2));

            let filler = {
                let (read, buffer, barrier) = (read.clone(), buffer.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    read.try_fill(&buffer)
                })
            };
            barrier.wait();
            let cancel_won = read.cancel();
            assert!(filler.join().unwrap(), "a completed read never goes back to the queue");

            match read.try_result() {
                Some(Err(NtStatus::Cancelled)) => {
                    assert!(cancel_won);
                    assert_eq!(buffer.pending(cursor).unwrap(), 1, "cancel must not consume");
                    cancelled += 1;
                }
                Some(Ok(report)) => {
                    assert!(!cancel_won);
                    assert_eq!(report, vec![i as u8]);
                    assert_eq!(buffer.pending(cursor).unwrap(), 0);
                    filled += 1;
                }
                other => panic!("unexpected state {other:?}"),
            }
            assert!(!read.complete(Err(NtStatus::DeletePending)));
            buffer.remove_cursor(cursor);
        }
        assert_eq!(filled + cancelled, 500);
    }

    #[test]
    fn fill_leaves_a_read_waiting_without_data() {
        let buffer = RingBuffer::new(1).unwrap();
        let cursor = buffer.add_cursor().unwrap();
        let read = queued_read(cursor);

        assert!(!read.try_fill(&buffer));
        assert!(!read.is_complete());
        buffer.write(&[9]);
        assert!(read.try_fill(&buffer));
        assert_eq!(read.wait(), Ok(vec![9]));
        assert!(!read.cancel());
    }
}
