//! Raw-input broadcast bus.
//!
//! Every attached device's reader thread publishes the input reports it fetches here
//! (unless the device opted out, or it is a top-level mouse or keyboard). Listeners
//! register with a filter and an optional device tag.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::RawInputEvent;

/// Trait for reacting to raw input reports from any device.
pub trait RawInputListener: Send {
    fn on_report(&mut self, event: &RawInputEvent);
}

/// Determines which reports a listener wants to receive.
#[derive(Debug, Clone, Copy)]
pub enum EventFilter {
    All,
    /// Only reports carrying this report ID.
    ReportId(u8),
    Custom(fn(&RawInputEvent) -> bool),
}

impl EventFilter {
    fn accepts(&self, event: &RawInputEvent) -> bool {
        match *self {
            EventFilter::All => true,
            EventFilter::ReportId(id) => event.report_id == id,
            EventFilter::Custom(f) => f(event),
        }
    }
}

/// Metadata-wrapped listener with filters and control flags.
struct ListenerEntry {
    listener: Box<dyn RawInputListener>,
    enabled: bool,
    filter: EventFilter,
    tag: Option<String>, // device id
}

/// Bus shared between the manager and the devices' reader threads.
pub type SharedBus = Arc<Mutex<RawInputBus>>;

#[derive(Default)]
pub struct RawInputBus {
    next_id: u64,
    listeners: HashMap<u64, ListenerEntry>,
}

impl RawInputBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBus {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Registers a listener with a filter and an optional device id tag.
    pub fn add_listener(
        &mut self,
        listener: impl RawInputListener + 'static,
        filter: EventFilter,
        tag: Option<String>,
    ) -> u64 {
        let id = self.next_id;
        self.listeners.insert(
            id,
            ListenerEntry {
                listener: Box::new(listener),
                enabled: true,
                filter,
                tag,
            },
        );
        self.next_id += 1;
        id
    }

    /// Enables a previously registered listener.
    pub fn enable(&mut self, id: u64) {
        if let Some(entry) = self.listeners.get_mut(&id) {
            entry.enabled = true;
        }
    }

    /// Disables (mutes) a listener without removing it.
    pub fn disable(&mut self, id: u64) {
        if let Some(entry) = self.listeners.get_mut(&id) {
            entry.enabled = false;
        }
    }

    /// Unregisters a listener entirely.
    pub fn remove_listener(&mut self, id: u64) {
        self.listeners.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers one report to all active and matching listeners.
    pub fn emit(&mut self, event: &RawInputEvent) {
        for entry in self.listeners.values_mut() {
            if !entry.enabled {
                continue;
            }
            if let Some(ref wanted_id) = entry.tag {
                if event.device_id != *wanted_id {
                    continue;
                }
            }
            if entry.filter.accepts(event) {
                entry.listener.on_report(event);
            }
        }
    }

    pub fn emit_all(&mut self, events: &[RawInputEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}
