use tracing::info;

use crate::event::RawInputEvent;
use crate::eventbus::RawInputListener;

/// A listener that logs every raw input report through `tracing`.
#[derive(Debug, Default)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Logger
    }
}

impl RawInputListener for Logger {
    fn on_report(&mut self, event: &RawInputEvent) {
        info!(
            device = %event.device_id,
            report_id = event.report_id,
            report = ?event.report,
            "raw input"
        );
    }
}
