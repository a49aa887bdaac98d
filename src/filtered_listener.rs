use crate::event::RawInputEvent;
use crate::eventbus::RawInputListener;

/// Wraps a listener and filters reports based on a user-supplied predicate.
pub struct FilteredListener {
    predicate: Box<dyn Fn(&RawInputEvent) -> bool + Send + Sync>,
    inner: Box<dyn RawInputListener>,
}

impl FilteredListener {
    pub fn new(
        predicate: impl Fn(&RawInputEvent) -> bool + Send + Sync + 'static,
        inner: Box<dyn RawInputListener>,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            inner,
        }
    }
}

impl RawInputListener for FilteredListener {
    fn on_report(&mut self, event: &RawInputEvent) {
        if (self.predicate)(event) {
            self.inner.on_report(event);
        }
    }
}
