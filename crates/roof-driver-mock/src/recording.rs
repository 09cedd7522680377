//! Status sink that keeps every event for later assertions.

use parking_lot::Mutex;
use roof_core::{StatusEvent, StatusSink};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn last(&self) -> Option<StatusEvent> {
        self.events.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
    }
}
