//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test harness helpers and shared exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Helpers for asserting on what a limited function was called with and when.
//!
//! Timestamps come from [`tokio::time::Instant`], so under
//! `#[tokio::test(start_paused = true)]` they are exact virtual offsets.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// One captured call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall<T> {
    /// Offset from the recorder's creation.
    pub at: Duration,
    /// Value handed to the recorder.
    pub value: T,
}

/// Cloneable sink that records values with the time they arrived.
#[derive(Debug)]
pub struct CallRecorder<T> {
    origin: Instant,
    calls: Arc<Mutex<Vec<RecordedCall<T>>>>,
}

impl<T> Clone for CallRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin,
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T> Default for CallRecorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CallRecorder<T> {
    /// Start a recorder whose offsets are measured from now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record `value` at the current instant.
    pub fn record(&self, value: T) {
        let at = self.origin.elapsed();
        trace!(offset_ms = at.as_millis() as u64, "call recorded");
        self.calls.lock().push(RecordedCall { at, value });
    }

    /// Number of recorded calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

impl<T: Clone> CallRecorder<T> {
    /// Snapshot of every recorded call.
    pub fn calls(&self) -> Vec<RecordedCall<T>> {
        self.calls.lock().clone()
    }

    /// Snapshot of the recorded values without timestamps.
    pub fn values(&self) -> Vec<T> {
        self.calls.lock().iter().map(|call| call.value.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn records_virtual_offsets() {
        let recorder = CallRecorder::new();
        recorder.record("first");
        tokio::time::sleep(Duration::from_millis(250)).await;
        recorder.clone().record("second");

        let calls = recorder.calls();
        assert_eq!(calls[0].at, Duration::ZERO);
        assert_eq!(calls[1].at, Duration::from_millis(250));
        assert_eq!(recorder.values(), vec!["first", "second"]);
        assert_eq!(recorder.len(), 2);
    }
}
