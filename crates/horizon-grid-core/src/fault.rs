//! Reporting of observer and recomputation faults.
//!
//! Faults are problems that happen after the caller has already been answered:
//! a listener panicking during an after-phase, a listener vetoing something that
//! can no longer be vetoed, an evaluator panicking on a worker thread. They are
//! never returned as errors; they are handed to a [`FaultSink`].
//!
//! The process-wide default sink logs each fault at `error` level. Tables and
//! dispatchers capture the sink current at their construction, so tests can
//! hand a [`CollectingFaultSink`] to the one table they exercise.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::element::ElementId;
use crate::event::EventKind;

/// The installed process-wide sink; `None` means the tracing sink.
static GLOBAL_SINK: OnceLock<RwLock<Option<Arc<dyn FaultSink>>>> = OnceLock::new();

fn global_slot() -> &'static RwLock<Option<Arc<dyn FaultSink>>> {
    GLOBAL_SINK.get_or_init(|| RwLock::new(None))
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A listener panicked.
    ListenerPanic,
    /// A listener returned a veto for an event that cannot be vetoed.
    LateVeto,
    /// An evaluator panicked while recomputing a cell.
    RecalcPanic,
    /// A recomputed value could not be committed.
    CommitFailed,
    /// Work could not be submitted to the worker pool.
    SubmitFailed,
    /// A pool job panicked outside any listener or evaluator.
    JobPanic,
}

/// A fault report.
#[derive(Debug, Clone)]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,
    /// The event being delivered, if any.
    pub event_kind: Option<EventKind>,
    /// The element involved, if any.
    pub element: Option<ElementId>,
    /// Human readable detail.
    pub message: String,
    /// When the fault was observed.
    pub timestamp: DateTime<Utc>,
}

impl Fault {
    /// Create a fault report.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            event_kind: None,
            element: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the event kind being delivered.
    pub fn with_event(mut self, kind: EventKind) -> Self {
        self.event_kind = Some(kind);
        self
    }

    /// Attach the element involved.
    pub fn with_element(mut self, element: ElementId) -> Self {
        self.element = Some(element);
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(kind) = self.event_kind {
            write!(f, " during {kind:?}")?;
        }
        if let Some(element) = self.element {
            write!(f, " on {element}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Receives fault reports.
pub trait FaultSink: Send + Sync {
    /// Handle one fault. Must not panic.
    fn report(&self, fault: Fault);
}

/// Logs every fault through `tracing` at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, fault: Fault) {
        tracing::error!(
            target: "horizon_grid_core::fault",
            kind = ?fault.kind,
            event = ?fault.event_kind,
            element = ?fault.element,
            "{}",
            fault.message
        );
    }
}

/// Records faults in memory.
#[derive(Debug, Default)]
pub struct CollectingFaultSink {
    faults: Mutex<Vec<Fault>>,
}

impl CollectingFaultSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every fault reported so far.
    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().clone()
    }

    /// Remove and return every fault reported so far.
    pub fn take(&self) -> Vec<Fault> {
        std::mem::take(&mut *self.faults.lock())
    }

    /// Number of faults reported.
    pub fn len(&self) -> usize {
        self.faults.lock().len()
    }

    /// Whether nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.faults.lock().is_empty()
    }

    /// Number of faults of `kind`.
    pub fn count(&self, kind: FaultKind) -> usize {
        self.faults.lock().iter().filter(|f| f.kind == kind).count()
    }
}

impl FaultSink for CollectingFaultSink {
    fn report(&self, fault: Fault) {
        tracing::debug!(target: "horizon_grid_core::fault", %fault, "fault collected");
        self.faults.lock().push(fault);
    }
}

/// Replace the process-wide default sink. Returns the previously installed
/// sink, if one was installed.
///
/// Only affects tables and dispatchers created afterwards.
pub fn install_fault_sink(sink: Arc<dyn FaultSink>) -> Option<Arc<dyn FaultSink>> {
    global_slot().write().replace(sink)
}

/// The current process-wide default sink.
pub fn fault_sink() -> Arc<dyn FaultSink> {
    global_slot()
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(TracingFaultSink))
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingFaultSink::new();
        sink.report(Fault::new(FaultKind::LateVeto, "late").with_event(EventKind::NewValue));
        sink.report(Fault::new(FaultKind::ListenerPanic, "boom"));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.count(FaultKind::LateVeto), 1);
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fault_display() {
        let element = ElementId::next();
        let fault = Fault::new(FaultKind::RecalcPanic, "division")
            .with_event(EventKind::NewValue)
            .with_element(element);
        let text = fault.to_string();
        assert!(text.starts_with("RecalcPanic during NewValue on #"));
        assert!(text.ends_with(": division"));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
    }
}
