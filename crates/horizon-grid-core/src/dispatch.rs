//! Event dispatch: the before/apply/after protocol.
//!
//! A [`Dispatcher`] delivers events to the listeners of their source and, for
//! kinds that alert containers, to every element of the source's alert chain
//! (cell, then its row and column, then the table). Each container receives
//! its own copy of the event with the container as source and the original
//! source as trigger.
//!
//! # Phases
//!
//! - **Before**: vetoable kinds. Synchronous, on the calling thread. The first
//!   veto stops the walk and is returned; the mutation must not be applied.
//! - **After**: everything else. Kinds marked off-thread are queued on the
//!   dispatcher's lane and delivered by the worker pool in submission order;
//!   the rest are delivered before `emit` returns.
//!
//! # Faults
//!
//! Listener panics are caught. In a before-phase a panicking listener counts
//! as having no objection; in an after-phase delivery continues with the next
//! listener. A veto returned from an after-phase is ignored. All of these are
//! reported to the dispatcher's [`FaultSink`].
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = Dispatcher::new(Arc::new(InlinePool::new()));
//! match dispatcher.perform(EventKind::BeforeNewValue, cell.clone(), &args, || cell.store(new))? {
//!     Performed::Applied(()) => {}
//!     Performed::Vetoed(veto) => return Err(veto.into()),
//! }
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::element::{ElementRef, alert_chain};
use crate::error::{EventError, Result};
use crate::event::{AssemblyId, Event, EventFactory, EventKind, PayloadArg};
use crate::fault::{Fault, FaultKind, FaultSink, fault_sink, panic_message};
use crate::listener::{EventListener, ListenerHandle, Veto};
use crate::taxonomy::EventTaxonomy;
use crate::threadpool::WorkerPool;

/// What happened to an emitted event.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Delivered before `emit` returned, to `notified` listener invocations.
    Delivered {
        /// How many listener calls were made.
        notified: usize,
    },
    /// Handed to the worker pool for delivery.
    Queued,
    /// A before-phase listener objected.
    Vetoed(Veto),
}

impl Outcome {
    /// Whether a listener objected.
    pub fn is_vetoed(&self) -> bool {
        matches!(self, Self::Vetoed(_))
    }

    /// The veto, if there was one.
    pub fn into_veto(self) -> Option<Veto> {
        match self {
            Self::Vetoed(veto) => Some(veto),
            _ => None,
        }
    }
}

/// The result of [`Dispatcher::perform`].
#[derive(Debug)]
pub enum Performed<T> {
    /// The mutation ran and the after-phase was dispatched.
    Applied(T),
    /// The mutation was vetoed and never ran.
    Vetoed(Veto),
}

/// One event and the listeners registered for it when its dispatch began.
struct Delivery {
    event: Event,
    listeners: Vec<ListenerHandle>,
}

impl Delivery {
    fn new(event: Event) -> Self {
        let listeners = event.source().listeners().snapshot(event.kind());
        Self { event, listeners }
    }

    /// The queued form. Listeners stay weak while the unit waits.
    fn into_queued(self) -> (Event, Vec<Weak<dyn EventListener>>) {
        let listeners = self.listeners.iter().map(Arc::downgrade).collect();
        (self.event, listeners)
    }
}

/// One ordered unit of off-thread delivery.
type Unit = Vec<(Event, Vec<Weak<dyn EventListener>>)>;

/// The per-dispatcher FIFO of off-thread deliveries.
///
/// At most one drain job is in the pool at a time; events emitted while it
/// runs, including from its own listeners, are appended and picked up by the
/// same drain.
struct Lane {
    sender: Sender<Unit>,
    receiver: Receiver<Unit>,
    draining: AtomicBool,
    faults: Arc<dyn FaultSink>,
}

impl Lane {
    fn new(faults: Arc<dyn FaultSink>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            draining: AtomicBool::new(false),
            faults,
        }
    }

    fn enqueue(self: &Arc<Self>, unit: Unit, pool: &dyn WorkerPool) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(unit);

        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }

        let lane = Arc::clone(self);
        if let Err(error) = pool.submit(Box::new(move || lane.drain())) {
            tracing::warn!(
                target: "horizon_grid_core::dispatch",
                %error,
                "worker pool rejected delivery; delivering on the calling thread"
            );
            self.faults.report(Fault::new(
                FaultKind::SubmitFailed,
                format!("off-thread delivery fell back to the caller: {error}"),
            ));
            self.drain();
        }
    }

    fn drain(&self) {
        loop {
            while let Ok(unit) = self.receiver.try_recv() {
                for (event, listeners) in &unit {
                    let listeners: Vec<ListenerHandle> =
                        listeners.iter().filter_map(Weak::upgrade).collect();
                    deliver_after(event, &listeners, self.faults.as_ref());
                }
            }

            self.draining.store(false, Ordering::Release);
            // Re-check: an enqueue between the last try_recv and the store
            // above saw `draining == true` and relied on us.
            if self.receiver.is_empty() || self.draining.swap(true, Ordering::AcqRel) {
                break;
            }
        }
    }

    fn backlog(&self) -> usize {
        self.receiver.len()
    }
}

/// Delivers events according to the taxonomy.
pub struct Dispatcher {
    factory: EventFactory,
    pool: Arc<dyn WorkerPool>,
    faults: Arc<dyn FaultSink>,
    lane: Arc<Lane>,
}

impl Dispatcher {
    /// A dispatcher over the standard taxonomy, reporting to the process-wide
    /// fault sink.
    pub fn new(pool: Arc<dyn WorkerPool>) -> Self {
        Self::with_parts(EventFactory::new(), pool, fault_sink())
    }

    /// A dispatcher from explicit parts.
    pub fn with_parts(
        factory: EventFactory,
        pool: Arc<dyn WorkerPool>,
        faults: Arc<dyn FaultSink>,
    ) -> Self {
        Self {
            factory,
            pool,
            lane: Arc::new(Lane::new(faults.clone())),
            faults,
        }
    }

    /// The event factory.
    pub fn factory(&self) -> &EventFactory {
        &self.factory
    }

    /// The taxonomy events are validated against.
    pub fn taxonomy(&self) -> &'static EventTaxonomy {
        self.factory.taxonomy()
    }

    /// The worker pool used for off-thread work.
    pub fn pool(&self) -> &Arc<dyn WorkerPool> {
        &self.pool
    }

    /// The sink faults are reported to.
    pub fn fault_sink(&self) -> &Arc<dyn FaultSink> {
        &self.faults
    }

    /// Report a fault to this dispatcher's sink.
    pub fn report(&self, fault: Fault) {
        self.faults.report(fault);
    }

    /// Number of off-thread units waiting for delivery.
    pub fn backlog(&self) -> usize {
        self.lane.backlog()
    }

    /// Block until the pool is idle; see [`WorkerPool::wait_idle`].
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.pool.wait_idle(timeout)
    }

    /// Build and dispatch one event.
    ///
    /// Before kinds run the before-phase and return [`Outcome::Vetoed`] or
    /// [`Outcome::Delivered`]. Other kinds run the after-phase. A construction
    /// error is returned as is and nothing is delivered.
    #[tracing::instrument(
        skip_all,
        target = "horizon_grid_core::dispatch",
        level = "trace",
        fields(kind = ?kind, source = %source.element_id())
    )]
    pub fn emit(
        &self,
        kind: EventKind,
        source: ElementRef,
        trigger: Option<ElementRef>,
        assembly_id: AssemblyId,
        payload: &[PayloadArg],
    ) -> Result<Outcome> {
        let event = self
            .factory
            .create(kind, source, trigger, assembly_id, payload)?;
        Ok(self.dispatch(event))
    }

    /// Dispatch an already-built event.
    ///
    /// The listeners of every element in the alert chain are captured when
    /// the dispatch begins. Listeners registered later do not hear this
    /// event, even when it is delivered off-thread.
    pub fn dispatch(&self, event: Event) -> Outcome {
        let traits = *self.taxonomy().traits(event.kind());
        let targets: Vec<Delivery> = self
            .targets(&event, traits.alerts_container)
            .into_iter()
            .map(Delivery::new)
            .collect();

        if traits.vetoable {
            return self.before_phase(&targets);
        }

        let targets: Vec<Delivery> = targets
            .into_iter()
            .filter(|d| !d.listeners.is_empty())
            .collect();
        if targets.is_empty() {
            tracing::trace!(
                target: "horizon_grid_core::dispatch",
                kind = ?event.kind(),
                "no listeners in alert chain"
            );
            return Outcome::Delivered { notified: 0 };
        }

        if traits.runs_off_thread {
            let unit = targets.into_iter().map(Delivery::into_queued).collect();
            self.lane.enqueue(unit, self.pool.as_ref());
            Outcome::Queued
        } else {
            let notified = targets
                .iter()
                .map(|d| deliver_after(&d.event, &d.listeners, self.faults.as_ref()))
                .sum();
            Outcome::Delivered { notified }
        }
    }

    /// Run a complete before/apply/after sequence under a fresh assembly.
    ///
    /// `before_kind` must be a vetoable kind whose after kind has the same
    /// source (`BeforeNewValue`, `BeforeDelete`). `apply` runs only when no
    /// listener objects, and the paired after kind is dispatched with the same
    /// payload once it returns.
    pub fn perform<T>(
        &self,
        before_kind: EventKind,
        source: ElementRef,
        payload: &[PayloadArg],
        apply: impl FnOnce() -> T,
    ) -> Result<Performed<T>> {
        self.perform_in(AssemblyId::next(), before_kind, source, payload, apply)
    }

    /// [`perform`](Self::perform) within an existing assembly.
    pub fn perform_in<T>(
        &self,
        assembly_id: AssemblyId,
        before_kind: EventKind,
        source: ElementRef,
        payload: &[PayloadArg],
        apply: impl FnOnce() -> T,
    ) -> Result<Performed<T>> {
        let (before, after) = self.phase_events(assembly_id, before_kind, source, payload)?;
        if let Outcome::Vetoed(veto) = self.dispatch(before) {
            return Ok(Performed::Vetoed(veto));
        }

        let value = apply();
        self.dispatch(after);
        Ok(Performed::Applied(value))
    }

    /// [`perform`](Self::perform) with a mutation that may decline.
    ///
    /// `apply` returning `None` means the mutation did not happen after all;
    /// the after kind is then not dispatched and the result is
    /// `Performed::Applied(None)`.
    pub fn perform_if<T>(
        &self,
        before_kind: EventKind,
        source: ElementRef,
        payload: &[PayloadArg],
        apply: impl FnOnce() -> Option<T>,
    ) -> Result<Performed<Option<T>>> {
        let (before, after) =
            self.phase_events(AssemblyId::next(), before_kind, source, payload)?;
        if let Outcome::Vetoed(veto) = self.dispatch(before) {
            return Ok(Performed::Vetoed(veto));
        }

        let value = apply();
        if value.is_some() {
            self.dispatch(after);
        } else {
            tracing::trace!(
                target: "horizon_grid_core::dispatch",
                kind = ?before_kind,
                "mutation declined after the before-phase"
            );
        }
        Ok(Performed::Applied(value))
    }

    /// The before event and its paired after event. Both are built before
    /// the walk, so an applied mutation always has its after event.
    fn phase_events(
        &self,
        assembly_id: AssemblyId,
        before_kind: EventKind,
        source: ElementRef,
        payload: &[PayloadArg],
    ) -> Result<(Event, Event)> {
        let after_kind = self
            .taxonomy()
            .after_kind(before_kind)
            .ok_or(EventError::NotVetoable(before_kind))?;
        let before = self
            .factory
            .create(before_kind, source.clone(), None, assembly_id, payload)?;
        let after = self
            .factory
            .create(after_kind, source, None, assembly_id, payload)?;
        Ok((before, after))
    }

    fn targets(&self, event: &Event, alerts_container: bool) -> Vec<Event> {
        let mut targets = vec![event.clone()];
        if alerts_container {
            let chain = alert_chain(event.source().as_ref());
            targets.extend(chain.into_iter().map(|container| event.retarget(container)));
        }
        targets
    }

    fn before_phase(&self, targets: &[Delivery]) -> Outcome {
        let mut notified = 0;
        for Delivery { event, listeners } in targets {
            for listener in listeners {
                notified += 1;
                match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(veto)) => {
                        tracing::debug!(
                            target: "horizon_grid_core::dispatch",
                            kind = ?event.kind(),
                            element = %event.source_id(),
                            reason = veto.reason().unwrap_or(""),
                            "vetoed"
                        );
                        return Outcome::Vetoed(veto);
                    }
                    Err(payload) => {
                        self.faults.report(
                            Fault::new(FaultKind::ListenerPanic, panic_message(payload.as_ref()))
                                .with_event(event.kind())
                                .with_element(event.source_id()),
                        );
                    }
                }
            }
        }
        Outcome::Delivered { notified }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("factory", &self.factory)
            .field("backlog", &self.backlog())
            .finish()
    }
}

/// Deliver an after-phase event to `listeners`, isolating each one.
fn deliver_after(event: &Event, listeners: &[ListenerHandle], faults: &dyn FaultSink) -> usize {
    for listener in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            Ok(Ok(())) => {}
            Ok(Err(veto)) => faults.report(
                Fault::new(
                    FaultKind::LateVeto,
                    format!("veto ignored after the fact: {veto}"),
                )
                .with_event(event.kind())
                .with_element(event.source_id()),
            ),
            Err(payload) => faults.report(
                Fault::new(FaultKind::ListenerPanic, panic_message(payload.as_ref()))
                    .with_event(event.kind())
                    .with_element(event.source_id()),
            ),
        }
    }
    listeners.len()
}
