//! Asynchronous recomputation of derived cells.
//!
//! The [`PendingRecalcCoordinator`] keeps the set of derived cells whose value
//! is stale. Invalidating a cell puts it in the set and submits one job to the
//! table's worker pool; further invalidations coalesce into that job. A cell
//! invalidated while its job is running is marked superseded: the running
//! result is discarded and the cell is queued again once the job returns.
//!
//! The table hears `Pendings` when the set goes from empty to non-empty and
//! `NoPendings` when it drains, exactly once per transition and in order.
//!
//! ```text
//!            invalidate              job starts
//!   (none) ─────────────► Queued ─────────────► Running ──► commit ──► (none)
//!                           ▲                      │
//!                           │ job returns          │ invalidate
//!                           └──── Superseded ◄─────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use horizon_grid_core::logging::{span_names, targets};
use horizon_grid_core::{
    AssemblyId, CellValue, ElementId, EventKind, Fault, FaultKind, JobId, panic_message,
};
use parking_lot::{Mutex, ReentrantMutex};

use crate::cell::{Cell, WriteOrigin};
use crate::error::GridError;
use crate::evaluator::RecalcContext;
use crate::table::Table;

/// Where a stale cell is in its recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingState {
    /// A job is waiting in the pool.
    Queued,
    /// The job is evaluating.
    Running,
    /// Invalidated again while running; will be requeued.
    Superseded,
}

struct Entry {
    cell: Weak<Cell>,
    state: PendingState,
    /// Identifies the job responsible for the entry. A job whose ticket no
    /// longer matches has been cancelled or replaced.
    ticket: u64,
    job: Option<JobId>,
}

/// Tracks and schedules recomputation of a table's derived cells.
pub struct PendingRecalcCoordinator {
    table: Weak<Table>,
    entries: Mutex<HashMap<ElementId, Entry>>,
    /// Serializes set transitions with their announcements. Reentrant because
    /// an inline pool delivers announcements on the announcing thread, and a
    /// listener may invalidate further cells from there.
    transitions: ReentrantMutex<()>,
    next_ticket: AtomicU64,
}

impl PendingRecalcCoordinator {
    pub(crate) fn new(table: Weak<Table>) -> Self {
        Self {
            table,
            entries: Mutex::new(HashMap::new()),
            transitions: ReentrantMutex::new(()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Number of cells awaiting recomputation.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether any cell awaits recomputation.
    pub fn has_pendings(&self) -> bool {
        !self.entries.lock().is_empty()
    }

    /// Whether the cell with identity `cell` awaits recomputation.
    pub fn is_pending(&self, cell: ElementId) -> bool {
        self.entries.lock().contains_key(&cell)
    }

    /// Where the cell with identity `cell` is, if it is pending.
    pub fn state_of(&self, cell: ElementId) -> Option<PendingState> {
        self.entries.lock().get(&cell).map(|e| e.state)
    }

    /// The pending cells, in creation order.
    pub fn pending_cells(&self) -> Vec<ElementId> {
        let mut ids: Vec<_> = self.entries.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Mark `cell` stale and make sure a recomputation is on its way.
    pub fn invalidate(&self, cell: &Arc<Cell>) {
        if cell.is_deleted() {
            return;
        }
        let Some(table) = self.table.upgrade() else {
            return;
        };
        if table.is_deleted() {
            return;
        }

        let id = cell.id();
        let guard = self.transitions.lock();
        let scheduled = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&id) {
                Some(entry) => {
                    if entry.state == PendingState::Running {
                        entry.state = PendingState::Superseded;
                    }
                    tracing::trace!(
                        target: targets::PENDING,
                        cell = %id,
                        state = ?entry.state,
                        "invalidation coalesced"
                    );
                    None
                }
                None => {
                    let was_empty = entries.is_empty();
                    let ticket = self.ticket();
                    entries.insert(
                        id,
                        Entry {
                            cell: Arc::downgrade(cell),
                            state: PendingState::Queued,
                            ticket,
                            job: None,
                        },
                    );
                    Some((ticket, was_empty))
                }
            }
        };

        if let Some((_, true)) = scheduled {
            self.announce(&table, EventKind::Pendings);
        }
        drop(guard);

        if let Some((ticket, _)) = scheduled {
            self.submit(&table, id, ticket);
        }
    }

    /// Drop `cell` from the set, cancelling its queued job. A running job
    /// finishes but does not commit.
    pub fn cancel(&self, cell: &Cell) -> bool {
        let _guard = self.transitions.lock();
        let (removed, emptied) = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(&cell.id());
            let emptied = removed.is_some() && entries.is_empty();
            (removed, emptied)
        };
        let Some(entry) = removed else {
            return false;
        };

        if let Some(table) = self.table.upgrade() {
            if let Some(job) = entry.job {
                table.dispatcher().pool().cancel(job);
            }
            if emptied {
                self.announce(&table, EventKind::NoPendings);
            }
        }
        tracing::trace!(target: targets::PENDING, cell = %cell.id(), "recomputation cancelled");
        true
    }

    /// Drop every cell from the set.
    ///
    /// A non-empty set that drains this way is announced with `NoPendings`,
    /// unless the table is being deleted.
    pub fn cancel_all(&self) {
        let _guard = self.transitions.lock();
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        if drained.is_empty() {
            return;
        }
        tracing::debug!(
            target: targets::PENDING,
            cancelled = drained.len(),
            "all recomputation cancelled"
        );
        if let Some(table) = self.table.upgrade() {
            for job in drained.iter().filter_map(|e| e.job) {
                table.dispatcher().pool().cancel(job);
            }
            self.announce(&table, EventKind::NoPendings);
        }
    }

    fn submit(&self, table: &Table, cell: ElementId, ticket: u64) {
        let owner = self.table.clone();
        let job = Box::new(move || {
            if let Some(table) = owner.upgrade() {
                table.pending().run(&table, cell, ticket);
            }
        });

        match table.dispatcher().pool().submit(job) {
            Ok(job_id) => {
                let mut entries = self.entries.lock();
                if let Some(entry) = entries.get_mut(&cell) {
                    if entry.ticket == ticket && entry.state == PendingState::Queued {
                        entry.job = Some(job_id);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(target: targets::PENDING, cell = %cell, %error, "recomputation not scheduled");
                table.dispatcher().report(
                    Fault::new(
                        FaultKind::SubmitFailed,
                        format!("recomputation not scheduled: {error}"),
                    )
                    .with_element(cell),
                );
                self.retire(table, cell, ticket);
            }
        }
    }

    /// The job body: evaluate, then commit unless superseded or cancelled.
    fn run(&self, table: &Table, id: ElementId, ticket: u64) {
        let span = tracing::trace_span!(target: targets::PENDING, span_names::RECALC, cell = %id);
        let _enter = span.enter();

        let cell = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&id) else {
                return;
            };
            if entry.ticket != ticket {
                return;
            }
            entry.state = PendingState::Running;
            entry.job = None;
            entry.cell.upgrade()
        };

        let derivation = cell
            .as_ref()
            .filter(|c| !c.is_deleted())
            .and_then(|c| c.derivation());
        let (Some(cell), Some(derivation)) = (cell, derivation) else {
            self.retire(table, id, ticket);
            return;
        };

        let evaluated = {
            let ctx = RecalcContext::new(table, &cell, &derivation);
            catch_unwind(AssertUnwindSafe(|| table.evaluator().recompute(&ctx)))
        };
        let value = match evaluated {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                tracing::debug!(target: targets::PENDING, cell = %id, %error, "evaluation failed");
                Some(CellValue::Error(error.to_string()))
            }
            Err(payload) => {
                table.dispatcher().report(
                    Fault::new(FaultKind::RecalcPanic, panic_message(payload.as_ref()))
                        .with_element(id),
                );
                None
            }
        };

        // Early out for stale results; the store itself re-checks under the lock.
        let commit = {
            let entries = self.entries.lock();
            match entries.get(&id) {
                Some(entry) if entry.ticket == ticket => entry.state == PendingState::Running,
                _ => return,
            }
        };

        if let (true, Some(value)) = (commit, value) {
            match cell.write_value(table, value, WriteOrigin::Recomputed { ticket }) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(target: targets::PENDING, cell = %id, "result not committed");
                }
                Err(GridError::Vetoed(veto)) => {
                    tracing::debug!(
                        target: targets::PENDING,
                        cell = %id,
                        reason = veto.reason().unwrap_or(""),
                        "recomputed value vetoed"
                    );
                }
                Err(error) => {
                    table.dispatcher().report(
                        Fault::new(FaultKind::CommitFailed, error.to_string())
                            .with_event(EventKind::NewValue)
                            .with_element(id),
                    );
                }
            }
        }

        self.complete(table, &cell, ticket);
    }

    /// Run `store` if the job holding `ticket` still owns `cell`'s entry and
    /// is running, with the set locked so no cancellation or invalidation can
    /// interleave. Returns `Some(())` if `store` ran and reported success.
    pub(crate) fn commit_if_current(
        &self,
        cell: &Cell,
        ticket: u64,
        store: impl FnOnce() -> bool,
    ) -> Option<()> {
        let entries = self.entries.lock();
        let current = entries
            .get(&cell.id())
            .is_some_and(|e| e.ticket == ticket && e.state == PendingState::Running);
        (current && !cell.is_deleted() && store()).then_some(())
    }

    /// Settle the entry after its job: requeue if superseded, otherwise
    /// remove it.
    fn complete(&self, table: &Table, cell: &Arc<Cell>, ticket: u64) {
        let id = cell.id();
        let guard = self.transitions.lock();
        let (requeue, emptied) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&id) {
                Some(entry) if entry.ticket == ticket => {
                    if entry.state == PendingState::Superseded && !cell.is_deleted() {
                        let next = self.ticket();
                        entry.state = PendingState::Queued;
                        entry.ticket = next;
                        (Some(next), false)
                    } else {
                        entries.remove(&id);
                        (None, entries.is_empty())
                    }
                }
                _ => (None, false),
            }
        };

        if emptied {
            self.announce(table, EventKind::NoPendings);
        }
        drop(guard);

        if let Some(next) = requeue {
            tracing::trace!(target: targets::PENDING, cell = %id, "superseded; requeued");
            self.submit(table, id, next);
        }
    }

    /// Remove the entry if `ticket` still owns it.
    fn retire(&self, table: &Table, id: ElementId, ticket: u64) {
        let _guard = self.transitions.lock();
        let emptied = {
            let mut entries = self.entries.lock();
            match entries.get(&id) {
                Some(entry) if entry.ticket == ticket => {
                    entries.remove(&id);
                    entries.is_empty()
                }
                _ => false,
            }
        };
        if emptied {
            self.announce(table, EventKind::NoPendings);
        }
    }

    fn announce(&self, table: &Table, kind: EventKind) {
        if table.is_deleted() {
            return;
        }
        let source = match table.element_ref() {
            Ok(source) => source,
            Err(_) => return,
        };
        tracing::debug!(target: targets::PENDING, ?kind, "pending set changed");
        if let Err(error) = table
            .dispatcher()
            .emit(kind, source, None, AssemblyId::next(), &[])
        {
            tracing::warn!(target: targets::PENDING, ?kind, %error, "announcement failed");
        }
    }
}

impl fmt::Debug for PendingRecalcCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        let mut states: Vec<(ElementId, PendingState)> =
            entries.iter().map(|(id, e)| (*id, e.state)).collect();
        states.sort_by_key(|(id, _)| *id);
        f.debug_struct("PendingRecalcCoordinator")
            .field("entries", &states)
            .finish()
    }
}
