//! Cells: the value-carrying elements of a table.
//!
//! A cell sits at the intersection of one row and one column and is alerted
//! to its containers in that order. Its value is either set directly or
//! derived from other cells through a [`Derivation`], in which case the
//! table's [`PendingRecalcCoordinator`](crate::PendingRecalcCoordinator)
//! recomputes it off-thread whenever a precedent changes.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use horizon_grid_core::{
    AssemblyId, CellValue, ElementId, ElementKind, ElementRef, EventKind, ListenerRegistry,
    PayloadArg, Performed, TableElement,
};
use parking_lot::RwLock;

use crate::column::Column;
use crate::derivation::Derivation;
use crate::error::{GridError, Result};
use crate::row::Row;
use crate::table::Table;

/// Who is writing a cell's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
    /// [`Cell::set_value`]. Replaces any derivation.
    User,
    /// A recomputation job holding `ticket`.
    Recomputed { ticket: u64 },
}

/// A cell of a table.
pub struct Cell {
    id: ElementId,
    this: Weak<Cell>,
    table: Weak<Table>,
    row: Weak<Row>,
    row_id: ElementId,
    column: Weak<Column>,
    column_id: ElementId,
    value: RwLock<CellValue>,
    derivation: RwLock<Option<Derivation>>,
    registry: ListenerRegistry,
    deleted: AtomicBool,
}

impl Cell {
    pub(crate) fn new(table: Weak<Table>, row: &Arc<Row>, column: &Arc<Column>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ElementId::next(),
            this: this.clone(),
            table,
            row: Arc::downgrade(row),
            row_id: row.id(),
            column: Arc::downgrade(column),
            column_id: column.id(),
            value: RwLock::new(CellValue::Empty),
            derivation: RwLock::new(None),
            registry: ListenerRegistry::new(),
            deleted: AtomicBool::new(false),
        })
    }

    /// The cell's identity.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The current value.
    pub fn value(&self) -> CellValue {
        self.value.read().clone()
    }

    /// The owning table, if it is still alive.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.upgrade()
    }

    /// The row the cell belongs to.
    pub fn row(&self) -> Option<Arc<Row>> {
        self.row.upgrade()
    }

    /// The column the cell belongs to.
    pub fn column(&self) -> Option<Arc<Column>> {
        self.column.upgrade()
    }

    pub(crate) fn row_id(&self) -> ElementId {
        self.row_id
    }

    pub(crate) fn column_id(&self) -> ElementId {
        self.column_id
    }

    pub(crate) fn owner(&self) -> &Weak<Table> {
        &self.table
    }

    /// Whether the cell has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// `(row index, column index)` of the cell, while both exist.
    pub fn address(&self) -> Option<(usize, usize)> {
        let table = self.table()?;
        Some((table.row_index(self.row_id)?, table.column_index(self.column_id)?))
    }

    /// Set the value.
    ///
    /// Fires `BeforeNewValue` on the cell, its row, its column and the table;
    /// any of their listeners may veto, in which case the value is unchanged
    /// and [`GridError::Vetoed`] is returned. Otherwise the value is stored,
    /// `NewValue` is queued for delivery and cells derived from this one are
    /// queued for recomputation.
    ///
    /// If another write lands while the listeners are being consulted, the
    /// announced old value is stale and the whole protocol runs again against
    /// the new one.
    ///
    /// Setting a value replaces any derivation. Returns `false` if the value
    /// was already equal and nothing was announced.
    pub fn set_value(&self, value: impl Into<CellValue>) -> Result<bool> {
        let table = self.live_table()?;
        self.write_value(&table, value.into(), WriteOrigin::User)
    }

    /// Reset the value to [`CellValue::Empty`].
    pub fn clear(&self) -> Result<bool> {
        self.set_value(CellValue::Empty)
    }

    /// Store `new`, running the before/after protocol.
    ///
    /// A recomputed value is stored only if its job still owns the cell's
    /// pending entry at the moment of the store; otherwise nothing is stored,
    /// no `NewValue` is announced and `Ok(false)` is returned.
    pub(crate) fn write_value(
        &self,
        table: &Table,
        new: CellValue,
        origin: WriteOrigin,
    ) -> Result<bool> {
        loop {
            let old = self.value();
            if old == new {
                if origin == WriteOrigin::User {
                    table.detach_derivation(self);
                }
                return Ok(false);
            }

            let old_arg = if old.is_empty() {
                PayloadArg::Absent
            } else {
                PayloadArg::Value(old.clone())
            };
            let args = [old_arg, PayloadArg::Value(new.clone())];

            let performed = table.dispatcher().perform_if(
                EventKind::BeforeNewValue,
                self.element_ref()?,
                &args,
                || {
                    if self.is_deleted() {
                        return None;
                    }
                    match origin {
                        WriteOrigin::User => {
                            table.detach_derivation(self);
                            self.store_if_unchanged(&old, &new).then_some(())
                        }
                        WriteOrigin::Recomputed { ticket } => table
                            .pending()
                            .commit_if_current(self, ticket, || {
                                self.store_if_unchanged(&old, &new)
                            }),
                    }
                },
            )?;

            match performed {
                Performed::Vetoed(veto) => return Err(GridError::Vetoed(veto)),
                Performed::Applied(Some(())) => {
                    table.invalidate_dependents(self.id);
                    return Ok(true);
                }
                Performed::Applied(None) => match origin {
                    WriteOrigin::Recomputed { .. } => return Ok(false),
                    WriteOrigin::User if self.is_deleted() => {
                        return Err(GridError::deleted(ElementKind::Cell, self.id));
                    }
                    WriteOrigin::User => {
                        tracing::trace!(
                            target: "horizon_grid::table",
                            cell = %self.id,
                            "value changed while listeners were consulted; retrying"
                        );
                    }
                },
            }
        }
    }

    /// Store `new` if the value is still `expected`.
    fn store_if_unchanged(&self, expected: &CellValue, new: &CellValue) -> bool {
        let mut value = self.value.write();
        if *value != *expected {
            return false;
        }
        *value = new.clone();
        true
    }

    /// Make the cell's value a function of `derivation`'s precedents and
    /// queue it for recomputation.
    ///
    /// Fails with [`GridError::CircularReference`] if the cell would depend
    /// on itself, or [`GridError::ForeignElement`] if a precedent belongs to
    /// another table.
    pub fn set_derivation(&self, derivation: Derivation) -> Result<()> {
        let table = self.live_table()?;
        let this = self.arc()?;
        table.attach_derivation(&this, derivation)
    }

    /// Drop the derivation, keeping the current value. Returns whether there
    /// was one.
    pub fn clear_derivation(&self) -> Result<bool> {
        let table = self.live_table()?;
        Ok(table.detach_derivation(self))
    }

    /// Whether the value is derived.
    pub fn is_derived(&self) -> bool {
        self.derivation.read().is_some()
    }

    /// The derivation, if the value is derived.
    pub fn derivation(&self) -> Option<Derivation> {
        self.derivation.read().clone()
    }

    pub(crate) fn store_derivation(&self, derivation: Option<Derivation>) -> bool {
        std::mem::replace(&mut *self.derivation.write(), derivation).is_some()
    }

    /// Fire `Recalculate` on the cell and queue it for recomputation if it is
    /// derived. Returns whether it was queued.
    pub fn recalculate(&self) -> Result<bool> {
        let table = self.live_table()?;
        table.dispatcher().emit(
            EventKind::Recalculate,
            self.element_ref()?,
            None,
            AssemblyId::next(),
            &[],
        )?;
        if !table.is_derived(self.id) {
            return Ok(false);
        }
        let this = self.arc()?;
        table.pending().invalidate(&this);
        Ok(true)
    }

    /// Whether a recomputation of this cell is queued or running.
    pub fn is_pending(&self) -> bool {
        self.table()
            .is_some_and(|table| table.pending().is_pending(self.id))
    }

    /// Delete the cell. See [`Table::delete_cell`].
    pub fn delete(&self) -> Result<()> {
        let table = self.live_table()?;
        table.delete_cell(&self.arc()?)
    }

    fn live_table(&self) -> Result<Arc<Table>> {
        if self.is_deleted() {
            return Err(GridError::deleted(ElementKind::Cell, self.id));
        }
        let table = self
            .table()
            .ok_or(GridError::deleted(ElementKind::Table, self.id))?;
        table.ensure_live()?;
        Ok(table)
    }

    fn arc(&self) -> Result<Arc<Cell>> {
        self.this
            .upgrade()
            .ok_or(GridError::deleted(ElementKind::Cell, self.id))
    }

    fn element_ref(&self) -> Result<ElementRef> {
        Ok(self.arc()?)
    }
}

impl TableElement for Cell {
    fn element_id(&self) -> ElementId {
        self.id
    }

    fn element_kind(&self) -> ElementKind {
        ElementKind::Cell
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.registry
    }

    fn containers(&self) -> Vec<ElementRef> {
        let mut out: Vec<ElementRef> = Vec::with_capacity(2);
        if let Some(row) = self.row() {
            out.push(row);
        }
        if let Some(column) = self.column() {
            out.push(column);
        }
        out
    }

    fn is_deleted(&self) -> bool {
        Cell::is_deleted(self)
    }

    fn label(&self) -> String {
        match self.address() {
            Some((r, c)) => format!("cell [{r}, {c}]"),
            None => format!("cell {}", self.id),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("row", &self.row_id)
            .field("column", &self.column_id)
            .field("value", &*self.value.read())
            .field("derived", &self.is_derived())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
