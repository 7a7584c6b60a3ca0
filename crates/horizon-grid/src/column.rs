//! Columns of a table.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use horizon_grid_core::{
    CellValue, ElementId, ElementKind, ElementRef, EventKind, ListenerRegistry, PayloadArg,
    Performed, TableElement,
};
use parking_lot::RwLock;

use crate::cell::Cell;
use crate::error::{GridError, Result};
use crate::table::Table;

/// A column of a table. Contained by the table.
pub struct Column {
    id: ElementId,
    this: Weak<Column>,
    table: Weak<Table>,
    label: RwLock<Option<String>>,
    registry: ListenerRegistry,
    deleted: AtomicBool,
}

impl Column {
    pub(crate) fn new(table: Weak<Table>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ElementId::next(),
            this: this.clone(),
            table,
            label: RwLock::new(None),
            registry: ListenerRegistry::new(),
            deleted: AtomicBool::new(false),
        })
    }

    /// The column's identity.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The owning table, if it is still alive.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.upgrade()
    }

    pub(crate) fn owner(&self) -> &Weak<Table> {
        &self.table
    }

    /// Current position in the table.
    pub fn index(&self) -> Option<usize> {
        self.table()?.column_index(self.id)
    }

    /// The column's label.
    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    /// Relabel the column. Vetoable through `BeforeNewValue` on the column
    /// and the table.
    pub fn set_label(&self, label: impl Into<String>) -> Result<bool> {
        let table = self.live_table()?;
        let new = label.into();
        let old = self.label();
        if old.as_deref() == Some(new.as_str()) {
            return Ok(false);
        }
        let args = [
            old.map_or(PayloadArg::Absent, |l| PayloadArg::Value(CellValue::Text(l))),
            PayloadArg::Value(CellValue::Text(new.clone())),
        ];
        match table.dispatcher().perform(
            EventKind::BeforeNewValue,
            self.element_ref()?,
            &args,
            || *self.label.write() = Some(new),
        )? {
            Performed::Applied(()) => Ok(true),
            Performed::Vetoed(veto) => Err(GridError::Vetoed(veto)),
        }
    }

    /// The cells created in this column, in creation order.
    pub fn cells(&self) -> Vec<Arc<Cell>> {
        self.table()
            .map(|table| table.cells_in_column(self.id))
            .unwrap_or_default()
    }

    /// Whether the column has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Delete the column and its cells. See [`Table::delete_column`].
    pub fn delete(&self) -> Result<()> {
        let table = self.live_table()?;
        let this = self
            .this
            .upgrade()
            .ok_or(GridError::deleted(ElementKind::Column, self.id))?;
        table.delete_column(&this)
    }

    fn live_table(&self) -> Result<Arc<Table>> {
        if self.is_deleted() {
            return Err(GridError::deleted(ElementKind::Column, self.id));
        }
        let table = self
            .table()
            .ok_or(GridError::deleted(ElementKind::Table, self.id))?;
        table.ensure_live()?;
        Ok(table)
    }

    fn element_ref(&self) -> Result<ElementRef> {
        match self.this.upgrade() {
            Some(column) => Ok(column),
            None => Err(GridError::deleted(ElementKind::Column, self.id)),
        }
    }
}

impl TableElement for Column {
    fn element_id(&self) -> ElementId {
        self.id
    }

    fn element_kind(&self) -> ElementKind {
        ElementKind::Column
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.registry
    }

    fn containers(&self) -> Vec<ElementRef> {
        self.table()
            .map(|t| -> ElementRef { t })
            .into_iter()
            .collect()
    }

    fn is_deleted(&self) -> bool {
        Column::is_deleted(self)
    }

    fn label(&self) -> String {
        match (Column::label(self), self.index()) {
            (Some(label), _) => format!("column '{label}'"),
            (None, Some(i)) => format!("column {i}"),
            (None, None) => format!("column {}", self.id),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id)
            .field("label", &*self.label.read())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
