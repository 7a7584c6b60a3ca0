//! The table: root of the element hierarchy.
//!
//! A [`Table`] owns its rows, columns, subsets and cells, the dispatcher that
//! delivers their events, the dependency index of derived cells and the
//! coordinator that recomputes them.
//!
//! Structural changes follow the same protocol as value changes: creating an
//! element fires `BeforeCreate` on the table (vetoable) and then `Create` on
//! the new element; deleting one fires `BeforeDelete` (vetoable) and `Delete`.
//!
//! # Example
//!
//! ```
//! use horizon_grid::{GridConfig, Table};
//!
//! let table = Table::builder("budget").config(GridConfig::inline()).build().unwrap();
//! let row = table.add_row().unwrap();
//! let column = table.add_column().unwrap();
//!
//! let cell = table.cell(&row, &column).unwrap();
//! assert!(cell.set_value(14).unwrap());
//! assert_eq!(cell.value().as_i64(), Some(14));
//! ```
//!
//! # Related
//!
//! - [`crate::Cell`] - Values and derivations
//! - [`crate::PendingRecalcCoordinator`] - Asynchronous recomputation

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use horizon_grid_core::{
    AssemblyId, CellValue, Dispatcher, ElementId, ElementKind, ElementRef, EventFactory,
    EventKind, FaultSink, ListenerRegistry, Outcome, PayloadArg, Performed, TableElement,
    WorkerPool, fault_sink,
};
use parking_lot::{Mutex, RwLock};

use crate::cell::Cell;
use crate::column::Column;
use crate::config::GridConfig;
use crate::derivation::{DependencyIndex, Derivation};
use crate::error::{GridError, Result};
use crate::evaluator::{Evaluator, NoEvaluator};
use crate::pending::PendingRecalcCoordinator;
use crate::row::Row;
use crate::subset::Subset;

// ============================================================================
// Structure
// ============================================================================

/// The elements of a table. Cells are keyed by (row id, column id).
#[derive(Default)]
struct Structure {
    rows: Vec<Arc<Row>>,
    columns: Vec<Arc<Column>>,
    subsets: Vec<Arc<Subset>>,
    cells: HashMap<(ElementId, ElementId), Arc<Cell>>,
    cell_keys: HashMap<ElementId, (ElementId, ElementId)>,
}

impl Structure {
    fn take_cells(&mut self, pred: impl Fn(&(ElementId, ElementId)) -> bool) -> Vec<Arc<Cell>> {
        let keys: Vec<_> = self.cells.keys().filter(|k| pred(k)).copied().collect();
        let mut taken: Vec<Arc<Cell>> = keys
            .into_iter()
            .filter_map(|key| self.cells.remove(&key))
            .collect();
        for cell in &taken {
            self.cell_keys.remove(&cell.id());
        }
        taken.sort_by_key(|c| c.id());
        taken
    }

    fn take_all(&mut self) -> Structure {
        std::mem::take(self)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds a [`Table`].
///
/// Anything not supplied comes from the [`GridConfig`]: the pool is created
/// from it, the evaluator defaults to one that yields errors, and faults go to
/// the process-wide sink.
pub struct TableBuilder {
    name: String,
    config: GridConfig,
    pool: Option<Arc<dyn WorkerPool>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    faults: Option<Arc<dyn FaultSink>>,
}

impl TableBuilder {
    /// Start building a table called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: GridConfig::default(),
            pool: None,
            evaluator: None,
            faults: None,
        }
    }

    /// Use `config`.
    pub fn config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    /// Run off-thread work on `pool` instead of creating one.
    pub fn pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Compute derived cells with `evaluator`.
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Report faults to `sink`.
    pub fn fault_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.faults = Some(sink);
        self
    }

    /// Build the table.
    pub fn build(self) -> Result<Arc<Table>> {
        self.config.validate()?;
        let faults = self.faults.unwrap_or_else(fault_sink);
        let pool = match self.pool {
            Some(pool) => pool,
            None => self.config.build_pool(faults.clone())?,
        };
        let evaluator = self.evaluator.unwrap_or_else(|| Arc::new(NoEvaluator));
        let dispatcher = Dispatcher::with_parts(EventFactory::new(), pool, faults);

        let table = Arc::new_cyclic(|this: &Weak<Table>| Table {
            id: ElementId::next(),
            this: this.clone(),
            name: RwLock::new(self.name),
            registry: ListenerRegistry::new(),
            deleted: AtomicBool::new(false),
            dispatcher,
            evaluator,
            config: self.config,
            structure: RwLock::new(Structure::default()),
            dependencies: Mutex::new(DependencyIndex::default()),
            pending: PendingRecalcCoordinator::new(this.clone()),
        });

        tracing::debug!(
            target: "horizon_grid::table",
            table = %table.id,
            name = %table.name(),
            max_workers = table.config.max_workers,
            "table created"
        );
        Ok(table)
    }
}

// ============================================================================
// Table
// ============================================================================

/// A table of rows, columns and cells.
pub struct Table {
    id: ElementId,
    this: Weak<Table>,
    name: RwLock<String>,
    registry: ListenerRegistry,
    deleted: AtomicBool,
    dispatcher: Dispatcher,
    evaluator: Arc<dyn Evaluator>,
    config: GridConfig,
    structure: RwLock<Structure>,
    dependencies: Mutex<DependencyIndex>,
    pending: PendingRecalcCoordinator,
}

impl Table {
    /// Start building a table.
    pub fn builder(name: impl Into<String>) -> TableBuilder {
        TableBuilder::new(name)
    }

    /// Create a table with the default configuration.
    pub fn new(name: impl Into<String>) -> Result<Arc<Table>> {
        TableBuilder::new(name).build()
    }

    /// The table's identity.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The table's name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Rename the table. Fires `BeforeNewValue` / `NewValue` on the table with
    /// the old and new names as text values.
    pub fn set_name(&self, name: impl Into<String>) -> Result<bool> {
        self.ensure_live()?;
        let new = name.into();
        let old = self.name();
        if old == new {
            return Ok(false);
        }
        let args = [
            PayloadArg::Value(CellValue::Text(old)),
            PayloadArg::Value(CellValue::Text(new.clone())),
        ];
        match self.dispatcher.perform(
            EventKind::BeforeNewValue,
            self.element_ref()?,
            &args,
            || *self.name.write() = new,
        )? {
            Performed::Applied(()) => Ok(true),
            Performed::Vetoed(veto) => Err(GridError::Vetoed(veto)),
        }
    }

    /// The configuration the table was built with.
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// The dispatcher delivering this table's events.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The evaluator used for derived cells.
    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    /// The recomputation coordinator.
    pub fn pending(&self) -> &PendingRecalcCoordinator {
        &self.pending
    }

    /// Whether any cell awaits recomputation.
    pub fn has_pendings(&self) -> bool {
        self.pending.has_pendings()
    }

    /// Block until every queued recomputation and off-thread delivery has
    /// finished, or `timeout` elapses. Returns whether the table went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.dispatcher.wait_idle(timeout)
    }

    /// Whether the table has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// The rows, in order.
    pub fn rows(&self) -> Vec<Arc<Row>> {
        self.structure.read().rows.clone()
    }

    /// The columns, in order.
    pub fn columns(&self) -> Vec<Arc<Column>> {
        self.structure.read().columns.clone()
    }

    /// The subsets, in creation order.
    pub fn subsets(&self) -> Vec<Arc<Subset>> {
        self.structure.read().subsets.clone()
    }

    /// Every materialized cell, in creation order.
    pub fn cells(&self) -> Vec<Arc<Cell>> {
        let mut cells: Vec<_> = self.structure.read().cells.values().cloned().collect();
        cells.sort_by_key(|c| c.id());
        cells
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.structure.read().rows.len()
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.structure.read().columns.len()
    }

    /// Number of materialized cells.
    pub fn cell_count(&self) -> usize {
        self.structure.read().cells.len()
    }

    /// The row at `index`.
    pub fn row(&self, index: usize) -> Option<Arc<Row>> {
        self.structure.read().rows.get(index).cloned()
    }

    /// The column at `index`.
    pub fn column(&self, index: usize) -> Option<Arc<Column>> {
        self.structure.read().columns.get(index).cloned()
    }

    /// The subset called `name`.
    pub fn subset(&self, name: &str) -> Option<Arc<Subset>> {
        self.structure
            .read()
            .subsets
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// The first row labelled `label`.
    pub fn row_by_label(&self, label: &str) -> Option<Arc<Row>> {
        self.structure
            .read()
            .rows
            .iter()
            .find(|r| r.label().as_deref() == Some(label))
            .cloned()
    }

    /// The first column labelled `label`.
    pub fn column_by_label(&self, label: &str) -> Option<Arc<Column>> {
        self.structure
            .read()
            .columns
            .iter()
            .find(|c| c.label().as_deref() == Some(label))
            .cloned()
    }

    pub(crate) fn row_index(&self, row: ElementId) -> Option<usize> {
        self.structure.read().rows.iter().position(|r| r.id() == row)
    }

    pub(crate) fn column_index(&self, column: ElementId) -> Option<usize> {
        self.structure
            .read()
            .columns
            .iter()
            .position(|c| c.id() == column)
    }

    /// The cell at `row` x `column`, if it has been created.
    pub fn get_cell(&self, row: &Row, column: &Column) -> Option<Arc<Cell>> {
        self.structure
            .read()
            .cells
            .get(&(row.id(), column.id()))
            .cloned()
    }

    /// The cell with identity `id`, if it exists.
    pub fn cell_by_id(&self, id: ElementId) -> Option<Arc<Cell>> {
        let structure = self.structure.read();
        structure
            .cell_keys
            .get(&id)
            .and_then(|key| structure.cells.get(key))
            .cloned()
    }

    pub(crate) fn cells_in_row(&self, row: ElementId) -> Vec<Arc<Cell>> {
        self.cells().into_iter().filter(|c| c.row_id() == row).collect()
    }

    pub(crate) fn cells_in_column(&self, column: ElementId) -> Vec<Arc<Cell>> {
        self.cells()
            .into_iter()
            .filter(|c| c.column_id() == column)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Append a row.
    pub fn add_row(&self) -> Result<Arc<Row>> {
        self.create(ElementKind::Row, |s| {
            let row = Row::new(self.this.clone());
            s.rows.push(row.clone());
            Ok(row)
        })
    }

    /// Append a column.
    pub fn add_column(&self) -> Result<Arc<Column>> {
        self.create(ElementKind::Column, |s| {
            let column = Column::new(self.this.clone());
            s.columns.push(column.clone());
            Ok(column)
        })
    }

    /// Add an empty subset called `name`.
    pub fn add_subset(&self, name: impl Into<String>) -> Result<Arc<Subset>> {
        let name = name.into();
        self.create(ElementKind::Subset, |s| {
            let subset = Subset::new(self.this.clone(), name);
            s.subsets.push(subset.clone());
            Ok(subset)
        })
    }

    /// The cell at `row` x `column`, creating it on first access.
    pub fn cell(&self, row: &Arc<Row>, column: &Arc<Column>) -> Result<Arc<Cell>> {
        self.check_member(row.as_ref(), row.owner())?;
        self.check_member(column.as_ref(), column.owner())?;
        if let Some(cell) = self.get_cell(row, column) {
            return Ok(cell);
        }

        let key = (row.id(), column.id());
        self.create(ElementKind::Cell, |s| {
            // Another thread may have won the race since the read above.
            if let Some(cell) = s.cells.get(&key) {
                return Err(cell.clone());
            }
            let cell = Cell::new(self.this.clone(), row, column);
            s.cells.insert(key, cell.clone());
            s.cell_keys.insert(cell.id(), key);
            Ok(cell)
        })
    }

    /// The cell at row `row` and column `column` by index, creating it on
    /// first access.
    pub fn cell_at(&self, row: usize, column: usize) -> Result<Arc<Cell>> {
        let r = self.row(row).ok_or(GridError::OutOfRange {
            kind: ElementKind::Row,
            index: row,
        })?;
        let c = self.column(column).ok_or(GridError::OutOfRange {
            kind: ElementKind::Column,
            index: column,
        })?;
        self.cell(&r, &c)
    }

    /// `BeforeCreate` on the table, insert, then `Create` on the new element.
    ///
    /// `insert` returns `Err` with an element that already existed; no
    /// `Create` is announced for it.
    fn create<T>(
        &self,
        kind: ElementKind,
        insert: impl FnOnce(&mut Structure) -> std::result::Result<Arc<T>, Arc<T>>,
    ) -> Result<Arc<T>>
    where
        T: TableElement,
    {
        self.ensure_live()?;
        let assembly = AssemblyId::next();
        let outcome = self.dispatcher.emit(
            EventKind::BeforeCreate,
            self.element_ref()?,
            None,
            assembly,
            &[PayloadArg::Kind(kind)],
        )?;
        if let Outcome::Vetoed(veto) = outcome {
            tracing::debug!(target: "horizon_grid::table", ?kind, "creation vetoed");
            return Err(GridError::Vetoed(veto));
        }

        let inserted = insert(&mut self.structure.write());
        match inserted {
            Ok(element) => {
                tracing::trace!(
                    target: "horizon_grid::table",
                    ?kind,
                    element = %element.element_id(),
                    "element created"
                );
                self.dispatcher
                    .emit(EventKind::Create, element.clone(), None, assembly, &[])?;
                Ok(element)
            }
            Err(existing) => Ok(existing),
        }
    }

    // ------------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------------

    /// Delete `row` and every cell in it.
    pub fn delete_row(&self, row: &Arc<Row>) -> Result<()> {
        self.check_member(row.as_ref(), row.owner())?;
        let assembly = AssemblyId::next();
        let performed = self.dispatcher.perform_in(
            assembly,
            EventKind::BeforeDelete,
            row.clone(),
            &[],
            || {
                let cells = {
                    let mut s = self.structure.write();
                    s.rows.retain(|r| r.id() != row.id());
                    s.take_cells(|(r, _)| *r == row.id())
                };
                row.mark_deleted();
                self.drop_from_subsets(row.id());
                self.retire_cells(assembly, cells);
            },
        )?;
        self.finish_delete(performed, row.as_ref())
    }

    /// Delete `column` and every cell in it.
    pub fn delete_column(&self, column: &Arc<Column>) -> Result<()> {
        self.check_member(column.as_ref(), column.owner())?;
        let assembly = AssemblyId::next();
        let performed = self.dispatcher.perform_in(
            assembly,
            EventKind::BeforeDelete,
            column.clone(),
            &[],
            || {
                let cells = {
                    let mut s = self.structure.write();
                    s.columns.retain(|c| c.id() != column.id());
                    s.take_cells(|(_, c)| *c == column.id())
                };
                column.mark_deleted();
                self.drop_from_subsets(column.id());
                self.retire_cells(assembly, cells);
            },
        )?;
        self.finish_delete(performed, column.as_ref())
    }

    /// Delete one cell. Its row and column stay.
    pub fn delete_cell(&self, cell: &Arc<Cell>) -> Result<()> {
        self.check_member(cell.as_ref(), cell.owner())?;
        let mut dependents = Vec::new();
        let performed = self.dispatcher.perform(
            EventKind::BeforeDelete,
            cell.clone(),
            &[],
            || {
                {
                    let mut s = self.structure.write();
                    s.cells.remove(&(cell.row_id(), cell.column_id()));
                    s.cell_keys.remove(&cell.id());
                }
                dependents = self.detach_cell(cell);
            },
        )?;
        self.finish_delete(performed, cell.as_ref())?;
        self.invalidate_ids(&dependents);
        Ok(())
    }

    /// Delete `subset`. Its rows and columns stay.
    pub fn delete_subset(&self, subset: &Arc<Subset>) -> Result<()> {
        self.check_member(subset.as_ref(), subset.owner())?;
        let performed = self.dispatcher.perform(
            EventKind::BeforeDelete,
            subset.clone(),
            &[],
            || {
                self.structure
                    .write()
                    .subsets
                    .retain(|s| s.id() != subset.id());
                subset.mark_deleted();
            },
        )?;
        self.finish_delete(performed, subset.as_ref())
    }

    /// Delete the whole table.
    ///
    /// Pending recomputation is cancelled and every element is marked
    /// deleted. Only the table itself announces `Delete`.
    pub fn delete(&self) -> Result<()> {
        self.ensure_live()?;
        let mut removed = Structure::default();
        let performed = self.dispatcher.perform(
            EventKind::BeforeDelete,
            self.element_ref()?,
            &[],
            || {
                self.deleted.store(true, Ordering::Release);
                self.pending.cancel_all();
                removed = self.structure.write().take_all();
                self.dependencies.lock().clear();
                for cell in removed.cells.values() {
                    cell.mark_deleted();
                    cell.store_derivation(None);
                }
                for row in &removed.rows {
                    row.mark_deleted();
                }
                for column in &removed.columns {
                    column.mark_deleted();
                }
                for subset in &removed.subsets {
                    subset.mark_deleted();
                }
            },
        )?;

        match performed {
            Performed::Vetoed(veto) => Err(GridError::Vetoed(veto)),
            Performed::Applied(()) => {
                for cell in removed.cells.values() {
                    cell.listeners().clear();
                }
                for row in &removed.rows {
                    row.listeners().clear();
                }
                for column in &removed.columns {
                    column.listeners().clear();
                }
                for subset in &removed.subsets {
                    subset.listeners().clear();
                }
                self.registry.clear();
                tracing::debug!(target: "horizon_grid::table", table = %self.id, "table deleted");
                Ok(())
            }
        }
    }

    fn finish_delete(&self, performed: Performed<()>, element: &dyn TableElement) -> Result<()> {
        match performed {
            Performed::Vetoed(veto) => Err(GridError::Vetoed(veto)),
            Performed::Applied(()) => {
                element.listeners().clear();
                tracing::trace!(
                    target: "horizon_grid::table",
                    element = %element.element_id(),
                    kind = ?element.element_kind(),
                    "element deleted"
                );
                Ok(())
            }
        }
    }

    /// Announce deletion of cells removed along with their row or column.
    fn retire_cells(&self, assembly: AssemblyId, cells: Vec<Arc<Cell>>) {
        let mut dependents = Vec::new();
        for cell in &cells {
            dependents.extend(self.detach_cell(cell));
            if let Err(error) =
                self.dispatcher
                    .emit(EventKind::Delete, cell.clone(), None, assembly, &[])
            {
                tracing::warn!(target: "horizon_grid::table", %error, "cell delete event failed");
            }
            cell.listeners().clear();
        }
        dependents.retain(|id| !cells.iter().any(|c| c.id() == *id));
        self.invalidate_ids(&dependents);
    }

    /// Mark a removed cell deleted and unhook it from recomputation. Returns
    /// the cells that read it.
    fn detach_cell(&self, cell: &Arc<Cell>) -> Vec<ElementId> {
        cell.mark_deleted();
        cell.store_derivation(None);
        self.pending.cancel(cell);
        let mut deps = self.dependencies.lock();
        deps.remove(cell.id());
        deps.dependents_of(cell.id())
    }

    fn drop_from_subsets(&self, member: ElementId) {
        for subset in self.subsets() {
            subset.forget(member);
        }
    }

    // ------------------------------------------------------------------------
    // Derivations and recalculation
    // ------------------------------------------------------------------------

    pub(crate) fn attach_derivation(&self, cell: &Arc<Cell>, derivation: Derivation) -> Result<()> {
        for id in derivation.precedent_ids() {
            if self.cell_by_id(*id).is_none() {
                return Err(GridError::foreign(ElementKind::Cell, *id));
            }
        }

        self.dependencies
            .lock()
            .set(cell.id(), derivation.precedent_ids())
            .map_err(|()| GridError::CircularReference { cell: cell.label() })?;
        cell.store_derivation(Some(derivation));
        self.pending.invalidate(cell);
        Ok(())
    }

    pub(crate) fn detach_derivation(&self, cell: &Cell) -> bool {
        let had = cell.store_derivation(None);
        self.dependencies.lock().remove(cell.id());
        self.pending.cancel(cell);
        had
    }

    pub(crate) fn is_derived(&self, cell: ElementId) -> bool {
        self.dependencies.lock().is_derived(cell)
    }

    /// Queue recomputation of the cells that read `cell`.
    pub(crate) fn invalidate_dependents(&self, cell: ElementId) {
        let dependents = self.dependencies.lock().dependents_of(cell);
        self.invalidate_ids(&dependents);
    }

    fn invalidate_ids(&self, ids: &[ElementId]) {
        for id in ids {
            if let Some(cell) = self.cell_by_id(*id) {
                self.pending.invalidate(&cell);
            }
        }
    }

    /// Fire `Recalculate` on the table and queue every derived cell for
    /// recomputation. Returns how many cells were queued.
    pub fn recalculate(&self) -> Result<usize> {
        self.ensure_live()?;
        self.dispatcher.emit(
            EventKind::Recalculate,
            self.element_ref()?,
            None,
            AssemblyId::next(),
            &[],
        )?;

        let derived = self.dependencies.lock().derived_cells();
        let mut queued = 0;
        for id in derived {
            if let Some(cell) = self.cell_by_id(id) {
                self.pending.invalidate(&cell);
                queued += 1;
            }
        }
        tracing::debug!(target: "horizon_grid::table", queued, "recalculation requested");
        Ok(queued)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    pub(crate) fn element_ref(&self) -> Result<ElementRef> {
        match self.this.upgrade() {
            Some(table) => Ok(table),
            None => Err(GridError::deleted(ElementKind::Table, self.id)),
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_deleted() {
            Err(GridError::deleted(ElementKind::Table, self.id))
        } else {
            Ok(())
        }
    }

    /// Check `element`, owned by `owner`, is a live element of this table.
    pub(crate) fn check_member(&self, element: &dyn TableElement, owner: &Weak<Table>) -> Result<()> {
        self.ensure_live()?;
        if !Weak::ptr_eq(owner, &self.this) {
            return Err(GridError::foreign(element.element_kind(), element.element_id()));
        }
        if element.is_deleted() {
            return Err(GridError::deleted(element.element_kind(), element.element_id()));
        }
        Ok(())
    }
}

impl TableElement for Table {
    fn element_id(&self) -> ElementId {
        self.id
    }

    fn element_kind(&self) -> ElementKind {
        ElementKind::Table
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.registry
    }

    fn containers(&self) -> Vec<ElementRef> {
        Vec::new()
    }

    fn is_deleted(&self) -> bool {
        Table::is_deleted(self)
    }

    fn label(&self) -> String {
        format!("table '{}'", self.name())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let structure = self.structure.read();
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("rows", &structure.rows.len())
            .field("columns", &structure.columns.len())
            .field("cells", &structure.cells.len())
            .field("pending", &self.pending.pending_count())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
