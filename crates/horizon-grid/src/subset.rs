//! Named groupings of rows and columns.
//!
//! A subset does not own its members; deleting it leaves them in place and
//! deleting a member removes it from every subset.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use horizon_grid_core::{ElementId, ElementKind, ElementRef, ListenerRegistry, TableElement};
use parking_lot::RwLock;

use crate::column::Column;
use crate::error::{GridError, Result};
use crate::row::Row;
use crate::table::Table;

#[derive(Default)]
struct Members {
    rows: BTreeSet<ElementId>,
    columns: BTreeSet<ElementId>,
}

/// A named set of rows and columns of one table.
pub struct Subset {
    id: ElementId,
    this: Weak<Subset>,
    table: Weak<Table>,
    name: String,
    members: RwLock<Members>,
    registry: ListenerRegistry,
    deleted: AtomicBool,
}

impl Subset {
    pub(crate) fn new(table: Weak<Table>, name: String) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ElementId::next(),
            this: this.clone(),
            table,
            name,
            members: RwLock::new(Members::default()),
            registry: ListenerRegistry::new(),
            deleted: AtomicBool::new(false),
        })
    }

    /// The subset's identity.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The subset's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning table, if it is still alive.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.upgrade()
    }

    pub(crate) fn owner(&self) -> &Weak<Table> {
        &self.table
    }

    /// Add `row`. Returns `false` if it was already a member.
    pub fn add_row(&self, row: &Arc<Row>) -> Result<bool> {
        let table = self.live_table()?;
        table.check_member(row.as_ref(), row.owner())?;
        Ok(self.members.write().rows.insert(row.id()))
    }

    /// Add `column`. Returns `false` if it was already a member.
    pub fn add_column(&self, column: &Arc<Column>) -> Result<bool> {
        let table = self.live_table()?;
        table.check_member(column.as_ref(), column.owner())?;
        Ok(self.members.write().columns.insert(column.id()))
    }

    /// Remove `row`. Returns whether it was a member.
    pub fn remove_row(&self, row: &Row) -> bool {
        self.members.write().rows.remove(&row.id())
    }

    /// Remove `column`. Returns whether it was a member.
    pub fn remove_column(&self, column: &Column) -> bool {
        self.members.write().columns.remove(&column.id())
    }

    /// Whether `row` is a member.
    pub fn contains_row(&self, row: &Row) -> bool {
        self.members.read().rows.contains(&row.id())
    }

    /// Whether `column` is a member.
    pub fn contains_column(&self, column: &Column) -> bool {
        self.members.read().columns.contains(&column.id())
    }

    /// The member rows, in table order.
    pub fn rows(&self) -> Vec<Arc<Row>> {
        let members = self.members.read();
        self.table()
            .map(|t| t.rows())
            .unwrap_or_default()
            .into_iter()
            .filter(|r| members.rows.contains(&r.id()))
            .collect()
    }

    /// The member columns, in table order.
    pub fn columns(&self) -> Vec<Arc<Column>> {
        let members = self.members.read();
        self.table()
            .map(|t| t.columns())
            .unwrap_or_default()
            .into_iter()
            .filter(|c| members.columns.contains(&c.id()))
            .collect()
    }

    /// Drop a deleted row or column.
    pub(crate) fn forget(&self, member: ElementId) {
        let mut members = self.members.write();
        members.rows.remove(&member);
        members.columns.remove(&member);
    }

    /// Whether the subset has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Delete the subset. See [`Table::delete_subset`].
    pub fn delete(&self) -> Result<()> {
        let table = self.live_table()?;
        let this = self
            .this
            .upgrade()
            .ok_or(GridError::deleted(ElementKind::Subset, self.id))?;
        table.delete_subset(&this)
    }

    fn live_table(&self) -> Result<Arc<Table>> {
        if self.is_deleted() {
            return Err(GridError::deleted(ElementKind::Subset, self.id));
        }
        let table = self
            .table()
            .ok_or(GridError::deleted(ElementKind::Table, self.id))?;
        table.ensure_live()?;
        Ok(table)
    }
}

impl TableElement for Subset {
    fn element_id(&self) -> ElementId {
        self.id
    }

    fn element_kind(&self) -> ElementKind {
        ElementKind::Subset
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
        Subset::is_deleted(self)
    }

    fn label(&self) -> String {
        format!("subset '{}'", self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.members.read();
        f.debug_struct("Subset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rows", &members.rows.len())
            .field("columns", &members.columns.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GridConfig;
    use crate::table::Table;

    #[test]
    fn test_membership_follows_deletion() {
        let table = Table::builder("s")
            .config(GridConfig::inline())
            .build()
            .unwrap();
        let r0 = table.add_row().unwrap();
        let r1 = table.add_row().unwrap();
        let subset = table.add_subset("totals").unwrap();

        assert!(subset.add_row(&r1).unwrap());
        assert!(subset.add_row(&r0).unwrap());
        assert!(!subset.add_row(&r0).unwrap());
        let ids: Vec<_> = subset.rows().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![r0.id(), r1.id()]);

        r0.delete().unwrap();
        assert!(!subset.contains_row(&r0));
        assert_eq!(subset.rows().len(), 1);
        assert_eq!(table.subset("totals").map(|s| s.id()), Some(subset.id()));
    }
}
