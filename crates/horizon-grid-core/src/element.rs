//! Element identity and the containment hierarchy.
//!
//! Every table element (table, subset, row, column, cell) implements
//! [`TableElement`]. The trait exposes just enough for the event fabric to do
//! its work: a stable identity, a kind, a listener registry, and the list of
//! direct containers that events propagate to.
//!
//! # Related
//!
//! - [`crate::ListenerRegistry`] - Per-element listener storage
//! - [`crate::Dispatcher`] - Walks [`TableElement::containers`] when alerting
//! - [`crate::Listenable`] - Listener management, implemented for every element

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::listener::ListenerRegistry;

/// Counter for element identifiers. Zero is never handed out.
static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// The kind of a table element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    /// A whole table.
    Table,
    /// A named group of rows and columns within a table.
    Subset,
    /// A table row.
    Row,
    /// A table column.
    Column,
    /// A single cell at a row/column intersection.
    Cell,
}

impl ElementKind {
    /// All element kinds, outermost first.
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Table,
        ElementKind::Subset,
        ElementKind::Row,
        ElementKind::Column,
        ElementKind::Cell,
    ];

    /// The single-kind set for this kind.
    pub fn as_set(self) -> ElementKinds {
        match self {
            Self::Table => ElementKinds::TABLE,
            Self::Subset => ElementKinds::SUBSET,
            Self::Row => ElementKinds::ROW,
            Self::Column => ElementKinds::COLUMN,
            Self::Cell => ElementKinds::CELL,
        }
    }

    /// Lowercase display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Subset => "subset",
            Self::Row => "row",
            Self::Column => "column",
            Self::Cell => "cell",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// A set of element kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ElementKinds: u8 {
        /// Tables.
        const TABLE = 1 << 0;
        /// Subsets.
        const SUBSET = 1 << 1;
        /// Rows.
        const ROW = 1 << 2;
        /// Columns.
        const COLUMN = 1 << 3;
        /// Cells.
        const CELL = 1 << 4;
    }
}

impl ElementKinds {
    /// Whether `kind` is a member of this set.
    #[inline]
    pub fn includes(self, kind: ElementKind) -> bool {
        self.contains(kind.as_set())
    }
}

impl From<ElementKind> for ElementKinds {
    fn from(kind: ElementKind) -> Self {
        kind.as_set()
    }
}

/// A process-unique element identifier.
///
/// Identifiers are allocated monotonically and never reused, so they double as
/// a creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

impl ElementId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A shared, type-erased reference to a table element.
pub type ElementRef = Arc<dyn TableElement>;

/// The trait every element of the table hierarchy implements.
///
/// Implementors must be `Send + Sync`: events carry element references across
/// threads, and off-thread listeners may query their source.
pub trait TableElement: Any + Send + Sync {
    /// The element's identity.
    fn element_id(&self) -> ElementId;

    /// The element's kind.
    fn element_kind(&self) -> ElementKind;

    /// The element's listener registry.
    fn listeners(&self) -> &ListenerRegistry;

    /// The element's direct containers, in alert order.
    ///
    /// A cell returns its row then its column; rows, columns and subsets
    /// return their table; a table returns nothing. Containers that no longer
    /// exist are omitted.
    fn containers(&self) -> Vec<ElementRef>;

    /// Whether the element has been deleted.
    fn is_deleted(&self) -> bool {
        false
    }

    /// A short human-readable label, for diagnostics.
    fn label(&self) -> String {
        format!("{} {}", self.element_kind(), self.element_id())
    }

    /// Upcast for downcasting with [`element_cast`].
    fn as_any(&self) -> &dyn Any;
}

/// Downcast a type-erased element to a concrete type.
///
/// # Example
///
/// ```ignore
/// if let Some(cell) = element_cast::<Cell>(event.source().as_ref()) {
///     println!("{}", cell.value());
/// }
/// ```
pub fn element_cast<T: TableElement>(element: &dyn TableElement) -> Option<&T> {
    element.as_any().downcast_ref::<T>()
}

/// Whether two element references name the same element.
#[inline]
pub fn same_element(a: &dyn TableElement, b: &dyn TableElement) -> bool {
    a.element_id() == b.element_id()
}

/// The alert chain of `source`: every transitive container, breadth first,
/// each element at most once. The source itself is not included.
///
/// For a cell this is its row, its column, then the table.
pub fn alert_chain(source: &dyn TableElement) -> Vec<ElementRef> {
    let mut chain: Vec<ElementRef> = Vec::new();
    let mut frontier = source.containers();
    let origin = source.element_id();

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for container in frontier {
            let id = container.element_id();
            if id == origin || chain.iter().any(|seen| seen.element_id() == id) {
                continue;
            }
            next.extend(container.containers());
            chain.push(container);
        }
        frontier = next;
    }

    chain
}
