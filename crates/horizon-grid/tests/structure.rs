//! Structural changes: creation, deletion cascades, container alerting and
//! listener lifetimes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use horizon_grid::{
    AssemblyId, CellValue, Derivation, ElementId, ElementKind, EventKind, GridConfig, GridError,
    Listenable, ListenerHandle, Table, TableElement, listener_fn,
};
use parking_lot::Mutex;

fn inline_table() -> Arc<Table> {
    Table::builder("structure")
        .config(GridConfig::inline())
        .build()
        .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    kind: EventKind,
    source: ElementId,
    trigger: Option<ElementId>,
    assembly: AssemblyId,
    created: Option<ElementKind>,
}

type Log = Arc<Mutex<Vec<Seen>>>;

fn recorder(log: &Log) -> ListenerHandle {
    let log = log.clone();
    listener_fn(move |event| {
        log.lock().push(Seen {
            kind: event.kind(),
            source: event.source_id(),
            trigger: event.trigger().map(|t| t.element_id()),
            assembly: event.assembly_id(),
            created: event.created_element_kind(),
        });
        Ok(())
    })
}

#[test]
fn test_create_events_share_assembly() {
    let table = inline_table();
    let log: Log = Arc::default();
    let rec = recorder(&log);
    table.add_listeners(EventKind::BeforeCreate, &[rec.clone()]);
    table.add_listeners(EventKind::Create, &[rec.clone()]);

    let row = table.add_row().unwrap();

    let seen = log.lock().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].kind, EventKind::BeforeCreate);
    assert_eq!(seen[0].source, table.id());
    assert_eq!(seen[0].created, Some(ElementKind::Row));
    // Create fires on the row and reaches the table as a container.
    assert_eq!(seen[1].kind, EventKind::Create);
    assert_eq!(seen[1].source, table.id());
    assert_eq!(seen[1].trigger, Some(row.id()));
    assert_eq!(seen[1].created, Some(ElementKind::Row));
    assert_eq!(seen[0].assembly, seen[1].assembly);
}

#[test]
fn test_cells_are_created_once() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let column = table.add_column().unwrap();

    let log: Log = Arc::default();
    let rec = recorder(&log);
    table.add_listeners(EventKind::Create, &[rec.clone()]);

    assert!(table.get_cell(&row, &column).is_none());
    let first = table.cell(&row, &column).unwrap();
    let second = table.cell(&row, &column).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(table.cell_count(), 1);

    // The cell's Create reaches the table through both the row and the column
    // paths, but the table is notified once.
    let seen = log.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].trigger, Some(first.id()));
    assert_eq!(seen[0].created, Some(ElementKind::Cell));
}

#[test]
fn test_new_value_reaches_containers_in_order() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let column = table.add_column().unwrap();
    let cell = table.cell(&row, &column).unwrap();

    let log: Log = Arc::default();
    let rec = recorder(&log);
    // Registered in reverse to show order follows containment, not registration.
    table.add_listeners(EventKind::NewValue, &[rec.clone()]);
    column.add_listeners(EventKind::NewValue, &[rec.clone()]);
    row.add_listeners(EventKind::NewValue, &[rec.clone()]);
    cell.add_listeners(EventKind::NewValue, &[rec.clone()]);

    cell.set_value(5).unwrap();

    let seen = log.lock().clone();
    let sources: Vec<_> = seen.iter().map(|s| s.source).collect();
    assert_eq!(sources, vec![cell.id(), row.id(), column.id(), table.id()]);
    assert_eq!(seen[0].trigger, None);
    assert!(seen[1..].iter().all(|s| s.trigger == Some(cell.id())));
    assert!(seen.iter().all(|s| s.assembly == seen[0].assembly));
}

#[test]
fn test_write_landing_during_before_phase_is_announced_as_old_value() {
    let table = inline_table();
    table.add_row().unwrap();
    table.add_column().unwrap();
    let cell = table.cell_at(0, 0).unwrap();

    let target = Arc::downgrade(&cell);
    let fired = AtomicBool::new(false);
    let interloper = listener_fn(move |event| {
        if event.new_value() == Some(&CellValue::Integer(3)) && !fired.swap(true, Ordering::SeqCst)
        {
            if let Some(cell) = target.upgrade() {
                cell.set_value(7).unwrap();
            }
        }
        Ok(())
    });
    cell.add_listeners(EventKind::BeforeNewValue, &[interloper.clone()]);

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    let on_value = listener_fn(move |event| {
        let new = event.new_value().cloned().unwrap_or_default();
        sink.lock().push((event.old_value().cloned(), new));
        Ok(())
    });
    cell.add_listeners(EventKind::NewValue, &[on_value.clone()]);

    assert!(cell.set_value(3).unwrap());

    assert_eq!(cell.value(), CellValue::Integer(3));
    assert_eq!(
        *changes.lock(),
        vec![
            (None, CellValue::Integer(7)),
            (Some(CellValue::Integer(7)), CellValue::Integer(3)),
        ]
    );
}

#[test]
fn test_row_deletion_cascades_to_cells() {
    let table = inline_table();
    let r0 = table.add_row().unwrap();
    let r1 = table.add_row().unwrap();
    let column = table.add_column().unwrap();
    let doomed = table.cell(&r0, &column).unwrap();
    let survivor = table.cell(&r1, &column).unwrap();

    let log: Log = Arc::default();
    let rec = recorder(&log);
    doomed.add_listeners(EventKind::Delete, &[rec.clone()]);
    table.add_listeners(EventKind::Delete, &[rec.clone()]);

    table.delete_row(&r0).unwrap();

    assert!(r0.is_deleted());
    assert!(doomed.is_deleted());
    assert!(!survivor.is_deleted());
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.cell_count(), 1);
    assert_eq!(r1.index(), Some(0));
    assert!(!doomed.has_listeners(&[]));

    let seen = log.lock().clone();
    let order: Vec<_> = seen.iter().map(|s| (s.source, s.trigger)).collect();
    assert_eq!(
        order,
        vec![
            (doomed.id(), None),
            (table.id(), Some(doomed.id())),
            (table.id(), Some(r0.id())),
        ]
    );
    assert!(seen.iter().all(|s| s.assembly == seen[0].assembly));

    assert!(matches!(doomed.set_value(1), Err(GridError::Deleted { .. })));
    assert!(matches!(
        table.cell(&r0, &column),
        Err(GridError::Deleted { .. })
    ));
    assert!(!doomed.add_listeners(EventKind::NewValue, &[rec.clone()]));
}

#[test]
fn test_column_deletion_keeps_rows() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let c0 = table.add_column().unwrap();
    let c1 = table.add_column().unwrap();
    table.cell(&row, &c0).unwrap().set_value(1).unwrap();
    table.cell(&row, &c1).unwrap().set_value(2).unwrap();

    c0.delete().unwrap();

    assert_eq!(table.column_count(), 1);
    let cells = row.cells();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value(), CellValue::Integer(2));
    assert_eq!(cells[0].address(), Some((0, 0)));
}

#[test]
fn test_table_deletion() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let column = table.add_column().unwrap();
    let cell = table.cell(&row, &column).unwrap();
    let subset = table.add_subset("all").unwrap();

    let log: Log = Arc::default();
    let rec = recorder(&log);
    table.add_listeners(EventKind::Delete, &[rec.clone()]);
    cell.add_listeners(EventKind::Delete, &[rec.clone()]);

    table.delete().unwrap();

    assert!(table.is_deleted());
    assert!(row.is_deleted() && column.is_deleted() && cell.is_deleted() && subset.is_deleted());
    let seen = log.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].source, table.id());

    assert!(matches!(table.add_row(), Err(GridError::Deleted { .. })));
    assert!(!table.has_listeners(&[]));
}

#[test]
fn test_table_deletion_forgets_derivations() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let columns: Vec<_> = (0..3).map(|_| table.add_column().unwrap()).collect();
    let cells: Vec<_> = columns
        .iter()
        .map(|column| table.cell(&row, column).unwrap())
        .collect();
    cells[1]
        .set_derivation(Derivation::new("=A", &[cells[0].clone()]))
        .unwrap();
    cells[2]
        .set_derivation(Derivation::new("=B", &[cells[1].clone()]))
        .unwrap();

    table.delete().unwrap();

    assert!(cells.iter().all(|cell| !cell.is_derived()));
    assert!(!table.has_pendings());
    assert!(matches!(
        cells[0].set_derivation(Derivation::new("=C", &[cells[2].clone()])),
        Err(GridError::Deleted { .. })
    ));
}

#[test]
fn test_remove_all_listeners_stops_delivery() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let column = table.add_column().unwrap();
    let cell = table.cell(&row, &column).unwrap();

    let log: Log = Arc::default();
    let rec = recorder(&log);
    row.add_listeners(EventKind::NewValue, &[rec.clone()]);
    row.add_listeners(EventKind::Delete, &[rec.clone()]);
    table.add_listeners(EventKind::NewValue, &[rec.clone()]);

    let removed = row.remove_all_listeners(&[]);
    assert_eq!(removed.len(), 1);
    assert!(!row.has_listeners(&[]));

    cell.set_value(1).unwrap();
    let sources: Vec<_> = log.lock().iter().map(|s| s.source).collect();
    assert_eq!(sources, vec![table.id()]);
}

#[test]
fn test_dropped_listener_is_not_called() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let column = table.add_column().unwrap();
    let cell = table.cell(&row, &column).unwrap();

    let log: Log = Arc::default();
    let rec = recorder(&log);
    cell.add_listeners(EventKind::NewValue, &[rec.clone()]);
    assert!(cell.has_listeners(&[EventKind::NewValue]));

    drop(rec);
    assert!(!cell.has_listeners(&[EventKind::NewValue]));
    cell.set_value(1).unwrap();
    assert!(log.lock().is_empty());
}

#[test]
fn test_foreign_elements_rejected() {
    let a = inline_table();
    let b = inline_table();
    let row = a.add_row().unwrap();
    let column = b.add_column().unwrap();

    assert!(matches!(
        a.cell(&row, &column),
        Err(GridError::ForeignElement { .. })
    ));
    assert!(matches!(
        b.delete_row(&row),
        Err(GridError::ForeignElement { .. })
    ));
}

#[test]
fn test_circular_derivation_rejected() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let c0 = table.add_column().unwrap();
    let c1 = table.add_column().unwrap();
    let a = table.cell(&row, &c0).unwrap();
    let b = table.cell(&row, &c1).unwrap();

    b.set_derivation(Derivation::new("=A", &[a.clone()])).unwrap();
    let err = a
        .set_derivation(Derivation::new("=B", &[b.clone()]))
        .unwrap_err();
    assert!(matches!(err, GridError::CircularReference { .. }));
    assert!(!a.is_derived());
    assert!(b.is_derived());

    let err = a
        .set_derivation(Derivation::new("=A", &[a.clone()]))
        .unwrap_err();
    assert!(matches!(err, GridError::CircularReference { .. }));
}

#[test]
fn test_invalid_config_rejected_at_build() {
    let err = Table::builder("bad")
        .config(GridConfig::with_workers(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, GridError::InvalidConfig(_)));
}

#[test]
fn test_lookup_by_index_and_label() {
    let table = inline_table();
    let row = table.add_row().unwrap();
    let column = table.add_column().unwrap();
    column.set_label("amount").unwrap();

    assert_eq!(table.row(0).map(|r| r.id()), Some(row.id()));
    assert!(table.row(1).is_none());
    assert_eq!(
        table.column_by_label("amount").map(|c| c.id()),
        Some(column.id())
    );
    assert_eq!(TableElement::label(column.as_ref()), "column 'amount'");
    assert!(matches!(
        table.cell_at(0, 3),
        Err(GridError::OutOfRange {
            kind: ElementKind::Column,
            index: 3
        })
    ));
}
