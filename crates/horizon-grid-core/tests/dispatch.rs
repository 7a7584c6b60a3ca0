//! Integration tests for event dispatch over a hand-built element hierarchy.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use horizon_grid_core::{
    AssemblyId, CellValue, CollectingFaultSink, DeferredPool, Dispatcher, ElementId, ElementKind,
    ElementRef, EventFactory, EventKind, FaultKind, InlinePool, Listenable, ListenerHandle,
    ListenerRegistry, Outcome, PayloadArg, Performed, TableElement, ThreadPool, ThreadPoolConfig,
    Veto, WorkerPool, listener_fn,
};
use parking_lot::Mutex;

struct Node {
    id: ElementId,
    kind: ElementKind,
    registry: ListenerRegistry,
    parents: Vec<ElementRef>,
}

impl TableElement for Node {
    fn element_id(&self) -> ElementId {
        self.id
    }
    fn element_kind(&self) -> ElementKind {
        self.kind
    }
    fn listeners(&self) -> &ListenerRegistry {
        &self.registry
    }
    fn containers(&self) -> Vec<ElementRef> {
        self.parents.clone()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn node(kind: ElementKind, parents: Vec<ElementRef>) -> ElementRef {
    Arc::new(Node {
        id: ElementId::next(),
        kind,
        registry: ListenerRegistry::new(),
        parents,
    })
}

/// table <- row, column <- cell
struct Tree {
    table: ElementRef,
    row: ElementRef,
    column: ElementRef,
    cell: ElementRef,
}

fn tree() -> Tree {
    let table = node(ElementKind::Table, vec![]);
    let row = node(ElementKind::Row, vec![table.clone()]);
    let column = node(ElementKind::Column, vec![table.clone()]);
    let cell = node(ElementKind::Cell, vec![row.clone(), column.clone()]);
    Tree {
        table,
        row,
        column,
        cell,
    }
}

type Log = Arc<Mutex<Vec<(EventKind, ElementId, Option<ElementId>)>>>;

fn recorder(log: &Log) -> ListenerHandle {
    let log = log.clone();
    listener_fn(move |event| {
        log.lock().push((
            event.kind(),
            event.source_id(),
            event.trigger().map(|t| t.element_id()),
        ));
        Ok(())
    })
}

fn change(old: i64, new: i64) -> Vec<PayloadArg> {
    vec![CellValue::from(old).into(), CellValue::from(new).into()]
}

fn inline_dispatcher(faults: Arc<CollectingFaultSink>) -> Dispatcher {
    Dispatcher::with_parts(EventFactory::new(), Arc::new(InlinePool::new()), faults)
}

#[test]
fn test_container_order_cell_row_column_table() {
    let t = tree();
    let log: Log = Arc::default();
    let listener = recorder(&log);
    for element in [&t.table, &t.column, &t.row, &t.cell] {
        element.add_listeners(EventKind::NewValue, &[listener.clone()]);
    }

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let outcome = dispatcher
        .emit(
            EventKind::NewValue,
            t.cell.clone(),
            None,
            AssemblyId::next(),
            &change(1, 2),
        )
        .unwrap();
    assert!(matches!(outcome, Outcome::Queued));

    let cell = t.cell.element_id();
    assert_eq!(
        *log.lock(),
        vec![
            (EventKind::NewValue, cell, None),
            (EventKind::NewValue, t.row.element_id(), Some(cell)),
            (EventKind::NewValue, t.column.element_id(), Some(cell)),
            (EventKind::NewValue, t.table.element_id(), Some(cell)),
        ]
    );
}

#[test]
fn test_registration_order_within_element() {
    let t = tree();
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<ListenerHandle> = (0..4)
        .map(|i| {
            let order = order.clone();
            listener_fn(move |_| {
                order.lock().push(i);
                Ok(())
            })
        })
        .collect();
    t.cell.add_listeners(EventKind::Delete, &[handles[2].clone()]);
    t.cell
        .add_listeners(EventKind::Delete, &[handles[0].clone(), handles[3].clone()]);
    t.cell.add_listeners(EventKind::Delete, &[handles[1].clone()]);

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    dispatcher
        .emit(EventKind::Delete, t.cell.clone(), None, AssemblyId::next(), &[])
        .unwrap();

    assert_eq!(*order.lock(), vec![2, 0, 3, 1]);
}

#[test]
fn test_first_veto_stops_before_phase() {
    let t = tree();
    let log: Log = Arc::default();
    let veto_at_row = listener_fn(|event| Err(Veto::with_reason(event.clone(), "row says no")));
    let table_listener = recorder(&log);
    t.row
        .add_listeners(EventKind::BeforeNewValue, &[veto_at_row.clone()]);
    t.table
        .add_listeners(EventKind::BeforeNewValue, &[table_listener.clone()]);

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let outcome = dispatcher
        .emit(
            EventKind::BeforeNewValue,
            t.cell.clone(),
            None,
            AssemblyId::next(),
            &change(1, 2),
        )
        .unwrap();

    let veto = outcome.into_veto().expect("vetoed");
    assert_eq!(veto.reason(), Some("row says no"));
    assert_eq!(veto.event().source_id(), t.row.element_id());
    assert!(log.lock().is_empty());
}

#[test]
fn test_perform_skips_apply_on_veto() {
    let t = tree();
    let no = listener_fn(|event| Err(Veto::new(event.clone())));
    t.table.add_listeners(EventKind::BeforeDelete, &[no.clone()]);

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let mut applied = false;
    let result = dispatcher
        .perform(EventKind::BeforeDelete, t.row.clone(), &[], || applied = true)
        .unwrap();

    assert!(matches!(result, Performed::Vetoed(_)));
    assert!(!applied);
}

#[test]
fn test_perform_shares_one_assembly() {
    let t = tree();
    let assemblies = Arc::new(Mutex::new(Vec::new()));
    let a = assemblies.clone();
    let listener = listener_fn(move |event| {
        a.lock().push((event.kind(), event.assembly_id()));
        Ok(())
    });
    t.cell
        .add_listeners(EventKind::BeforeNewValue, &[listener.clone()]);
    t.table.add_listeners(EventKind::NewValue, &[listener.clone()]);

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let result = dispatcher
        .perform(EventKind::BeforeNewValue, t.cell.clone(), &change(3, 4), || 7)
        .unwrap();
    assert!(matches!(result, Performed::Applied(7)));

    let seen = assemblies.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, EventKind::BeforeNewValue);
    assert_eq!(seen[1].0, EventKind::NewValue);
    assert_eq!(seen[0].1, seen[1].1);
}

#[test]
fn test_declined_mutation_has_no_after_phase() {
    let t = tree();
    let log: Log = Arc::default();
    let listener = recorder(&log);
    t.cell.add_listeners(EventKind::BeforeNewValue, &[listener.clone()]);
    t.cell.add_listeners(EventKind::NewValue, &[listener.clone()]);

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let declined = dispatcher
        .perform_if(EventKind::BeforeNewValue, t.cell.clone(), &change(1, 2), || {
            None::<()>
        })
        .unwrap();
    assert!(matches!(declined, Performed::Applied(None)));
    let kinds: Vec<_> = log.lock().iter().map(|(kind, _, _)| *kind).collect();
    assert_eq!(kinds, vec![EventKind::BeforeNewValue]);

    let applied = dispatcher
        .perform_if(EventKind::BeforeNewValue, t.cell.clone(), &change(2, 3), || {
            Some(3)
        })
        .unwrap();
    assert!(matches!(applied, Performed::Applied(Some(3))));
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn test_perform_rejects_non_vetoable_kind() {
    let t = tree();
    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let result = dispatcher.perform(EventKind::NewValue, t.cell.clone(), &change(1, 2), || ());
    assert!(result.is_err());
}

#[test]
fn test_construction_error_is_returned_not_dispatched() {
    let t = tree();
    let log: Log = Arc::default();
    let listener = recorder(&log);
    t.cell.add_listeners(EventKind::NewValue, &[listener.clone()]);

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    let result = dispatcher.emit(
        EventKind::NewValue,
        t.cell.clone(),
        None,
        AssemblyId::next(),
        &[PayloadArg::Kind(ElementKind::Row)],
    );
    assert!(result.is_err());
    assert!(log.lock().is_empty());
}

#[test]
fn test_after_phase_panic_is_isolated() {
    let t = tree();
    let log: Log = Arc::default();
    let panicking = listener_fn(|_| panic!("listener bug"));
    let healthy = recorder(&log);
    t.cell
        .add_listeners(EventKind::Delete, &[panicking.clone(), healthy.clone()]);

    let faults = Arc::new(CollectingFaultSink::new());
    let dispatcher = inline_dispatcher(faults.clone());
    dispatcher
        .emit(EventKind::Delete, t.cell.clone(), None, AssemblyId::next(), &[])
        .unwrap();

    assert_eq!(log.lock().len(), 1);
    assert_eq!(faults.count(FaultKind::ListenerPanic), 1);
    assert_eq!(faults.faults()[0].message, "listener bug");
}

#[test]
fn test_late_veto_is_reported_and_ignored() {
    let t = tree();
    let log: Log = Arc::default();
    let late = listener_fn(|event| Err(Veto::new(event.clone())));
    let after = recorder(&log);
    t.table
        .add_listeners(EventKind::Recalculate, &[late.clone(), after.clone()]);

    let faults = Arc::new(CollectingFaultSink::new());
    let dispatcher = inline_dispatcher(faults.clone());
    let outcome = dispatcher
        .emit(EventKind::Recalculate, t.table.clone(), None, AssemblyId::next(), &[])
        .unwrap();

    assert!(matches!(outcome, Outcome::Delivered { notified: 2 }));
    assert_eq!(log.lock().len(), 1);
    assert_eq!(faults.count(FaultKind::LateVeto), 1);
}

#[test]
fn test_before_phase_panic_counts_as_no_objection() {
    let t = tree();
    let panicking = listener_fn(|_| panic!("before bug"));
    t.cell
        .add_listeners(EventKind::BeforeNewValue, &[panicking.clone()]);

    let faults = Arc::new(CollectingFaultSink::new());
    let dispatcher = inline_dispatcher(faults.clone());
    let outcome = dispatcher
        .emit(
            EventKind::BeforeNewValue,
            t.cell.clone(),
            None,
            AssemblyId::next(),
            &change(1, 2),
        )
        .unwrap();

    assert!(!outcome.is_vetoed());
    assert_eq!(faults.count(FaultKind::ListenerPanic), 1);
}

#[test]
fn test_no_listeners_queues_nothing() {
    let t = tree();
    let pool = Arc::new(DeferredPool::new());
    let dispatcher = Dispatcher::with_parts(
        EventFactory::new(),
        pool.clone(),
        Arc::new(CollectingFaultSink::new()),
    );

    let outcome = dispatcher
        .emit(
            EventKind::NewValue,
            t.cell.clone(),
            None,
            AssemblyId::next(),
            &change(1, 2),
        )
        .unwrap();
    assert!(matches!(outcome, Outcome::Delivered { notified: 0 }));
    assert_eq!(pool.queued(), 0);
}

#[test]
fn test_off_thread_units_keep_submission_order() {
    let t = tree();
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();
    let listener = listener_fn(move |event| {
        if let Some(n) = event.new_value().and_then(|v| v.as_i64()) {
            v.lock().push(n);
        }
        Ok(())
    });
    t.cell.add_listeners(EventKind::NewValue, &[listener.clone()]);

    let pool = Arc::new(DeferredPool::new());
    let dispatcher = Dispatcher::with_parts(
        EventFactory::new(),
        pool.clone(),
        Arc::new(CollectingFaultSink::new()),
    );
    for n in 0..5 {
        dispatcher
            .emit(
                EventKind::NewValue,
                t.cell.clone(),
                None,
                AssemblyId::next(),
                &change(n - 1, n),
            )
            .unwrap();
    }

    assert!(values.lock().is_empty());
    assert_eq!(pool.queued(), 1);
    assert_eq!(dispatcher.backlog(), 5);

    pool.run_pending();
    assert_eq!(*values.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(dispatcher.backlog(), 0);
}

#[test]
fn test_off_thread_listeners_are_captured_at_dispatch() {
    let t = tree();
    let log: Log = Arc::default();
    let early = recorder(&log);
    let late = recorder(&log);
    let dropped = recorder(&log);
    t.cell.add_listeners(EventKind::NewValue, &[early.clone(), dropped.clone()]);

    let pool = Arc::new(DeferredPool::new());
    let dispatcher = Dispatcher::with_parts(
        EventFactory::new(),
        pool.clone(),
        Arc::new(CollectingFaultSink::new()),
    );
    dispatcher
        .emit(
            EventKind::NewValue,
            t.cell.clone(),
            None,
            AssemblyId::next(),
            &change(0, 1),
        )
        .unwrap();

    // Registered after the dispatch began, on the source and on a container
    // that had no listeners then.
    t.cell.add_listeners(EventKind::NewValue, &[late.clone()]);
    t.table.add_listeners(EventKind::NewValue, &[late.clone()]);
    // The queue holds listeners weakly.
    drop(dropped);

    pool.run_pending();
    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, t.cell.element_id());
}

#[test]
fn test_off_thread_delivery_on_real_pool() {
    let t = tree();
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = values.clone();
    let listener = listener_fn(move |event| {
        v.lock().push(event.new_value().and_then(|v| v.as_i64()).unwrap_or(-1));
        Ok(())
    });
    t.table.add_listeners(EventKind::NewValue, &[listener.clone()]);

    let pool: Arc<dyn WorkerPool> =
        Arc::new(ThreadPool::new(ThreadPoolConfig::with_threads(4)).unwrap());
    let dispatcher = Dispatcher::with_parts(
        EventFactory::new(),
        pool,
        Arc::new(CollectingFaultSink::new()),
    );
    for n in 0..50 {
        dispatcher
            .emit(
                EventKind::NewValue,
                t.cell.clone(),
                None,
                AssemblyId::next(),
                &change(n, n + 1),
            )
            .unwrap();
    }

    assert!(dispatcher.wait_idle(Duration::from_secs(5)));
    assert_eq!(*values.lock(), (1..=50).collect::<Vec<_>>());
}

#[test]
fn test_remove_all_listeners_stops_delivery_but_containers_still_hear() {
    let t = tree();
    let log: Log = Arc::default();
    let listener = recorder(&log);
    t.cell.add_listeners(EventKind::Delete, &[listener.clone()]);
    t.row.add_listeners(EventKind::Delete, &[listener.clone()]);

    let removed = t.cell.remove_all_listeners(&[]);
    assert_eq!(removed.len(), 1);
    assert!(!t.cell.has_listeners(&[]));

    let dispatcher = inline_dispatcher(Arc::new(CollectingFaultSink::new()));
    dispatcher
        .emit(EventKind::Delete, t.cell.clone(), None, AssemblyId::next(), &[])
        .unwrap();

    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, t.row.element_id());
}

#[test]
fn test_shut_down_pool_falls_back_to_caller() {
    let t = tree();
    let log: Log = Arc::default();
    let listener = recorder(&log);
    t.cell.add_listeners(EventKind::NewValue, &[listener.clone()]);

    let pool = Arc::new(InlinePool::new());
    pool.shutdown();
    let faults = Arc::new(CollectingFaultSink::new());
    let dispatcher = Dispatcher::with_parts(EventFactory::new(), pool, faults.clone());
    dispatcher
        .emit(
            EventKind::NewValue,
            t.cell.clone(),
            None,
            AssemblyId::next(),
            &change(0, 1),
        )
        .unwrap();

    assert_eq!(log.lock().len(), 1);
    assert_eq!(faults.count(FaultKind::SubmitFailed), 1);
}
