//! Core systems for Horizon Grid.
//!
//! This crate provides the event fabric underneath the Horizon Grid table
//! engine:
//!
//! - **Elements**: identity, kinds and containment of table elements
//! - **Event Taxonomy**: which kinds exist, who may emit them, how they travel
//! - **Events**: immutable, validated notifications built by [`EventFactory`]
//! - **Listeners**: per-element registries of weakly held listeners
//! - **Dispatch**: the before/apply/after protocol with veto and container alerts
//! - **Worker Pools**: rayon-backed, inline and deferred pools for off-thread work
//! - **Faults**: where listener and recomputation failures are reported
//!
//! # Veto Example
//!
//! ```
//! use horizon_grid_core::{EventKind, ListenerRegistry, Veto, listener_fn};
//!
//! let registry = ListenerRegistry::new();
//! let odd_only = listener_fn(|event| {
//!     match event.new_value().and_then(|v| v.as_i64()) {
//!         Some(n) if n % 2 == 0 => Err(Veto::with_reason(event.clone(), "even")),
//!         _ => Ok(()),
//!     }
//! });
//! registry.add_listeners(EventKind::BeforeNewValue, &[odd_only.clone()]);
//! assert_eq!(registry.snapshot(EventKind::BeforeNewValue).len(), 1);
//! ```

pub mod dispatch;
pub mod element;
mod error;
pub mod event;
pub mod fault;
pub mod listener;
pub mod logging;
pub mod taxonomy;
pub mod threadpool;
pub mod value;

pub use dispatch::{Dispatcher, Outcome, Performed};
pub use element::{
    ElementId, ElementKind, ElementKinds, ElementRef, TableElement, alert_chain, element_cast,
    same_element,
};
pub use error::{ConfigError, EventError, PoolError, Result};
pub use event::{AssemblyId, Event, EventFactory, EventKind, EventPayload, PayloadArg};
pub use fault::{
    CollectingFaultSink, Fault, FaultKind, FaultSink, TracingFaultSink, fault_sink,
    install_fault_sink, panic_message,
};
pub use listener::{EventListener, Listenable, ListenerHandle, ListenerRegistry, Veto, listener_fn};
pub use logging::{TreeFormatOptions, TreeStyle, TreeWriter};
pub use taxonomy::{EventTaxonomy, EventTraits};
pub use threadpool::{
    CancellationToken, DeferredPool, InlinePool, Job, JobId, ThreadPool, ThreadPoolConfig,
    WorkerPool,
};
pub use value::CellValue;

static_assertions::assert_impl_all!(Event: Send, Sync, Clone);
static_assertions::assert_impl_all!(ListenerRegistry: Send, Sync);
static_assertions::assert_impl_all!(Dispatcher: Send, Sync);
static_assertions::assert_impl_all!(ThreadPool: Send, Sync);
static_assertions::assert_obj_safe!(TableElement, EventListener, WorkerPool, FaultSink);
