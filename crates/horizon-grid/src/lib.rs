//! Horizon Grid - a table engine with vetoable change events and
//! asynchronous recalculation.
//!
//! A [`Table`] is a tree of elements: the table contains rows, columns and
//! subsets; every cell is contained by one row and one column. Listeners
//! registered on any element hear about changes to it and, for most event
//! kinds, about changes to anything it contains.
//!
//! Every mutation runs the same protocol: a vetoable before-event on the
//! calling thread, the change itself, then the after-event. Derived cells are
//! recomputed off-thread by the table's
//! [`PendingRecalcCoordinator`], and the table announces `Pendings` and
//! `NoPendings` as its backlog fills and drains.
//!
//! This crate re-exports the event fabric of `horizon_grid_core`.
//!
//! # Example
//!
//! ```
//! use horizon_grid::{EventKind, GridConfig, Listenable, Table, Veto, listener_fn};
//!
//! let table = Table::builder("ledger").config(GridConfig::inline()).build().unwrap();
//! let row = table.add_row().unwrap();
//! let column = table.add_column().unwrap();
//! let cell = table.cell(&row, &column).unwrap();
//!
//! // The row only accepts odd integers.
//! let odd_only = listener_fn(|event| match event.new_value().and_then(|v| v.as_i64()) {
//!     Some(n) if n % 2 == 0 => Err(Veto::with_reason(event.clone(), "even")),
//!     _ => Ok(()),
//! });
//! row.add_listeners(EventKind::BeforeNewValue, &[odd_only.clone()]);
//!
//! assert!(cell.set_value(13).is_ok());
//! assert!(cell.set_value(14).unwrap_err().is_veto());
//! assert_eq!(cell.value().as_i64(), Some(13));
//! ```

pub use horizon_grid_core::*;

mod cell;
mod column;
pub mod config;
mod debug;
mod derivation;
mod error;
mod evaluator;
mod pending;
mod row;
mod subset;
mod table;

pub use cell::Cell;
pub use column::Column;
pub use config::{DEFAULT_MAX_WORKERS, GridConfig, PoolKind};
pub use debug::TableTreeDebug;
pub use derivation::Derivation;
pub use error::{EvalError, GridError, Result};
pub use evaluator::{Evaluator, NoEvaluator, RecalcContext, evaluator_fn};
pub use pending::{PendingRecalcCoordinator, PendingState};
pub use row::Row;
pub use subset::Subset;
pub use table::{Table, TableBuilder};

static_assertions::assert_impl_all!(Table: Send, Sync);
static_assertions::assert_impl_all!(Cell: Send, Sync);
static_assertions::assert_impl_all!(GridError: Send, Sync);
static_assertions::assert_obj_safe!(Evaluator);
