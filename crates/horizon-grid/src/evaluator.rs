//! The seam between the engine and a formula language.
//!
//! The engine never interprets formulas. When a derived cell needs a value it
//! asks the table's [`Evaluator`] with a [`RecalcContext`] describing the cell,
//! its formula text and the current values of its precedents.

use std::fmt;
use std::sync::Arc;

use horizon_grid_core::CellValue;

use crate::cell::Cell;
use crate::derivation::Derivation;
use crate::error::EvalError;
use crate::table::Table;

/// Everything an evaluator gets to see for one recomputation.
pub struct RecalcContext<'a> {
    table: &'a Table,
    cell: &'a Arc<Cell>,
    derivation: &'a Derivation,
}

impl<'a> RecalcContext<'a> {
    pub(crate) fn new(table: &'a Table, cell: &'a Arc<Cell>, derivation: &'a Derivation) -> Self {
        Self {
            table,
            cell,
            derivation,
        }
    }

    /// The table being recalculated.
    pub fn table(&self) -> &Table {
        self.table
    }

    /// The cell being recomputed.
    pub fn cell(&self) -> &Arc<Cell> {
        self.cell
    }

    /// The formula text.
    pub fn formula(&self) -> &str {
        self.derivation.formula()
    }

    /// The derivation being evaluated.
    pub fn derivation(&self) -> &Derivation {
        self.derivation
    }

    /// Current values of the precedents, in declaration order.
    ///
    /// Fails with [`EvalError::BrokenReference`] if a precedent no longer
    /// exists.
    pub fn precedent_values(&self) -> Result<Vec<CellValue>, EvalError> {
        self.derivation
            .precedents()
            .into_iter()
            .map(|cell| cell.map(|c| c.value()).ok_or(EvalError::BrokenReference))
            .collect()
    }

    /// Current value of the precedent at `index`.
    pub fn precedent_value(&self, index: usize) -> Result<CellValue, EvalError> {
        self.derivation
            .precedents()
            .into_iter()
            .nth(index)
            .flatten()
            .map(|c| c.value())
            .ok_or(EvalError::BrokenReference)
    }
}

impl fmt::Debug for RecalcContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecalcContext")
            .field("cell", &self.cell.id())
            .field("derivation", self.derivation)
            .finish()
    }
}

/// Computes values of derived cells.
///
/// Called on worker threads. An `Err` is committed to the cell as
/// [`CellValue::Error`]; a panic is reported as a fault and nothing is
/// committed.
pub trait Evaluator: Send + Sync {
    /// Compute the value for `ctx.cell()`.
    fn recompute(&self, ctx: &RecalcContext<'_>) -> Result<CellValue, EvalError>;
}

struct FnEvaluator<F>(F);

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&RecalcContext<'_>) -> Result<CellValue, EvalError> + Send + Sync,
{
    fn recompute(&self, ctx: &RecalcContext<'_>) -> Result<CellValue, EvalError> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as an evaluator.
///
/// # Example
///
/// ```
/// use horizon_grid::{CellValue, EvalError, evaluator_fn};
///
/// // "SUM": add up the numeric precedents
/// let sum = evaluator_fn(|ctx| {
///     let total: f64 = ctx.precedent_values()?.iter().filter_map(CellValue::as_f64).sum();
///     Ok(CellValue::Number(total))
/// });
/// # let _ = sum;
/// ```
pub fn evaluator_fn<F>(f: F) -> Arc<dyn Evaluator>
where
    F: Fn(&RecalcContext<'_>) -> Result<CellValue, EvalError> + Send + Sync + 'static,
{
    Arc::new(FnEvaluator(f))
}

/// The evaluator of a table built without one. Every derived cell evaluates
/// to an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvaluator;

impl Evaluator for NoEvaluator {
    fn recompute(&self, _ctx: &RecalcContext<'_>) -> Result<CellValue, EvalError> {
        Err(EvalError::NoEvaluator)
    }
}
