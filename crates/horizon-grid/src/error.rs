//! Error types for the table engine.

use std::path::PathBuf;

use horizon_grid_core::{ElementId, ElementKind, EventError, PoolError, Veto};

/// Result type alias for table operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors returned by table operations.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// A listener objected; the element is unchanged.
    #[error("Vetoed: {0}")]
    Vetoed(Veto),

    /// The element has been deleted.
    #[error("{kind} {id} has been deleted")]
    Deleted {
        /// Kind of the deleted element.
        kind: ElementKind,
        /// Identity of the deleted element.
        id: ElementId,
    },

    /// The element belongs to a different table.
    #[error("{kind} {id} does not belong to this table")]
    ForeignElement {
        /// Kind of the element.
        kind: ElementKind,
        /// Identity of the element.
        id: ElementId,
    },

    /// No row or column exists at the given index.
    #[error("No {kind} at index {index}")]
    OutOfRange {
        /// Kind looked up.
        kind: ElementKind,
        /// The index that was out of range.
        index: usize,
    },

    /// A derivation would make a cell depend on itself.
    #[error("Circular reference: {cell} would depend on itself")]
    CircularReference {
        /// Label of the cell whose derivation was rejected.
        cell: String,
    },

    /// An event could not be built.
    #[error(transparent)]
    Event(#[from] EventError),

    /// The worker pool refused work or could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A configuration file could not be read.
    #[error("Failed to read configuration '{path}': {source}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration document is malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GridError {
    /// Create a deleted-element error.
    pub fn deleted(kind: ElementKind, id: ElementId) -> Self {
        Self::Deleted { kind, id }
    }

    /// Create a foreign-element error.
    pub fn foreign(kind: ElementKind, id: ElementId) -> Self {
        Self::ForeignElement { kind, id }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a veto.
    pub fn is_veto(&self) -> bool {
        matches!(self, Self::Vetoed(_))
    }

    /// The veto, if this error is one.
    pub fn veto(&self) -> Option<&Veto> {
        match self {
            Self::Vetoed(veto) => Some(veto),
            _ => None,
        }
    }
}

impl From<Veto> for GridError {
    fn from(veto: Veto) -> Self {
        Self::Vetoed(veto)
    }
}

/// Errors an [`Evaluator`](crate::Evaluator) reports for a cell.
///
/// The message is committed to the cell as [`CellValue::Error`](horizon_grid_core::CellValue::Error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// The formula could not be evaluated.
    #[error("{0}")]
    Failed(String),

    /// A precedent cell no longer exists.
    #[error("#REF!")]
    BrokenReference,

    /// No evaluator is configured for the table.
    #[error("no evaluator configured")]
    NoEvaluator,
}

impl EvalError {
    /// Create a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
