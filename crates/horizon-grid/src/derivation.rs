//! Derived cells and the dependency index.
//!
//! A [`Derivation`] makes a cell's value a function of other cells. The formula
//! text is opaque to the engine: it is handed to the table's
//! [`Evaluator`](crate::Evaluator) together with the precedent cells. The
//! engine only needs the precedents to know what to invalidate when a value
//! changes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use horizon_grid_core::ElementId;

use crate::cell::Cell;

/// How a derived cell computes its value.
#[derive(Clone)]
pub struct Derivation {
    formula: String,
    precedents: Vec<Weak<Cell>>,
    precedent_ids: Vec<ElementId>,
}

impl Derivation {
    /// A derivation with the given formula text and precedent cells.
    pub fn new(formula: impl Into<String>, precedents: &[Arc<Cell>]) -> Self {
        let mut precedent_ids = Vec::with_capacity(precedents.len());
        let mut weak = Vec::with_capacity(precedents.len());
        for cell in precedents {
            let id = cell.id();
            if !precedent_ids.contains(&id) {
                precedent_ids.push(id);
                weak.push(Arc::downgrade(cell));
            }
        }
        Self {
            formula: formula.into(),
            precedents: weak,
            precedent_ids,
        }
    }

    /// The formula text.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Identities of the precedent cells, without duplicates.
    pub fn precedent_ids(&self) -> &[ElementId] {
        &self.precedent_ids
    }

    /// The precedent cells in declaration order; `None` where a cell no longer
    /// exists.
    pub fn precedents(&self) -> Vec<Option<Arc<Cell>>> {
        self.precedents
            .iter()
            .map(|w| w.upgrade().filter(|c| !c.is_deleted()))
            .collect()
    }
}

impl fmt::Debug for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("formula", &self.formula)
            .field("precedents", &self.precedent_ids)
            .finish()
    }
}

/// Precedent/dependent relation between the cells of one table.
#[derive(Debug, Default)]
pub(crate) struct DependencyIndex {
    /// derived cell -> the cells it reads
    precedents: HashMap<ElementId, Vec<ElementId>>,
    /// cell -> the derived cells that read it
    dependents: HashMap<ElementId, HashSet<ElementId>>,
}

impl DependencyIndex {
    /// Record that `cell` reads `precedents`, replacing what it read before.
    ///
    /// Fails, leaving the index untouched, if `cell` would transitively read
    /// itself.
    pub(crate) fn set(&mut self, cell: ElementId, precedents: &[ElementId]) -> Result<(), ()> {
        if self.would_cycle(cell, precedents) {
            return Err(());
        }
        self.remove(cell);
        for &p in precedents {
            self.dependents.entry(p).or_default().insert(cell);
        }
        self.precedents.insert(cell, precedents.to_vec());
        Ok(())
    }

    /// Forget what `cell` reads.
    pub(crate) fn remove(&mut self, cell: ElementId) {
        if let Some(old) = self.precedents.remove(&cell) {
            for p in old {
                if let Some(set) = self.dependents.get_mut(&p) {
                    set.remove(&cell);
                    if set.is_empty() {
                        self.dependents.remove(&p);
                    }
                }
            }
        }
    }

    /// Forget every derivation.
    pub(crate) fn clear(&mut self) {
        self.precedents.clear();
        self.dependents.clear();
    }

    /// The derived cells that read `cell` directly.
    pub(crate) fn dependents_of(&self, cell: ElementId) -> Vec<ElementId> {
        let mut out: Vec<ElementId> = self
            .dependents
            .get(&cell)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Whether `cell` is derived.
    pub(crate) fn is_derived(&self, cell: ElementId) -> bool {
        self.precedents.contains_key(&cell)
    }

    /// Every derived cell.
    pub(crate) fn derived_cells(&self) -> Vec<ElementId> {
        let mut out: Vec<ElementId> = self.precedents.keys().copied().collect();
        out.sort();
        out
    }

    /// Whether reading `precedents` from `cell` closes a loop: `cell` is one of
    /// them, or one of them (transitively) reads `cell`.
    fn would_cycle(&self, cell: ElementId, precedents: &[ElementId]) -> bool {
        let mut stack: Vec<ElementId> = precedents.to_vec();
        let mut seen: HashSet<ElementId> = HashSet::new();
        while let Some(next) = stack.pop() {
            if next == cell {
                return true;
            }
            if !seen.insert(next) {
                continue;
            }
            if let Some(reads) = self.precedents.get(&next) {
                stack.extend(reads.iter().copied());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ElementId> {
        (0..n).map(|_| ElementId::next()).collect()
    }

    #[test]
    fn test_dependents_follow_set_and_remove() {
        let c = ids(3);
        let mut index = DependencyIndex::default();
        index.set(c[2], &[c[0], c[1]]).unwrap();

        assert_eq!(index.dependents_of(c[0]), vec![c[2]]);
        assert!(index.is_derived(c[2]));

        index.set(c[2], &[c[1]]).unwrap();
        assert!(index.dependents_of(c[0]).is_empty());
        assert_eq!(index.dependents_of(c[1]), vec![c[2]]);

        index.remove(c[2]);
        assert!(index.dependents_of(c[1]).is_empty());
        assert!(!index.is_derived(c[2]));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let c = ids(1);
        let mut index = DependencyIndex::default();
        assert!(index.set(c[0], &[c[0]]).is_err());
    }

    #[test]
    fn test_transitive_cycle_rejected_and_index_untouched() {
        let c = ids(3);
        let mut index = DependencyIndex::default();
        index.set(c[1], &[c[0]]).unwrap();
        index.set(c[2], &[c[1]]).unwrap();

        assert!(index.set(c[0], &[c[2]]).is_err());
        assert!(!index.is_derived(c[0]));
        assert_eq!(index.dependents_of(c[1]), vec![c[2]]);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let c = ids(3);
        let mut index = DependencyIndex::default();
        index.set(c[1], &[c[0]]).unwrap();
        index.set(c[2], &[c[1]]).unwrap();

        index.clear();
        assert!(index.derived_cells().is_empty());
        assert!(index.dependents_of(c[0]).is_empty());
        assert!(index.set(c[0], &[c[2]]).is_ok());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let c = ids(4);
        let mut index = DependencyIndex::default();
        index.set(c[1], &[c[0]]).unwrap();
        index.set(c[2], &[c[0]]).unwrap();
        assert!(index.set(c[3], &[c[1], c[2]]).is_ok());
        assert_eq!(index.derived_cells().len(), 3);
    }
}
