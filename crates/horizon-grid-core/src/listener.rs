//! Listeners, vetoes, and per-element listener registries.
//!
//! Listeners are shared handles ([`ListenerHandle`]) owned by whoever
//! registered them. Registries only keep weak references: once every strong
//! handle is dropped the listener silently stops receiving events and no
//! longer counts in any query.
//!
//! # Key Types
//!
//! - [`EventListener`] - The listener trait; return `Err(Veto)` to object
//! - [`ListenerRegistry`] - Per-element storage, keyed by [`EventKind`]
//! - [`Listenable`] - Listener management on any [`TableElement`]
//!
//! # Example
//!
//! ```
//! use horizon_grid_core::{listener_fn, EventKind, ListenerRegistry, Veto};
//!
//! let registry = ListenerRegistry::new();
//! let reject_all = listener_fn(|event| Err(Veto::new(event.clone())));
//!
//! assert!(registry.add_listeners(EventKind::BeforeNewValue, &[reject_all.clone()]));
//! assert!(registry.has_listeners(&[EventKind::BeforeNewValue]));
//!
//! drop(reject_all);
//! assert!(!registry.has_listeners(&[]));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::element::TableElement;
use crate::event::{Event, EventKind};

/// An objection raised by a listener during a before-phase.
///
/// The veto carries the event it objects to and an optional reason. Returned
/// from an after-phase it has no effect beyond being reported as a fault.
#[derive(Debug, Clone)]
pub struct Veto {
    event: Event,
    reason: Option<String>,
}

impl Veto {
    /// Veto `event` without a reason.
    pub fn new(event: Event) -> Self {
        Self {
            event,
            reason: None,
        }
    }

    /// Veto `event` with a reason.
    pub fn with_reason(event: Event, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: Some(reason.into()),
        }
    }

    /// The vetoed event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Why the event was vetoed, if the listener said.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} vetoed on {}",
            self.event.kind(),
            self.event.source().label()
        )?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Veto {}

/// Something that reacts to events.
///
/// Before-phase listeners may return `Err(Veto)` to abort the mutation. A
/// listener may be registered on several elements and for several kinds.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &Event) -> Result<(), Veto>;
}

/// A shared listener handle. Registries hold these weakly.
pub type ListenerHandle = Arc<dyn EventListener>;

struct FnListener<F>(F);

impl<F> EventListener for FnListener<F>
where
    F: Fn(&Event) -> Result<(), Veto> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), Veto> {
        (self.0)(event)
    }
}

/// Wrap a closure as a listener handle.
pub fn listener_fn<F>(f: F) -> ListenerHandle
where
    F: Fn(&Event) -> Result<(), Veto> + Send + Sync + 'static,
{
    Arc::new(FnListener(f))
}

/// Identity of a listener, independent of whether it is still alive.
#[inline]
fn handle_key(handle: &ListenerHandle) -> *const () {
    Arc::as_ptr(handle) as *const ()
}

struct Entry {
    listener: Weak<dyn EventListener>,
    /// Registration sequence number; orders listeners across kinds.
    seq: u64,
}

impl Entry {
    #[inline]
    fn key(&self) -> *const () {
        self.listener.as_ptr() as *const ()
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.listener.strong_count() > 0
    }
}

type ListenerMap = HashMap<EventKind, Vec<Entry>>;

/// The listeners registered on one element, per event kind.
///
/// Storage is allocated on first registration. Within a kind, listeners are
/// notified in registration order and each handle appears at most once.
pub struct ListenerRegistry {
    map: RwLock<Option<ListenerMap>>,
    next_seq: AtomicU64,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    /// Create an empty registry. Allocates nothing until first use.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(None),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register `handles` for `kind`.
    ///
    /// Handles already registered for the kind are left where they are.
    /// Returns `true` if at least one handle was added.
    pub fn add_listeners(&self, kind: EventKind, handles: &[ListenerHandle]) -> bool {
        if handles.is_empty() {
            return false;
        }

        let mut guard = self.map.write();
        let entries = guard.get_or_insert_with(HashMap::new).entry(kind).or_default();
        // Dead entries go here; a dead slot may share its address with a new handle.
        entries.retain(Entry::is_live);

        let mut added = false;
        for handle in handles {
            let key = handle_key(handle);
            if entries.iter().any(|e| e.key() == key) {
                continue;
            }
            entries.push(Entry {
                listener: Arc::downgrade(handle),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            });
            added = true;
        }

        tracing::trace!(
            target: "horizon_grid_core::listener",
            ?kind,
            count = entries.len(),
            added,
            "listeners added"
        );
        added
    }

    /// Unregister `handles` for `kind`.
    ///
    /// Returns `true` if at least one handle was removed.
    pub fn remove_listeners(&self, kind: EventKind, handles: &[ListenerHandle]) -> bool {
        let mut guard = self.map.write();
        let Some(entries) = guard.as_mut().and_then(|map| map.get_mut(&kind)) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|e| !handles.iter().any(|h| handle_key(h) == e.key()));
        let removed = entries.len() != before;

        tracing::trace!(
            target: "horizon_grid_core::listener",
            ?kind,
            removed,
            "listeners removed"
        );
        removed
    }

    /// The live listeners registered for any of `kinds` (all kinds when
    /// empty), de-duplicated, in first-registration order.
    pub fn listeners(&self, kinds: &[EventKind]) -> Vec<ListenerHandle> {
        let guard = self.map.read();
        let Some(map) = guard.as_ref() else {
            return Vec::new();
        };

        let mut found: Vec<(u64, ListenerHandle)> = Vec::new();
        for (kind, entries) in map.iter() {
            if !kinds.is_empty() && !kinds.contains(kind) {
                continue;
            }
            for entry in entries {
                if let Some(handle) = entry.listener.upgrade() {
                    found.push((entry.seq, handle));
                }
            }
        }
        drop(guard);

        Self::order_unique(found)
    }

    /// Remove every listener registered for any of `kinds` (all kinds when
    /// empty) and return the live ones that were removed.
    pub fn remove_all_listeners(&self, kinds: &[EventKind]) -> Vec<ListenerHandle> {
        let mut guard = self.map.write();
        let Some(map) = guard.as_mut() else {
            return Vec::new();
        };

        let mut removed: Vec<(u64, ListenerHandle)> = Vec::new();
        map.retain(|kind, entries| {
            if !kinds.is_empty() && !kinds.contains(kind) {
                return true;
            }
            removed.extend(
                entries
                    .drain(..)
                    .filter_map(|e| e.listener.upgrade().map(|h| (e.seq, h))),
            );
            false
        });
        drop(guard);

        tracing::trace!(
            target: "horizon_grid_core::listener",
            removed = removed.len(),
            "all listeners removed"
        );
        Self::order_unique(removed)
    }

    /// Whether any live listener is registered for any of `kinds` (all kinds
    /// when empty).
    pub fn has_listeners(&self, kinds: &[EventKind]) -> bool {
        let guard = self.map.read();
        let Some(map) = guard.as_ref() else {
            return false;
        };

        map.iter()
            .filter(|(kind, _)| kinds.is_empty() || kinds.contains(kind))
            .any(|(_, entries)| entries.iter().any(Entry::is_live))
    }

    /// A consistent copy of the live listeners for `kind`, in notification
    /// order. Taken by the dispatcher when a delivery begins.
    pub fn snapshot(&self, kind: EventKind) -> Vec<ListenerHandle> {
        let guard = self.map.read();
        guard
            .as_ref()
            .and_then(|map| map.get(&kind))
            .map(|entries| entries.iter().filter_map(|e| e.listener.upgrade()).collect())
            .unwrap_or_default()
    }

    /// Drop entries whose listener is gone. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut guard = self.map.write();
        let Some(map) = guard.as_mut() else {
            return 0;
        };

        let mut pruned = 0;
        map.retain(|_, entries| {
            let before = entries.len();
            entries.retain(Entry::is_live);
            pruned += before - entries.len();
            !entries.is_empty()
        });
        pruned
    }

    /// Remove everything and release the storage.
    pub fn clear(&self) {
        *self.map.write() = None;
    }

    /// Whether storage has been allocated.
    pub fn is_allocated(&self) -> bool {
        self.map.read().is_some()
    }

    /// Number of live listeners registered for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        let guard = self.map.read();
        guard
            .as_ref()
            .and_then(|map| map.get(&kind))
            .map(|entries| entries.iter().filter(|e| e.is_live()).count())
            .unwrap_or(0)
    }

    fn order_unique(mut found: Vec<(u64, ListenerHandle)>) -> Vec<ListenerHandle> {
        found.sort_by_key(|(seq, _)| *seq);
        let mut out: Vec<ListenerHandle> = Vec::with_capacity(found.len());
        for (_, handle) in found {
            let key = handle_key(&handle);
            if !out.iter().any(|h| handle_key(h) == key) {
                out.push(handle);
            }
        }
        out
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.map.read();
        let mut counts: Vec<(EventKind, usize)> = guard
            .as_ref()
            .map(|map| {
                map.iter()
                    .map(|(kind, entries)| (*kind, entries.iter().filter(|e| e.is_live()).count()))
                    .filter(|(_, n)| *n > 0)
                    .collect()
            })
            .unwrap_or_default();
        counts.sort();
        f.debug_struct("ListenerRegistry")
            .field("allocated", &guard.is_some())
            .field("listeners", &counts)
            .finish()
    }
}

/// Listener management on table elements.
///
/// Implemented for every [`TableElement`] by delegating to its registry.
/// Registration on a deleted element is refused.
pub trait Listenable {
    /// Register `handles` for `kind`.
    fn add_listeners(&self, kind: EventKind, handles: &[ListenerHandle]) -> bool;

    /// Unregister `handles` for `kind`.
    fn remove_listeners(&self, kind: EventKind, handles: &[ListenerHandle]) -> bool;

    /// Live listeners for `kinds` (all when empty), in first-registration order.
    fn listeners_for(&self, kinds: &[EventKind]) -> Vec<ListenerHandle>;

    /// Remove and return the listeners for `kinds` (all when empty).
    fn remove_all_listeners(&self, kinds: &[EventKind]) -> Vec<ListenerHandle>;

    /// Whether any live listener is registered for `kinds` (all when empty).
    fn has_listeners(&self, kinds: &[EventKind]) -> bool;
}

impl<T: TableElement + ?Sized> Listenable for T {
    fn add_listeners(&self, kind: EventKind, handles: &[ListenerHandle]) -> bool {
        if self.is_deleted() {
            return false;
        }
        self.listeners().add_listeners(kind, handles)
    }

    fn remove_listeners(&self, kind: EventKind, handles: &[ListenerHandle]) -> bool {
        self.listeners().remove_listeners(kind, handles)
    }

    fn listeners_for(&self, kinds: &[EventKind]) -> Vec<ListenerHandle> {
        self.listeners().listeners(kinds)
    }

    fn remove_all_listeners(&self, kinds: &[EventKind]) -> Vec<ListenerHandle> {
        self.listeners().remove_all_listeners(kinds)
    }

    fn has_listeners(&self, kinds: &[EventKind]) -> bool {
        self.listeners().has_listeners(kinds)
    }
}
