//! Event kinds, event values, and the factory that builds them.
//!
//! An [`Event`] is immutable once built and cheap to clone: its state lives
//! behind an `Arc`, so the same event can be handed to many listeners and
//! carried across threads.
//!
//! # Related
//!
//! - [`crate::EventTaxonomy`] - Static metadata for each [`EventKind`]
//! - [`crate::Dispatcher`] - Delivers events built by [`EventFactory`]

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::element::{ElementId, ElementKind, ElementRef};
use crate::error::{EventError, Result};
use crate::taxonomy::EventTaxonomy;
use crate::value::CellValue;

/// Counter for assembly identifiers.
static NEXT_ASSEMBLY_ID: AtomicU64 = AtomicU64::new(1);

/// Every kind of event an element can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// A child element is about to be created. Fired on the would-be container.
    BeforeCreate,
    /// An element is about to be deleted.
    BeforeDelete,
    /// A value is about to change.
    BeforeNewValue,
    /// An element was created.
    Create,
    /// An element was deleted.
    Delete,
    /// A value changed.
    NewValue,
    /// The table has work awaiting recomputation.
    Pendings,
    /// The table finished all pending recomputation.
    NoPendings,
    /// A recalculation was requested.
    Recalculate,
}

impl EventKind {
    /// The number of event kinds.
    pub const COUNT: usize = 9;

    /// All event kinds.
    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::BeforeCreate,
        EventKind::BeforeDelete,
        EventKind::BeforeNewValue,
        EventKind::Create,
        EventKind::Delete,
        EventKind::NewValue,
        EventKind::Pendings,
        EventKind::NoPendings,
        EventKind::Recalculate,
    ];

    /// Dense index of the kind, for table lookups.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Whether this is a vetoable before kind.
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Self::BeforeCreate | Self::BeforeDelete | Self::BeforeNewValue
        )
    }

    /// Whether events of this kind carry an old and a new value.
    pub fn carries_value(self) -> bool {
        matches!(self, Self::BeforeNewValue | Self::NewValue)
    }
}

/// Groups every event produced by a single external API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyId(u64);

impl AssemblyId {
    /// Allocate a fresh assembly identifier.
    pub fn next() -> Self {
        Self(NEXT_ASSEMBLY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// What an event carries beyond its kind and source.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Nothing.
    None,
    /// A value change.
    ValueChange {
        /// The value before the change, if there was one.
        old: Option<CellValue>,
        /// The value after the change.
        new: CellValue,
    },
    /// The kind of element being (or that was) created.
    Created {
        /// The created element kind.
        kind: ElementKind,
    },
}

/// One positional payload argument handed to [`EventFactory::create`].
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadArg {
    /// A value.
    Value(CellValue),
    /// An explicitly absent value (an old value that never existed).
    Absent,
    /// An element kind.
    Kind(ElementKind),
}

impl From<CellValue> for PayloadArg {
    fn from(value: CellValue) -> Self {
        Self::Value(value)
    }
}

impl From<Option<CellValue>> for PayloadArg {
    fn from(value: Option<CellValue>) -> Self {
        value.map_or(Self::Absent, Self::Value)
    }
}

impl From<ElementKind> for PayloadArg {
    fn from(kind: ElementKind) -> Self {
        Self::Kind(kind)
    }
}

struct EventInner {
    kind: EventKind,
    source: ElementRef,
    trigger: Option<ElementRef>,
    assembly_id: AssemblyId,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

/// An immutable notification about an element.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// The event kind.
    #[inline]
    pub fn kind(&self) -> EventKind {
        self.inner.kind
    }

    /// The element whose listeners receive this event.
    pub fn source(&self) -> &ElementRef {
        &self.inner.source
    }

    /// The element whose mutation caused this event, when it was propagated
    /// from a descendant.
    pub fn trigger(&self) -> Option<&ElementRef> {
        self.inner.trigger.as_ref()
    }

    /// Whether the event was propagated from another element.
    pub fn is_triggered(&self) -> bool {
        self.inner.trigger.is_some()
    }

    /// The assembly this event belongs to.
    pub fn assembly_id(&self) -> AssemblyId {
        self.inner.assembly_id
    }

    /// When the event was built.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.timestamp
    }

    /// The raw payload.
    pub fn payload(&self) -> &EventPayload {
        &self.inner.payload
    }

    /// The value before the change, for value events that had one.
    pub fn old_value(&self) -> Option<&CellValue> {
        match &self.inner.payload {
            EventPayload::ValueChange { old, .. } => old.as_ref(),
            _ => None,
        }
    }

    /// The value after the change, for value events.
    pub fn new_value(&self) -> Option<&CellValue> {
        match &self.inner.payload {
            EventPayload::ValueChange { new, .. } => Some(new),
            _ => None,
        }
    }

    /// The kind of element being created (`BeforeCreate`) or that was created
    /// (`Create`).
    pub fn created_element_kind(&self) -> Option<ElementKind> {
        match &self.inner.payload {
            EventPayload::Created { kind } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this is a vetoable before event.
    pub fn is_before(&self) -> bool {
        self.inner.kind.is_before()
    }

    /// Identity of the source element.
    pub fn source_id(&self) -> ElementId {
        self.inner.source.element_id()
    }

    /// Re-address this event to a container of its source.
    ///
    /// The copy keeps the kind, payload, assembly and timestamp; its source is
    /// `container` and its trigger is this event's source.
    pub(crate) fn retarget(&self, container: ElementRef) -> Event {
        Event {
            inner: Arc::new(EventInner {
                kind: self.inner.kind,
                source: container,
                trigger: Some(self.inner.source.clone()),
                assembly_id: self.inner.assembly_id,
                timestamp: self.inner.timestamp,
                payload: self.inner.payload.clone(),
            }),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source.label())
            .field("trigger", &self.inner.trigger.as_ref().map(|t| t.label()))
            .field("assembly_id", &self.inner.assembly_id)
            .field("payload", &self.inner.payload)
            .finish()
    }
}

/// Validates and builds events.
///
/// The factory checks that the source element may emit the kind and that the
/// payload matches it:
///
/// - `BeforeNewValue` / `NewValue`: exactly an old value (or
///   [`PayloadArg::Absent`]) and a new value
/// - `BeforeCreate`: exactly one element kind
/// - everything else: nothing
#[derive(Debug, Clone)]
pub struct EventFactory {
    taxonomy: &'static EventTaxonomy,
    supported: Option<HashSet<EventKind>>,
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFactory {
    /// A factory for every kind of the standard taxonomy.
    pub fn new() -> Self {
        Self::with_taxonomy(EventTaxonomy::standard())
    }

    /// A factory over a custom taxonomy.
    pub fn with_taxonomy(taxonomy: &'static EventTaxonomy) -> Self {
        Self {
            taxonomy,
            supported: None,
        }
    }

    /// Restrict the factory to the given kinds; any other kind fails with
    /// [`EventError::UnsupportedKind`].
    pub fn restricted_to(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.supported = Some(kinds.into_iter().collect());
        self
    }

    /// The taxonomy this factory validates against.
    pub fn taxonomy(&self) -> &'static EventTaxonomy {
        self.taxonomy
    }

    /// Whether the factory builds events of `kind`.
    pub fn supports(&self, kind: EventKind) -> bool {
        self.supported.as_ref().is_none_or(|set| set.contains(&kind))
    }

    /// Build an event.
    pub fn create(
        &self,
        kind: EventKind,
        source: ElementRef,
        trigger: Option<ElementRef>,
        assembly_id: AssemblyId,
        payload: &[PayloadArg],
    ) -> Result<Event> {
        if !self.supports(kind) {
            return Err(EventError::UnsupportedKind(kind));
        }

        let element = source.element_kind();
        if !self.taxonomy.is_applicable(kind, element) {
            return Err(EventError::NotApplicable { kind, element });
        }

        let payload = Self::payload_for(kind, element, payload)?;

        Ok(Event {
            inner: Arc::new(EventInner {
                kind,
                source,
                trigger,
                assembly_id,
                timestamp: Utc::now(),
                payload,
            }),
        })
    }

    fn payload_for(
        kind: EventKind,
        element: ElementKind,
        args: &[PayloadArg],
    ) -> Result<EventPayload> {
        match kind {
            EventKind::BeforeNewValue | EventKind::NewValue => match args {
                [old, PayloadArg::Value(new)] => {
                    let old = match old {
                        PayloadArg::Value(v) => Some(v.clone()),
                        PayloadArg::Absent => None,
                        PayloadArg::Kind(_) => {
                            return Err(EventError::invalid_payload(
                                kind,
                                "old value must be a value or absent",
                            ));
                        }
                    };
                    Ok(EventPayload::ValueChange {
                        old,
                        new: new.clone(),
                    })
                }
                [_, _] => Err(EventError::invalid_payload(kind, "new value must be a value")),
                _ => Err(EventError::invalid_payload(
                    kind,
                    format!("expected old and new values, got {} argument(s)", args.len()),
                )),
            },
            EventKind::BeforeCreate => match args {
                [PayloadArg::Kind(created)] => Ok(EventPayload::Created { kind: *created }),
                _ => Err(EventError::invalid_payload(
                    kind,
                    "expected exactly one element kind",
                )),
            },
            EventKind::Create if args.is_empty() => Ok(EventPayload::Created { kind: element }),
            _ if args.is_empty() => Ok(EventPayload::None),
            _ => Err(EventError::invalid_payload(
                kind,
                format!("takes no payload, got {} argument(s)", args.len()),
            )),
        }
    }
}
