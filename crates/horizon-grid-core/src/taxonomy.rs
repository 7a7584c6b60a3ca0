//! The fixed table describing every event kind.
//!
//! The taxonomy answers four questions about a kind: which element kinds may
//! emit it, whether it is vetoable, whether its listeners run off the calling
//! thread, and whether it propagates to the source's containers. Vetoable kinds
//! are additionally paired with the after kind announced once the mutation has
//! been applied.

use std::sync::OnceLock;

use crate::element::{ElementKind, ElementKinds};
use crate::error::ConfigError;
use crate::event::EventKind;

/// The process-wide standard taxonomy.
static STANDARD: OnceLock<EventTaxonomy> = OnceLock::new();

/// Static metadata for one event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTraits {
    /// The described kind.
    pub kind: EventKind,
    /// Element kinds allowed as the event source.
    pub applicable: ElementKinds,
    /// Whether a listener may veto the event.
    pub vetoable: bool,
    /// Whether listeners run on the worker pool rather than the caller.
    pub runs_off_thread: bool,
    /// Whether the event propagates to the source's containers.
    pub alerts_container: bool,
    /// For vetoable kinds, the after kind announced once the mutation lands.
    pub after: Option<EventKind>,
}

impl EventTraits {
    /// Traits for a synchronous, non-vetoable, non-propagating kind.
    pub const fn after(kind: EventKind, applicable: ElementKinds) -> Self {
        Self {
            kind,
            applicable,
            vetoable: false,
            runs_off_thread: false,
            alerts_container: false,
            after: None,
        }
    }

    /// Traits for a vetoable kind paired with `after`.
    pub const fn before(kind: EventKind, applicable: ElementKinds, after: EventKind) -> Self {
        Self {
            kind,
            applicable,
            vetoable: true,
            runs_off_thread: false,
            alerts_container: false,
            after: Some(after),
        }
    }

    /// Mark the kind as delivered off the calling thread.
    pub const fn off_thread(mut self) -> Self {
        self.runs_off_thread = true;
        self
    }

    /// Mark the kind as propagating to containers.
    pub const fn alerting(mut self) -> Self {
        self.alerts_container = true;
        self
    }
}

/// Every event kind and its traits.
#[derive(Debug, Clone)]
pub struct EventTaxonomy {
    entries: [EventTraits; EventKind::COUNT],
}

impl EventTaxonomy {
    /// Build a taxonomy from a list of entries.
    ///
    /// Every kind must be described exactly once, and every vetoable kind must
    /// pair with a non-vetoable kind.
    pub fn from_entries(
        entries: impl IntoIterator<Item = EventTraits>,
    ) -> Result<Self, ConfigError> {
        let mut slots: [Option<EventTraits>; EventKind::COUNT] = [None; EventKind::COUNT];

        for entry in entries {
            let slot = &mut slots[entry.kind.index()];
            if slot.is_some() {
                return Err(ConfigError::DuplicateKind(entry.kind));
            }
            *slot = Some(entry);
        }

        let mut filled = Vec::with_capacity(EventKind::COUNT);
        for kind in EventKind::ALL {
            match slots[kind.index()] {
                Some(traits) => filled.push(traits),
                None => return Err(ConfigError::MissingKind(kind)),
            }
        }

        for traits in &filled {
            if let Some(after) = traits.after {
                if !traits.vetoable || filled[after.index()].vetoable {
                    return Err(ConfigError::InvalidPairing {
                        before: traits.kind,
                        after,
                    });
                }
            }
        }

        let entries: [EventTraits; EventKind::COUNT] = filled
            .try_into()
            .map_err(|_| ConfigError::MissingKind(EventKind::ALL[0]))?;
        Ok(Self { entries })
    }

    /// The standard taxonomy, built once per process.
    pub fn standard() -> &'static EventTaxonomy {
        STANDARD.get_or_init(|| {
            EventTaxonomy::from_entries(standard_entries())
                .expect("standard event taxonomy is well formed")
        })
    }

    /// The traits of `kind`.
    #[inline]
    pub fn traits(&self, kind: EventKind) -> &EventTraits {
        &self.entries[kind.index()]
    }

    /// Whether an element of `element` kind may emit `kind`.
    pub fn is_applicable(&self, kind: EventKind, element: ElementKind) -> bool {
        self.traits(kind).applicable.includes(element)
    }

    /// Whether `kind` is delivered off the calling thread.
    pub fn runs_off_thread(&self, kind: EventKind) -> bool {
        self.traits(kind).runs_off_thread
    }

    /// Whether `kind` propagates to containers.
    pub fn alerts_container(&self, kind: EventKind) -> bool {
        self.traits(kind).alerts_container
    }

    /// Whether `kind` may be vetoed.
    pub fn is_vetoable(&self, kind: EventKind) -> bool {
        self.traits(kind).vetoable
    }

    /// The after kind paired with a vetoable kind.
    pub fn after_kind(&self, kind: EventKind) -> Option<EventKind> {
        self.traits(kind).after
    }

    /// Iterate over every entry, in [`EventKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = &EventTraits> {
        self.entries.iter()
    }
}

/// The entries of the standard taxonomy.
pub fn standard_entries() -> Vec<EventTraits> {
    let all = ElementKinds::all();
    let valued = ElementKinds::TABLE | ElementKinds::ROW | ElementKinds::COLUMN | ElementKinds::CELL;

    vec![
        EventTraits::before(EventKind::BeforeCreate, ElementKinds::TABLE, EventKind::Create),
        EventTraits::after(EventKind::Create, all).alerting(),
        EventTraits::before(EventKind::BeforeDelete, all, EventKind::Delete).alerting(),
        EventTraits::after(EventKind::Delete, all).alerting(),
        EventTraits::before(EventKind::BeforeNewValue, valued, EventKind::NewValue).alerting(),
        EventTraits::after(EventKind::NewValue, valued)
            .off_thread()
            .alerting(),
        EventTraits::after(EventKind::Pendings, ElementKinds::TABLE).off_thread(),
        EventTraits::after(EventKind::NoPendings, ElementKinds::TABLE).off_thread(),
        EventTraits::after(EventKind::Recalculate, all),
    ]
}
