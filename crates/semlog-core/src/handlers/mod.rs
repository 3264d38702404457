//! Event handlers: notification streams in, closed semantic events out.
//!
//! Every handler sees every notification, in emission order, and picks the
//! ones from its own sources. Handlers may derive new notifications (the
//! grasp handler announces grasps); those are appended to the same queue
//! and reach the other handlers after the notification being processed.
//!
//! # Modules
//!
//! - [`contact`] -- Contact spans between a subject and other objects
//! - [`grasp`] -- Two-group grasps
//! - [`reach`] -- Reaching for an object that is then grasped
//! - [`pick_and_place`] -- Pick-up, transport and put-down phases
//! - [`slicing`] -- A blade cutting into an object

pub mod contact;
pub mod grasp;
pub mod pick_and_place;
pub mod reach;
pub mod slicing;

use std::collections::BTreeMap;

use semlog_types::{EntityHandle, EventKind, Individual, IndividualId, MonitorId, SemanticEvent};
use tracing::{debug, warn};

use crate::monitor::Notification;

pub use contact::ContactEventHandler;
pub use grasp::GraspEventHandler;
pub use pick_and_place::PickAndPlaceEventHandler;
pub use reach::ReachEventHandler;
pub use slicing::SlicingEventHandler;

/// Errors raised while wiring a handler to its sources.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A source monitor did not initialize.
    #[error("source monitor {0} is not initialized")]
    SourceNotInitialized(MonitorId),

    /// The handler's subject entity has no individual.
    #[error("subject entity {0} has no individual")]
    SubjectUnresolved(EntityHandle),

    /// The handler would have nothing to listen to.
    #[error("handler {0} has no sources")]
    NoSources(String),
}

/// What a handler produced while processing one call.
#[derive(Debug, Default)]
pub struct HandlerOutput {
    /// Closed events, in the order they closed.
    pub finished: Vec<SemanticEvent>,
    /// Notifications for the other handlers.
    pub derived: Vec<Notification>,
}

impl HandlerOutput {
    /// Whether nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.derived.is_empty()
    }
}

/// A consumer of notifications producing semantic events.
pub trait EventHandler: std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Begin accepting notifications.
    fn start(&mut self);

    /// Whether [`EventHandler::start`] was called.
    fn is_started(&self) -> bool;

    /// Process one notification.
    fn handle(&mut self, notification: &Notification, out: &mut HandlerOutput);

    /// Close every open event at `now` and stop. Idempotent.
    fn finish(&mut self, now: f64, forced: bool, out: &mut HandlerOutput);
}

// ---------------------------------------------------------------------------
// Open event table
// ---------------------------------------------------------------------------

/// Unordered pair of individual ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct PairKey(IndividualId, IndividualId);

impl PairKey {
    fn new(a: &Individual, b: &Individual) -> Self {
        if a.id <= b.id {
            Self(a.id.clone(), b.id.clone())
        } else {
            Self(b.id.clone(), a.id.clone())
        }
    }
}

/// Events a handler has opened and not yet closed, at most one per
/// (kind, unordered participant pair).
#[derive(Debug, Default)]
pub struct OpenEvents {
    open: BTreeMap<(EventKind, PairKey), SemanticEvent>,
}

impl OpenEvents {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `kind` between `subject` and `other` at `start`. Returns
    /// `false` (and logs) if one is already open for the pair.
    pub fn open(&mut self, kind: EventKind, subject: &Individual, other: &Individual, start: f64) -> bool {
        let key = (kind, PairKey::new(subject, other));
        if let Some(existing) = self.open.get(&key) {
            debug!(event = %existing.context(), t = start, "Event already open, begin ignored");
            return false;
        }
        let event = SemanticEvent::open(kind, start, vec![subject.clone(), other.clone()]);
        debug!(event = %event.context(), t = start, "Event opened");
        self.open.insert(key, event);
        true
    }

    /// Close `kind` between the pair at `end`. Logs and returns `None` if
    /// none is open.
    ///
    /// A delayed end may carry a time before the event started; the event
    /// then closes at its start.
    pub fn close(&mut self, kind: EventKind, subject: &Individual, other: &Individual, end: f64) -> Option<SemanticEvent> {
        let key = (kind, PairKey::new(subject, other));
        let Some(mut event) = self.open.remove(&key) else {
            warn!(kind = %kind, subject = %subject, other = %other, t = end, "End without an open event, ignored");
            return None;
        };
        if end < event.start {
            debug!(event = %event.context(), start = event.start, t = end, "End before start, clamped");
        }
        event.end = Some(end.max(event.start));
        Some(event)
    }

    /// Drop `kind` between the pair without publishing it.
    pub fn retract(&mut self, kind: EventKind, subject: &Individual, other: &Individual) -> Option<SemanticEvent> {
        let event = self.open.remove(&(kind, PairKey::new(subject, other)))?;
        debug!(event = %event.context(), "Event retracted");
        Some(event)
    }

    /// Whether `kind` is open between the pair.
    pub fn is_open(&self, kind: EventKind, subject: &Individual, other: &Individual) -> bool {
        self.open.contains_key(&(kind, PairKey::new(subject, other)))
    }

    /// Close everything at `now`, oldest first.
    pub fn close_all(&mut self, now: f64, truncated: bool) -> Vec<SemanticEvent> {
        let mut events: Vec<SemanticEvent> = std::mem::take(&mut self.open).into_values().collect();
        events.sort_by(|a, b| a.start.total_cmp(&b.start));
        for event in &mut events {
            event.end = Some(now);
            event.truncated = truncated;
        }
        events
    }

    /// Number of open events.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Whether nothing is open.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
