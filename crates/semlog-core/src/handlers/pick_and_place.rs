//! Pick-and-place phases of a grasped object.
//!
//! While a hand grasps an object, the object is in exactly one phase:
//!
//! - `PickUp` from grasp start until the object loses its last support;
//! - `Transport` while it touches no support;
//! - `PutDown` from touching a support again until the grasp ends.
//!
//! Lifting a put-down object starts a new `Transport`. An object grasped
//! while unsupported starts in `Transport`. Supports are observed through
//! the object's own contact monitor; an object without one is never
//! supported.
//!
//! Support ends arrive one concatenation window late with their original
//! time. An end older than the current phase means the phase was
//! mislabeled: it is relabeled from its start instead of being closed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semlog_types::{Channel, EventKind, Individual, IndividualId, MonitorId, OverlapPhase};
use tracing::{debug, info};

use super::{EventHandler, HandlerOutput, OpenEvents};
use crate::monitor::Notification;

/// An object held by the hand and its current phase.
#[derive(Debug)]
struct Carried {
    object: Arc<Individual>,
    phase: EventKind,
    /// Start of the current phase.
    since: f64,
}

/// Publishes `PickUp`, `Transport` and `PutDown` events for one hand.
#[derive(Debug)]
pub struct PickAndPlaceEventHandler {
    name: String,
    hand: Arc<Individual>,
    /// Object-contact monitors and the object each one covers.
    object_monitors: BTreeMap<MonitorId, IndividualId>,
    /// Supports each covered object currently touches.
    supports: BTreeMap<IndividualId, BTreeSet<IndividualId>>,
    carried: BTreeMap<IndividualId, Carried>,
    open: OpenEvents,
    started: bool,
    finished: bool,
}

impl PickAndPlaceEventHandler {
    /// Handler for `hand`, using the given object-contact monitors to see
    /// what supports each object.
    pub fn new(hand: Arc<Individual>, object_monitors: impl IntoIterator<Item = (MonitorId, IndividualId)>) -> Self {
        Self {
            name: format!("pick_and_place:{hand}"),
            hand,
            object_monitors: object_monitors.into_iter().collect(),
            supports: BTreeMap::new(),
            carried: BTreeMap::new(),
            open: OpenEvents::new(),
            started: false,
            finished: false,
        }
    }

    /// Phase of `object`, if carried by this hand.
    pub fn phase_of(&self, object: &IndividualId) -> Option<EventKind> {
        self.carried.get(object).map(|c| c.phase)
    }

    fn is_supported(&self, object: &IndividualId) -> bool {
        self.supports.get(object).is_some_and(|s| !s.is_empty())
    }

    /// Close the current phase of `object` at `t` and open `next`.
    fn transition(&mut self, object: &IndividualId, next: EventKind, t: f64, out: &mut HandlerOutput) {
        let Some(carried) = self.carried.get_mut(object) else {
            return;
        };
        let previous = carried.phase;
        let since = carried.since;
        carried.phase = next;
        let object = Arc::clone(&carried.object);
        if t <= since {
            self.open.retract(previous, &self.hand, &object);
            self.open.open(next, &self.hand, &object, since);
            info!(hand = %self.hand, object = %object, from = %previous, to = %next, t = since, "Pick-and-place phase relabeled");
            return;
        }
        carried.since = t;
        if let Some(event) = self.open.close(previous, &self.hand, &object, t) {
            out.finished.push(event);
        }
        self.open.open(next, &self.hand, &object, t);
        info!(hand = %self.hand, object = %object, from = %previous, to = %next, t, "Pick-and-place phase");
    }

    fn on_grasp(&mut self, object: &Arc<Individual>, phase: OverlapPhase, t: f64, out: &mut HandlerOutput) {
        match phase {
            OverlapPhase::Begin => {
                if self.carried.contains_key(&object.id) {
                    debug!(handler = %self.name, object = %object, "Already carried");
                    return;
                }
                let first = if self.is_supported(&object.id) {
                    EventKind::PickUp
                } else {
                    EventKind::Transport
                };
                self.open.open(first, &self.hand, object, t);
                self.carried.insert(
                    object.id.clone(),
                    Carried {
                        object: Arc::clone(object),
                        phase: first,
                        since: t,
                    },
                );
            }
            OverlapPhase::End => {
                let Some(carried) = self.carried.remove(&object.id) else {
                    return;
                };
                if let Some(event) = self.open.close(carried.phase, &self.hand, &carried.object, t) {
                    out.finished.push(event);
                }
            }
        }
    }

    fn on_support(&mut self, object: &IndividualId, support: &Individual, phase: OverlapPhase, t: f64, out: &mut HandlerOutput) {
        let was_supported = self.is_supported(object);
        let set = self.supports.entry(object.clone()).or_default();
        match phase {
            OverlapPhase::Begin => {
                set.insert(support.id.clone());
            }
            OverlapPhase::End => {
                set.remove(&support.id);
            }
        }
        let is_supported = self.is_supported(object);

        let Some(current) = self.phase_of(object) else {
            return;
        };
        match (current, was_supported, is_supported) {
            (EventKind::PickUp | EventKind::PutDown, true, false) => {
                self.transition(object, EventKind::Transport, t, out);
            }
            (EventKind::Transport, false, true) => {
                self.transition(object, EventKind::PutDown, t, out);
            }
            _ => {}
        }
    }
}

impl EventHandler for PickAndPlaceEventHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) {
        self.started = true;
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn handle(&mut self, notification: &Notification, out: &mut HandlerOutput) {
        if !self.started || self.finished {
            return;
        }
        match notification {
            Notification::Grasp {
                hand,
                object,
                phase,
                timestamp,
            } if hand.id == self.hand.id => self.on_grasp(object, *phase, *timestamp, out),
            Notification::Overlap {
                source,
                channel: Channel::Contact,
                phase,
                other,
                timestamp,
            } => {
                let Some(object) = self.object_monitors.get(source).cloned() else {
                    return;
                };
                self.on_support(&object, other, *phase, *timestamp, out);
            }
            _ => {}
        }
    }

    fn finish(&mut self, now: f64, forced: bool, out: &mut HandlerOutput) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.carried.clear();
        self.supports.clear();
        out.finished.extend(self.open.close_all(now, forced));
    }
}
