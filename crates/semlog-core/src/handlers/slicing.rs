//! Slicing: a blade cutting into an object.
//!
//! A blade's cutting-edge monitors feed one handler with the blade as
//! subject. `Slicing [blade - object]` spans from the edge first touching
//! the object to the last edge leaving it. A hand grasping the blade when
//! the cut starts is recorded as a third participant, the performer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semlog_types::{Channel, EventKind, Individual, IndividualId, MonitorId, OverlapPhase};
use tracing::{debug, info};

use super::{EventHandler, HandlerOutput, OpenEvents};
use crate::monitor::Notification;

#[derive(Debug)]
struct Cut {
    object: Arc<Individual>,
    edges: BTreeSet<MonitorId>,
    performer: Option<Arc<Individual>>,
}

/// Publishes `Slicing [blade - object]` spans.
#[derive(Debug)]
pub struct SlicingEventHandler {
    name: String,
    blade: Arc<Individual>,
    edges: BTreeSet<MonitorId>,
    /// Hand currently grasping the blade.
    holder: Option<Arc<Individual>>,
    cuts: BTreeMap<IndividualId, Cut>,
    open: OpenEvents,
    started: bool,
    finished: bool,
}

impl SlicingEventHandler {
    /// Slicing handler for `blade` fed by the contact channel of its edge
    /// monitors.
    pub fn new(blade: Arc<Individual>, edges: impl IntoIterator<Item = MonitorId>) -> Self {
        Self {
            name: format!("slicing:{blade}"),
            blade,
            edges: edges.into_iter().collect(),
            holder: None,
            cuts: BTreeMap::new(),
            open: OpenEvents::new(),
            started: false,
            finished: false,
        }
    }

    /// Whether `object` is being cut.
    pub fn is_cutting(&self, object: &IndividualId) -> bool {
        self.cuts.contains_key(object)
    }

    fn on_begin(&mut self, edge: MonitorId, object: &Arc<Individual>, t: f64) {
        let cut = self.cuts.entry(object.id.clone()).or_insert_with(|| Cut {
            object: Arc::clone(object),
            edges: BTreeSet::new(),
            performer: self.holder.clone(),
        });
        let first = cut.edges.is_empty();
        cut.edges.insert(edge);
        if first && self.open.open(EventKind::Slicing, &self.blade, object, t) {
            info!(blade = %self.blade, object = %object, performer = ?self.holder.as_ref().map(|h| h.id.as_str()), t, "Slicing started");
        }
    }

    fn on_end(&mut self, edge: MonitorId, object: &Individual, t: f64, out: &mut HandlerOutput) {
        let Some(cut) = self.cuts.get_mut(&object.id) else {
            debug!(handler = %self.name, object = %object, "End for an object not being cut");
            return;
        };
        cut.edges.remove(&edge);
        if !cut.edges.is_empty() {
            return;
        }
        let Some(cut) = self.cuts.remove(&object.id) else {
            return;
        };
        if let Some(mut event) = self.open.close(EventKind::Slicing, &self.blade, &cut.object, t) {
            if let Some(performer) = cut.performer {
                event.participants.push(performer.as_ref().clone());
            }
            out.finished.push(event);
        }
    }
}

impl EventHandler for SlicingEventHandler {
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
            Notification::Overlap {
                source,
                channel: Channel::Contact,
                phase,
                other,
                timestamp,
            } if self.edges.contains(source) => match phase {
                OverlapPhase::Begin => self.on_begin(*source, other, *timestamp),
                OverlapPhase::End => self.on_end(*source, other, *timestamp, out),
            },
            Notification::Grasp { hand, object, phase, .. } if object.id == self.blade.id => match phase {
                OverlapPhase::Begin => self.holder = Some(Arc::clone(hand)),
                OverlapPhase::End => {
                    if self.holder.as_ref().is_some_and(|h| h.id == hand.id) {
                        self.holder = None;
                    }
                }
            },
            _ => {}
        }
    }

    fn finish(&mut self, now: f64, forced: bool, out: &mut HandlerOutput) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut performers: BTreeMap<IndividualId, Arc<Individual>> = BTreeMap::new();
        for (object, cut) in std::mem::take(&mut self.cuts) {
            if let Some(performer) = cut.performer {
                performers.insert(object, performer);
            }
        }
        for mut event in self.open.close_all(now, forced) {
            let performer = event.participants.get(1).and_then(|object| performers.get(&object.id));
            if let Some(performer) = performer {
                event.participants.push(performer.as_ref().clone());
            }
            out.finished.push(event);
        }
    }
}
