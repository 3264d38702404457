//! Reach events: an object enters the reach area of a hand and is then
//! grasped by that hand. The event spans from entering to grasp start.
//! Objects leaving the area ungrasped are forgotten.

use std::collections::BTreeMap;
use std::sync::Arc;

use semlog_types::{Channel, EventKind, Individual, IndividualId, MonitorId, OverlapPhase, SemanticEvent};
use tracing::{debug, info};

use super::{EventHandler, HandlerOutput};
use crate::monitor::Notification;

/// Publishes `Reach [hand - object]` events.
#[derive(Debug)]
pub struct ReachEventHandler {
    name: String,
    hand: Arc<Individual>,
    source: MonitorId,
    /// Objects in reach and when they entered.
    candidates: BTreeMap<IndividualId, f64>,
    started: bool,
    finished: bool,
}

impl ReachEventHandler {
    /// Reach handler for `hand`, fed by the reach monitor `source` and by
    /// grasp announcements.
    pub fn new(hand: Arc<Individual>, source: MonitorId) -> Self {
        Self {
            name: format!("reach:{hand}"),
            hand,
            source,
            candidates: BTreeMap::new(),
            started: false,
            finished: false,
        }
    }

    /// Number of objects currently in reach.
    pub fn candidates_len(&self) -> usize {
        self.candidates.len()
    }
}

impl EventHandler for ReachEventHandler {
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
            } if *source == self.source => match phase {
                OverlapPhase::Begin => {
                    self.candidates.entry(other.id.clone()).or_insert(*timestamp);
                }
                OverlapPhase::End => {
                    if self.candidates.remove(&other.id).is_some() {
                        debug!(handler = %self.name, object = %other, "Left reach without a grasp");
                    }
                }
            },
            Notification::Grasp {
                hand,
                object,
                phase: OverlapPhase::Begin,
                timestamp,
            } if hand.id == self.hand.id => {
                let Some(entered) = self.candidates.remove(&object.id) else {
                    return;
                };
                let mut event = SemanticEvent::open(
                    EventKind::Reach,
                    entered,
                    vec![self.hand.as_ref().clone(), object.as_ref().clone()],
                );
                event.end = Some(*timestamp);
                info!(hand = %self.hand, object = %object, start = entered, end = *timestamp, "Reach");
                out.finished.push(event);
            }
            _ => {}
        }
    }

    fn finish(&mut self, _now: f64, _forced: bool, _out: &mut HandlerOutput) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.candidates.is_empty() {
            debug!(handler = %self.name, dropped = self.candidates.len(), "Reach candidates dropped at finish");
        }
        self.candidates.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use semlog_types::IndividualKind;

    use super::*;

    const REACH: MonitorId = MonitorId(50);

    fn hand() -> Arc<Individual> {
        Arc::new(Individual::new("hand", "RightHand", IndividualKind::Skeletal))
    }

    fn cup() -> Arc<Individual> {
        Arc::new(Individual::new("cup", "Cup", IndividualKind::Rigid))
    }

    fn area(phase: OverlapPhase, t: f64) -> Notification {
        Notification::Overlap {
            source: REACH,
            channel: Channel::Contact,
            phase,
            other: cup(),
            timestamp: t,
        }
    }

    fn grasp(hand: Arc<Individual>, t: f64) -> Notification {
        Notification::Grasp {
            hand,
            object: cup(),
            phase: OverlapPhase::Begin,
            timestamp: t,
        }
    }

    fn handler() -> ReachEventHandler {
        let mut h = ReachEventHandler::new(hand(), REACH);
        h.start();
        h
    }

    #[test]
    fn reach_spans_entering_to_grasp() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&area(OverlapPhase::Begin, 1.0), &mut out);
        h.handle(&grasp(hand(), 1.8), &mut out);
        assert_eq!(out.finished.len(), 1);
        let ev = out.finished.first().unwrap();
        assert_eq!(ev.kind, EventKind::Reach);
        assert_eq!((ev.start, ev.end), (1.0, Some(1.8)));
        assert_eq!(h.candidates_len(), 0);
    }

    #[test]
    fn leaving_without_grasp_is_not_an_event() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&area(OverlapPhase::Begin, 1.0), &mut out);
        h.handle(&area(OverlapPhase::End, 1.5), &mut out);
        h.handle(&grasp(hand(), 1.8), &mut out);
        assert!(out.finished.is_empty());
    }

    #[test]
    fn other_hands_grasp_does_not_count() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        let left = Arc::new(Individual::new("left", "LeftHand", IndividualKind::Skeletal));
        h.handle(&area(OverlapPhase::Begin, 1.0), &mut out);
        h.handle(&grasp(left, 1.8), &mut out);
        assert!(out.finished.is_empty());
        assert_eq!(h.candidates_len(), 1);
        h.finish(2.0, true, &mut out);
        assert!(out.finished.is_empty());
        assert_eq!(h.candidates_len(), 0);
    }
}
