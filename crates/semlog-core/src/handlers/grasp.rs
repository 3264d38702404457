//! Two-group grasps.
//!
//! A hand's bone monitors are split into group `A` (thumb) and group `B`
//! (fingers). An object is grasped while at least one monitor of each group
//! touches it through the grasp channel. Each grasp begin and end is also
//! announced as a [`Notification::Grasp`] for the reach and pick-and-place
//! handlers.
//!
//! A monitor whose contact is suspended (its End waiting out the
//! concatenation window) still counts towards keeping a grasp, but not
//! towards starting one: its delayed End carries an earlier time than
//! anything that happened since.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semlog_types::{Channel, EventKind, Individual, IndividualId, MonitorGroup, MonitorId, OverlapPhase};
use tracing::{debug, info};

use super::{EventHandler, HandlerOutput, OpenEvents};
use crate::monitor::Notification;

/// Monitors of each group touching one object.
#[derive(Debug)]
struct Hold {
    object: Arc<Individual>,
    a: BTreeSet<MonitorId>,
    b: BTreeSet<MonitorId>,
    /// Members whose End is pending.
    suspended: BTreeSet<MonitorId>,
    grasped: bool,
}

impl Hold {
    fn new(object: &Arc<Individual>) -> Self {
        Self {
            object: Arc::clone(object),
            a: BTreeSet::new(),
            b: BTreeSet::new(),
            suspended: BTreeSet::new(),
            grasped: false,
        }
    }

    /// Both groups touch, suspended members included.
    fn has_both_groups(&self) -> bool {
        !self.a.is_empty() && !self.b.is_empty()
    }

    /// Both groups touch through members that are not suspended.
    fn is_firm(&self) -> bool {
        let firm = |group: &BTreeSet<MonitorId>| group.iter().any(|m| !self.suspended.contains(m));
        firm(&self.a) && firm(&self.b)
    }

    fn is_empty(&self) -> bool {
        self.a.is_empty() && self.b.is_empty()
    }

    fn group_mut(&mut self, group: MonitorGroup) -> &mut BTreeSet<MonitorId> {
        match group {
            MonitorGroup::A => &mut self.a,
            MonitorGroup::B => &mut self.b,
        }
    }
}

/// Publishes `Grasp [hand - object]` spans.
#[derive(Debug)]
pub struct GraspEventHandler {
    name: String,
    hand: Arc<Individual>,
    groups: BTreeMap<MonitorId, MonitorGroup>,
    holds: BTreeMap<IndividualId, Hold>,
    open: OpenEvents,
    started: bool,
    finished: bool,
}

impl GraspEventHandler {
    /// Grasp handler for `hand` fed by the grasp channel of the given
    /// grouped bone monitors.
    pub fn new(hand: Arc<Individual>, sources: impl IntoIterator<Item = (MonitorId, MonitorGroup)>) -> Self {
        Self {
            name: format!("grasp:{hand}"),
            hand,
            groups: sources.into_iter().collect(),
            holds: BTreeMap::new(),
            open: OpenEvents::new(),
            started: false,
            finished: false,
        }
    }

    /// Whether both groups are represented among the sources.
    pub fn has_both_groups(&self) -> bool {
        let a = self.groups.values().any(|g| *g == MonitorGroup::A);
        let b = self.groups.values().any(|g| *g == MonitorGroup::B);
        a && b
    }

    /// Whether `object` is currently grasped.
    pub fn is_grasping(&self, object: &IndividualId) -> bool {
        self.holds.get(object).is_some_and(|h| h.grasped)
    }

    fn announce(&self, object: &Arc<Individual>, phase: OverlapPhase, t: f64, out: &mut HandlerOutput) {
        out.derived.push(Notification::Grasp {
            hand: Arc::clone(&self.hand),
            object: Arc::clone(object),
            phase,
            timestamp: t,
        });
    }

    /// Open the grasp of `object` at `t` if it just became firm.
    fn try_open(&mut self, object: &IndividualId, t: f64, out: &mut HandlerOutput) {
        let Some(hold) = self.holds.get_mut(object) else {
            return;
        };
        if hold.grasped || !hold.is_firm() {
            return;
        }
        let object = Arc::clone(&hold.object);
        if self.open.open(EventKind::Grasp, &self.hand, &object, t) {
            hold.grasped = true;
            info!(hand = %self.hand, object = %object, t, "Grasp started");
            self.announce(&object, OverlapPhase::Begin, t, out);
        }
    }

    fn on_begin(&mut self, group: MonitorGroup, source: MonitorId, object: &Arc<Individual>, t: f64, out: &mut HandlerOutput) {
        let hold = self.holds.entry(object.id.clone()).or_insert_with(|| Hold::new(object));
        hold.group_mut(group).insert(source);
        hold.suspended.remove(&source);
        self.try_open(&object.id, t, out);
    }

    fn on_suspend(&mut self, source: MonitorId, object: &Individual) {
        if let Some(hold) = self.holds.get_mut(&object.id) {
            hold.suspended.insert(source);
        }
    }

    fn on_resume(&mut self, source: MonitorId, object: &Individual, t: f64, out: &mut HandlerOutput) {
        let Some(hold) = self.holds.get_mut(&object.id) else {
            return;
        };
        hold.suspended.remove(&source);
        self.try_open(&object.id, t, out);
    }

    fn on_end(&mut self, group: MonitorGroup, source: MonitorId, object: &Arc<Individual>, t: f64, out: &mut HandlerOutput) {
        let Some(hold) = self.holds.get_mut(&object.id) else {
            debug!(handler = %self.name, object = %object, "End for an object not held");
            return;
        };
        hold.group_mut(group).remove(&source);
        hold.suspended.remove(&source);
        let released = hold.grasped && !hold.has_both_groups();
        if released {
            hold.grasped = false;
        }
        if hold.is_empty() {
            self.holds.remove(&object.id);
        }
        if !released {
            return;
        }
        if let Some(event) = self.open.close(EventKind::Grasp, &self.hand, object, t) {
            let end = event.end.unwrap_or(t);
            info!(hand = %self.hand, object = %object, t = end, "Grasp ended");
            out.finished.push(event);
            self.announce(object, OverlapPhase::End, end, out);
        }
    }
}

impl EventHandler for GraspEventHandler {
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
                channel: Channel::Grasp,
                phase,
                other,
                timestamp,
            } => {
                let Some(group) = self.groups.get(source).copied() else {
                    return;
                };
                match phase {
                    OverlapPhase::Begin => self.on_begin(group, *source, other, *timestamp, out),
                    OverlapPhase::End => self.on_end(group, *source, other, *timestamp, out),
                }
            }
            Notification::Suspended {
                source,
                channel: Channel::Grasp,
                other,
                ..
            } if self.groups.contains_key(source) => self.on_suspend(*source, other),
            Notification::Resumed {
                source,
                channel: Channel::Grasp,
                other,
                timestamp,
            } if self.groups.contains_key(source) => self.on_resume(*source, other, *timestamp, out),
            _ => {}
        }
    }

    fn finish(&mut self, now: f64, forced: bool, out: &mut HandlerOutput) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.holds.clear();
        out.finished.extend(self.open.close_all(now, forced));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use semlog_types::IndividualKind;

    use super::*;

    const THUMB: MonitorId = MonitorId(1);
    const INDEX: MonitorId = MonitorId(2);
    const MIDDLE: MonitorId = MonitorId(3);

    fn hand() -> Arc<Individual> {
        Arc::new(Individual::new("hand", "RightHand", IndividualKind::Skeletal))
    }

    fn cup() -> Arc<Individual> {
        Arc::new(Individual::new("cup", "Cup", IndividualKind::Rigid))
    }

    fn touch(source: MonitorId, phase: OverlapPhase, t: f64) -> Notification {
        Notification::Overlap {
            source,
            channel: Channel::Grasp,
            phase,
            other: cup(),
            timestamp: t,
        }
    }

    fn handler() -> GraspEventHandler {
        let mut h = GraspEventHandler::new(
            hand(),
            [(THUMB, MonitorGroup::A), (INDEX, MonitorGroup::B), (MIDDLE, MonitorGroup::B)],
        );
        h.start();
        h
    }

    #[test]
    fn one_group_alone_is_not_a_grasp() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&touch(INDEX, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&touch(MIDDLE, OverlapPhase::Begin, 0.1), &mut out);
        assert!(out.is_empty());
        assert!(!h.is_grasping(&cup().id));
    }

    #[test]
    fn grasp_spans_both_groups_touching() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&touch(INDEX, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&touch(THUMB, OverlapPhase::Begin, 0.4), &mut out);
        assert!(h.is_grasping(&cup().id));
        assert!(matches!(
            out.derived.first(),
            Some(Notification::Grasp { phase: OverlapPhase::Begin, timestamp, .. }) if *timestamp == 0.4
        ));

        // Second finger joining changes nothing.
        h.handle(&touch(MIDDLE, OverlapPhase::Begin, 0.5), &mut out);
        h.handle(&touch(INDEX, OverlapPhase::End, 0.6), &mut out);
        assert!(out.finished.is_empty());

        h.handle(&touch(THUMB, OverlapPhase::End, 1.5), &mut out);
        assert_eq!(out.finished.len(), 1);
        let ev = out.finished.first().unwrap();
        assert_eq!(ev.kind, EventKind::Grasp);
        assert_eq!((ev.start, ev.end), (0.4, Some(1.5)));
        assert_eq!(out.derived.len(), 2);
    }

    fn pause(source: MonitorId, resumed: bool, t: f64) -> Notification {
        if resumed {
            Notification::Resumed {
                source,
                channel: Channel::Grasp,
                other: cup(),
                timestamp: t,
            }
        } else {
            Notification::Suspended {
                source,
                channel: Channel::Grasp,
                other: cup(),
                timestamp: t,
            }
        }
    }

    #[test]
    fn suspended_finger_does_not_start_a_grasp() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&touch(INDEX, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&pause(INDEX, false, 1.0), &mut out);
        h.handle(&touch(THUMB, OverlapPhase::Begin, 1.05), &mut out);
        assert!(!h.is_grasping(&cup().id));
        // The delayed end arrives with its original time.
        h.handle(&touch(INDEX, OverlapPhase::End, 1.0), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn resumed_finger_starts_the_grasp_when_it_resumes() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&touch(INDEX, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&pause(INDEX, false, 1.0), &mut out);
        h.handle(&touch(THUMB, OverlapPhase::Begin, 1.05), &mut out);
        h.handle(&pause(INDEX, true, 1.1), &mut out);
        assert!(h.is_grasping(&cup().id));
        h.handle(&touch(THUMB, OverlapPhase::End, 2.0), &mut out);
        let ev = out.finished.first().unwrap();
        assert_eq!((ev.start, ev.end), (1.1, Some(2.0)));
    }

    #[test]
    fn suspended_member_keeps_an_open_grasp_until_its_end() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&touch(INDEX, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&touch(THUMB, OverlapPhase::Begin, 0.5), &mut out);
        h.handle(&pause(THUMB, false, 1.0), &mut out);
        assert!(h.is_grasping(&cup().id));
        h.handle(&touch(THUMB, OverlapPhase::End, 1.0), &mut out);
        let ev = out.finished.first().unwrap();
        assert_eq!((ev.start, ev.end), (0.5, Some(1.0)));
        assert!(matches!(
            out.derived.last(),
            Some(Notification::Grasp { phase: OverlapPhase::End, timestamp, .. }) if *timestamp == 1.0
        ));
    }

    #[test]
    fn contact_channel_is_ignored() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        for source in [THUMB, INDEX] {
            h.handle(
                &Notification::Overlap {
                    source,
                    channel: Channel::Contact,
                    phase: OverlapPhase::Begin,
                    other: cup(),
                    timestamp: 0.0,
                },
                &mut out,
            );
        }
        assert!(out.is_empty());
    }

    #[test]
    fn group_check() {
        assert!(handler().has_both_groups());
        let one_sided = GraspEventHandler::new(hand(), [(INDEX, MonitorGroup::B)]);
        assert!(!one_sided.has_both_groups());
    }

    #[test]
    fn finish_closes_open_grasp() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&touch(INDEX, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&touch(THUMB, OverlapPhase::Begin, 0.1), &mut out);
        h.finish(2.0, false, &mut out);
        assert_eq!(out.finished.len(), 1);
        assert!(!out.finished.first().unwrap().truncated);
    }
}
