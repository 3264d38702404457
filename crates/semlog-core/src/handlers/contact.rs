//! Contact events between a subject and whatever it touches.
//!
//! A manipulator has one contact handler listening to all its bone
//! monitors, with the hand as subject: the hand touches an object while any
//! of its bones does. An object-contact monitor gets its own handler with
//! the object as subject.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semlog_types::{Channel, EventKind, Individual, IndividualId, MonitorId, OverlapPhase};
use tracing::debug;

use super::{EventHandler, HandlerOutput, OpenEvents};
use crate::monitor::Notification;

/// Which sources currently touch one other individual.
#[derive(Debug)]
struct Touch {
    other: Arc<Individual>,
    sources: BTreeSet<MonitorId>,
}

/// Publishes `Contact [subject - other]` spans.
#[derive(Debug)]
pub struct ContactEventHandler {
    name: String,
    subject: Arc<Individual>,
    sources: BTreeSet<MonitorId>,
    touching: BTreeMap<IndividualId, Touch>,
    open: OpenEvents,
    started: bool,
    finished: bool,
}

impl ContactEventHandler {
    /// Contact handler for `subject` fed by the contact channel of
    /// `sources`.
    pub fn new(subject: Arc<Individual>, sources: impl IntoIterator<Item = MonitorId>) -> Self {
        Self {
            name: format!("contact:{subject}"),
            subject,
            sources: sources.into_iter().collect(),
            touching: BTreeMap::new(),
            open: OpenEvents::new(),
            started: false,
            finished: false,
        }
    }

    /// Number of contact events currently open.
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    fn on_begin(&mut self, source: MonitorId, other: &Arc<Individual>, t: f64) {
        let touch = self.touching.entry(other.id.clone()).or_insert_with(|| Touch {
            other: Arc::clone(other),
            sources: BTreeSet::new(),
        });
        let first = touch.sources.is_empty();
        touch.sources.insert(source);
        if first {
            self.open.open(EventKind::Contact, &self.subject, other, t);
        }
    }

    fn on_end(&mut self, source: MonitorId, other: &Arc<Individual>, t: f64, out: &mut HandlerOutput) {
        let Some(touch) = self.touching.get_mut(&other.id) else {
            debug!(handler = %self.name, other = %other, "End for an untouched individual");
            return;
        };
        touch.sources.remove(&source);
        if !touch.sources.is_empty() {
            return;
        }
        if let Some(touch) = self.touching.remove(&other.id) {
            if let Some(event) = self.open.close(EventKind::Contact, &self.subject, &touch.other, t) {
                out.finished.push(event);
            }
        }
    }
}

impl EventHandler for ContactEventHandler {
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
        let Notification::Overlap {
            source,
            channel: Channel::Contact,
            phase,
            other,
            timestamp,
        } = notification
        else {
            return;
        };
        if !self.sources.contains(source) {
            return;
        }
        match phase {
            OverlapPhase::Begin => self.on_begin(*source, other, *timestamp),
            OverlapPhase::End => self.on_end(*source, other, *timestamp, out),
        }
    }

    fn finish(&mut self, now: f64, forced: bool, out: &mut HandlerOutput) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.touching.clear();
        out.finished.extend(self.open.close_all(now, forced));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use semlog_types::IndividualKind;

    use super::*;

    fn hand() -> Arc<Individual> {
        Arc::new(Individual::new("hand", "RightHand", IndividualKind::Skeletal))
    }

    fn cup() -> Arc<Individual> {
        Arc::new(Individual::new("cup", "Cup", IndividualKind::Rigid))
    }

    fn contact(source: u64, phase: OverlapPhase, t: f64) -> Notification {
        Notification::Overlap {
            source: MonitorId(source),
            channel: Channel::Contact,
            phase,
            other: cup(),
            timestamp: t,
        }
    }

    fn handler() -> ContactEventHandler {
        let mut h = ContactEventHandler::new(hand(), [MonitorId(1), MonitorId(2)]);
        h.start();
        h
    }

    #[test]
    fn span_covers_first_begin_to_last_end() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&contact(1, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(&contact(2, OverlapPhase::Begin, 0.2), &mut out);
        h.handle(&contact(1, OverlapPhase::End, 0.5), &mut out);
        assert!(out.finished.is_empty());
        h.handle(&contact(2, OverlapPhase::End, 0.9), &mut out);
        assert_eq!(out.finished.len(), 1);
        let ev = out.finished.first().unwrap();
        assert_eq!(ev.kind, EventKind::Contact);
        assert_eq!((ev.start, ev.end), (0.0, Some(0.9)));
        assert_eq!(ev.participants.first().unwrap().class, "RightHand");
    }

    #[test]
    fn foreign_sources_and_grasp_channel_are_ignored() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&contact(7, OverlapPhase::Begin, 0.0), &mut out);
        h.handle(
            &Notification::Overlap {
                source: MonitorId(1),
                channel: Channel::Grasp,
                phase: OverlapPhase::Begin,
                other: cup(),
                timestamp: 0.0,
            },
            &mut out,
        );
        assert_eq!(h.open_len(), 0);
    }

    #[test]
    fn nothing_is_accepted_before_start() {
        let mut h = ContactEventHandler::new(hand(), [MonitorId(1)]);
        let mut out = HandlerOutput::default();
        h.handle(&contact(1, OverlapPhase::Begin, 0.0), &mut out);
        assert_eq!(h.open_len(), 0);
        assert!(!h.is_started());
    }

    #[test]
    fn finish_truncates_open_contacts_once() {
        let mut h = handler();
        let mut out = HandlerOutput::default();
        h.handle(&contact(1, OverlapPhase::Begin, 0.0), &mut out);
        h.finish(3.0, true, &mut out);
        h.finish(4.0, true, &mut out);
        assert_eq!(out.finished.len(), 1);
        let ev = out.finished.first().unwrap();
        assert_eq!(ev.end, Some(3.0));
        assert!(ev.truncated);
    }
}
