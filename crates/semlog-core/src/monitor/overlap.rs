//! The overlap monitor: one trigger volume, up to two channels.
//!
//! Lifecycle: `Uninitialized -> Initialized -> Started -> Finished`. No
//! transition leaves `Finished`. While started the grasp channel may be
//! paused; a paused channel receives nothing.
//!
//! Signals pass these filters, in order, before reaching a channel:
//!
//! 1. the monitor is started and at least one channel is bound;
//! 2. the other entity is not the monitor's owner (self overlap);
//! 3. the other entity resolves to an individual (a miss is logged as an
//!    error);
//! 4. the individual is a rigid object;
//! 5. the other entity is not on the ignore list.

use std::collections::BTreeSet;
use std::sync::Arc;

use semlog_types::{
    Channel, EntityHandle, Individual, MonitorGroup, MonitorId, OverlapPhase, RawOverlapSignal,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::MonitorConfig;
use crate::identity::IdentityResolver;

use super::aggregator::Aggregator;
use super::host::PhysicsHost;
use super::MonitorCtx;

/// What a monitor's volume is attached to and used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonitorRole {
    /// A finger bone of a hand. Grasps need one bone of each group.
    ManipulatorBone {
        /// Thumb side (`A`) or finger side (`B`).
        group: MonitorGroup,
    },
    /// The reach area around a hand.
    Reach,
    /// The surface of an object, used to see what supports it.
    ObjectContact,
    /// The cutting edge of a blade.
    Blade,
}

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonitorState {
    /// Constructed; no channel bound.
    Uninitialized,
    /// Channels bound, overlap generation off.
    Initialized,
    /// Receiving signals.
    Started,
    /// Terminal.
    Finished,
}

/// Debug indicator for host visualizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Indicator {
    /// Nothing overlapping.
    Idle,
    /// At least one contact active.
    Active,
    /// Grasp channel paused.
    Paused,
}

/// A trigger volume turning raw overlaps into filtered channel input.
#[derive(Debug)]
pub struct OverlapMonitor {
    id: MonitorId,
    owner: EntityHandle,
    bone: Option<String>,
    role: MonitorRole,
    ignore: BTreeSet<EntityHandle>,
    tuning: MonitorConfig,
    state: MonitorState,
    grasp: Option<Aggregator>,
    contact: Option<Aggregator>,
    grasp_paused: bool,
    indicator: Indicator,
}

impl OverlapMonitor {
    /// Create a monitor for the volume `id`, owned by `owner`.
    pub fn new(id: MonitorId, owner: EntityHandle, role: MonitorRole) -> Self {
        Self {
            id,
            owner,
            bone: None,
            role,
            ignore: BTreeSet::new(),
            tuning: MonitorConfig::default(),
            state: MonitorState::Uninitialized,
            grasp: None,
            contact: None,
            grasp_paused: false,
            indicator: Indicator::Idle,
        }
    }

    /// Attach the volume to a bone of the owner at init.
    #[must_use]
    pub fn with_bone(mut self, bone: impl Into<String>) -> Self {
        self.bone = Some(bone.into());
        self
    }

    /// Never report overlaps with these entities.
    #[must_use]
    pub fn with_ignore_list(mut self, ignore: impl IntoIterator<Item = EntityHandle>) -> Self {
        self.ignore.extend(ignore);
        self
    }

    /// Replace the concatenation tuning. Only effective before init.
    pub fn set_tuning(&mut self, tuning: &MonitorConfig) {
        if self.state != MonitorState::Uninitialized {
            warn!(monitor = %self.id, "Tuning changed after init, ignored");
            return;
        }
        self.tuning = tuning.clone();
    }

    /// Monitor id (its volume).
    pub const fn id(&self) -> MonitorId {
        self.id
    }

    /// Entity owning the monitor (the hand for bone and reach monitors,
    /// the object for contact monitors).
    pub const fn owner(&self) -> EntityHandle {
        self.owner
    }

    /// Role of the monitor.
    pub const fn role(&self) -> MonitorRole {
        self.role
    }

    /// Bone the volume attaches to, if any.
    pub fn bone(&self) -> Option<&str> {
        self.bone.as_deref()
    }

    /// Lifecycle state.
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// Whether init succeeded (the monitor may since have started or
    /// finished).
    pub fn is_initialized(&self) -> bool {
        self.state != MonitorState::Uninitialized
    }

    /// Whether `channel` was bound at init.
    pub const fn has_channel(&self, channel: Channel) -> bool {
        match channel {
            Channel::Grasp => self.grasp.is_some(),
            Channel::Contact => self.contact.is_some(),
        }
    }

    /// Whether the grasp channel is paused.
    pub const fn is_grasp_paused(&self) -> bool {
        self.grasp_paused
    }

    /// Number of active contacts on `channel`.
    pub fn active_contacts(&self, channel: Channel) -> usize {
        self.aggregator(channel).map_or(0, Aggregator::active_len)
    }

    /// Number of pending ends on `channel`.
    pub fn pending_ends(&self, channel: Channel) -> usize {
        self.aggregator(channel).map_or(0, Aggregator::pending_len)
    }

    /// Current debug indicator.
    pub const fn indicator(&self) -> Indicator {
        self.indicator
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Bind the requested channels. Idempotent; failures are logged and
    /// leave the monitor uninitialized.
    pub fn init<H: PhysicsHost + ?Sized>(&mut self, detect_grasp: bool, detect_contact: bool, host: &mut H) {
        if self.state != MonitorState::Uninitialized {
            debug!(monitor = %self.id, state = ?self.state, "Monitor already initialized");
            return;
        }
        if !detect_grasp && !detect_contact {
            warn!(monitor = %self.id, "Neither grasp nor contact detection requested, monitor stays idle");
            return;
        }
        if let Some(bone) = &self.bone {
            if !host.attach_to_bone(self.id.volume(), self.owner, bone) {
                error!(monitor = %self.id, owner = %self.owner, bone = %bone, "Could not attach monitor to bone");
                return;
            }
        }

        if detect_grasp {
            self.bind(Channel::Grasp);
        }
        if detect_contact {
            self.bind(Channel::Contact);
        }
        host.set_overlap_events(self.id.volume(), false);
        self.state = MonitorState::Initialized;
        debug!(
            monitor = %self.id,
            role = ?self.role,
            grasp = detect_grasp,
            contact = detect_contact,
            "Monitor initialized"
        );
    }

    /// Enable signal reception. Requires a successful init; no-op if
    /// already started.
    pub fn start<H: PhysicsHost + ?Sized>(&mut self, host: &mut H) {
        match self.state {
            MonitorState::Initialized => {
                host.set_overlap_events(self.id.volume(), true);
                self.state = MonitorState::Started;
                debug!(monitor = %self.id, "Monitor started");
            }
            MonitorState::Started => {}
            MonitorState::Uninitialized => {
                warn!(monitor = %self.id, "Cannot start an uninitialized monitor");
            }
            MonitorState::Finished => {
                warn!(monitor = %self.id, "Cannot restart a finished monitor");
            }
        }
    }

    /// Pause or resume the grasp channel at `now`.
    ///
    /// Pausing publishes pending grasp ends, ends every active grasp
    /// contact at `now` and unbinds the channel. Resuming replays the
    /// host's current overlaps as begins at `now`, then rebinds.
    pub fn set_grasp_paused<H, R>(
        &mut self,
        paused: bool,
        now: f64,
        host: &H,
        resolver: &R,
        ctx: &mut MonitorCtx<'_>,
    ) where
        H: PhysicsHost + ?Sized,
        R: IdentityResolver + ?Sized,
    {
        if self.grasp.is_none() {
            debug!(monitor = %self.id, "No grasp channel to pause");
            return;
        }
        if self.grasp_paused == paused {
            return;
        }
        if self.state != MonitorState::Started {
            // Nothing is flowing yet (or anymore); only the binding changes.
            self.grasp_paused = paused;
            return;
        }

        if paused {
            if let Some(grasp) = self.grasp.as_mut() {
                grasp.force_close_active(now, ctx);
            }
            self.grasp_paused = true;
            debug!(monitor = %self.id, "Grasp channel paused");
        } else {
            let overlaps = host.current_overlaps(self.id.volume());
            let mut replayed: usize = 0;
            for contact in overlaps {
                let Some(other) = self.accept(contact.entity, resolver) else {
                    continue;
                };
                if let Some(grasp) = self.grasp.as_mut() {
                    grasp.begin(contact.entity, contact.volume, &other, now, ctx);
                    replayed = replayed.saturating_add(1);
                }
            }
            self.grasp_paused = false;
            debug!(monitor = %self.id, replayed, "Grasp channel resumed");
        }
        self.refresh_indicator();
    }

    /// Route one raw signal through the filters into the bound channels.
    pub fn handle_signal<R: IdentityResolver + ?Sized>(
        &mut self,
        signal: &RawOverlapSignal,
        resolver: &R,
        ctx: &mut MonitorCtx<'_>,
    ) {
        if self.state != MonitorState::Started {
            trace!(monitor = %self.id, state = ?self.state, "Signal outside started state, dropped");
            return;
        }
        if signal.volume != self.id.volume() {
            debug!(monitor = %self.id, volume = %signal.volume, "Signal for another volume, dropped");
            return;
        }
        let grasp_bound = self.grasp.is_some() && !self.grasp_paused;
        if !grasp_bound && self.contact.is_none() {
            return;
        }
        let Some(other) = self.accept(signal.other, resolver) else {
            return;
        };

        if self.tuning.log_debug {
            debug!(
                monitor = %self.id,
                other = %other,
                phase = ?signal.phase,
                t = signal.timestamp,
                "Overlap accepted"
            );
        }

        if grasp_bound {
            if let Some(grasp) = self.grasp.as_mut() {
                apply(grasp, signal, &other, ctx);
            }
        }
        if let Some(contact) = self.contact.as_mut() {
            apply(contact, signal, &other, ctx);
        }
        self.refresh_indicator();
    }

    /// A sweep for `channel` fired at `now`.
    pub fn on_sweep(&mut self, channel: Channel, now: f64, ctx: &mut MonitorCtx<'_>) {
        match self.aggregator_mut(channel) {
            Some(agg) => agg.sweep(now, ctx),
            None => debug!(monitor = %self.id, channel = ?channel, "Sweep for an unbound channel"),
        }
        self.refresh_indicator();
    }

    /// Publish every pending end on every channel now.
    pub fn flush(&mut self, ctx: &mut MonitorCtx<'_>) {
        if let Some(grasp) = self.grasp.as_mut() {
            grasp.flush(ctx);
        }
        if let Some(contact) = self.contact.as_mut() {
            contact.flush(ctx);
        }
    }

    /// Flush pending ends, stop signal generation and become terminal.
    /// Idempotent.
    pub fn finish<H: PhysicsHost + ?Sized>(&mut self, forced: bool, host: &mut H, ctx: &mut MonitorCtx<'_>) {
        if self.state == MonitorState::Finished {
            return;
        }
        self.flush(ctx);
        if self.state != MonitorState::Uninitialized {
            host.set_overlap_events(self.id.volume(), false);
        }
        self.state = MonitorState::Finished;
        self.refresh_indicator();
        debug!(monitor = %self.id, forced, "Monitor finished");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn bind(&mut self, channel: Channel) {
        let slot = match channel {
            Channel::Grasp => &mut self.grasp,
            Channel::Contact => &mut self.contact,
        };
        if slot.is_some() {
            error!(monitor = %self.id, channel = ?channel, "Channel already bound");
            return;
        }
        *slot = Some(Aggregator::new(self.id, channel, &self.tuning));
    }

    /// The filter chain shared by live signals and resume replays.
    fn accept<R: IdentityResolver + ?Sized>(&self, other: EntityHandle, resolver: &R) -> Option<Arc<Individual>> {
        if other == self.owner {
            return None;
        }
        let Some(individual) = resolver.resolve(other) else {
            error!(monitor = %self.id, other = %other, "Overlapping entity has no individual, signal dropped");
            return None;
        };
        if !individual.kind.is_trackable() {
            trace!(monitor = %self.id, other = %individual, kind = ?individual.kind, "Untracked kind");
            return None;
        }
        if self.ignore.contains(&other) {
            trace!(monitor = %self.id, other = %individual, "Ignored entity");
            return None;
        }
        Some(individual)
    }

    fn aggregator(&self, channel: Channel) -> Option<&Aggregator> {
        match channel {
            Channel::Grasp => self.grasp.as_ref(),
            Channel::Contact => self.contact.as_ref(),
        }
    }

    fn aggregator_mut(&mut self, channel: Channel) -> Option<&mut Aggregator> {
        match channel {
            Channel::Grasp => self.grasp.as_mut(),
            Channel::Contact => self.contact.as_mut(),
        }
    }

    fn refresh_indicator(&mut self) {
        let next = if self.grasp_paused {
            Indicator::Paused
        } else if self.active_contacts(Channel::Grasp) > 0 || self.active_contacts(Channel::Contact) > 0 {
            Indicator::Active
        } else {
            Indicator::Idle
        };
        if next != self.indicator {
            self.indicator = next;
            if self.tuning.visual_debug {
                info!(monitor = %self.id, indicator = ?next, "Monitor indicator changed");
            }
        }
    }
}

fn apply(agg: &mut Aggregator, signal: &RawOverlapSignal, other: &Arc<Individual>, ctx: &mut MonitorCtx<'_>) {
    match signal.phase {
        OverlapPhase::Begin => agg.begin(signal.other, signal.other_volume, other, signal.timestamp, ctx),
        OverlapPhase::End => agg.end(signal.other, signal.other_volume, signal.timestamp, ctx),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use semlog_types::{IndividualKind, VolumeHandle};

    use super::*;
    use crate::monitor::{Notification, OverlapContact, SweepKey};
    use crate::timer::TimerQueue;

    const HAND: EntityHandle = EntityHandle(1);
    const CUP: EntityHandle = EntityHandle(2);
    const TABLE: EntityHandle = EntityHandle(3);
    const FINGER: EntityHandle = EntityHandle(4);
    const GHOST: EntityHandle = EntityHandle(9);

    #[derive(Default)]
    struct TestHost {
        bones: Vec<String>,
        overlaps: Vec<OverlapContact>,
        events_enabled: HashMap<VolumeHandle, bool>,
    }

    impl PhysicsHost for TestHost {
        fn attach_to_bone(&mut self, _volume: VolumeHandle, _owner: EntityHandle, bone: &str) -> bool {
            self.bones.iter().any(|b| b == bone)
        }

        fn set_overlap_events(&mut self, volume: VolumeHandle, enabled: bool) {
            self.events_enabled.insert(volume, enabled);
        }

        fn current_overlaps(&self, _volume: VolumeHandle) -> Vec<OverlapContact> {
            self.overlaps.clone()
        }
    }

    struct Resolver(HashMap<EntityHandle, Arc<Individual>>);

    impl IdentityResolver for Resolver {
        fn resolve(&self, entity: EntityHandle) -> Option<Arc<Individual>> {
            self.0.get(&entity).cloned()
        }
    }

    fn resolver() -> Resolver {
        let mut map = HashMap::new();
        map.insert(HAND, Arc::new(Individual::new("hand", "RightHand", IndividualKind::Skeletal)));
        map.insert(CUP, Arc::new(Individual::new("cup", "Cup", IndividualKind::Rigid)));
        map.insert(TABLE, Arc::new(Individual::new("table", "Table", IndividualKind::Rigid)));
        map.insert(FINGER, Arc::new(Individual::new("finger", "index_03", IndividualKind::Bone)));
        Resolver(map)
    }

    fn monitor() -> OverlapMonitor {
        OverlapMonitor::new(
            MonitorId(10),
            HAND,
            MonitorRole::ManipulatorBone {
                group: MonitorGroup::B,
            },
        )
    }

    fn signal(other: EntityHandle, phase: OverlapPhase, t: f64) -> RawOverlapSignal {
        RawOverlapSignal {
            volume: VolumeHandle(10),
            other,
            other_volume: VolumeHandle(other.raw().saturating_add(100)),
            phase,
            timestamp: t,
        }
    }

    struct Rig {
        timers: TimerQueue<SweepKey>,
        outbox: Vec<Notification>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                timers: TimerQueue::new(),
                outbox: Vec::new(),
            }
        }

        fn ctx(&mut self) -> MonitorCtx<'_> {
            MonitorCtx::new(&mut self.timers, &mut self.outbox)
        }

        fn count(&self, channel: Channel, phase: OverlapPhase) -> usize {
            self.outbox
                .iter()
                .filter(|n| matches!(n, Notification::Overlap { channel: c, phase: p, .. } if *c == channel && *p == phase))
                .count()
        }
    }

    fn started(grasp: bool, contact: bool, host: &mut TestHost) -> OverlapMonitor {
        let mut m = monitor();
        m.init(grasp, contact, host);
        m.start(host);
        m
    }

    #[test]
    fn init_without_channels_stays_uninitialized() {
        let mut host = TestHost::default();
        let mut m = monitor();
        m.init(false, false, &mut host);
        assert_eq!(m.state(), MonitorState::Uninitialized);
        m.start(&mut host);
        assert_eq!(m.state(), MonitorState::Uninitialized);
    }

    #[test]
    fn failed_bone_attachment_leaves_monitor_uninitialized() {
        let mut host = TestHost::default();
        let mut m = monitor().with_bone("index_03");
        m.init(true, true, &mut host);
        assert!(!m.is_initialized());

        host.bones.push("index_03".to_owned());
        m.init(true, true, &mut host);
        assert!(m.is_initialized());
        assert_eq!(m.bone(), Some("index_03"));
    }

    #[test]
    fn init_is_idempotent_and_disables_events_until_start() {
        let mut host = TestHost::default();
        let mut m = monitor();
        m.init(true, false, &mut host);
        m.init(true, true, &mut host);
        assert!(m.has_channel(Channel::Grasp));
        assert!(!m.has_channel(Channel::Contact));
        assert_eq!(host.events_enabled.get(&VolumeHandle(10)), Some(&false));
        m.start(&mut host);
        assert_eq!(host.events_enabled.get(&VolumeHandle(10)), Some(&true));
    }

    #[test]
    fn signals_before_start_are_dropped() {
        let mut host = TestHost::default();
        let res = resolver();
        let mut rig = Rig::new();
        let mut m = monitor();
        m.init(true, true, &mut host);
        m.handle_signal(&signal(CUP, OverlapPhase::Begin, 0.0), &res, &mut rig.ctx());
        assert!(rig.outbox.is_empty());
    }

    #[test]
    fn accepted_begin_reaches_both_channels() {
        let mut host = TestHost::default();
        let res = resolver();
        let mut rig = Rig::new();
        let mut m = started(true, true, &mut host);
        m.handle_signal(&signal(CUP, OverlapPhase::Begin, 0.0), &res, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Grasp, OverlapPhase::Begin), 1);
        assert_eq!(rig.count(Channel::Contact, OverlapPhase::Begin), 1);
        assert_eq!(m.indicator(), Indicator::Active);
    }

    #[test]
    fn filters_drop_self_unknown_untracked_and_ignored() {
        let mut host = TestHost::default();
        let res = resolver();
        let mut rig = Rig::new();
        let mut m = monitor().with_ignore_list([TABLE]);
        m.init(true, true, &mut host);
        m.start(&mut host);
        for other in [HAND, GHOST, FINGER, TABLE] {
            m.handle_signal(&signal(other, OverlapPhase::Begin, 0.0), &res, &mut rig.ctx());
            m.handle_signal(&signal(other, OverlapPhase::End, 0.1), &res, &mut rig.ctx());
        }
        assert!(rig.outbox.is_empty());
        assert!(rig.timers.is_empty());
        assert_eq!(m.active_contacts(Channel::Contact), 0);
        assert_eq!(m.pending_ends(Channel::Contact), 0);
    }

    #[test]
    fn pause_closes_and_resume_replays_current_overlaps() {
        let mut host = TestHost::default();
        let res = resolver();
        let mut rig = Rig::new();
        let mut m = started(true, false, &mut host);
        m.handle_signal(&signal(CUP, OverlapPhase::Begin, 0.0), &res, &mut rig.ctx());

        m.set_grasp_paused(true, 1.0, &host, &res, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Grasp, OverlapPhase::End), 1);
        assert_eq!(m.indicator(), Indicator::Paused);

        // Ignored while paused.
        m.handle_signal(&signal(TABLE, OverlapPhase::Begin, 1.1), &res, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Grasp, OverlapPhase::Begin), 1);

        host.overlaps.push(OverlapContact {
            entity: CUP,
            volume: VolumeHandle(102),
        });
        host.overlaps.push(OverlapContact {
            entity: HAND,
            volume: VolumeHandle(101),
        });
        m.set_grasp_paused(false, 2.0, &host, &res, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Grasp, OverlapPhase::Begin), 2);
        assert_eq!(m.active_contacts(Channel::Grasp), 1);

        // Same value again changes nothing.
        m.set_grasp_paused(false, 2.5, &host, &res, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Grasp, OverlapPhase::Begin), 2);
    }

    #[test]
    fn finish_flushes_pending_ends_and_is_terminal() {
        let mut host = TestHost::default();
        let res = resolver();
        let mut rig = Rig::new();
        let mut m = started(false, true, &mut host);
        m.handle_signal(&signal(CUP, OverlapPhase::Begin, 0.0), &res, &mut rig.ctx());
        m.handle_signal(&signal(CUP, OverlapPhase::End, 0.5), &res, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Contact, OverlapPhase::End), 0);

        m.finish(false, &mut host, &mut rig.ctx());
        m.finish(true, &mut host, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Contact, OverlapPhase::End), 1);
        assert!(rig.timers.is_empty());
        assert_eq!(m.state(), MonitorState::Finished);

        m.start(&mut host);
        assert_eq!(m.state(), MonitorState::Finished);
    }

    #[test]
    fn sweep_routes_to_the_channel() {
        let mut host = TestHost::default();
        let res = resolver();
        let mut rig = Rig::new();
        let mut m = started(false, true, &mut host);
        m.handle_signal(&signal(CUP, OverlapPhase::Begin, 0.0), &res, &mut rig.ctx());
        m.handle_signal(&signal(CUP, OverlapPhase::End, 0.5), &res, &mut rig.ctx());
        let (_, key) = rig.timers.pop_due(1.0).unwrap();
        assert_eq!(key.monitor, m.id());
        m.on_sweep(key.channel, 1.0, &mut rig.ctx());
        assert_eq!(rig.count(Channel::Contact, OverlapPhase::End), 1);
        assert_eq!(m.indicator(), Indicator::Idle);
    }
}
