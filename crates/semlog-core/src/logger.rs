//! The symbolic logger: owns monitors, handlers, timers and the session
//! clock, and drives them through one session.
//!
//! Lifecycle: `Uninit -> Init -> Started -> Finished`. `finish` is
//! reachable from `Init` or `Started`; dropping an active logger finishes
//! it with `forced = true`.
//!
//! # Frame order
//!
//! [`SymbolicLogger::step`] advances the clock, delivers the frame's
//! signals in order, then fires every sweep that has come due. All
//! notifications produced along the way are routed through one FIFO to
//! every handler before the next signal is processed.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use semlog_types::{
    Channel, EntityHandle, EpisodeId, Individual, IndividualId, MonitorGroup, MonitorId,
    RawOverlapSignal, SemanticEvent, SessionRecord, TaskId,
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::clock::SessionClock;
use crate::config::LoggerConfig;
use crate::handlers::{
    ContactEventHandler, EventHandler, GraspEventHandler, HandlerError, HandlerOutput,
    PickAndPlaceEventHandler, ReachEventHandler, SlicingEventHandler,
};
use crate::identity::IdentityResolver;
use crate::monitor::{MonitorCtx, MonitorRole, Notification, OverlapMonitor, PhysicsHost, SweepKey};
use crate::timer::TimerQueue;

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Errors a sink may report when the session closes.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing the session failed.
    #[error("failed to write session: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The session could not be encoded.
    #[error("failed to encode session: {reason}")]
    Encode {
        /// Encoder message.
        reason: String,
    },
}

/// Receiver of finished events.
pub trait EventSink {
    /// Called once per finished event, in finishing order.
    fn publish(&mut self, event: &SemanticEvent);

    /// Called once when the session finishes.
    fn close(&mut self, record: &SessionRecord) -> Result<(), SinkError>;
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Events in publication order.
    pub events: Vec<SemanticEvent>,
    /// Records handed to `close`.
    pub records: Vec<SessionRecord>,
}

impl EventSink for CollectingSink {
    fn publish(&mut self, event: &SemanticEvent) {
        self.events.push(event.clone());
    }

    fn close(&mut self, record: &SessionRecord) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Lifecycle state of the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoggerState {
    /// Constructed.
    Uninit,
    /// Monitors bound and handlers built; no signal flow.
    Init,
    /// Processing signals.
    Started,
    /// Terminal.
    Finished,
}

/// Session orchestrator.
#[derive(Debug)]
pub struct SymbolicLogger<R, H, S>
where
    R: IdentityResolver,
    H: PhysicsHost,
    S: EventSink,
{
    config: LoggerConfig,
    resolver: R,
    host: H,
    sink: S,
    monitors: Vec<OverlapMonitor>,
    by_volume: BTreeMap<MonitorId, usize>,
    handlers: Vec<Box<dyn EventHandler>>,
    timers: TimerQueue<SweepKey>,
    clock: SessionClock,
    state: LoggerState,
    task_id: TaskId,
    episode_id: EpisodeId,
    started_at: Option<DateTime<Utc>>,
    finished: Vec<SemanticEvent>,
    record: Option<SessionRecord>,
}

impl<R, H, S> SymbolicLogger<R, H, S>
where
    R: IdentityResolver,
    H: PhysicsHost,
    S: EventSink,
{
    /// Build a logger over the given collaborators and monitor set.
    /// Monitors sharing an id keep the first one.
    pub fn new(config: LoggerConfig, resolver: R, host: H, sink: S, monitors: Vec<OverlapMonitor>) -> Self {
        let mut kept: Vec<OverlapMonitor> = Vec::with_capacity(monitors.len());
        let mut by_volume = BTreeMap::new();
        for monitor in monitors {
            if by_volume.contains_key(&monitor.id()) {
                warn!(monitor = %monitor.id(), "Duplicate monitor id, dropped");
                continue;
            }
            by_volume.insert(monitor.id(), kept.len());
            kept.push(monitor);
        }
        Self {
            config,
            resolver,
            host,
            sink,
            monitors: kept,
            by_volume,
            handlers: Vec::new(),
            timers: TimerQueue::new(),
            clock: SessionClock::new(),
            state: LoggerState::Uninit,
            task_id: TaskId::new(),
            episode_id: EpisodeId::new(),
            started_at: None,
            finished: Vec::new(),
            record: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Lifecycle state.
    pub const fn state(&self) -> LoggerState {
        self.state
    }

    /// Current session time.
    pub const fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Frames stepped so far.
    pub const fn frame(&self) -> u64 {
        self.clock.frame()
    }

    /// Task id of the session.
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Episode id of the session.
    pub const fn episode_id(&self) -> EpisodeId {
        self.episode_id
    }

    /// Configuration in use.
    pub const fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Events finished so far, in publication order.
    pub fn finished_events(&self) -> &[SemanticEvent] {
        &self.finished
    }

    /// The session record, once finished.
    pub const fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    /// The monitor listening on `id`.
    pub fn monitor(&self, id: MonitorId) -> Option<&OverlapMonitor> {
        self.by_volume.get(&id).and_then(|i| self.monitors.get(*i))
    }

    /// Names of the handlers built at init.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Number of sweeps waiting to fire.
    pub fn pending_sweeps(&self) -> usize {
        self.timers.len()
    }

    /// Session time of the next due sweep.
    pub fn next_sweep(&mut self) -> Option<f64> {
        self.timers.next_deadline()
    }

    /// The identity resolver.
    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Mutable identity resolver, for entities destroyed mid-session.
    pub const fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    /// The physics host.
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable physics host.
    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The sink.
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Bind monitors and build handlers. No-op (with a warning) unless
    /// uninitialized; an invalid configuration leaves the logger
    /// uninitialized.
    pub fn init(&mut self) {
        if self.state != LoggerState::Uninit {
            warn!(state = ?self.state, "Logger already initialized");
            return;
        }
        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid logger configuration, init aborted");
            return;
        }

        self.task_id = parse_or_new(self.config.session.task_id.as_deref(), "task_id").into();
        self.episode_id = parse_or_new(self.config.session.episode_id.as_deref(), "episode_id").into();

        let events = self.config.events.clone();
        for monitor in &mut self.monitors {
            monitor.set_tuning(&self.config.monitors);
            let (grasp, contact) = match monitor.role() {
                MonitorRole::ManipulatorBone { .. } => (events.grasp(), events.contact()),
                MonitorRole::Reach => (false, events.reach()),
                MonitorRole::ObjectContact => (false, events.contact() || events.pick_and_place()),
                MonitorRole::Blade => (false, events.slicing()),
            };
            monitor.init(grasp, contact, &mut self.host);
        }

        self.handlers = self.build_handlers();
        self.state = LoggerState::Init;
        info!(
            task_id = %self.task_id,
            episode_id = %self.episode_id,
            monitors = self.monitors.len(),
            handlers = self.handlers.len(),
            "Logger initialized"
        );
    }

    /// Start handlers, then monitors.
    pub fn start(&mut self) {
        match self.state {
            LoggerState::Init => {}
            LoggerState::Started => return,
            LoggerState::Uninit | LoggerState::Finished => {
                warn!(state = ?self.state, "Logger cannot start from this state");
                return;
            }
        }
        for handler in &mut self.handlers {
            handler.start();
        }
        for monitor in &mut self.monitors {
            monitor.start(&mut self.host);
        }
        self.started_at = Some(Utc::now());
        self.state = LoggerState::Started;
        info!(t = self.clock.now(), "Logger started");
    }

    /// Advance one frame by `dt`, deliver `signals` stamped with the new
    /// time, then fire due sweeps.
    pub fn step(&mut self, dt: f64, signals: &[RawOverlapSignal]) {
        if self.state != LoggerState::Started {
            trace!(state = ?self.state, "Step outside started state ignored");
            return;
        }
        let now = match self.clock.advance(dt) {
            Ok(now) => now,
            Err(e) => {
                error!(error = %e, "Clock rejected frame step");
                return;
            }
        };
        for signal in signals {
            let stamped = RawOverlapSignal {
                timestamp: now,
                ..*signal
            };
            self.route_signal(&stamped);
        }
        self.fire_due_timers();
    }

    /// Move the clock to absolute session time `t` and fire due sweeps.
    pub fn advance_to(&mut self, t: f64) {
        if self.state != LoggerState::Started {
            trace!(state = ?self.state, "Advance outside started state ignored");
            return;
        }
        if let Err(e) = self.clock.advance_to(t) {
            error!(error = %e, "Clock rejected advance");
            return;
        }
        self.fire_due_timers();
    }

    /// Deliver one signal at its own timestamp. The clock moves forward
    /// to it if it lies ahead.
    pub fn handle_signal(&mut self, signal: &RawOverlapSignal) {
        if self.state != LoggerState::Started {
            trace!(state = ?self.state, "Signal outside started state dropped");
            return;
        }
        if signal.timestamp > self.clock.now() {
            if let Err(e) = self.clock.advance_to(signal.timestamp) {
                error!(error = %e, "Clock rejected signal time");
                return;
            }
        }
        self.route_signal(signal);
    }

    /// Fire every sweep due at the current time.
    pub fn fire_due_timers(&mut self) {
        let now = self.clock.now();
        while let Some((_, key)) = self.timers.pop_due(now) {
            let mut outbox = Vec::new();
            match self.by_volume.get(&key.monitor).and_then(|i| self.monitors.get_mut(*i)) {
                Some(monitor) => {
                    let mut ctx = MonitorCtx::new(&mut self.timers, &mut outbox);
                    monitor.on_sweep(key.channel, now, &mut ctx);
                }
                None => warn!(monitor = %key.monitor, "Sweep for unknown monitor"),
            }
            self.dispatch(outbox);
        }
    }

    /// Pause or resume the grasp channel of every bone monitor of `owner`.
    pub fn set_grasp_paused(&mut self, owner: EntityHandle, paused: bool) {
        if self.state == LoggerState::Finished {
            warn!(owner = %owner, "Grasp pause after finish ignored");
            return;
        }
        let now = self.clock.now();
        let mut outbox = Vec::new();
        let mut touched: usize = 0;
        for monitor in &mut self.monitors {
            if monitor.owner() != owner || !matches!(monitor.role(), MonitorRole::ManipulatorBone { .. }) {
                continue;
            }
            let mut ctx = MonitorCtx::new(&mut self.timers, &mut outbox);
            monitor.set_grasp_paused(paused, now, &self.host, &self.resolver, &mut ctx);
            touched = touched.saturating_add(1);
        }
        if touched == 0 {
            warn!(owner = %owner, "No bone monitors for grasp pause");
        }
        self.dispatch(outbox);
    }

    /// End the session.
    ///
    /// Pending ends are flushed through the handlers, the handlers close
    /// whatever is still open at the current time, the monitors become
    /// terminal and the sweep queue is cleared. The record is then handed
    /// to the sink. Idempotent.
    pub fn finish(&mut self, forced: bool) {
        match self.state {
            LoggerState::Init | LoggerState::Started => {}
            LoggerState::Uninit => {
                warn!("Finish before init ignored");
                return;
            }
            LoggerState::Finished => return,
        }
        let now = self.clock.now();

        let mut outbox = Vec::new();
        for monitor in &mut self.monitors {
            let mut ctx = MonitorCtx::new(&mut self.timers, &mut outbox);
            monitor.flush(&mut ctx);
        }
        self.dispatch(outbox);

        for handler in &mut self.handlers {
            let mut out = HandlerOutput::default();
            handler.finish(now, forced, &mut out);
            if !out.derived.is_empty() {
                trace!(handler = handler.name(), count = out.derived.len(), "Derived notifications dropped at finish");
            }
            for event in out.finished {
                publish(&mut self.sink, &mut self.finished, event);
            }
        }

        let mut leftovers = Vec::new();
        for monitor in &mut self.monitors {
            let mut ctx = MonitorCtx::new(&mut self.timers, &mut leftovers);
            monitor.finish(forced, &mut self.host, &mut ctx);
        }
        if !leftovers.is_empty() {
            warn!(count = leftovers.len(), "Notifications after handler finish dropped");
        }
        self.timers.clear();

        let record = SessionRecord {
            task_id: self.task_id,
            episode_id: self.episode_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            session_time: now,
            forced,
            events: self.finished.clone(),
        };
        if let Err(e) = self.sink.close(&record) {
            error!(error = %e, "Sink failed to close session");
        }
        info!(
            task_id = %self.task_id,
            episode_id = %self.episode_id,
            events = record.events.len(),
            forced,
            t = now,
            "Logger finished"
        );
        self.record = Some(record);
        self.state = LoggerState::Finished;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn route_signal(&mut self, signal: &RawOverlapSignal) {
        let id = MonitorId::from(signal.volume);
        let Some(monitor) = self.by_volume.get(&id).and_then(|i| self.monitors.get_mut(*i)) else {
            trace!(volume = %signal.volume, "Signal for an unmonitored volume");
            return;
        };
        let mut outbox = Vec::new();
        let mut ctx = MonitorCtx::new(&mut self.timers, &mut outbox);
        monitor.handle_signal(signal, &self.resolver, &mut ctx);
        self.dispatch(outbox);
    }

    /// Deliver notifications in FIFO order; derived notifications join the
    /// back of the queue.
    fn dispatch(&mut self, outbox: Vec<Notification>) {
        let mut queue: VecDeque<Notification> = outbox.into();
        while let Some(notification) = queue.pop_front() {
            trace!(t = notification.timestamp(), ?notification, "Dispatching");
            for handler in &mut self.handlers {
                let mut out = HandlerOutput::default();
                handler.handle(&notification, &mut out);
                for event in out.finished {
                    publish(&mut self.sink, &mut self.finished, event);
                }
                queue.extend(out.derived);
            }
        }
    }

    fn build_handlers(&self) -> Vec<Box<dyn EventHandler>> {
        let events = &self.config.events;
        let mut handlers: Vec<Box<dyn EventHandler>> = Vec::new();

        // Bone monitors grouped by hand.
        let mut manipulators: BTreeMap<EntityHandle, Vec<&OverlapMonitor>> = BTreeMap::new();
        for monitor in &self.monitors {
            if matches!(monitor.role(), MonitorRole::ManipulatorBone { .. }) {
                manipulators.entry(monitor.owner()).or_default().push(monitor);
            }
        }
        let object_monitors: Vec<&OverlapMonitor> = self
            .monitors
            .iter()
            .filter(|m| m.role() == MonitorRole::ObjectContact)
            .collect();

        for (owner, bones) in &manipulators {
            let hand = match self.subject(*owner) {
                Ok(hand) => hand,
                Err(e) => {
                    error!(error = %e, "Manipulator skipped");
                    continue;
                }
            };

            if events.contact() {
                let sources = initialized_sources(bones, Channel::Contact);
                push_built(&mut handlers, sources.map(|s| ContactEventHandler::new(Arc::clone(&hand), s)));
            }

            if !events.grasp() {
                continue;
            }
            let grasp = initialized_sources(bones, Channel::Grasp).and_then(|ids| {
                let grouped: Vec<(MonitorId, MonitorGroup)> = bones
                    .iter()
                    .filter(|m| ids.contains(&m.id()))
                    .filter_map(|m| match m.role() {
                        MonitorRole::ManipulatorBone { group } => Some((m.id(), group)),
                        MonitorRole::Reach | MonitorRole::ObjectContact | MonitorRole::Blade => None,
                    })
                    .collect();
                let handler = GraspEventHandler::new(Arc::clone(&hand), grouped);
                if handler.has_both_groups() {
                    Ok(handler)
                } else {
                    Err(HandlerError::NoSources(format!("grasp:{hand} needs bones of both groups")))
                }
            });
            let has_grasp = grasp.is_ok();
            push_built(&mut handlers, grasp);
            if !has_grasp {
                continue;
            }

            if events.reach() {
                for reach in self
                    .monitors
                    .iter()
                    .filter(|m| m.role() == MonitorRole::Reach && m.owner() == *owner)
                {
                    let built = require_initialized(reach).map(|()| ReachEventHandler::new(Arc::clone(&hand), reach.id()));
                    push_built(&mut handlers, built);
                }
            }

            if events.pick_and_place() {
                let covered: Vec<(MonitorId, IndividualId)> = object_monitors
                    .iter()
                    .filter(|m| m.has_channel(Channel::Contact))
                    .filter_map(|m| self.resolver.resolve(m.owner()).map(|obj| (m.id(), obj.id.clone())))
                    .collect();
                handlers.push(Box::new(PickAndPlaceEventHandler::new(Arc::clone(&hand), covered)));
            }
        }

        if events.contact() {
            for monitor in &object_monitors {
                let built = require_initialized(monitor)
                    .and_then(|()| self.subject(monitor.owner()))
                    .map(|object| ContactEventHandler::new(object, [monitor.id()]));
                push_built(&mut handlers, built);
            }
        }

        if events.slicing() {
            let mut blades: BTreeMap<EntityHandle, Vec<&OverlapMonitor>> = BTreeMap::new();
            for monitor in self.monitors.iter().filter(|m| m.role() == MonitorRole::Blade) {
                blades.entry(monitor.owner()).or_default().push(monitor);
            }
            for (owner, edges) in &blades {
                let built = initialized_sources(edges, Channel::Contact)
                    .and_then(|ids| self.subject(*owner).map(|blade| SlicingEventHandler::new(blade, ids)));
                push_built(&mut handlers, built);
            }
        }

        handlers
    }

    fn subject(&self, owner: EntityHandle) -> Result<Arc<Individual>, HandlerError> {
        self.resolver
            .resolve(owner)
            .ok_or(HandlerError::SubjectUnresolved(owner))
    }
}

impl<R, H, S> Drop for SymbolicLogger<R, H, S>
where
    R: IdentityResolver,
    H: PhysicsHost,
    S: EventSink,
{
    fn drop(&mut self) {
        if matches!(self.state, LoggerState::Init | LoggerState::Started) {
            debug!("Logger dropped while active, forcing finish");
            self.finish(true);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn publish<S: EventSink>(sink: &mut S, finished: &mut Vec<SemanticEvent>, event: SemanticEvent) {
    info!(
        event = %event.context(),
        start = event.start,
        end = ?event.end,
        truncated = event.truncated,
        "Event finished"
    );
    sink.publish(&event);
    finished.push(event);
}

fn push_built<T: EventHandler + 'static>(handlers: &mut Vec<Box<dyn EventHandler>>, built: Result<T, HandlerError>) {
    match built {
        Ok(handler) => {
            debug!(handler = handler.name(), "Handler built");
            handlers.push(Box::new(handler));
        }
        Err(e) => warn!(error = %e, "Handler not built"),
    }
}

fn require_initialized(monitor: &OverlapMonitor) -> Result<(), HandlerError> {
    if monitor.is_initialized() {
        Ok(())
    } else {
        Err(HandlerError::SourceNotInitialized(monitor.id()))
    }
}

/// Ids of the initialized monitors among `monitors` with `channel` bound.
/// Uninitialized ones are logged and left out.
fn initialized_sources(monitors: &[&OverlapMonitor], channel: Channel) -> Result<Vec<MonitorId>, HandlerError> {
    let mut ids = Vec::new();
    for monitor in monitors {
        match require_initialized(monitor) {
            Ok(()) if monitor.has_channel(channel) => ids.push(monitor.id()),
            Ok(()) => {}
            Err(e) => warn!(error = %e, "Source left out"),
        }
    }
    if ids.is_empty() {
        return Err(HandlerError::NoSources(format!("{channel:?} channel")));
    }
    Ok(ids)
}

fn parse_or_new(configured: Option<&str>, field: &str) -> Uuid {
    match configured.map(Uuid::parse_str) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            warn!(field, error = %e, "Configured id is not a UUID, generating one");
            Uuid::now_v7()
        }
        None => Uuid::now_v7(),
    }
}
