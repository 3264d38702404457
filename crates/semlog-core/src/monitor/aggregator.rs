//! Jitter concatenation for one monitor channel.
//!
//! Physical overlaps flicker: a finger resting on a cup produces bursts of
//! end/begin pairs a few milliseconds apart. The aggregator turns those
//! bursts into one contact span.
//!
//! # Algorithm
//!
//! - **Begin** for `other`: if an end for `other` is pending and younger
//!   than the concatenation window, the pending end is cancelled and a
//!   `Resumed` is emitted instead of a Begin (the contact never stopped). A
//!   pending end older than the window is published first, then the Begin.
//! - **End** for `other`: the contact leaves the active set and becomes a
//!   pending end stamped with the current time, announced as `Suspended`.
//!   A sweep is scheduled `window + margin` later unless one is already
//!   queued.
//! - **Sweep**: every pending end at least `window` old is published with
//!   its original end time. If some remain, another sweep is scheduled.
//! - **Flush**: every pending end is published and the sweep cancelled.
//!
//! Every End is therefore delayed by at least one window.
//!
//! An entity may own several volumes. Its contact is active while any of
//! them overlaps; only the first volume in and the last volume out count.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use semlog_types::{Channel, EntityHandle, Individual, MonitorId, OverlapPhase, VolumeHandle};
use tracing::{trace, warn};

use crate::config::MonitorConfig;
use crate::timer::TimerHandle;

use super::{MonitorCtx, Notification, SweepKey};

/// An individual currently overlapping the monitor.
#[derive(Debug, Clone)]
struct ActiveContact {
    /// The overlapped individual.
    other: Arc<Individual>,
    /// Volumes of that entity inside the monitor volume.
    volumes: BTreeSet<VolumeHandle>,
}

/// An end waiting out the concatenation window.
#[derive(Debug, Clone)]
struct PendingEnd {
    /// The individual that stopped overlapping.
    other: Arc<Individual>,
    /// When it stopped.
    end: f64,
}

/// Per-channel contact state of one monitor.
#[derive(Debug)]
pub struct Aggregator {
    monitor: MonitorId,
    channel: Channel,
    window: f64,
    sweep_delay: f64,
    active: BTreeMap<EntityHandle, ActiveContact>,
    pending: BTreeMap<EntityHandle, PendingEnd>,
    sweep: Option<TimerHandle>,
}

impl Aggregator {
    /// Create an empty aggregator for `channel` of `monitor`.
    pub fn new(monitor: MonitorId, channel: Channel, tuning: &MonitorConfig) -> Self {
        Self {
            monitor,
            channel,
            window: tuning.concatenation_window,
            sweep_delay: tuning.sweep_delay(),
            active: BTreeMap::new(),
            pending: BTreeMap::new(),
            sweep: None,
        }
    }

    /// The channel this aggregator serves.
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Number of individuals currently in contact.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of ends waiting out the window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `entity` is currently in contact.
    pub fn is_active(&self, entity: EntityHandle) -> bool {
        self.active.contains_key(&entity)
    }

    /// Whether an end for `entity` is pending.
    pub fn is_pending(&self, entity: EntityHandle) -> bool {
        self.pending.contains_key(&entity)
    }

    /// An accepted Begin of `volume` (owned by `entity`) at `now`.
    pub fn begin(
        &mut self,
        entity: EntityHandle,
        volume: VolumeHandle,
        other: &Arc<Individual>,
        now: f64,
        ctx: &mut MonitorCtx<'_>,
    ) {
        if let Some(contact) = self.active.get_mut(&entity) {
            if !contact.volumes.insert(volume) {
                warn!(
                    monitor = %self.monitor,
                    channel = ?self.channel,
                    other = %other,
                    volume = %volume,
                    "Duplicate begin for an overlapping volume, ignored"
                );
            }
            return;
        }

        if let Some(pending) = self.pending.remove(&entity) {
            if now - pending.end < self.window {
                trace!(
                    monitor = %self.monitor,
                    channel = ?self.channel,
                    other = %other,
                    gap = now - pending.end,
                    "Contact resumed within window, pending end cancelled"
                );
                if self.pending.is_empty() {
                    self.cancel_sweep(ctx);
                }
                self.activate(entity, volume, other);
                ctx.outbox.push(Notification::Resumed {
                    source: self.monitor,
                    channel: self.channel,
                    other: Arc::clone(other),
                    timestamp: now,
                });
                return;
            }
            // The sweep has not run yet but the pending end is already final.
            self.emit(OverlapPhase::End, pending.other, pending.end, ctx);
            if self.pending.is_empty() {
                self.cancel_sweep(ctx);
            }
        }

        self.activate(entity, volume, other);
        self.emit(OverlapPhase::Begin, Arc::clone(other), now, ctx);
    }

    /// An accepted End of `volume` (owned by `entity`) at `now`.
    pub fn end(&mut self, entity: EntityHandle, volume: VolumeHandle, now: f64, ctx: &mut MonitorCtx<'_>) {
        let Some(contact) = self.active.get_mut(&entity) else {
            warn!(
                monitor = %self.monitor,
                channel = ?self.channel,
                entity = %entity,
                "End without a matching begin, ignored"
            );
            return;
        };
        if !contact.volumes.remove(&volume) {
            warn!(
                monitor = %self.monitor,
                channel = ?self.channel,
                entity = %entity,
                volume = %volume,
                "End for a volume that never began, ignored"
            );
            return;
        }
        if !contact.volumes.is_empty() {
            return;
        }

        let Some(contact) = self.active.remove(&entity) else {
            return;
        };
        ctx.outbox.push(Notification::Suspended {
            source: self.monitor,
            channel: self.channel,
            other: Arc::clone(&contact.other),
            timestamp: now,
        });
        self.pending.insert(
            entity,
            PendingEnd {
                other: contact.other,
                end: now,
            },
        );
        match self.sweep.and_then(|handle| ctx.timers.deadline(handle)) {
            Some(deadline) => trace!(monitor = %self.monitor, channel = ?self.channel, deadline, "Sweep already scheduled"),
            None => self.schedule_sweep(now, ctx),
        }
    }

    /// Publish every pending end at least one window old; reschedule if any
    /// remain. Called when this aggregator's sweep fires.
    pub fn sweep(&mut self, now: f64, ctx: &mut MonitorCtx<'_>) {
        self.sweep = None;
        let window = self.window;
        let due: Vec<EntityHandle> = self
            .pending
            .iter()
            .filter(|(_, p)| now - p.end >= window)
            .map(|(entity, _)| *entity)
            .collect();
        let mut ends: Vec<PendingEnd> = due
            .into_iter()
            .filter_map(|entity| self.pending.remove(&entity))
            .collect();
        self.publish_in_order(&mut ends, ctx);

        if !self.pending.is_empty() {
            self.schedule_sweep(now, ctx);
        }
    }

    /// Publish every pending end regardless of age and cancel the sweep.
    pub fn flush(&mut self, ctx: &mut MonitorCtx<'_>) {
        self.cancel_sweep(ctx);
        let mut ends: Vec<PendingEnd> = std::mem::take(&mut self.pending).into_values().collect();
        self.publish_in_order(&mut ends, ctx);
    }

    /// Flush pending ends, then end every active contact at `now` and
    /// forget it.
    pub fn force_close_active(&mut self, now: f64, ctx: &mut MonitorCtx<'_>) {
        self.flush(ctx);
        for contact in std::mem::take(&mut self.active).into_values() {
            self.emit(OverlapPhase::End, contact.other, now, ctx);
        }
    }

    fn activate(&mut self, entity: EntityHandle, volume: VolumeHandle, other: &Arc<Individual>) {
        let mut volumes = BTreeSet::new();
        volumes.insert(volume);
        self.active.insert(
            entity,
            ActiveContact {
                other: Arc::clone(other),
                volumes,
            },
        );
    }

    fn publish_in_order(&self, ends: &mut [PendingEnd], ctx: &mut MonitorCtx<'_>) {
        ends.sort_by(|a, b| a.end.total_cmp(&b.end));
        for pending in ends.iter() {
            self.emit(OverlapPhase::End, Arc::clone(&pending.other), pending.end, ctx);
        }
    }

    fn schedule_sweep(&mut self, now: f64, ctx: &mut MonitorCtx<'_>) {
        let key = SweepKey {
            monitor: self.monitor,
            channel: self.channel,
        };
        self.sweep = Some(ctx.timers.schedule(key, now + self.sweep_delay));
    }

    fn cancel_sweep(&mut self, ctx: &mut MonitorCtx<'_>) {
        if let Some(handle) = self.sweep.take() {
            ctx.timers.cancel(handle);
        }
    }

    fn emit(&self, phase: OverlapPhase, other: Arc<Individual>, timestamp: f64, ctx: &mut MonitorCtx<'_>) {
        ctx.outbox.push(Notification::Overlap {
            source: self.monitor,
            channel: self.channel,
            phase,
            other,
            timestamp,
        });
    }
}
