//! Overlap monitors and their per-channel jitter aggregators.
//!
//! A monitor owns one trigger volume. Raw overlap signals for that volume
//! are filtered by the monitor and handed to one aggregator per bound
//! channel; the aggregators smooth the flicker out and push
//! [`Notification`]s into the caller's outbox.
//!
//! # Modules
//!
//! - [`aggregator`] -- Active contacts, pending ends, delayed sweeps
//! - [`host`] -- Calls a monitor makes into the physics host
//! - [`overlap`] -- The monitor itself: lifecycle, filtering, pause

pub mod aggregator;
pub mod host;
pub mod overlap;

use std::sync::Arc;

use semlog_types::{Channel, Individual, MonitorId, OverlapPhase};

use crate::timer::TimerQueue;

pub use aggregator::Aggregator;
pub use host::{OverlapContact, PhysicsHost};
pub use overlap::{Indicator, MonitorRole, MonitorState, OverlapMonitor};

/// Resumption key of a pending-end sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SweepKey {
    /// Monitor owning the aggregator.
    pub monitor: MonitorId,
    /// Channel of the aggregator.
    pub channel: Channel,
}

/// A begin/end notification flowing from the aggregators (and from handlers
/// deriving higher-level signals) to the event handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Smoothed overlap of a monitor with another individual.
    Overlap {
        /// Monitor that observed the overlap.
        source: MonitorId,
        /// Channel the aggregator serves.
        channel: Channel,
        /// Begin or end.
        phase: OverlapPhase,
        /// The individual overlapped.
        other: Arc<Individual>,
        /// Session time. For delayed ends, the time the overlap actually ended.
        timestamp: f64,
    },
    /// A smoothed overlap stopped and its End is waiting out the
    /// concatenation window. Either a `Resumed` or the delayed `End` follows.
    Suspended {
        /// Monitor that observed the overlap.
        source: MonitorId,
        /// Channel the aggregator serves.
        channel: Channel,
        /// The individual no longer overlapped.
        other: Arc<Individual>,
        /// Session time the overlap stopped.
        timestamp: f64,
    },
    /// A suspended overlap began again within the window; no End follows.
    Resumed {
        /// Monitor that observed the overlap.
        source: MonitorId,
        /// Channel the aggregator serves.
        channel: Channel,
        /// The individual overlapped again.
        other: Arc<Individual>,
        /// Session time the overlap resumed.
        timestamp: f64,
    },
    /// A hand started or stopped grasping an object.
    Grasp {
        /// The grasping hand.
        hand: Arc<Individual>,
        /// The grasped object.
        object: Arc<Individual>,
        /// Begin or end.
        phase: OverlapPhase,
        /// Session time.
        timestamp: f64,
    },
}

impl Notification {
    /// Session time carried by the notification.
    pub const fn timestamp(&self) -> f64 {
        match self {
            Self::Overlap { timestamp, .. }
            | Self::Suspended { timestamp, .. }
            | Self::Resumed { timestamp, .. }
            | Self::Grasp { timestamp, .. } => *timestamp,
        }
    }
}

/// Shared state a monitor operation may touch: the sweep queue and the
/// outbox notifications are appended to.
#[derive(Debug)]
pub struct MonitorCtx<'a> {
    /// Deadline queue for delayed sweeps.
    pub timers: &'a mut TimerQueue<SweepKey>,
    /// Notifications produced by this operation, in emission order.
    pub outbox: &'a mut Vec<Notification>,
}

impl<'a> MonitorCtx<'a> {
    /// Bundle a timer queue and an outbox.
    pub const fn new(timers: &'a mut TimerQueue<SweepKey>, outbox: &'a mut Vec<Notification>) -> Self {
        Self { timers, outbox }
    }
}
