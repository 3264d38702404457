//! Semantic event detection for the SemLog logger.
//!
//! Raw overlap signals from a physics host are filtered by overlap
//! monitors, smoothed into stable begin/end notifications by per-channel
//! aggregators, and turned into closed-interval semantic events by event
//! handlers. The [`SymbolicLogger`] owns all of it for one session.
//!
//! ```text
//! physics host -> OverlapMonitor -> Aggregator -> EventHandler -> EventSink
//! ```
//!
//! Everything runs on the caller's thread. Deferred work (the sweep that
//! publishes delayed ends) sits in a [`TimerQueue`] and fires when the host
//! steps the logger past its deadline.
//!
//! # Modules
//!
//! - [`clock`] -- Session time and frame counter
//! - [`config`] -- YAML configuration
//! - [`handlers`] -- Contact, grasp, reach, pick-and-place and slicing handlers
//! - [`identity`] -- Entity to individual resolution and annotation
//! - [`logger`] -- The session orchestrator and event sinks
//! - [`monitor`] -- Overlap monitors and jitter aggregators
//! - [`timer`] -- Deadline queue

pub mod clock;
pub mod config;
pub mod handlers;
pub mod identity;
pub mod logger;
pub mod monitor;
pub mod timer;

pub use clock::{ClockError, SessionClock};
pub use config::{ConfigError, LoggerConfig};
pub use handlers::{EventHandler, HandlerError, HandlerOutput, OpenEvents};
pub use identity::{EntityDescriptor, EntityShape, IdentityError, IdentityResolver, IndividualRegistry};
pub use logger::{CollectingSink, EventSink, LoggerState, SinkError, SymbolicLogger};
pub use monitor::{
    Indicator, MonitorCtx, MonitorRole, MonitorState, Notification, OverlapContact, OverlapMonitor,
    PhysicsHost, SweepKey,
};
pub use timer::{TimerHandle, TimerQueue};
