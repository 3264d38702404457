//! Core data structures shared by the logger and its consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EventKind, IndividualKind, OverlapPhase};
use crate::ids::{EntityHandle, EpisodeId, EventId, IndividualId, TaskId, VolumeHandle};

// ---------------------------------------------------------------------------
// Individuals
// ---------------------------------------------------------------------------

/// The semantic identity of a spatial entity.
///
/// Created once per entity when the scene is annotated and immutable for
/// the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Individual {
    /// Stable unique id.
    pub id: IndividualId,
    /// Semantic class, e.g. `Cup` or `RevoluteJoint`.
    pub class: String,
    /// Type tag.
    pub kind: IndividualKind,
}

impl Individual {
    /// Convenience constructor.
    pub fn new(id: impl Into<IndividualId>, class: impl Into<String>, kind: IndividualKind) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            kind,
        }
    }
}

impl core::fmt::Display for Individual {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}({})", self.class, self.id)
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A raw overlap signal delivered by the physics layer.
///
/// Transient: consumed immediately by the monitor owning `volume`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RawOverlapSignal {
    /// The monitor's trigger volume that reported the overlap.
    pub volume: VolumeHandle,
    /// The entity owning the other volume.
    pub other: EntityHandle,
    /// The other volume itself.
    pub other_volume: VolumeHandle,
    /// Begin or end.
    pub phase: OverlapPhase,
    /// Session time in seconds.
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// Semantic events
// ---------------------------------------------------------------------------

/// A semantic event with a start and, once closed, an end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SemanticEvent {
    /// Unique event id.
    pub id: EventId,
    /// Event type.
    pub kind: EventKind,
    /// Session time the event started.
    pub start: f64,
    /// Session time the event ended; `None` while open.
    pub end: Option<f64>,
    /// Participating individuals, subject first.
    pub participants: Vec<Individual>,
    /// Set when the event was force-closed at session finish rather than by
    /// an observed end.
    pub truncated: bool,
}

impl SemanticEvent {
    /// Open a new event starting at `start`.
    pub fn open(kind: EventKind, start: f64, participants: Vec<Individual>) -> Self {
        Self {
            id: EventId::new(),
            kind,
            start,
            end: None,
            participants,
            truncated: false,
        }
    }

    /// Whether the event has an end time.
    pub const fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// Duration in seconds, if closed.
    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }

    /// Human readable one-line summary, used by logs and timelines.
    pub fn context(&self) -> String {
        let names: Vec<String> = self.participants.iter().map(ToString::to_string).collect();
        format!("{} [{}]", self.kind, names.join(" - "))
    }
}

/// Everything one logger session produced, handed to the sink at finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionRecord {
    /// Task the episode belongs to.
    pub task_id: TaskId,
    /// This episode.
    pub episode_id: EpisodeId,
    /// Wall-clock time the logger started.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock time the logger finished.
    pub finished_at: DateTime<Utc>,
    /// Session time at finish, in seconds.
    pub session_time: f64,
    /// Whether the session was force-finished.
    pub forced: bool,
    /// Finished events in publication order.
    pub events: Vec<SemanticEvent>,
}

impl SessionRecord {
    /// Number of events of the given kind.
    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}
