//! Enumeration types for the semantic logger.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Individuals
// ---------------------------------------------------------------------------

/// The semantic kind of an individual.
///
/// Replaces per-type subclassing: code that needs to behave differently per
/// individual type matches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum IndividualKind {
    /// A rigid (static-mesh) object; the only kind monitors react to.
    Rigid,
    /// A skeletal mesh, e.g. a hand or a robot.
    Skeletal,
    /// A single bone of a skeletal mesh.
    Bone,
    /// A physics constraint (joint) between two other individuals.
    Constraint,
    /// A virtual camera view.
    VirtualView,
    /// Sky sphere or atmospheric fog.
    Sky,
}

impl IndividualKind {
    /// Whether overlap monitors track contacts with individuals of this kind.
    pub const fn is_trackable(self) -> bool {
        matches!(self, Self::Rigid)
    }
}

/// Free axes of a physics constraint, used to derive a joint class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum JointMotion {
    /// At least one linear axis is free.
    Linear,
    /// All linear axes are locked, at least one angular axis is free.
    Revolute,
    /// Every axis is locked.
    Fixed,
}

impl JointMotion {
    /// Classify a constraint from its locked axes.
    pub const fn from_locks(linear_locked: bool, angular_locked: bool) -> Self {
        if !linear_locked {
            Self::Linear
        } else if !angular_locked {
            Self::Revolute
        } else {
            Self::Fixed
        }
    }

    /// Semantic class name of a joint with this motion.
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Linear => "LinearJoint",
            Self::Revolute => "RevoluteJoint",
            Self::Fixed => "FixedJoint",
        }
    }
}

// ---------------------------------------------------------------------------
// Overlaps and monitors
// ---------------------------------------------------------------------------

/// Whether an overlap (or a notification derived from one) begins or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum OverlapPhase {
    /// Two volumes started overlapping.
    Begin,
    /// Two volumes stopped overlapping.
    End,
}

/// Notification channel of a monitor.
///
/// A bone volume can be tracked for grasping and for generic contacts at the
/// same time, with different subscribers on each channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Channel {
    /// Grasp-relevant overlaps (pausable).
    Grasp,
    /// Generic contact overlaps.
    Contact,
}

/// Finger group of a manipulator bone. A grasp needs contacts from both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum MonitorGroup {
    /// Typically the thumb side.
    A,
    /// Typically the opposing fingers.
    B,
}

// ---------------------------------------------------------------------------
// Semantic events
// ---------------------------------------------------------------------------

/// The type of a published semantic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum EventKind {
    /// Two individuals are touching.
    Contact,
    /// A manipulator holds an object between both finger groups.
    Grasp,
    /// A manipulator approaches an object it will grasp.
    Reach,
    /// A grasped object is being lifted off its support.
    PickUp,
    /// A grasped object is carried without any support.
    Transport,
    /// A grasped object rests on a support again until released.
    PutDown,
    /// A blade cuts into an object.
    Slicing,
}

impl EventKind {
    /// Label used in timelines and logs.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Contact => "Contact",
            Self::Grasp => "Grasp",
            Self::Reach => "Reach",
            Self::PickUp => "PickUp",
            Self::Transport => "Transport",
            Self::PutDown => "PutDown",
            Self::Slicing => "Slicing",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rigid_individuals_are_trackable() {
        assert!(IndividualKind::Rigid.is_trackable());
        assert!(!IndividualKind::Bone.is_trackable());
        assert!(!IndividualKind::Sky.is_trackable());
    }

    #[test]
    fn joint_motion_prefers_linear_over_angular() {
        assert_eq!(JointMotion::from_locks(false, false), JointMotion::Linear);
        assert_eq!(JointMotion::from_locks(true, false), JointMotion::Revolute);
        assert_eq!(JointMotion::from_locks(true, true), JointMotion::Fixed);
        assert_eq!(JointMotion::Revolute.class_name(), "RevoluteJoint");
    }
}
