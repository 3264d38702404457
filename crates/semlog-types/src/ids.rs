//! Type-safe identifier wrappers.
//!
//! Two families of identifiers exist in the logger:
//!
//! - **Host handles** ([`EntityHandle`], [`VolumeHandle`], [`MonitorId`]) are
//!   opaque `u64` values handed out by the simulation host. The core never
//!   interprets them; it only compares and hashes them.
//! - **Record identifiers** ([`EventId`], [`TaskId`], [`EpisodeId`]) are
//!   UUID v7 (time-ordered) values minted by the logger itself so that
//!   published events sort by creation time.
//!
//! [`IndividualId`] is the stable semantic id of an individual. It is a
//! string because it may be imported from existing annotations.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Generates a newtype wrapper around an opaque `u64` host handle.
macro_rules! define_handle {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub u64);

        impl $name {
            /// Return the raw host value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

define_handle! {
    /// Host handle of an in-world entity (an actor in the host's terms).
    EntityHandle, "entity"
}

define_handle! {
    /// Host handle of a spatial volume (a collision shape or trigger).
    VolumeHandle, "volume"
}

define_handle! {
    /// Identifier of an overlap monitor. A monitor is identified by the
    /// handle of its own trigger volume.
    MonitorId, "monitor"
}

impl MonitorId {
    /// The trigger volume this monitor listens on.
    pub const fn volume(self) -> VolumeHandle {
        VolumeHandle(self.0)
    }
}

impl From<VolumeHandle> for MonitorId {
    fn from(volume: VolumeHandle) -> Self {
        Self(volume.0)
    }
}

define_id! {
    /// Unique identifier for a published semantic event.
    EventId
}

define_id! {
    /// Identifier of a logging task (groups several episodes).
    TaskId
}

define_id! {
    /// Identifier of a single logged episode (one logger session).
    EpisodeId
}

/// Stable semantic id of an individual.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IndividualId(pub String);

impl IndividualId {
    /// Mint a fresh id (UUID v7, simple hex form).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IndividualId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndividualId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for IndividualId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_distinct() {
        let first = EventId::new();
        let second = EventId::new();
        assert_ne!(first.into_inner(), Uuid::nil());
        assert_ne!(first, second);
    }

    #[test]
    fn monitor_id_maps_to_its_volume() {
        let monitor = MonitorId::from(VolumeHandle(42));
        assert_eq!(monitor.volume(), VolumeHandle(42));
        assert_eq!(monitor.to_string(), "monitor#42");
    }

    #[test]
    fn generated_individual_ids_are_unique_hex() {
        let a = IndividualId::generate();
        let b = IndividualId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
