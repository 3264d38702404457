//! Shared type definitions for the SemLog semantic event logger.
//!
//! This crate is the single source of truth for the data model shared by
//! the event engine and whatever consumes its output. Types flow downstream
//! to `TypeScript` via `ts-rs` for timeline viewers.
//!
//! # Modules
//!
//! - [`ids`] -- Host handles and UUID-backed record identifiers
//! - [`enums`] -- Individual kinds, overlap phases, channels, event kinds
//! - [`structs`] -- Individuals, raw overlap signals, semantic events,
//!   session records

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Channel, EventKind, IndividualKind, JointMotion, MonitorGroup, OverlapPhase};
pub use ids::{EntityHandle, EpisodeId, EventId, IndividualId, MonitorId, TaskId, VolumeHandle};
pub use structs::{Individual, RawOverlapSignal, SemanticEvent, SessionRecord};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs generates TypeScript bindings when types with
        // #[ts(export)] are used. The files are written to the `bindings/`
        // directory relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::EntityHandle::export_all();
        let _ = crate::ids::VolumeHandle::export_all();
        let _ = crate::ids::MonitorId::export_all();
        let _ = crate::ids::EventId::export_all();
        let _ = crate::ids::TaskId::export_all();
        let _ = crate::ids::EpisodeId::export_all();
        let _ = crate::ids::IndividualId::export_all();

        // Enums
        let _ = crate::enums::IndividualKind::export_all();
        let _ = crate::enums::JointMotion::export_all();
        let _ = crate::enums::OverlapPhase::export_all();
        let _ = crate::enums::Channel::export_all();
        let _ = crate::enums::MonitorGroup::export_all();
        let _ = crate::enums::EventKind::export_all();

        // Structs
        let _ = crate::structs::Individual::export_all();
        let _ = crate::structs::RawOverlapSignal::export_all();
        let _ = crate::structs::SemanticEvent::export_all();
        let _ = crate::structs::SessionRecord::export_all();
    }
}
