//! What the monitors need from the physics host.

use semlog_types::{EntityHandle, VolumeHandle};

/// One volume currently overlapping a monitor's trigger volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverlapContact {
    /// Entity owning the overlapping volume.
    pub entity: EntityHandle,
    /// The overlapping volume.
    pub volume: VolumeHandle,
}

/// Physics-side operations on a monitor's trigger volume.
///
/// The host still delivers overlap signals by calling into the logger; this
/// trait covers the calls going the other way.
pub trait PhysicsHost {
    /// Attach `volume` to bone `bone` of `owner`'s skeleton. Returns `false`
    /// if the bone does not exist.
    fn attach_to_bone(&mut self, volume: VolumeHandle, owner: EntityHandle, bone: &str) -> bool;

    /// Enable or disable overlap signal generation for `volume`.
    fn set_overlap_events(&mut self, volume: VolumeHandle, enabled: bool);

    /// Volumes overlapping `volume` right now.
    fn current_overlaps(&self, volume: VolumeHandle) -> Vec<OverlapContact>;
}
