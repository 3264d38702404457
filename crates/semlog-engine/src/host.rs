//! Scripted physics host used by the engine binary.
//!
//! Tracks which volumes overlap which from the replayed signals, so grasp
//! resume can query current overlaps, and gates delivery on whether a
//! monitor has overlap events enabled.

use std::collections::{BTreeMap, BTreeSet};

use semlog_core::{OverlapContact, PhysicsHost};
use semlog_types::{EntityHandle, OverlapPhase, RawOverlapSignal, VolumeHandle};
use tracing::{debug, trace};

/// Physics host driven by a scenario's signal list.
#[derive(Debug, Default)]
pub struct ScriptedHost {
    skeletons: BTreeMap<EntityHandle, BTreeSet<String>>,
    attached: BTreeMap<VolumeHandle, (EntityHandle, String)>,
    enabled: BTreeSet<VolumeHandle>,
    overlaps: BTreeMap<VolumeHandle, BTreeSet<OverlapContact>>,
}

impl ScriptedHost {
    /// Host whose skeletal entities expose the given bones.
    pub const fn new(skeletons: BTreeMap<EntityHandle, BTreeSet<String>>) -> Self {
        Self {
            skeletons,
            attached: BTreeMap::new(),
            enabled: BTreeSet::new(),
            overlaps: BTreeMap::new(),
        }
    }

    /// Apply one frame's signals to the overlap state and return the ones
    /// the host would actually report (volume has overlap events enabled).
    pub fn observe(&mut self, signals: &[RawOverlapSignal]) -> Vec<RawOverlapSignal> {
        let mut delivered = Vec::with_capacity(signals.len());
        for signal in signals {
            let contact = OverlapContact {
                entity: signal.other,
                volume: signal.other_volume,
            };
            match signal.phase {
                OverlapPhase::Begin => {
                    self.overlaps.entry(signal.volume).or_default().insert(contact);
                }
                OverlapPhase::End => {
                    if let Some(set) = self.overlaps.get_mut(&signal.volume) {
                        set.remove(&contact);
                    }
                }
            }
            if self.enabled.contains(&signal.volume) {
                delivered.push(*signal);
            } else {
                trace!(volume = %signal.volume, "Signal dropped, overlap events disabled");
            }
        }
        delivered
    }

    /// Bone `volume` is attached to, if any.
    pub fn attachment(&self, volume: VolumeHandle) -> Option<(EntityHandle, &str)> {
        self.attached.get(&volume).map(|(owner, bone)| (*owner, bone.as_str()))
    }
}

impl PhysicsHost for ScriptedHost {
    fn attach_to_bone(&mut self, volume: VolumeHandle, owner: EntityHandle, bone: &str) -> bool {
        let known = self.skeletons.get(&owner).is_some_and(|bones| bones.contains(bone));
        if known {
            self.attached.insert(volume, (owner, bone.to_owned()));
            debug!(volume = %volume, owner = %owner, bone, "Volume attached to bone");
        }
        known
    }

    fn set_overlap_events(&mut self, volume: VolumeHandle, enabled: bool) {
        if enabled {
            self.enabled.insert(volume);
        } else {
            self.enabled.remove(&volume);
        }
    }

    fn current_overlaps(&self, volume: VolumeHandle) -> Vec<OverlapContact> {
        self.overlaps
            .get(&volume)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
