//! Scenario files: the scene to annotate, the monitors to place, and the
//! overlap signals (and grasp pauses) to replay.
//!
//! ```yaml
//! duration: 6.0
//! entities:
//!   - { handle: 1, name: RightHand, shape: { skeletal_mesh: { mesh: SK_RightHand, bones: [thumb_03] } } }
//!   - { handle: 2, name: Cup, shape: { static_mesh: { mesh: SM_Cup } } }
//! monitors:
//!   - { volume: 10, owner: 1, role: { bone: A }, bone: thumb_03 }
//! signals:
//!   - { t: 0.5, volume: 10, other: 2, other_volume: 200, phase: Begin }
//! pauses:
//!   - { t: 2.0, owner: 1, paused: true }
//! ```
//!
//! When no file is given, [`synthetic`] builds a one-hand pick-and-place
//! scene with randomized contact flicker.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semlog_core::{EntityDescriptor, EntityShape, MonitorRole, OverlapMonitor};
use semlog_types::{EntityHandle, MonitorGroup, MonitorId, OverlapPhase, RawOverlapSignal, VolumeHandle};
use serde::Deserialize;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// A complete scenario.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    /// Session time at which playback stops and the session finishes.
    pub duration: f64,
    /// Scene entities to annotate.
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    /// Monitors to place.
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
    /// Overlap signals in time order.
    #[serde(default)]
    pub signals: Vec<SignalSpec>,
    /// Grasp pause toggles in time order.
    #[serde(default)]
    pub pauses: Vec<PauseSpec>,
}

/// One scene entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntitySpec {
    /// Host handle.
    pub handle: u64,
    /// Display name.
    pub name: String,
    /// Shape used for class derivation.
    pub shape: ShapeSpec,
    /// Fixed individual id.
    #[serde(default)]
    pub id: Option<String>,
    /// Fixed class.
    #[serde(default)]
    pub class: Option<String>,
}

/// Entity shape as written in scenario files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeSpec {
    /// Static mesh asset.
    StaticMesh {
        /// Asset path.
        mesh: String,
    },
    /// Skeletal mesh asset and the bones monitors may attach to.
    SkeletalMesh {
        /// Asset path.
        mesh: String,
        /// Bone names.
        #[serde(default)]
        bones: Vec<String>,
    },
    /// Constraint between two entities.
    Constraint {
        /// First entity handle.
        first: u64,
        /// Second entity handle.
        second: u64,
        /// All linear axes locked.
        linear_locked: bool,
        /// All angular axes locked.
        angular_locked: bool,
    },
    /// Virtual camera.
    Camera {
        /// Attach socket.
        #[serde(default)]
        socket: Option<String>,
        /// Parent entity handle.
        #[serde(default)]
        parent: Option<u64>,
    },
    /// Sky sphere.
    SkySphere,
    /// Atmospheric fog.
    AtmosphericFog,
}

/// Monitor role as written in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSpec {
    /// Finger bone of the given group.
    Bone(MonitorGroup),
    /// Reach area.
    Reach,
    /// Object surface.
    ObjectContact,
    /// Cutting edge of a blade.
    Blade,
}

/// One monitor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorSpec {
    /// Volume handle (the monitor id).
    pub volume: u64,
    /// Owner entity handle.
    pub owner: u64,
    /// Role.
    pub role: RoleSpec,
    /// Bone to attach to.
    #[serde(default)]
    pub bone: Option<String>,
    /// Entities never reported.
    #[serde(default)]
    pub ignore: Vec<u64>,
}

/// One raw overlap signal.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SignalSpec {
    /// Session time.
    pub t: f64,
    /// Monitor volume.
    pub volume: u64,
    /// Other entity.
    pub other: u64,
    /// Other volume.
    pub other_volume: u64,
    /// Begin or end.
    pub phase: OverlapPhase,
}

/// One grasp pause toggle.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PauseSpec {
    /// Session time.
    pub t: f64,
    /// Hand entity handle.
    pub owner: u64,
    /// Pause or resume.
    pub paused: bool,
}

impl Scenario {
    /// Load a scenario from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ScenarioIo`], [`EngineError::ScenarioYaml`]
    /// or [`EngineError::Scenario`].
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path).map_err(|source| EngineError::ScenarioIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse and check a scenario.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ScenarioYaml`] or [`EngineError::Scenario`].
    pub fn parse(yaml: &str) -> Result<Self, EngineError> {
        let mut scenario: Self = serde_yml::from_str(yaml)?;
        scenario.validate()?;
        scenario.signals.sort_by(|a, b| a.t.total_cmp(&b.t));
        scenario.pauses.sort_by(|a, b| a.t.total_cmp(&b.t));
        Ok(scenario)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(EngineError::Scenario {
                message: format!("duration must be positive, got {}", self.duration),
            });
        }
        let mut handles = BTreeSet::new();
        for entity in &self.entities {
            if !handles.insert(entity.handle) {
                return Err(EngineError::Scenario {
                    message: format!("entity handle {} used twice", entity.handle),
                });
            }
        }
        let volumes: BTreeSet<u64> = self.monitors.iter().map(|m| m.volume).collect();
        if volumes.len() != self.monitors.len() {
            return Err(EngineError::Scenario {
                message: "monitor volume used twice".to_owned(),
            });
        }
        let mut times = self.signals.iter().map(|s| s.t).chain(self.pauses.iter().map(|p| p.t));
        if let Some(bad) = times.find(|t| !t.is_finite() || *t < 0.0) {
            return Err(EngineError::Scenario {
                message: format!("{bad} is not a valid session time"),
            });
        }
        Ok(())
    }

    /// Entity descriptors for annotation.
    pub fn descriptors(&self) -> Vec<EntityDescriptor> {
        self.entities
            .iter()
            .map(|e| {
                let mut desc = EntityDescriptor::new(EntityHandle(e.handle), e.name.clone(), e.shape.to_shape());
                desc.id = e.id.clone().map(Into::into);
                desc.class.clone_from(&e.class);
                desc
            })
            .collect()
    }

    /// Bones each skeletal entity exposes.
    pub fn skeletons(&self) -> BTreeMap<EntityHandle, BTreeSet<String>> {
        self.entities
            .iter()
            .filter_map(|e| match &e.shape {
                ShapeSpec::SkeletalMesh { bones, .. } => {
                    Some((EntityHandle(e.handle), bones.iter().cloned().collect()))
                }
                _ => None,
            })
            .collect()
    }

    /// Monitors to hand to the logger.
    pub fn build_monitors(&self) -> Vec<OverlapMonitor> {
        self.monitors
            .iter()
            .map(|m| {
                let role = match m.role {
                    RoleSpec::Bone(group) => MonitorRole::ManipulatorBone { group },
                    RoleSpec::Reach => MonitorRole::Reach,
                    RoleSpec::ObjectContact => MonitorRole::ObjectContact,
                    RoleSpec::Blade => MonitorRole::Blade,
                };
                let mut monitor = OverlapMonitor::new(MonitorId(m.volume), EntityHandle(m.owner), role)
                    .with_ignore_list(m.ignore.iter().copied().map(EntityHandle));
                if let Some(bone) = &m.bone {
                    monitor = monitor.with_bone(bone.clone());
                }
                monitor
            })
            .collect()
    }
}

impl ShapeSpec {
    fn to_shape(&self) -> EntityShape {
        match self {
            Self::StaticMesh { mesh } => EntityShape::StaticMesh { mesh: mesh.clone() },
            Self::SkeletalMesh { mesh, .. } => EntityShape::SkeletalMesh { mesh: mesh.clone() },
            Self::Constraint {
                first,
                second,
                linear_locked,
                angular_locked,
            } => EntityShape::Constraint {
                first: EntityHandle(*first),
                second: EntityHandle(*second),
                linear_locked: *linear_locked,
                angular_locked: *angular_locked,
            },
            Self::Camera { socket, parent } => EntityShape::VirtualCamera {
                socket: socket.clone(),
                parent: parent.map(EntityHandle),
            },
            Self::SkySphere => EntityShape::SkySphere,
            Self::AtmosphericFog => EntityShape::AtmosphericFog,
        }
    }
}

impl SignalSpec {
    /// The raw signal this entry describes.
    pub const fn to_signal(&self) -> RawOverlapSignal {
        RawOverlapSignal {
            volume: VolumeHandle(self.volume),
            other: EntityHandle(self.other),
            other_volume: VolumeHandle(self.other_volume),
            phase: self.phase,
            timestamp: self.t,
        }
    }
}

// ---------------------------------------------------------------------------
// Synthetic scenario
// ---------------------------------------------------------------------------

const HAND: u64 = 1;
const CUP: u64 = 2;
const TABLE: u64 = 3;
const THUMB_VOL: u64 = 10;
const INDEX_VOL: u64 = 11;
const REACH_VOL: u64 = 20;
const CUP_SURFACE_VOL: u64 = 30;
const CUP_VOL: u64 = 200;
const TABLE_VOL: u64 = 300;

/// Longest flicker gap generated. Below the default concatenation window
/// so default settings merge every flicker.
const MAX_FLICKER_GAP: f64 = 0.08;

/// One hand reaching for a cup on a table, picking it up, carrying it and
/// putting it back down. Finger contacts flicker at random; `seed` makes
/// the flicker reproducible.
pub fn synthetic(seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut signals = Vec::new();

    // The cup rests on the table until lifted and after being put down.
    push_span(&mut signals, &mut rng, CUP_SURFACE_VOL, TABLE, TABLE_VOL, 0.0, 2.0, false);
    push_span(&mut signals, &mut rng, CUP_SURFACE_VOL, TABLE, TABLE_VOL, 3.6, 5.5, false);
    // The cup enters the reach area and stays in it while held.
    push_span(&mut signals, &mut rng, REACH_VOL, CUP, CUP_VOL, 0.6, 4.6, false);
    // Fingers close around the cup with contact jitter.
    push_span(&mut signals, &mut rng, INDEX_VOL, CUP, CUP_VOL, 1.2, 4.2, true);
    push_span(&mut signals, &mut rng, THUMB_VOL, CUP, CUP_VOL, 1.3, 4.1, true);

    signals.sort_by(|a: &SignalSpec, b: &SignalSpec| a.t.total_cmp(&b.t));

    let entity = |handle: u64, name: &str, shape: ShapeSpec| EntitySpec {
        handle,
        name: name.to_owned(),
        shape,
        id: None,
        class: None,
    };
    let bone = |volume: u64, group: MonitorGroup, bone: &str| MonitorSpec {
        volume,
        owner: HAND,
        role: RoleSpec::Bone(group),
        bone: Some(bone.to_owned()),
        ignore: Vec::new(),
    };

    Scenario {
        duration: 6.0,
        entities: vec![
            entity(
                HAND,
                "RightHand",
                ShapeSpec::SkeletalMesh {
                    mesh: "/Game/Hands/SK_RightHand.SK_RightHand".to_owned(),
                    bones: vec!["thumb_03".to_owned(), "index_03".to_owned()],
                },
            ),
            entity(
                CUP,
                "Cup",
                ShapeSpec::StaticMesh {
                    mesh: "/Game/Props/SM_Cup.SM_Cup".to_owned(),
                },
            ),
            entity(
                TABLE,
                "Table",
                ShapeSpec::StaticMesh {
                    mesh: "/Game/Props/SM_Table.SM_Table".to_owned(),
                },
            ),
        ],
        monitors: vec![
            bone(THUMB_VOL, MonitorGroup::A, "thumb_03"),
            bone(INDEX_VOL, MonitorGroup::B, "index_03"),
            MonitorSpec {
                volume: REACH_VOL,
                owner: HAND,
                role: RoleSpec::Reach,
                bone: None,
                ignore: Vec::new(),
            },
            MonitorSpec {
                volume: CUP_SURFACE_VOL,
                owner: CUP,
                role: RoleSpec::ObjectContact,
                bone: None,
                ignore: Vec::new(),
            },
        ],
        signals,
        pauses: Vec::new(),
    }
}

/// Push a begin at `start` and an end at `end`. With `jitter`, a few
/// short end/begin flickers are inserted in between; spans must be long
/// enough that a flicker fits in a fifth of one.
#[allow(clippy::too_many_arguments)]
fn push_span(
    signals: &mut Vec<SignalSpec>,
    rng: &mut StdRng,
    volume: u64,
    other: u64,
    other_volume: u64,
    start: f64,
    end: f64,
    jitter: bool,
) {
    let entry = |t: f64, phase: OverlapPhase| SignalSpec {
        t,
        volume,
        other,
        other_volume,
        phase,
    };
    signals.push(entry(start, OverlapPhase::Begin));
    if jitter {
        // One flicker per segment, so flickers never overlap.
        let flickers: u32 = rng.random_range(2..6);
        let segment = (end - start) / f64::from(flickers);
        for i in 0..flickers {
            let at = start + segment * (f64::from(i) + rng.random_range(0.2..0.7));
            let gap = rng.random_range(0.005..MAX_FLICKER_GAP);
            signals.push(entry(at, OverlapPhase::End));
            signals.push(entry(at + gap, OverlapPhase::Begin));
        }
    }
    signals.push(entry(end, OverlapPhase::End));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_scenario() {
        let yaml = r"
duration: 2.0
entities:
  - { handle: 1, name: RightHand, shape: { skeletal_mesh: { mesh: SK_RightHand, bones: [thumb_03] } } }
  - { handle: 2, name: Cup, shape: { static_mesh: { mesh: SM_Cup } }, id: cup-1 }
monitors:
  - { volume: 10, owner: 1, role: { bone: A }, bone: thumb_03, ignore: [5] }
  - { volume: 30, owner: 2, role: object_contact }
  - { volume: 40, owner: 2, role: blade }
signals:
  - { t: 1.0, volume: 10, other: 2, other_volume: 200, phase: End }
  - { t: 0.5, volume: 10, other: 2, other_volume: 200, phase: Begin }
pauses:
  - { t: 0.7, owner: 1, paused: true }
";
        let scenario = Scenario::parse(yaml).unwrap();
        assert_eq!(scenario.entities.len(), 2);
        // Signals are sorted by time.
        assert_eq!(scenario.signals.first().unwrap().phase, OverlapPhase::Begin);
        assert!((scenario.pauses.first().unwrap().t - 0.7).abs() < 1e-9);

        let descriptors = scenario.descriptors();
        assert_eq!(descriptors.get(1).unwrap().id.as_ref().unwrap().as_str(), "cup-1");

        let monitors = scenario.build_monitors();
        assert_eq!(monitors.len(), 3);
        assert_eq!(monitors.first().unwrap().bone(), Some("thumb_03"));
        assert_eq!(monitors.get(1).unwrap().role(), MonitorRole::ObjectContact);
        assert_eq!(monitors.get(2).unwrap().role(), MonitorRole::Blade);

        let skeletons = scenario.skeletons();
        assert!(skeletons.get(&EntityHandle(1)).unwrap().contains("thumb_03"));
    }

    #[test]
    fn duplicate_entities_are_rejected() {
        let yaml = r"
duration: 1.0
entities:
  - { handle: 1, name: A, shape: sky_sphere }
  - { handle: 1, name: B, shape: atmospheric_fog }
";
        assert!(matches!(Scenario::parse(yaml), Err(EngineError::Scenario { .. })));
    }

    #[test]
    fn non_positive_duration_is_rejected() {
        assert!(matches!(
            Scenario::parse("duration: 0.0\n"),
            Err(EngineError::Scenario { .. })
        ));
    }

    #[test]
    fn synthetic_scenario_is_reproducible_and_balanced() {
        let a = synthetic(7);
        let b = synthetic(7);
        assert_eq!(a, b);
        assert!(a.signals.windows(2).all(|w| match w {
            [x, y] => x.t <= y.t,
            _ => true,
        }));
        let begins = a.signals.iter().filter(|s| s.phase == OverlapPhase::Begin).count();
        let ends = a.signals.iter().filter(|s| s.phase == OverlapPhase::End).count();
        assert_eq!(begins, ends);
        assert!(a.signals.iter().all(|s| s.t < a.duration));
    }
}
