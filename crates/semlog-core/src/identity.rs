//! Identity resolution: spatial entity -> semantic individual.
//!
//! The [`IndividualRegistry`] is the world-scoped table of individuals. It
//! is written once when the scene is annotated (and when entities are
//! destroyed) and read many times per frame by the overlap monitors through
//! the [`IdentityResolver`] trait.
//!
//! # Annotation
//!
//! The host describes each entity with an [`EntityDescriptor`]. The
//! registry derives the semantic class from the entity's shape:
//!
//! | Shape | Kind | Class |
//! |-------|------|-------|
//! | static mesh `/Game/SM_Cup.SM_Cup` | `Rigid` | `Cup` |
//! | skeletal mesh `SK_Hand` | `Skeletal` | `Hand` |
//! | bone `index_03` | `Bone` | `index_03` |
//! | constraint, a linear axis free | `Constraint` | `LinearJoint` |
//! | virtual camera on socket `Head` | `VirtualView` | `HeadView` |
//! | sky sphere / fog | `Sky` | `SkySphere` / `AtmosphericFog` |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use semlog_types::{EntityHandle, Individual, IndividualId, IndividualKind, JointMotion};
use tracing::{debug, error, warn};

/// Errors raised while annotating entities.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The entity already has an individual.
    #[error("{0} is already annotated")]
    AlreadyAnnotated(EntityHandle),

    /// Another entity already uses this individual id.
    #[error("individual id {id} is already used by {owner}")]
    DuplicateId {
        /// The clashing id.
        id: IndividualId,
        /// The entity that holds it.
        owner: EntityHandle,
    },

    /// No semantic class could be derived.
    #[error("could not derive a semantic class for {entity} ({name})")]
    NoClass {
        /// The entity.
        entity: EntityHandle,
        /// Its host-side name.
        name: String,
    },

    /// The entity type cannot carry an individual.
    #[error("unsupported entity type for {entity} ({name})")]
    Unsupported {
        /// The entity.
        entity: EntityHandle,
        /// Its host-side name.
        name: String,
    },

    /// A constraint references an entity without an individual.
    #[error("constraint {constraint} references {target}, which is not annotated")]
    ConstraintTargetMissing {
        /// The constraint entity.
        constraint: EntityHandle,
        /// The unannotated constrained entity.
        target: EntityHandle,
    },
}

/// Read-only lookup used at signal-processing time.
pub trait IdentityResolver {
    /// The individual of `entity`, or `None` if it has none (never
    /// annotated, or destroyed since).
    fn resolve(&self, entity: EntityHandle) -> Option<Arc<Individual>>;
}

/// Host-side shape of an entity, enough to derive its semantic class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityShape {
    /// Static mesh actor; `mesh` is the asset path.
    StaticMesh {
        /// Asset path, e.g. `/Game/Props/SM_Cup.SM_Cup`.
        mesh: String,
    },
    /// Skeletal mesh actor.
    SkeletalMesh {
        /// Asset path, e.g. `/Game/Hands/SK_LeftHand.SK_LeftHand`.
        mesh: String,
    },
    /// A single bone of a skeletal mesh.
    Bone {
        /// The skeletal mesh entity.
        skeleton: EntityHandle,
        /// Bone name.
        bone: String,
    },
    /// Physics constraint between two entities.
    Constraint {
        /// First constrained entity.
        first: EntityHandle,
        /// Second constrained entity.
        second: EntityHandle,
        /// Whether all linear axes are locked.
        linear_locked: bool,
        /// Whether all angular axes are locked.
        angular_locked: bool,
    },
    /// Virtual camera.
    VirtualCamera {
        /// Socket the camera is attached to, if any.
        socket: Option<String>,
        /// Entity the camera is attached to, if any.
        parent: Option<EntityHandle>,
    },
    /// Atmospheric fog.
    AtmosphericFog,
    /// Sky sphere.
    SkySphere,
    /// Anything else.
    Other,
}

/// Description of a host entity to annotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Host handle.
    pub handle: EntityHandle,
    /// Host-side name / label.
    pub name: String,
    /// Shape, used for class derivation.
    pub shape: EntityShape,
    /// Existing id to reuse instead of minting one.
    pub id: Option<IndividualId>,
    /// Explicit class overriding derivation.
    pub class: Option<String>,
}

impl EntityDescriptor {
    /// Descriptor with a derived class and a fresh id.
    pub fn new(handle: EntityHandle, name: impl Into<String>, shape: EntityShape) -> Self {
        Self {
            handle,
            name: name.into(),
            shape,
            id: None,
            class: None,
        }
    }

    /// Reuse an existing id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<IndividualId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Force a class.
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    const fn is_constraint(&self) -> bool {
        matches!(self.shape, EntityShape::Constraint { .. })
    }
}

/// World-scoped table of individuals.
#[derive(Debug, Default)]
pub struct IndividualRegistry {
    by_entity: HashMap<EntityHandle, Arc<Individual>>,
    by_id: BTreeMap<IndividualId, EntityHandle>,
}

impl IndividualRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the individual for one entity.
    ///
    /// # Errors
    ///
    /// See [`IdentityError`]; the registry is unchanged on error.
    pub fn annotate(&mut self, desc: EntityDescriptor) -> Result<IndividualId, IdentityError> {
        if self.by_entity.contains_key(&desc.handle) {
            return Err(IdentityError::AlreadyAnnotated(desc.handle));
        }

        let kind = kind_of(&desc)?;
        let class = match desc.class.clone() {
            Some(class) => class,
            None => self.derive_class(&desc)?,
        };
        if class.is_empty() {
            return Err(IdentityError::NoClass {
                entity: desc.handle,
                name: desc.name,
            });
        }

        let id = desc.id.unwrap_or_else(IndividualId::generate);
        if let Some(owner) = self.by_id.get(&id) {
            return Err(IdentityError::DuplicateId { id, owner: *owner });
        }

        debug!(entity = %desc.handle, id = %id, class = %class, kind = ?kind, "Individual annotated");
        self.by_id.insert(id.clone(), desc.handle);
        self.by_entity.insert(
            desc.handle,
            Arc::new(Individual {
                id: id.clone(),
                class,
                kind,
            }),
        );
        Ok(id)
    }

    /// Annotate a whole scene. Constraints are annotated after everything
    /// else so that their targets exist. Failures are logged and skipped.
    ///
    /// Returns the number of individuals created.
    pub fn annotate_all(&mut self, descriptors: impl IntoIterator<Item = EntityDescriptor>) -> usize {
        let (constraints, others): (Vec<_>, Vec<_>) = descriptors
            .into_iter()
            .partition(EntityDescriptor::is_constraint);

        let mut created: usize = 0;
        for desc in others.into_iter().chain(constraints) {
            let entity = desc.handle;
            match self.annotate(desc) {
                Ok(_) => created = created.saturating_add(1),
                Err(e) => error!(entity = %entity, error = %e, "Could not annotate entity"),
            }
        }
        created
    }

    /// Insert a prebuilt individual (imported annotations).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AlreadyAnnotated`] or
    /// [`IdentityError::DuplicateId`].
    pub fn insert(&mut self, entity: EntityHandle, individual: Individual) -> Result<(), IdentityError> {
        if self.by_entity.contains_key(&entity) {
            return Err(IdentityError::AlreadyAnnotated(entity));
        }
        if let Some(owner) = self.by_id.get(&individual.id) {
            return Err(IdentityError::DuplicateId {
                id: individual.id,
                owner: *owner,
            });
        }
        self.by_id.insert(individual.id.clone(), entity);
        self.by_entity.insert(entity, Arc::new(individual));
        Ok(())
    }

    /// Forget the individual of a destroyed entity. Subsequent lookups
    /// return `None`; events already holding the individual keep their copy.
    pub fn invalidate(&mut self, entity: EntityHandle) -> Option<Arc<Individual>> {
        let removed = self.by_entity.remove(&entity)?;
        self.by_id.remove(&removed.id);
        debug!(entity = %entity, id = %removed.id, "Individual invalidated");
        Some(removed)
    }

    /// Entity holding the given individual id.
    pub fn entity_of(&self, id: &IndividualId) -> Option<EntityHandle> {
        self.by_id.get(id).copied()
    }

    /// Individual with the given id.
    pub fn get_by_id(&self, id: &IndividualId) -> Option<Arc<Individual>> {
        self.by_id
            .get(id)
            .and_then(|entity| self.by_entity.get(entity))
            .cloned()
    }

    /// Number of live individuals.
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    fn derive_class(&self, desc: &EntityDescriptor) -> Result<String, IdentityError> {
        let class = match &desc.shape {
            EntityShape::StaticMesh { mesh } => {
                let name = asset_name(mesh);
                name.strip_prefix("SM_").map_or_else(
                    || {
                        warn!(entity = %desc.handle, mesh = %mesh, "Static mesh has no SM_ prefix");
                        name.to_owned()
                    },
                    ToOwned::to_owned,
                )
            }
            EntityShape::SkeletalMesh { mesh } => {
                let name = asset_name(mesh);
                name.strip_prefix("SK_").unwrap_or(name).to_owned()
            }
            EntityShape::Bone { bone, .. } => bone.clone(),
            EntityShape::Constraint {
                first,
                second,
                linear_locked,
                angular_locked,
            } => {
                for target in [*first, *second] {
                    if !self.by_entity.contains_key(&target) {
                        return Err(IdentityError::ConstraintTargetMissing {
                            constraint: desc.handle,
                            target,
                        });
                    }
                }
                JointMotion::from_locks(*linear_locked, *angular_locked)
                    .class_name()
                    .to_owned()
            }
            EntityShape::VirtualCamera { socket, parent } => self.view_class(desc.handle, socket.as_deref(), *parent),
            EntityShape::AtmosphericFog => "AtmosphericFog".to_owned(),
            EntityShape::SkySphere => "SkySphere".to_owned(),
            EntityShape::Other => {
                return Err(IdentityError::Unsupported {
                    entity: desc.handle,
                    name: desc.name.clone(),
                });
            }
        };
        Ok(class)
    }

    /// `<socket>View`, else `<parent class>View`, else `View`.
    fn view_class(&self, entity: EntityHandle, socket: Option<&str>, parent: Option<EntityHandle>) -> String {
        const SUFFIX: &str = "View";
        if let Some(socket) = socket.filter(|s| !s.is_empty()) {
            return format!("{socket}{SUFFIX}");
        }
        match parent {
            Some(parent) => {
                if let Some(ind) = self.by_entity.get(&parent) {
                    format!("{}{SUFFIX}", ind.class)
                } else {
                    warn!(entity = %entity, parent = %parent, "Camera parent has no semantic class (yet?)");
                    SUFFIX.to_owned()
                }
            }
            None => {
                warn!(entity = %entity, "Camera is not attached to any entity");
                SUFFIX.to_owned()
            }
        }
    }
}

impl IdentityResolver for IndividualRegistry {
    fn resolve(&self, entity: EntityHandle) -> Option<Arc<Individual>> {
        self.by_entity.get(&entity).cloned()
    }
}

fn kind_of(desc: &EntityDescriptor) -> Result<IndividualKind, IdentityError> {
    Ok(match desc.shape {
        EntityShape::StaticMesh { .. } => IndividualKind::Rigid,
        EntityShape::SkeletalMesh { .. } => IndividualKind::Skeletal,
        EntityShape::Bone { .. } => IndividualKind::Bone,
        EntityShape::Constraint { .. } => IndividualKind::Constraint,
        EntityShape::VirtualCamera { .. } => IndividualKind::VirtualView,
        EntityShape::AtmosphericFog | EntityShape::SkySphere => IndividualKind::Sky,
        EntityShape::Other => {
            return Err(IdentityError::Unsupported {
                entity: desc.handle,
                name: desc.name.clone(),
            });
        }
    })
}

/// Asset name from an asset path: the part after the last `.` (or `/`).
fn asset_name(path: &str) -> &str {
    let tail = path.rsplit('/').next().unwrap_or(path);
    tail.rsplit('.').next().unwrap_or(tail)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mesh(handle: u64, path: &str) -> EntityDescriptor {
        EntityDescriptor::new(
            EntityHandle(handle),
            format!("Actor{handle}"),
            EntityShape::StaticMesh {
                mesh: path.to_owned(),
            },
        )
    }

    #[test]
    fn static_mesh_class_strips_prefix_and_path() {
        let mut reg = IndividualRegistry::new();
        reg.annotate(mesh(1, "/Game/Props/SM_Cup.SM_Cup")).unwrap();
        let cup = reg.resolve(EntityHandle(1)).unwrap();
        assert_eq!(cup.class, "Cup");
        assert_eq!(cup.kind, IndividualKind::Rigid);
    }

    #[test]
    fn static_mesh_without_prefix_keeps_name() {
        let mut reg = IndividualRegistry::new();
        reg.annotate(mesh(1, "/Game/Props/Bowl.Bowl")).unwrap();
        assert_eq!(reg.resolve(EntityHandle(1)).unwrap().class, "Bowl");
    }

    #[test]
    fn skeletal_mesh_class_strips_sk_prefix() {
        let mut reg = IndividualRegistry::new();
        let desc = EntityDescriptor::new(
            EntityHandle(7),
            "LeftHand",
            EntityShape::SkeletalMesh {
                mesh: "/Game/Hands/SK_LeftHand.SK_LeftHand".to_owned(),
            },
        );
        reg.annotate(desc).unwrap();
        let hand = reg.resolve(EntityHandle(7)).unwrap();
        assert_eq!(hand.class, "LeftHand");
        assert_eq!(hand.kind, IndividualKind::Skeletal);
    }

    #[test]
    fn constraint_class_depends_on_locked_axes() {
        let mut reg = IndividualRegistry::new();
        reg.annotate(mesh(1, "SM_Door")).unwrap();
        reg.annotate(mesh(2, "SM_Frame")).unwrap();
        let joint = EntityDescriptor::new(
            EntityHandle(3),
            "Hinge",
            EntityShape::Constraint {
                first: EntityHandle(1),
                second: EntityHandle(2),
                linear_locked: true,
                angular_locked: false,
            },
        );
        reg.annotate(joint).unwrap();
        let hinge = reg.resolve(EntityHandle(3)).unwrap();
        assert_eq!(hinge.class, "RevoluteJoint");
        assert_eq!(hinge.kind, IndividualKind::Constraint);
    }

    #[test]
    fn constraint_requires_annotated_targets() {
        let mut reg = IndividualRegistry::new();
        let joint = EntityDescriptor::new(
            EntityHandle(3),
            "Hinge",
            EntityShape::Constraint {
                first: EntityHandle(1),
                second: EntityHandle(2),
                linear_locked: true,
                angular_locked: true,
            },
        );
        assert!(matches!(
            reg.annotate(joint),
            Err(IdentityError::ConstraintTargetMissing { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn annotate_all_orders_constraints_last() {
        let mut reg = IndividualRegistry::new();
        let joint = EntityDescriptor::new(
            EntityHandle(3),
            "Slider",
            EntityShape::Constraint {
                first: EntityHandle(1),
                second: EntityHandle(2),
                linear_locked: false,
                angular_locked: true,
            },
        );
        let created = reg.annotate_all(vec![joint, mesh(1, "SM_Drawer"), mesh(2, "SM_Cabinet")]);
        assert_eq!(created, 3);
        assert_eq!(reg.resolve(EntityHandle(3)).unwrap().class, "LinearJoint");
    }

    #[test]
    fn camera_class_prefers_socket_then_parent() {
        let mut reg = IndividualRegistry::new();
        reg.annotate(mesh(1, "SM_Robot")).unwrap();
        let on_socket = EntityDescriptor::new(
            EntityHandle(2),
            "Cam1",
            EntityShape::VirtualCamera {
                socket: Some("Head".to_owned()),
                parent: Some(EntityHandle(1)),
            },
        );
        let on_parent = EntityDescriptor::new(
            EntityHandle(3),
            "Cam2",
            EntityShape::VirtualCamera {
                socket: None,
                parent: Some(EntityHandle(1)),
            },
        );
        let loose = EntityDescriptor::new(
            EntityHandle(4),
            "Cam3",
            EntityShape::VirtualCamera {
                socket: None,
                parent: None,
            },
        );
        reg.annotate(on_socket).unwrap();
        reg.annotate(on_parent).unwrap();
        reg.annotate(loose).unwrap();
        assert_eq!(reg.resolve(EntityHandle(2)).unwrap().class, "HeadView");
        assert_eq!(reg.resolve(EntityHandle(3)).unwrap().class, "RobotView");
        assert_eq!(reg.resolve(EntityHandle(4)).unwrap().class, "View");
    }

    #[test]
    fn unsupported_entities_are_rejected() {
        let mut reg = IndividualRegistry::new();
        let desc = EntityDescriptor::new(EntityHandle(9), "Light", EntityShape::Other);
        assert!(matches!(
            reg.annotate(desc),
            Err(IdentityError::Unsupported { .. })
        ));
    }

    #[test]
    fn explicit_id_and_class_are_kept() {
        let mut reg = IndividualRegistry::new();
        let desc = mesh(1, "SM_Cup").with_id("abc").with_class("Mug");
        let id = reg.annotate(desc).unwrap();
        assert_eq!(id, IndividualId::from("abc"));
        assert_eq!(reg.resolve(EntityHandle(1)).unwrap().class, "Mug");
        assert_eq!(reg.entity_of(&id), Some(EntityHandle(1)));
        assert_eq!(reg.get_by_id(&id).unwrap().class, "Mug");
    }

    #[test]
    fn duplicate_ids_and_entities_are_rejected() {
        let mut reg = IndividualRegistry::new();
        reg.annotate(mesh(1, "SM_Cup").with_id("x")).unwrap();
        assert!(matches!(
            reg.annotate(mesh(2, "SM_Plate").with_id("x")),
            Err(IdentityError::DuplicateId { .. })
        ));
        assert!(matches!(
            reg.annotate(mesh(1, "SM_Plate")),
            Err(IdentityError::AlreadyAnnotated(_))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn invalidated_entities_no_longer_resolve() {
        let mut reg = IndividualRegistry::new();
        reg.annotate(mesh(1, "SM_Cup").with_id("cup")).unwrap();
        let held = reg.resolve(EntityHandle(1)).unwrap();
        assert!(reg.invalidate(EntityHandle(1)).is_some());
        assert!(reg.resolve(EntityHandle(1)).is_none());
        assert!(reg.entity_of(&IndividualId::from("cup")).is_none());
        // A copy held elsewhere stays valid.
        assert_eq!(held.class, "Cup");
        assert!(reg.invalidate(EntityHandle(1)).is_none());
    }
}
