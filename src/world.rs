// Copyright (c) 2024-present Tidal Physics contributors.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Physics world: a single per-world context object owning the wrapped engine
//! state, the resource pools, the gravity volumes and the characters.
//!
//! The engine itself (rapier) is treated as an opaque collaborator: bodies go
//! in, a step runs, contact events and query results come out. Everything this
//! crate adds - volume gravity, contact membership, character re-orientation,
//! sub-shape identity - lives in this context and is keyed either by the
//! engine's own generational handles (bodies, colliders) or by pool handles
//! (shapes, characters).

use crate::{
    character::{Character, CharacterDesc, CharacterHandle, GroundState, LostVolumeResponse},
    contact::CollisionEventQueue,
    gravity::{GravityMode, VolumeBody},
    pool::Pool,
    shape::{ShapeHandle, ShapeResource, SubShapeInfo, SubShapeSet, SubShapeSlot},
};
use arrayvec::ArrayVec;
use fxhash::FxHashMap;
use nalgebra::{Isometry3, Point3, Unit, UnitQuaternion, Vector3};
use rapier3d::{
    dynamics::{
        CCDSolver, ImpulseJointSet, IntegrationParameters, IslandManager, MultibodyJointSet,
        RigidBodyBuilder, RigidBodyHandle, RigidBodySet, RigidBodyType,
    },
    geometry::{
        ColliderBuilder, ColliderHandle, ColliderSet, DefaultBroadPhase, Group, InteractionGroups,
        NarrowPhase, Ray, SharedShape,
    },
    pipeline::{PhysicsPipeline, QueryFilter, QueryPipeline},
    prelude::{ActiveCollisionTypes, ActiveEvents, CollisionEvent},
};
use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    fmt::{Debug, Formatter},
    time::{Duration, Instant},
};

/// How far below the character the ground probe reaches past the shape bounds.
const GROUND_PROBE_MARGIN: f32 = 0.3;

/// Stable identifier of a body. Wraps the engine's own index+generation arena
/// handle, so staleness is detectable on every access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub(crate) RigidBodyHandle);

impl BodyHandle {
    /// Handle that never resolves to a body.
    #[inline]
    pub fn invalid() -> Self {
        Self(RigidBodyHandle::invalid())
    }
}

/// Motion model of a body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MotionKind {
    /// Never moves.
    Static,
    /// Moved programmatically, pushes dynamic bodies but is not pushed back.
    Kinematic,
    /// Fully simulated.
    #[default]
    Dynamic,
}

impl From<MotionKind> for RigidBodyType {
    fn from(kind: MotionKind) -> Self {
        match kind {
            MotionKind::Static => RigidBodyType::Fixed,
            MotionKind::Kinematic => RigidBodyType::KinematicPositionBased,
            MotionKind::Dynamic => RigidBodyType::Dynamic,
        }
    }
}

/// Creation parameters for a body. The initial shape becomes logical sub-shape
/// `0` with `shape_tag` as its tag; more sub-shapes can be added later.
#[derive(Clone, Debug)]
pub struct BodyDesc {
    pub shape: ShapeHandle,
    /// Tag reported for hits on the initial sub-shape.
    pub shape_tag: u64,
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub linear_velocity: Vector3<f32>,
    pub angular_velocity: Vector3<f32>,
    /// Caller tag reported for every hit on this body.
    pub tag: u64,
    /// Collision layer bitmask; two bodies interact iff their masks share a bit.
    pub layer: u32,
    pub motion: MotionKind,
    /// Sensor bodies detect overlaps without collision response and carry
    /// volume state (contact tracking, optional gravity field).
    pub sensor: bool,
    pub allow_sleep: bool,
    pub friction: f32,
    pub restitution: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Multiplier applied to both global and volume gravity for this body.
    pub gravity_scale: f32,
}

impl Default for BodyDesc {
    fn default() -> Self {
        Self {
            shape: ShapeHandle::NONE,
            shape_tag: 0,
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            tag: 0,
            layer: u32::MAX,
            motion: MotionKind::default(),
            sensor: false,
            allow_sleep: true,
            friction: 0.5,
            restitution: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
        }
    }
}

/// Side table kept per body.
struct BodyData {
    tag: u64,
    layer: u32,
    sensor: bool,
    friction: f32,
    restitution: f32,
    sub_shapes: SubShapeSet,
}

/// Creation parameters for a world.
#[derive(Clone, Debug)]
pub struct PhysicsWorldDesc {
    /// Uniform world gravity applied by the engine itself. Defaults to zero:
    /// in this model gravity is supposed to come from volumes.
    pub gravity: Vector3<f32>,
}

impl Default for PhysicsWorldDesc {
    fn default() -> Self {
        Self {
            gravity: Vector3::zeros(),
        }
    }
}

/// Performance statistics for the physics part of the engine.
#[derive(Debug, Default, Clone)]
pub struct PhysicsPerformanceStatistics {
    /// A time that was needed to perform a single simulation step.
    pub step_time: Duration,

    /// A time that was needed to perform all ray casts.
    pub total_ray_cast_time: Cell<Duration>,
}

impl PhysicsPerformanceStatistics {
    /// Resets performance statistics to default values.
    pub fn reset(&mut self) {
        *self = Default::default();
    }

    /// Returns total amount of time for every part of statistics.
    pub fn total(&self) -> Duration {
        self.step_time + self.total_ray_cast_time.get()
    }
}

/// A ray intersection result with resolved body and sub-shape identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Intersection {
    /// The body that was hit.
    pub body: BodyHandle,
    /// Caller tag of the hit body.
    pub body_tag: u64,
    /// Logical sub-shape that was hit, or [`SubShapeInfo::NOT_FOUND`].
    pub sub_shape: SubShapeInfo,
    /// A normal at the intersection position.
    pub normal: Vector3<f32>,
    /// A position of the intersection in world coordinates.
    pub position: Point3<f32>,
    /// Distance from the ray origin.
    pub toi: f32,
}

/// A set of options for the ray cast.
pub struct RayCastOptions {
    /// A ray origin.
    pub ray_origin: Point3<f32>,

    /// A ray direction. Can be non-normalized.
    pub ray_direction: Vector3<f32>,

    /// Maximum distance of cast.
    pub max_len: f32,

    /// Layer bitmask to check against, any-match semantics.
    pub layer_pattern: u32,

    /// Whether to sort intersections from closest to farthest.
    pub sort_results: bool,
}

/// A hit reported by a shape overlap query.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeCastHit {
    pub body: BodyHandle,
    pub body_tag: u64,
    pub sub_shape: SubShapeInfo,
}

/// A trait for ray cast results storage. It has two implementations: Vec and
/// ArrayVec. Latter is needed for the cases where you need to avoid runtime
/// memory allocations and do everything on stack.
pub trait QueryResultsStorage {
    /// Pushes new intersection in the storage. Returns true if intersection was
    /// successfully inserted, false otherwise.
    fn push(&mut self, intersection: Intersection) -> bool;

    /// Clears the storage.
    fn clear(&mut self);

    /// Sorts intersections by given compare function.
    fn sort_intersections_by<C: FnMut(&Intersection, &Intersection) -> Ordering>(&mut self, cmp: C);
}

impl QueryResultsStorage for Vec<Intersection> {
    fn push(&mut self, intersection: Intersection) -> bool {
        self.push(intersection);
        true
    }

    fn clear(&mut self) {
        self.clear()
    }

    fn sort_intersections_by<C>(&mut self, cmp: C)
    where
        C: FnMut(&Intersection, &Intersection) -> Ordering,
    {
        self.sort_by(cmp);
    }
}

impl<const CAP: usize> QueryResultsStorage for ArrayVec<Intersection, CAP> {
    fn push(&mut self, intersection: Intersection) -> bool {
        self.try_push(intersection).is_ok()
    }

    fn clear(&mut self) {
        self.clear()
    }

    fn sort_intersections_by<C>(&mut self, cmp: C)
    where
        C: FnMut(&Intersection, &Intersection) -> Ordering,
    {
        self.sort_by(cmp);
    }
}

fn layer_to_group(layer: u32) -> Group {
    Group::from_bits(layer).unwrap_or_else(Group::all)
}

/// Any-match layer semantics: two masks interact iff they share a bit. With
/// memberships == filter on both sides, the engine's group test reduces to
/// exactly `a & b != 0`.
fn any_match_groups(layer: u32) -> InteractionGroups {
    let group = layer_to_group(layer);
    InteractionGroups::new(group, group)
}

/// Physics world. Owns the engine state and everything this crate layers on
/// top of it. All access is `&mut self` / `&self`; embedders serialize world
/// access and drive characters strictly sequentially after [`Self::update`].
pub struct PhysicsWorld {
    /// Uniform engine gravity; volume fields are applied on top of it.
    pub gravity: Vector3<f32>,

    /// A set of parameters that define behavior of every rigid body.
    pub integration_parameters: IntegrationParameters,

    /// Performance statistics of a single simulation step.
    pub performance_statistics: PhysicsPerformanceStatistics,

    // Current physics pipeline.
    pipeline: PhysicsPipeline,
    // Broad phase performs rough intersection checks.
    broad_phase: DefaultBroadPhase,
    // Narrow phase is responsible for precise contact generation.
    narrow_phase: NarrowPhase,
    // A continuous collision detection solver.
    ccd_solver: CCDSolver,
    // Structure responsible for maintaining the set of active rigid-bodies, and
    // putting non-moving rigid-bodies to sleep to save computation times.
    islands: IslandManager,
    // A container of rigid bodies.
    bodies: RigidBodySet,
    // A container of colliders.
    colliders: ColliderSet,
    // Joints are unused by this layer but required by the engine's step/remove
    // signatures.
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    query: RefCell<QueryPipeline>,
    // Collision begin/end events recorded during a step, drained synchronously
    // right after it.
    events: CollisionEventQueue,

    shapes: Pool<ShapeResource>,
    characters: Pool<Character>,
    // Volume state for every sensor body.
    volumes: FxHashMap<RigidBodyHandle, VolumeBody>,
    body_data: FxHashMap<RigidBodyHandle, BodyData>,
    // Engine collider -> owning body, for event and query hit resolution.
    collider_owners: FxHashMap<ColliderHandle, RigidBodyHandle>,
    // Colliders torn down since the last update. End events for them can still
    // arrive in the next step; kept so those events resolve to a body.
    removed_collider_owners: FxHashMap<ColliderHandle, RigidBodyHandle>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(&PhysicsWorldDesc::default())
    }
}

impl Debug for PhysicsWorld {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PhysicsWorld")
    }
}

impl PhysicsWorld {
    /// Creates a new instance of the physics world.
    pub fn new(desc: &PhysicsWorldDesc) -> Self {
        Self {
            gravity: desc.gravity,
            integration_parameters: IntegrationParameters::default(),
            performance_statistics: Default::default(),
            pipeline: PhysicsPipeline::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_solver: CCDSolver::new(),
            islands: IslandManager::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            query: RefCell::new(QueryPipeline::new()),
            events: CollisionEventQueue::default(),
            shapes: Pool::new(),
            characters: Pool::new(),
            volumes: FxHashMap::default(),
            body_data: FxHashMap::default(),
            collider_owners: FxHashMap::default(),
            removed_collider_owners: FxHashMap::default(),
        }
    }

    /// Advances the simulation by `dt` seconds split into `substeps` equal
    /// collision steps. Blocks until the step, the contact event drain and the
    /// volume gravity pass have all completed.
    pub fn update(&mut self, dt: f32, substeps: u32) {
        if dt <= 0.0 {
            log::warn!("Physics update skipped: non-positive delta time {}", dt);
            return;
        }

        let time = Instant::now();

        let substeps = substeps.max(1);
        let sub_dt = dt / substeps as f32;
        for _ in 0..substeps {
            self.integration_parameters.dt = sub_dt;
            {
                let mut query = self.query.borrow_mut();
                self.pipeline.step(
                    &self.gravity,
                    &self.integration_parameters,
                    &mut self.islands,
                    &mut self.broad_phase,
                    &mut self.narrow_phase,
                    &mut self.bodies,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    &mut self.ccd_solver,
                    Some(&mut query),
                    &(),
                    &self.events,
                );
            }
            self.drain_contact_events();
            self.apply_volume_gravity(sub_dt);
        }
        self.removed_collider_owners.clear();

        self.performance_statistics.step_time += time.elapsed();
    }

    /// Applies the recorded begin/end events of the last step to the volume
    /// contact trackers.
    fn drain_contact_events(&mut self) {
        for event in self.events.drain() {
            match event {
                CollisionEvent::Started(collider1, collider2, _) => {
                    let (Some(body1), Some(body2)) = (
                        self.collider_body(collider1),
                        self.collider_body(collider2),
                    ) else {
                        log::debug!(
                            "Contact begin for unknown collider pair {:?}/{:?}",
                            collider1,
                            collider2
                        );
                        continue;
                    };
                    if let Some(volume) = self.volumes.get_mut(&body1) {
                        volume.contact_list.add(BodyHandle(body2));
                    }
                    if let Some(volume) = self.volumes.get_mut(&body2) {
                        volume.contact_list.add(BodyHandle(body1));
                    }
                }
                CollisionEvent::Stopped(collider1, collider2, _) => {
                    let (Some(body1), Some(body2)) = (
                        self.collider_body(collider1),
                        self.collider_body(collider2),
                    ) else {
                        log::debug!(
                            "Contact end for unknown collider pair {:?}/{:?}",
                            collider1,
                            collider2
                        );
                        continue;
                    };
                    if let Some(volume) = self.volumes.get_mut(&body1) {
                        volume.contact_list.remove(BodyHandle(body2));
                    }
                    if let Some(volume) = self.volumes.get_mut(&body2) {
                        volume.contact_list.remove(BodyHandle(body1));
                    }
                }
            }
        }
    }

    fn collider_body(&self, collider: ColliderHandle) -> Option<RigidBodyHandle> {
        self.collider_owners
            .get(&collider)
            .or_else(|| self.removed_collider_owners.get(&collider))
            .copied()
    }

    /// For every volume with an active field: add the field's velocity
    /// contribution to every tracked body that is dynamic and awake. Sleeping
    /// bodies are skipped - they need no force and must not be spuriously
    /// woken. This is an explicit-Euler velocity impulse re-applied every
    /// substep, matching how the engine applies its own uniform gravity.
    fn apply_volume_gravity(&mut self, dt: f32) {
        for (&volume_handle, volume) in self.volumes.iter() {
            let Some(mode) = volume.gravity else {
                continue;
            };
            let Some(volume_body) = self.bodies.get(volume_handle) else {
                continue;
            };
            let volume_position = *volume_body.translation();
            let volume_rotation = *volume_body.rotation();

            for &body in volume.contact_list.bodies() {
                let Some(rigid_body) = self.bodies.get_mut(body.0) else {
                    continue;
                };
                if !rigid_body.is_dynamic() || rigid_body.is_sleeping() {
                    continue;
                }
                let velocity =
                    mode.velocity_at(&volume_position, &volume_rotation, rigid_body.translation());
                let impulse = velocity * rigid_body.gravity_scale() * dt;
                let new_velocity = rigid_body.linvel() + impulse;
                rigid_body.set_linvel(new_velocity, false);
            }
        }
    }

    // --- Shapes ------------------------------------------------------------

    /// Registers a sphere shape and returns a stable handle to it.
    pub fn create_sphere_shape(&mut self, radius: f32, density: f32) -> ShapeHandle {
        self.shapes
            .spawn(ShapeResource::new(SharedShape::ball(radius), density))
    }

    /// Registers a box shape given its half extents.
    pub fn create_box_shape(&mut self, half_extents: Vector3<f32>, density: f32) -> ShapeHandle {
        self.shapes.spawn(ShapeResource::new(
            SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z),
            density,
        ))
    }

    /// Registers a capsule shape aligned with the local Y axis.
    pub fn create_capsule_shape(
        &mut self,
        half_height: f32,
        radius: f32,
        density: f32,
    ) -> ShapeHandle {
        self.shapes.spawn(ShapeResource::new(
            SharedShape::capsule(
                Point3::new(0.0, -half_height, 0.0),
                Point3::new(0.0, half_height, 0.0),
                radius,
            ),
            density,
        ))
    }

    /// Registers a cylinder shape aligned with the local Y axis.
    pub fn create_cylinder_shape(
        &mut self,
        half_height: f32,
        radius: f32,
        density: f32,
    ) -> ShapeHandle {
        self.shapes.spawn(ShapeResource::new(
            SharedShape::cylinder(half_height, radius),
            density,
        ))
    }

    /// Registers a convex hull of the given points. Returns `None` if the hull
    /// could not be computed (e.g. degenerate input).
    pub fn create_convex_hull_shape(
        &mut self,
        points: &[Point3<f32>],
        density: f32,
    ) -> Option<ShapeHandle> {
        match SharedShape::convex_hull(points) {
            Some(shape) => Some(self.shapes.spawn(ShapeResource::new(shape, density))),
            None => {
                log::warn!(
                    "Failed to build a convex hull shape from {} points",
                    points.len()
                );
                None
            }
        }
    }

    /// Registers a triangle mesh shape.
    pub fn create_mesh_shape(
        &mut self,
        vertices: Vec<Point3<f32>>,
        indices: Vec<[u32; 3]>,
        density: f32,
    ) -> Option<ShapeHandle> {
        match SharedShape::trimesh(vertices, indices) {
            Ok(shape) => Some(self.shapes.spawn(ShapeResource::new(shape, density))),
            Err(err) => {
                log::warn!("Failed to build a triangle mesh shape: {}", err);
                None
            }
        }
    }

    /// Unregisters a shape. Bodies already built from it keep their colliders
    /// alive (the engine shape is shared), but the handle stops resolving and
    /// later rebuilds skip sub-shapes that still refer to it.
    pub fn destroy_shape(&mut self, handle: ShapeHandle) {
        if self.shapes.try_free(handle).is_none() {
            log::warn!("Attempt to destroy a shape using stale handle {}", handle);
        }
    }

    // --- Bodies ------------------------------------------------------------

    /// Creates a body from the descriptor. Bodies created with `sensor = true`
    /// become volume bodies: they track overlapping bodies and may carry a
    /// gravity field. Returns `None` if the shape handle is stale.
    pub fn create_body(&mut self, desc: &BodyDesc) -> Option<BodyHandle> {
        if !self.shapes.is_valid_handle(desc.shape) {
            log::warn!(
                "Attempt to create a body using stale shape handle {}",
                desc.shape
            );
            return None;
        }

        let body = RigidBodyBuilder::new(desc.motion.into())
            .position(Isometry3::from_parts(desc.position.into(), desc.rotation))
            .linvel(desc.linear_velocity)
            .angvel(desc.angular_velocity)
            .linear_damping(desc.linear_damping)
            .angular_damping(desc.angular_damping)
            .gravity_scale(desc.gravity_scale)
            .can_sleep(desc.allow_sleep)
            .build();
        let handle = self.bodies.insert(body);

        let mut sub_shapes = SubShapeSet::default();
        sub_shapes.add(SubShapeSlot {
            shape: desc.shape,
            local: Isometry3::identity(),
            tag: desc.shape_tag,
        });
        self.body_data.insert(
            handle,
            BodyData {
                tag: desc.tag,
                layer: desc.layer,
                sensor: desc.sensor,
                friction: desc.friction,
                restitution: desc.restitution,
                sub_shapes,
            },
        );
        self.rebuild_colliders(handle);

        if desc.sensor {
            self.volumes.insert(handle, VolumeBody::default());
        }

        Some(BodyHandle(handle))
    }

    /// Destroys a body, its colliders and, for sensors, the attached volume
    /// state. The body also disappears from every volume's contact list
    /// immediately - end events cannot be relied on for a body that no longer
    /// exists.
    pub fn destroy_body(&mut self, handle: BodyHandle) {
        if let Some(data) = self.body_data.remove(&handle.0) {
            for &collider in data.sub_shapes.colliders() {
                self.collider_owners.remove(&collider);
                self.removed_collider_owners.insert(collider, handle.0);
            }
        }
        self.volumes.remove(&handle.0);
        for volume in self.volumes.values_mut() {
            volume.contact_list.purge(handle);
        }

        if self.bodies.get(handle.0).is_some() {
            self.bodies.remove(
                handle.0,
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            );
        } else {
            log::warn!("Attempt to destroy a body using stale handle {:?}", handle);
        }
    }

    /// World transform of a body.
    pub fn body_transform(&self, handle: BodyHandle) -> Option<Isometry3<f32>> {
        self.bodies.get(handle.0).map(|body| *body.position())
    }

    /// Teleports a body, waking it.
    pub fn set_body_transform(&mut self, handle: BodyHandle, transform: &Isometry3<f32>) {
        if let Some(body) = self.bodies.get_mut(handle.0) {
            body.set_position(*transform, true);
        } else {
            log::warn!("Attempt to move a body using stale handle {:?}", handle);
        }
    }

    pub fn body_linear_velocity(&self, handle: BodyHandle) -> Option<Vector3<f32>> {
        self.bodies.get(handle.0).map(|body| *body.linvel())
    }

    pub fn set_body_linear_velocity(&mut self, handle: BodyHandle, velocity: Vector3<f32>) {
        if let Some(body) = self.bodies.get_mut(handle.0) {
            body.set_linvel(velocity, true);
        }
    }

    pub fn body_angular_velocity(&self, handle: BodyHandle) -> Option<Vector3<f32>> {
        self.bodies.get(handle.0).map(|body| *body.angvel())
    }

    pub fn set_body_angular_velocity(&mut self, handle: BodyHandle, velocity: Vector3<f32>) {
        if let Some(body) = self.bodies.get_mut(handle.0) {
            body.set_angvel(velocity, true);
        }
    }

    /// Caller tag of a body.
    pub fn body_tag(&self, handle: BodyHandle) -> Option<u64> {
        self.body_data.get(&handle.0).map(|data| data.tag)
    }

    // --- Volume gravity ----------------------------------------------------

    /// Gives the volume a radial gravity well centered on the volume body.
    /// No-op if the body is not a sensor.
    pub fn set_radial_gravity(&mut self, handle: BodyHandle, strength: f32) {
        self.set_gravity_mode(handle, GravityMode::radial(strength));
    }

    /// Gives the volume a directional field, defined in the volume's local
    /// frame. No-op if the body is not a sensor.
    pub fn set_vector_gravity(&mut self, handle: BodyHandle, field: Vector3<f32>) {
        self.set_gravity_mode(handle, GravityMode::vector(field));
    }

    /// Replaces the volume's gravity field wholesale. No-op if the body is not
    /// a sensor.
    pub fn set_gravity_mode(&mut self, handle: BodyHandle, mode: GravityMode) {
        if let Some(volume) = self.volumes.get_mut(&handle.0) {
            volume.gravity = Some(mode);
        }
    }

    /// Removes the volume's gravity field; contact tracking continues. No-op
    /// if the body is not a sensor.
    pub fn clear_gravity(&mut self, handle: BodyHandle) {
        if let Some(volume) = self.volumes.get_mut(&handle.0) {
            volume.gravity = None;
        }
    }

    /// Active gravity field of a volume body, if any.
    pub fn gravity_mode(&self, handle: BodyHandle) -> Option<GravityMode> {
        self.volumes.get(&handle.0).and_then(|volume| volume.gravity)
    }

    /// Snapshot of the bodies currently overlapping a volume. Empty for bodies
    /// that are not sensors - not being a volume is a normal, common case, not
    /// an error.
    pub fn contact_list(&self, handle: BodyHandle) -> &[BodyHandle] {
        self.volumes
            .get(&handle.0)
            .map(|volume| volume.contact_list.bodies())
            .unwrap_or(&[])
    }

    // --- Sub-shapes --------------------------------------------------------

    /// Registers a logical sub-shape on a body and returns its logical index.
    /// Takes effect on the next [`Self::commit_shapes`].
    pub fn add_sub_shape(
        &mut self,
        body: BodyHandle,
        shape: ShapeHandle,
        local: Isometry3<f32>,
        tag: u64,
    ) -> Option<u32> {
        if !self.shapes.is_valid_handle(shape) {
            log::warn!("Attempt to add a sub-shape using stale shape handle {}", shape);
            return None;
        }
        let data = self.body_data.get_mut(&body.0)?;
        Some(data.sub_shapes.add(SubShapeSlot { shape, local, tag }))
    }

    /// Unregisters a logical sub-shape. Takes effect on the next commit.
    pub fn remove_sub_shape(&mut self, body: BodyHandle, index: u32) -> bool {
        self.body_data
            .get_mut(&body.0)
            .map(|data| data.sub_shapes.remove(index))
            .unwrap_or(false)
    }

    /// Moves a logical sub-shape within the body's frame. Takes effect on the
    /// next commit.
    pub fn set_sub_shape_local(
        &mut self,
        body: BodyHandle,
        index: u32,
        local: Isometry3<f32>,
    ) -> bool {
        self.body_data
            .get_mut(&body.0)
            .map(|data| data.sub_shapes.set_local(index, local))
            .unwrap_or(false)
    }

    /// Rebuilds the body's composite collision state from its sub-shape table.
    /// The rebuild is always full, never incremental; committing with no
    /// pending changes is a no-op.
    pub fn commit_shapes(&mut self, body: BodyHandle) {
        match self.body_data.get(&body.0) {
            Some(data) if data.sub_shapes.is_dirty() => self.rebuild_colliders(body.0),
            Some(_) => (),
            None => log::warn!(
                "Attempt to commit shapes of a body using stale handle {:?}",
                body
            ),
        }
    }

    /// Number of logical sub-shapes on a body.
    pub fn sub_shape_count(&self, body: BodyHandle) -> usize {
        self.body_data
            .get(&body.0)
            .map(|data| data.sub_shapes.len())
            .unwrap_or(0)
    }

    fn rebuild_colliders(&mut self, body: RigidBodyHandle) {
        let Some(data) = self.body_data.get_mut(&body) else {
            return;
        };

        for collider in data.sub_shapes.take_colliders() {
            self.collider_owners.remove(&collider);
            self.removed_collider_owners.insert(collider, body);
            self.colliders
                .remove(collider, &mut self.islands, &mut self.bodies, true);
        }

        let slots: Vec<(u32, SubShapeSlot)> = data.sub_shapes.occupied().collect();
        let mut built = Vec::with_capacity(slots.len());
        for (index, slot) in slots {
            let Some(resource) = self.shapes.try_borrow(slot.shape) else {
                log::warn!(
                    "Sub-shape {} of body {:?} refers to a destroyed shape and was skipped",
                    index,
                    body
                );
                continue;
            };
            let mut builder = ColliderBuilder::new(resource.shape.clone())
                .position(slot.local)
                .density(resource.density)
                .friction(data.friction)
                .restitution(data.restitution)
                .collision_groups(any_match_groups(data.layer))
                .sensor(data.sensor);
            if data.sensor {
                builder = builder
                    .active_events(ActiveEvents::COLLISION_EVENTS)
                    .active_collision_types(ActiveCollisionTypes::all());
            }
            let collider = self
                .colliders
                .insert_with_parent(builder.build(), body, &mut self.bodies);
            self.collider_owners.insert(collider, body);
            built.push((collider, index));
        }
        data.sub_shapes.set_colliders(built);
    }

    /// Resolves an engine collider from a query hit into the crate's identity
    /// tuple: owning body, body tag and logical sub-shape.
    fn resolve_hit(&self, collider: ColliderHandle) -> Option<(BodyHandle, u64, SubShapeInfo)> {
        let body = *self.collider_owners.get(&collider)?;
        match self.body_data.get(&body) {
            Some(data) => Some((BodyHandle(body), data.tag, data.sub_shapes.resolve(collider))),
            // Colliders of character inner bodies have no sub-shape table.
            None => Some((BodyHandle(body), 0, SubShapeInfo::NOT_FOUND)),
        }
    }

    // --- Characters --------------------------------------------------------

    /// Adds a character. With `inner_shape` set, a kinematic body shadows the
    /// character inside the simulation, making it visible to sensor volumes
    /// and ray casts; without it the character cannot be affected by volume
    /// gravity. Returns `None` if the movement shape handle is stale.
    pub fn add_character(&mut self, desc: &CharacterDesc) -> Option<CharacterHandle> {
        let shape = match self.shapes.try_borrow(desc.shape) {
            Some(resource) => resource.shape.clone(),
            None => {
                log::warn!(
                    "Attempt to add a character using stale shape handle {}",
                    desc.shape
                );
                return None;
            }
        };

        let mut character = Character::new(shape, desc.position, desc.rotation, desc.lost_volume);

        if let Some(inner_shape) = desc.inner_shape {
            match self.shapes.try_borrow(inner_shape) {
                Some(resource) => {
                    let body = RigidBodyBuilder::kinematic_position_based()
                        .position(Isometry3::from_parts(desc.position.into(), desc.rotation))
                        .build();
                    let body_handle = self.bodies.insert(body);
                    // Kinematic-vs-fixed pairs are off by default in the
                    // engine; without them a static sensor volume would never
                    // see the character.
                    let collider = ColliderBuilder::new(resource.shape.clone())
                        .collision_groups(any_match_groups(desc.inner_layer))
                        .active_events(ActiveEvents::COLLISION_EVENTS)
                        .active_collision_types(
                            ActiveCollisionTypes::default()
                                | ActiveCollisionTypes::KINEMATIC_FIXED
                                | ActiveCollisionTypes::KINEMATIC_KINEMATIC,
                        )
                        .build();
                    let collider_handle =
                        self.colliders
                            .insert_with_parent(collider, body_handle, &mut self.bodies);
                    self.collider_owners.insert(collider_handle, body_handle);
                    character.inner_body = Some(body_handle);
                    character.inner_collider = Some(collider_handle);
                }
                None => {
                    log::warn!(
                        "Character inner shape handle {} is stale; the character will be invisible to sensors",
                        inner_shape
                    );
                }
            }
        }

        Some(self.characters.spawn(character))
    }

    /// Removes a character and its inner body. Returns `false` for a stale
    /// handle.
    pub fn remove_character(&mut self, handle: CharacterHandle) -> bool {
        match self.characters.try_free(handle) {
            Some(character) => {
                if let Some(collider) = character.inner_collider {
                    self.collider_owners.remove(&collider);
                    if let Some(body) = character.inner_body {
                        self.removed_collider_owners.insert(collider, body);
                    }
                }
                if let Some(body) = character.inner_body {
                    for volume in self.volumes.values_mut() {
                        volume.contact_list.purge(BodyHandle(body));
                    }
                    self.bodies.remove(
                        body,
                        &mut self.islands,
                        &mut self.colliders,
                        &mut self.impulse_joints,
                        &mut self.multibody_joints,
                        true,
                    );
                }
                true
            }
            None => {
                log::warn!("Attempt to remove a character using stale handle {}", handle);
                false
            }
        }
    }

    /// Advances a character by `dt` seconds: refreshes its contact list, reads
    /// the gravity field of the volume it stands in, re-orients its up axis to
    /// the field and delegates the actual movement to the engine's character
    /// solver. Returns `false` for a stale handle.
    ///
    /// Characters are driven by the embedding loop after [`Self::update`],
    /// strictly sequentially.
    pub fn update_character(&mut self, handle: CharacterHandle, dt: f32) -> bool {
        let (inner_collider, inner_body, position) = match self.characters.try_borrow(handle) {
            Some(character) => (
                character.inner_collider,
                character.inner_body,
                character.position,
            ),
            None => {
                log::warn!("Attempt to update a character using stale handle {}", handle);
                return false;
            }
        };

        // The inner body is the character's presence inside the simulation;
        // its current overlap pairs are the per-step contact list.
        let mut contacts = Vec::new();
        if let Some(inner_collider) = inner_collider {
            for (collider1, collider2, intersecting) in
                self.narrow_phase.intersection_pairs_with(inner_collider)
            {
                if !intersecting {
                    continue;
                }
                let other = if collider1 == inner_collider {
                    collider2
                } else {
                    collider1
                };
                if let Some(&owner) = self.collider_owners.get(&other) {
                    contacts.push(BodyHandle(owner));
                }
            }
        }

        // First contacted volume with an active field wins.
        let field = contacts.iter().find_map(|contact| {
            let mode = self.volumes.get(&contact.0).and_then(|volume| volume.gravity)?;
            let volume_body = self.bodies.get(contact.0)?;
            let volume_position = *volume_body.translation();
            let volume_rotation = *volume_body.rotation();
            Some((
                mode.velocity_at(&volume_position, &volume_rotation, &position),
                mode.up_at(&volume_position, &volume_rotation, &position),
            ))
        });

        let character = self
            .characters
            .try_borrow_mut(handle)
            .expect("handle validated above");
        character.contact_bodies = contacts;

        match field {
            Some((field_velocity, up)) => {
                character.gravity_velocity += field_velocity * dt;
                character.reorient(Unit::new_normalize(up));
            }
            None => match character.lost_volume {
                LostVolumeResponse::Zero => character.gravity_velocity = Vector3::zeros(),
                LostVolumeResponse::Freeze => (),
            },
        }

        // Keep the solver's frame in sync with the (possibly just updated) up
        // axis; snap-to-ground and step offsets are relative lengths along it.
        character.controller.up = character.up;

        let desired_translation =
            (character.linear_velocity + character.gravity_velocity) * dt;
        let shape_position = Isometry3::from_parts(character.position.into(), character.rotation);
        let mut filter = QueryFilter::new().exclude_sensors();
        if let Some(inner_body) = inner_body {
            filter = filter.exclude_rigid_body(inner_body);
        }

        let query = self.query.borrow();
        let movement = character.controller.move_shape(
            dt,
            &self.bodies,
            &self.colliders,
            &query,
            &*character.shape,
            &shape_position,
            desired_translation,
            filter,
            |_| (),
        );
        character.position += movement.translation;

        if movement.grounded {
            // Standing on something; the accumulated fall velocity is spent.
            character.gravity_velocity = Vector3::zeros();
            character.ground_state = if movement.is_sliding_down_slope {
                GroundState::OnSteepGround
            } else {
                GroundState::OnGround
            };
        } else {
            character.ground_state = GroundState::InAir;
        }

        let mut ground_velocity = Vector3::zeros();
        if movement.grounded {
            let reach =
                character.shape.compute_local_aabb().half_extents().norm() + GROUND_PROBE_MARGIN;
            let ray = Ray::new(Point3::from(character.position), -character.up.into_inner());
            match query.cast_ray(&self.bodies, &self.colliders, &ray, reach, true, filter) {
                Some((collider, time_of_impact)) => {
                    if let Some(ground_body) = self
                        .colliders
                        .get(collider)
                        .and_then(|collider| collider.parent())
                        .and_then(|parent| self.bodies.get(parent))
                    {
                        ground_velocity =
                            ground_body.velocity_at_point(&ray.point_at(time_of_impact));
                    }
                }
                None => character.ground_state = GroundState::Unsupported,
            }
        }
        character.ground_velocity = ground_velocity;
        drop(query);

        if let Some(inner_body) = inner_body {
            let new_position = Isometry3::from_parts(character.position.into(), character.rotation);
            if let Some(body) = self.bodies.get_mut(inner_body) {
                body.set_position(new_position, true);
            }
        }

        true
    }

    /// World transform of a character.
    pub fn character_transform(&self, handle: CharacterHandle) -> Option<Isometry3<f32>> {
        self.characters
            .try_borrow(handle)
            .map(|character| Isometry3::from_parts(character.position.into(), character.rotation))
    }

    /// Teleports a character. The up axis is re-derived from the rotation.
    pub fn set_character_transform(&mut self, handle: CharacterHandle, transform: &Isometry3<f32>) {
        let Some(character) = self.characters.try_borrow_mut(handle) else {
            log::warn!("Attempt to move a character using stale handle {}", handle);
            return;
        };
        character.position = transform.translation.vector;
        character.set_rotation(transform.rotation);
        let inner_body = character.inner_body;
        if let Some(inner_body) = inner_body {
            if let Some(body) = self.bodies.get_mut(inner_body) {
                body.set_position(*transform, true);
            }
        }
    }

    /// Rotates a character in place; the up axis follows the new rotation.
    pub fn set_character_rotation(&mut self, handle: CharacterHandle, rotation: UnitQuaternion<f32>) {
        let Some(character) = self.characters.try_borrow_mut(handle) else {
            log::warn!("Attempt to rotate a character using stale handle {}", handle);
            return;
        };
        character.set_rotation(rotation);
        let transform = Isometry3::from_parts(character.position.into(), character.rotation);
        let inner_body = character.inner_body;
        if let Some(inner_body) = inner_body {
            if let Some(body) = self.bodies.get_mut(inner_body) {
                body.set_position(transform, true);
            }
        }
    }

    /// Caller-driven movement velocity of a character.
    pub fn character_linear_velocity(&self, handle: CharacterHandle) -> Option<Vector3<f32>> {
        self.characters
            .try_borrow(handle)
            .map(|character| character.linear_velocity)
    }

    pub fn set_character_linear_velocity(
        &mut self,
        handle: CharacterHandle,
        velocity: Vector3<f32>,
    ) {
        if let Some(character) = self.characters.try_borrow_mut(handle) {
            character.linear_velocity = velocity;
        }
    }

    /// Accumulated gravity-field contribution of a character.
    pub fn character_gravity_velocity(&self, handle: CharacterHandle) -> Option<Vector3<f32>> {
        self.characters
            .try_borrow(handle)
            .map(|character| character.gravity_velocity)
    }

    /// Ground state computed by the last [`Self::update_character`] call.
    pub fn character_ground_state(&self, handle: CharacterHandle) -> Option<GroundState> {
        self.characters
            .try_borrow(handle)
            .map(|character| character.ground_state)
    }

    /// Velocity of the surface the character stands on; zero while airborne.
    pub fn character_ground_velocity(&self, handle: CharacterHandle) -> Option<Vector3<f32>> {
        self.characters
            .try_borrow(handle)
            .map(|character| character.ground_velocity)
    }

    /// Bodies the character touched during its last update.
    pub fn character_contacts(&self, handle: CharacterHandle) -> Option<&[BodyHandle]> {
        self.characters
            .try_borrow(handle)
            .map(|character| character.contact_bodies.as_slice())
    }

    /// Chooses what happens to the cached gravity velocity when the character
    /// loses contact with every volume.
    pub fn set_character_lost_volume_response(
        &mut self,
        handle: CharacterHandle,
        response: LostVolumeResponse,
    ) -> bool {
        match self.characters.try_borrow_mut(handle) {
            Some(character) => {
                character.lost_volume = response;
                true
            }
            None => false,
        }
    }

    // --- Queries -----------------------------------------------------------

    /// Casts a ray with given options, pushing every hit into `query_buffer`.
    /// Hits carry resolved body and sub-shape identity.
    pub fn cast_ray<S: QueryResultsStorage>(&self, opts: RayCastOptions, query_buffer: &mut S) {
        let time = Instant::now();

        let query = self.query.borrow();

        query_buffer.clear();
        let ray = Ray::new(
            opts.ray_origin,
            opts.ray_direction
                .try_normalize(f32::EPSILON)
                .unwrap_or_default(),
        );
        let filter = QueryFilter::new().groups(any_match_groups(opts.layer_pattern));
        query.intersections_with_ray(
            &self.bodies,
            &self.colliders,
            &ray,
            opts.max_len,
            true,
            filter,
            |handle, intersection| match self.resolve_hit(handle) {
                Some((body, body_tag, sub_shape)) => query_buffer.push(Intersection {
                    body,
                    body_tag,
                    sub_shape,
                    normal: intersection.normal,
                    position: ray.point_at(intersection.time_of_impact),
                    toi: intersection.time_of_impact,
                }),
                None => true,
            },
        );
        if opts.sort_results {
            query_buffer.sort_intersections_by(|a, b| {
                a.toi.partial_cmp(&b.toi).unwrap_or(Ordering::Equal)
            })
        }

        self.performance_statistics.total_ray_cast_time.set(
            self.performance_statistics.total_ray_cast_time.get() + time.elapsed(),
        );
    }

    /// Closest hit of a ray, if any.
    pub fn cast_ray_closest(&self, opts: RayCastOptions) -> Option<Intersection> {
        let filter = QueryFilter::new().groups(any_match_groups(opts.layer_pattern));
        self.cast_ray_closest_with_filter(&opts, filter)
    }

    /// Closest hit of a ray, ignoring one body.
    pub fn cast_ray_closest_ignore_body(
        &self,
        opts: RayCastOptions,
        ignore: BodyHandle,
    ) -> Option<Intersection> {
        let filter = QueryFilter::new()
            .groups(any_match_groups(opts.layer_pattern))
            .exclude_rigid_body(ignore.0);
        self.cast_ray_closest_with_filter(&opts, filter)
    }

    /// Closest hit of a ray, ignoring a character's inner body. Returns `None`
    /// for a stale character handle.
    pub fn cast_ray_closest_ignore_character(
        &self,
        opts: RayCastOptions,
        ignore: CharacterHandle,
    ) -> Option<Intersection> {
        let character = match self.characters.try_borrow(ignore) {
            Some(character) => character,
            None => {
                log::warn!("Ray cast ignoring stale character handle {}", ignore);
                return None;
            }
        };
        let mut filter = QueryFilter::new().groups(any_match_groups(opts.layer_pattern));
        if let Some(inner_body) = character.inner_body {
            filter = filter.exclude_rigid_body(inner_body);
        }
        self.cast_ray_closest_with_filter(&opts, filter)
    }

    fn cast_ray_closest_with_filter(
        &self,
        opts: &RayCastOptions,
        filter: QueryFilter,
    ) -> Option<Intersection> {
        let time = Instant::now();

        let query = self.query.borrow();
        let ray = Ray::new(
            opts.ray_origin,
            opts.ray_direction
                .try_normalize(f32::EPSILON)
                .unwrap_or_default(),
        );
        let result = query
            .cast_ray_and_get_normal(
                &self.bodies,
                &self.colliders,
                &ray,
                opts.max_len,
                true,
                filter,
            )
            .and_then(|(handle, intersection)| {
                let (body, body_tag, sub_shape) = self.resolve_hit(handle)?;
                Some(Intersection {
                    body,
                    body_tag,
                    sub_shape,
                    normal: intersection.normal,
                    position: ray.point_at(intersection.time_of_impact),
                    toi: intersection.time_of_impact,
                })
            });

        self.performance_statistics.total_ray_cast_time.set(
            self.performance_statistics.total_ray_cast_time.get() + time.elapsed(),
        );

        result
    }

    /// Reports every body whose collision state overlaps the given shape placed
    /// at `position`. The callback returns `false` to stop early.
    pub fn intersections_with_shape(
        &self,
        layer_pattern: u32,
        shape: ShapeHandle,
        position: &Isometry3<f32>,
        mut callback: impl FnMut(ShapeCastHit) -> bool,
    ) {
        let Some(resource) = self.shapes.try_borrow(shape) else {
            log::warn!("Shape query using stale shape handle {}", shape);
            return;
        };
        let query = self.query.borrow();
        let filter = QueryFilter::new().groups(any_match_groups(layer_pattern));
        query.intersections_with_shape(
            &self.bodies,
            &self.colliders,
            position,
            &*resource.shape,
            filter,
            |handle| match self.resolve_hit(handle) {
                Some((body, body_tag, sub_shape)) => callback(ShapeCastHit {
                    body,
                    body_tag,
                    sub_shape,
                }),
                None => true,
            },
        );
    }
}

#[cfg(test)]
mod test {
    use super::{BodyDesc, MotionKind, PhysicsWorld, PhysicsWorldDesc, RayCastOptions};
    use crate::character::{CharacterDesc, GroundState, LostVolumeResponse};
    use crate::shape::SubShapeInfo;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};

    const DT: f32 = 0.1;

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(&PhysicsWorldDesc::default())
    }

    fn down_ray(x: f32, z: f32) -> RayCastOptions {
        RayCastOptions {
            ray_origin: Point3::new(x, 10.0, z),
            ray_direction: Vector3::new(0.0, -1.0, 0.0),
            max_len: 100.0,
            layer_pattern: u32::MAX,
            sort_results: true,
        }
    }

    #[test]
    fn radial_volume_applies_velocity_impulse_end_to_end() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(15.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();
        world.set_radial_gravity(volume, 100.0);

        let ball_shape = world.create_sphere_shape(0.5, 1.0);
        let ball = world
            .create_body(&BodyDesc {
                shape: ball_shape,
                position: Vector3::new(10.0, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);

        assert!(world.contact_list(volume).contains(&ball));
        let velocity = world.body_linear_velocity(ball).unwrap();
        // normalize(origin - pos) * (100 / 10^2) * gravity_scale * dt
        assert_relative_eq!(velocity, Vector3::new(-0.1, 0.0, 0.0), epsilon = 1.0e-3);

        // Clearing the field stops the pull; the already acquired velocity
        // persists untouched.
        world.clear_gravity(volume);
        world.update(DT, 1);
        assert_relative_eq!(
            world.body_linear_velocity(ball).unwrap(),
            velocity,
            epsilon = 1.0e-4
        );
    }

    #[test]
    fn leaving_the_volume_empties_the_contact_list() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(5.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();

        let ball_shape = world.create_sphere_shape(0.5, 1.0);
        let ball = world
            .create_body(&BodyDesc {
                shape: ball_shape,
                position: Vector3::new(2.0, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);
        assert_eq!(world.contact_list(volume), &[ball]);

        world.set_body_transform(ball, &Isometry3::translation(100.0, 0.0, 0.0));
        world.update(DT, 1);
        assert!(world.contact_list(volume).is_empty());
    }

    #[test]
    fn membership_survives_while_any_sub_shape_still_touches() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(6.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();

        // A composite body touching the volume through two separate sub-shapes.
        let box_shape = world.create_box_shape(Vector3::new(1.0, 1.0, 1.0), 1.0);
        let body = world
            .create_body(&BodyDesc {
                shape: box_shape,
                motion: MotionKind::Kinematic,
                ..Default::default()
            })
            .unwrap();
        world
            .add_sub_shape(body, box_shape, Isometry3::translation(4.5, 0.0, 0.0), 0)
            .unwrap();
        world.commit_shapes(body);

        world.update(DT, 1);
        assert_eq!(world.contact_list(volume), &[body]);

        // Push the body so the far sub-shape leaves the volume. One of the two
        // contact regions ends; membership must survive on the other.
        world.set_body_transform(body, &Isometry3::translation(3.0, 0.0, 0.0));
        world.update(DT, 1);
        assert_eq!(world.contact_list(volume), &[body]);

        // Now both regions are gone.
        world.set_body_transform(body, &Isometry3::translation(30.0, 0.0, 0.0));
        world.update(DT, 1);
        assert!(world.contact_list(volume).is_empty());
    }

    #[test]
    fn non_sensor_bodies_have_no_volume_state() {
        let mut world = world();
        let shape = world.create_sphere_shape(1.0, 1.0);
        let body = world
            .create_body(&BodyDesc {
                shape,
                ..Default::default()
            })
            .unwrap();
        assert!(world.contact_list(body).is_empty());
        world.set_radial_gravity(body, 100.0);
        assert_eq!(world.gravity_mode(body), None);
    }

    #[test]
    fn destroying_a_body_purges_it_from_trackers() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(5.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();

        let ball_shape = world.create_sphere_shape(0.5, 1.0);
        let ball = world
            .create_body(&BodyDesc {
                shape: ball_shape,
                position: Vector3::new(1.0, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);
        assert!(world.contact_list(volume).contains(&ball));

        world.destroy_body(ball);
        assert!(world.contact_list(volume).is_empty());
        // The pending removal events from the next step must not corrupt the
        // (now empty) tracker.
        world.update(DT, 1);
        assert!(world.contact_list(volume).is_empty());
    }

    #[test]
    fn stale_shape_handle_is_recoverable() {
        let mut world = world();
        let shape = world.create_sphere_shape(1.0, 1.0);
        world.destroy_shape(shape);
        // Double free is a logged no-op.
        world.destroy_shape(shape);
        assert_eq!(
            world.create_body(&BodyDesc {
                shape,
                ..Default::default()
            }),
            None
        );
    }

    #[test]
    fn ray_casts_resolve_logical_sub_shapes() {
        let mut world = world();

        let box_shape = world.create_box_shape(Vector3::new(1.0, 1.0, 1.0), 1.0);
        let body = world
            .create_body(&BodyDesc {
                shape: box_shape,
                shape_tag: 11,
                tag: 500,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();
        let east = world
            .add_sub_shape(body, box_shape, Isometry3::translation(4.0, 0.0, 0.0), 22)
            .unwrap();
        let west = world
            .add_sub_shape(body, box_shape, Isometry3::translation(-4.0, 0.0, 0.0), 33)
            .unwrap();
        assert_eq!((east, west), (1, 2));
        world.commit_shapes(body);
        assert_eq!(world.sub_shape_count(body), 3);

        world.update(DT, 1);

        let center = world.cast_ray_closest(down_ray(0.0, 0.0)).unwrap();
        assert_eq!(center.body, body);
        assert_eq!(center.body_tag, 500);
        assert_eq!(center.sub_shape, SubShapeInfo { index: 0, tag: 11 });

        let east_hit = world.cast_ray_closest(down_ray(4.0, 0.0)).unwrap();
        assert_eq!(east_hit.sub_shape, SubShapeInfo { index: 1, tag: 22 });

        let west_hit = world.cast_ray_closest(down_ray(-4.0, 0.0)).unwrap();
        assert_eq!(west_hit.sub_shape, SubShapeInfo { index: 2, tag: 33 });
    }

    #[test]
    fn single_sub_shape_body_resolves_without_identifier() {
        let mut world = world();

        let sphere = world.create_sphere_shape(1.0, 1.0);
        let body = world
            .create_body(&BodyDesc {
                shape: sphere,
                shape_tag: 7,
                position: Vector3::new(20.0, 0.0, 0.0),
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);

        let hit = world.cast_ray_closest(down_ray(20.0, 0.0)).unwrap();
        assert_eq!(hit.body, body);
        assert_eq!(hit.sub_shape, SubShapeInfo { index: 0, tag: 7 });
    }

    #[test]
    fn character_reorients_to_radial_field() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(20.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();
        world.set_radial_gravity(volume, 100.0);

        let capsule = world.create_capsule_shape(0.6, 0.3, 1.0);
        let inner = world.create_sphere_shape(0.3, 1.0);
        let character = world
            .add_character(&CharacterDesc {
                shape: capsule,
                position: Vector3::new(10.0, 0.0, 0.0),
                inner_shape: Some(inner),
                ..Default::default()
            })
            .unwrap();

        // One step so the engine knows about the overlap between the inner
        // body and the volume.
        world.update(DT, 1);
        assert!(world.update_character(character, DT));

        assert!(world
            .character_contacts(character)
            .unwrap()
            .contains(&volume));

        // Standing at +X of a radial well, "up" is the world +X axis.
        let transform = world.character_transform(character).unwrap();
        assert_relative_eq!(
            transform.rotation * Vector3::y(),
            Vector3::x(),
            epsilon = 1.0e-4
        );

        // The field pulled the character toward the well.
        let gravity_velocity = world.character_gravity_velocity(character).unwrap();
        assert_relative_eq!(
            gravity_velocity,
            Vector3::new(-0.1, 0.0, 0.0),
            epsilon = 1.0e-3
        );
        assert!(transform.translation.x < 10.0);
        assert_eq!(
            world.character_ground_state(character),
            Some(GroundState::InAir)
        );
        assert_eq!(
            world.character_ground_velocity(character),
            Some(Vector3::zeros())
        );
    }

    #[test]
    fn lost_volume_response_zero_resets_gravity_velocity() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(20.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();
        world.set_radial_gravity(volume, 100.0);

        let capsule = world.create_capsule_shape(0.6, 0.3, 1.0);
        let inner = world.create_sphere_shape(0.3, 1.0);
        let character = world
            .add_character(&CharacterDesc {
                shape: capsule,
                position: Vector3::new(10.0, 0.0, 0.0),
                inner_shape: Some(inner),
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);
        world.update_character(character, DT);
        assert!(world.character_gravity_velocity(character).unwrap().norm() > 0.0);

        // The volume stops exerting anything; with the default `Zero` response
        // the cached contribution is dropped on the next update.
        world.clear_gravity(volume);
        world.update_character(character, DT);
        assert_eq!(
            world.character_gravity_velocity(character),
            Some(Vector3::zeros())
        );
    }

    #[test]
    fn lost_volume_response_freeze_keeps_gravity_velocity() {
        let mut world = world();

        let volume_shape = world.create_sphere_shape(20.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();
        world.set_radial_gravity(volume, 100.0);

        let capsule = world.create_capsule_shape(0.6, 0.3, 1.0);
        let inner = world.create_sphere_shape(0.3, 1.0);
        let character = world
            .add_character(&CharacterDesc {
                shape: capsule,
                position: Vector3::new(10.0, 0.0, 0.0),
                inner_shape: Some(inner),
                lost_volume: LostVolumeResponse::Freeze,
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);
        world.update_character(character, DT);
        let frozen = world.character_gravity_velocity(character).unwrap();
        assert!(frozen.norm() > 0.0);

        world.clear_gravity(volume);
        world.update_character(character, DT);
        assert_relative_eq!(
            world.character_gravity_velocity(character).unwrap(),
            frozen,
            epsilon = 1.0e-6
        );
    }

    #[test]
    fn character_lands_on_ground() {
        let mut world = world();

        let floor_shape = world.create_box_shape(Vector3::new(50.0, 0.5, 50.0), 1.0);
        world
            .create_body(&BodyDesc {
                shape: floor_shape,
                position: Vector3::new(0.0, -0.5, 0.0),
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();

        let volume_shape = world.create_sphere_shape(50.0, 1.0);
        let volume = world
            .create_body(&BodyDesc {
                shape: volume_shape,
                sensor: true,
                motion: MotionKind::Static,
                ..Default::default()
            })
            .unwrap();
        world.set_vector_gravity(volume, Vector3::new(0.0, -9.8, 0.0));

        let capsule = world.create_capsule_shape(0.6, 0.3, 1.0);
        let inner = world.create_sphere_shape(0.3, 1.0);
        let character = world
            .add_character(&CharacterDesc {
                shape: capsule,
                position: Vector3::new(0.0, 2.0, 0.0),
                inner_shape: Some(inner),
                ..Default::default()
            })
            .unwrap();

        world.update(DT, 1);
        for _ in 0..120 {
            world.update_character(character, DT);
            world.update(DT, 1);
        }

        assert_eq!(
            world.character_ground_state(character),
            Some(GroundState::OnGround)
        );
        // Landed: the accumulated fall velocity has been spent and the capsule
        // rests on the floor.
        assert_eq!(
            world.character_gravity_velocity(character),
            Some(Vector3::zeros())
        );
        let transform = world.character_transform(character).unwrap();
        assert!(transform.translation.y > 0.0 && transform.translation.y < 2.0);
        // Up stays world Y inside a downward vector field.
        assert_relative_eq!(
            transform.rotation * Vector3::y(),
            Vector3::y(),
            epsilon = 1.0e-4
        );
    }

    #[test]
    fn stale_character_handle_is_recoverable() {
        let mut world = world();
        let capsule = world.create_capsule_shape(0.6, 0.3, 1.0);
        let character = world
            .add_character(&CharacterDesc {
                shape: capsule,
                ..Default::default()
            })
            .unwrap();
        assert!(world.remove_character(character));
        assert!(!world.remove_character(character));
        assert!(!world.update_character(character, DT));
        assert_eq!(world.character_transform(character), None);
    }
}
