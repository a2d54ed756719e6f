//! Physics simulation using `Rapier2D`, keyed by actor.
//!
//! The world exclusively owns every rigid body. Actors reach their body
//! through a pair of maps kept consistent by this module. Contacts are
//! snapshotted inside the Rapier callback and turned into bus events once the
//! step has returned. Removals are queued and only flushed by
//! [`PhysicsWorld::remove_queued_items`], never during a step.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use glam::Vec2;
use parking_lot::Mutex;
use rapier2d::prelude::*;
use tracing::{debug, trace, warn};

use crate::actor::{Actor, ActorId};
use crate::config::PhysicsConfig;
use crate::error::EngineError;
use crate::event::{ContactSide, ContactSnapshot, Event, EventBus};
use crate::ports::PhysicsPort;

/// Fixed timestep for physics simulation (60Hz).
pub const PHYSICS_DT: f32 = 1.0 / 60.0;

/// Half height of a character's ground sensor, in pixels.
const FOOT_SENSOR_HALF_HEIGHT: f32 = 2.0;

/// Type tags for user_data encoding.
pub const USER_DATA_BODY: u64 = 1;
pub const USER_DATA_CHARACTER: u64 = 2;

/// Encodes a type tag and ID into u128 user_data.
pub fn encode_user_data(type_tag: u64, id: u64) -> u128 {
    (u128::from(type_tag) << 64) | u128::from(id)
}

/// Decodes u128 user_data into (type_tag, id).
#[allow(clippy::cast_possible_truncation)]
pub fn decode_user_data(user_data: u128) -> (u64, u64) {
    let type_tag = (user_data >> 64) as u64;
    let id = user_data as u64;
    (type_tag, id)
}

/// How the body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    #[default]
    Static,
    Dynamic,
    Kinematic,
}

/// Collision shape, sized from the actor it is attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDesc {
    /// Circle of `radius` pixels.
    Sphere { radius: f32 },
    /// The actor's bounding box scaled by `hit_box_scale`.
    Box { hit_box_scale: f32 },
    /// Convex hull of `vertices`, in pixels relative to the actor's center.
    Polygon { vertices: Vec<Vec2> },
    /// Upright capsule filling the actor's box, plus a ground sensor under
    /// its feet. The body is tracked as a character.
    Character,
}

/// Everything needed to create a body for an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub shape: ShapeDesc,
    pub density: f32,
    pub friction: f32,
    pub body_type: BodyType,
    pub is_sensor: bool,
    pub fixed_rotation: bool,
}

impl BodyDesc {
    pub fn new(shape: ShapeDesc) -> Self {
        Self {
            shape,
            density: 1.0,
            friction: 0.3,
            body_type: BodyType::Static,
            is_sensor: false,
            fixed_rotation: true,
        }
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self
    }

    pub fn sensor(mut self, is_sensor: bool) -> Self {
        self.is_sensor = is_sensor;
        self
    }

    pub fn fixed_rotation(mut self, fixed_rotation: bool) -> Self {
        self.fixed_rotation = fixed_rotation;
        self
    }

    fn is_character(&self) -> bool {
        matches!(self.shape, ShapeDesc::Character)
    }
}

/// Ordered key for a body handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct BodyKey(u32, u32);

impl From<RigidBodyHandle> for BodyKey {
    fn from(handle: RigidBodyHandle) -> Self {
        let (index, generation) = handle.into_raw_parts();
        Self(index, generation)
    }
}

/// Collects contact snapshots while Rapier steps.
///
/// Rapier requires event handlers to be `Send + Sync`, hence the mutex.
#[derive(Default)]
struct ContactCollector {
    contacts: Mutex<Vec<ContactSnapshot>>,
}

impl ContactCollector {
    fn drain(&self) -> Vec<ContactSnapshot> {
        std::mem::take(&mut *self.contacts.lock())
    }
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        let (h1, h2, touching) = match event {
            CollisionEvent::Started(h1, h2, _flags) => (h1, h2, true),
            CollisionEvent::Stopped(h1, h2, _flags) => (h1, h2, false),
        };
        let (Some(a), Some(b)) = (
            contact_side(bodies, colliders, h1),
            contact_side(bodies, colliders, h2),
        ) else {
            // One collider is already gone (removed body); nothing to report.
            trace!(?h1, ?h2, "contact with a removed collider skipped");
            return;
        };
        self.contacts.lock().push(ContactSnapshot { a, b, touching });
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Reads the actor and fixture flags of one collider.
#[allow(clippy::cast_possible_truncation)]
fn contact_side(
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    handle: ColliderHandle,
) -> Option<ContactSide> {
    let collider = colliders.get(handle)?;
    let body = bodies.get(collider.parent()?)?;
    let (type_tag, id) = decode_user_data(body.user_data);
    if type_tag == 0 {
        return None;
    }
    Some(ContactSide {
        actor: ActorId(id as u32),
        is_sensor: collider.is_sensor(),
        is_character: type_tag == USER_DATA_CHARACTER,
    })
}

/// Maps a contact to the event gameplay listens for, if any.
fn collision_event(contact: ContactSnapshot) -> Option<Event> {
    if !contact.exactly_one_sensor() || !contact.involves_character() {
        return None;
    }
    if contact.touching {
        Some(Event::PostCollisionAdd(contact))
    } else {
        Some(Event::PostCollisionRemove(contact))
    }
}

fn ordered_pair(a: ActorId, b: ActorId) -> (ActorId, ActorId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// True when both snapshots describe the same pair of fixtures.
fn same_fixtures(x: &ContactSnapshot, y: &ContactSnapshot) -> bool {
    (x.a == y.a && x.b == y.b) || (x.a == y.b && x.b == y.a)
}

/// Physics world containing all `Rapier2D` components and the actor mapping.
pub struct PhysicsWorld {
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
    pixels_per_meter: f32,
    frame: u64,
    actor_to_body: BTreeMap<ActorId, RigidBodyHandle>,
    body_to_actor: BTreeMap<BodyKey, ActorId>,
    characters: BTreeSet<ActorId>,
    /// Touching fixture pairs per actor pair.
    touching: BTreeMap<(ActorId, ActorId), Vec<ContactSnapshot>>,
    removal_queue: Vec<ActorId>,
    collector: ContactCollector,
    bus: Rc<EventBus>,
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("frame", &self.frame)
            .field("rigid_body_count", &self.rigid_body_set.len())
            .field("collider_count", &self.collider_set.len())
            .field("actors", &self.actor_to_body.len())
            .field("removal_queue", &self.removal_queue)
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    /// Creates an empty world publishing collision events to `bus`.
    pub fn new(config: &PhysicsConfig, bus: Rc<EventBus>) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: config.fixed_timestep,
            ..Default::default()
        };

        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(config.gravity.x, config.gravity.y),
            pixels_per_meter: config.pixels_per_meter,
            frame: 0,
            actor_to_body: BTreeMap::new(),
            body_to_actor: BTreeMap::new(),
            characters: BTreeSet::new(),
            touching: BTreeMap::new(),
            removal_queue: Vec::new(),
            collector: ContactCollector::default(),
            bus,
        }
    }

    /// Advances the simulation by `dt` seconds and queues collision events.
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.physics_pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            &(),
            &self.collector,
        );
        self.frame += 1;

        for contact in self.collector.drain() {
            self.track_touching(&contact);
            if let Some(event) = collision_event(contact) {
                trace!(frame = self.frame, ?event, "collision event");
                self.bus.queue_event(event);
            }
        }
    }

    fn track_touching(&mut self, contact: &ContactSnapshot) {
        let key = ordered_pair(contact.a.actor, contact.b.actor);
        if contact.touching {
            self.touching.entry(key).or_default().push(*contact);
        } else if let Some(pairs) = self.touching.get_mut(&key) {
            if let Some(index) = pairs.iter().position(|pair| same_fixtures(pair, contact)) {
                pairs.swap_remove(index);
            }
            if pairs.is_empty() {
                self.touching.remove(&key);
            }
        }
    }

    /// Ends every contact of `actor` as if its fixtures had separated.
    ///
    /// The contact records vanish with the body, so the end events are
    /// published here instead of by the next step.
    fn end_contacts_of(&mut self, actor: ActorId) {
        let keys: Vec<_> = self
            .touching
            .keys()
            .copied()
            .filter(|&(a, b)| a == actor || b == actor)
            .collect();
        for key in keys {
            for contact in self.touching.remove(&key).unwrap_or_default() {
                let ended = ContactSnapshot {
                    touching: false,
                    ..contact
                };
                if let Some(event) = collision_event(ended) {
                    trace!(%actor, ?event, "contact ended by removal");
                    self.bus.queue_event(event);
                }
            }
        }
    }

    /// Registers a body for `actor`.
    pub fn add_body(&mut self, actor: &Actor, desc: &BodyDesc) -> Result<RigidBodyHandle, EngineError> {
        if self.actor_to_body.contains_key(&actor.id) {
            warn!(actor = %actor.id, "body already registered");
            return Err(EngineError::DuplicateRegistration(actor.id));
        }

        let colliders = self.build_colliders(actor, desc)?;
        let type_tag = if desc.is_character() {
            USER_DATA_CHARACTER
        } else {
            USER_DATA_BODY
        };
        let user_data = encode_user_data(type_tag, u64::from(actor.id.0));

        let center = self.to_meters(actor.center());
        let builder = match desc.body_type {
            BodyType::Static => RigidBodyBuilder::fixed(),
            BodyType::Dynamic => RigidBodyBuilder::dynamic(),
            BodyType::Kinematic => RigidBodyBuilder::kinematic_position_based(),
        }
        .translation(Vector::new(center.x, center.y))
        .rotation(actor.rotation)
        .user_data(user_data);
        let builder = if desc.fixed_rotation {
            builder.lock_rotations()
        } else {
            builder
        };

        let handle = self.rigid_body_set.insert(builder.build());
        for collider in colliders {
            self.collider_set.insert_with_parent(
                collider.user_data(user_data).build(),
                handle,
                &mut self.rigid_body_set,
            );
        }

        self.actor_to_body.insert(actor.id, handle);
        self.body_to_actor.insert(BodyKey::from(handle), actor.id);
        if desc.is_character() {
            self.characters.insert(actor.id);
        }
        debug!(actor = %actor.id, shape = ?desc.shape, body_type = ?desc.body_type, "body added");
        Ok(handle)
    }

    fn build_colliders(&self, actor: &Actor, desc: &BodyDesc) -> Result<Vec<ColliderBuilder>, EngineError> {
        let half = actor.scale * 0.5 / self.pixels_per_meter;
        let main = match &desc.shape {
            ShapeDesc::Sphere { radius } => {
                if *radius <= 0.0 {
                    return Err(EngineError::InvalidShape(format!("sphere radius {radius}")));
                }
                ColliderBuilder::ball(radius / self.pixels_per_meter)
            }
            ShapeDesc::Box { hit_box_scale } => {
                let extents = half * *hit_box_scale;
                if extents.x <= 0.0 || extents.y <= 0.0 {
                    return Err(EngineError::InvalidShape(format!("box extents {extents}")));
                }
                ColliderBuilder::cuboid(extents.x, extents.y)
            }
            ShapeDesc::Polygon { vertices } => {
                let points: Vec<Vector> = vertices
                    .iter()
                    .map(|v| Vector::new(v.x / self.pixels_per_meter, v.y / self.pixels_per_meter))
                    .collect();
                ColliderBuilder::convex_hull(&points).ok_or_else(|| {
                    EngineError::InvalidShape(format!("degenerate polygon of {} vertices", vertices.len()))
                })?
            }
            ShapeDesc::Character => {
                if half.x <= 0.0 || half.y <= 0.0 {
                    return Err(EngineError::InvalidShape(format!("character extents {half}")));
                }
                let radius = half.x.min(half.y);
                ColliderBuilder::capsule_y(half.y - radius, radius)
            }
        }
        .density(desc.density)
        .friction(desc.friction)
        .sensor(desc.is_sensor)
        .active_events(ActiveEvents::COLLISION_EVENTS);

        let mut colliders = vec![main];
        if desc.is_character() {
            let foot = ColliderBuilder::cuboid(half.x * 0.6, FOOT_SENSOR_HALF_HEIGHT / self.pixels_per_meter)
                .translation(Vector::new(0.0, half.y))
                .sensor(true)
                .density(0.0)
                .active_events(ActiveEvents::COLLISION_EVENTS);
            colliders.push(foot);
        }
        Ok(colliders)
    }

    /// Adds a circle body of `radius` pixels.
    pub fn add_sphere(
        &mut self,
        actor: &Actor,
        radius: f32,
        density: f32,
        dynamic: bool,
        is_sensor: bool,
    ) -> Result<RigidBodyHandle, EngineError> {
        let body_type = if dynamic { BodyType::Dynamic } else { BodyType::Static };
        let desc = BodyDesc::new(ShapeDesc::Sphere { radius })
            .with_density(density)
            .with_body_type(body_type)
            .sensor(is_sensor)
            .fixed_rotation(false);
        self.add_body(actor, &desc)
    }

    /// Adds a box body covering the actor's bounds times `hit_box_scale`.
    pub fn add_box(
        &mut self,
        actor: &Actor,
        density: f32,
        body_type: BodyType,
        fixed_rotation: bool,
        is_sensor: bool,
        hit_box_scale: f32,
    ) -> Result<RigidBodyHandle, EngineError> {
        let desc = BodyDesc::new(ShapeDesc::Box { hit_box_scale })
            .with_density(density)
            .with_body_type(body_type)
            .sensor(is_sensor)
            .fixed_rotation(fixed_rotation);
        self.add_body(actor, &desc)
    }

    pub fn add_polygon(
        &mut self,
        actor: &Actor,
        vertices: Vec<Vec2>,
        density: f32,
        dynamic: bool,
        fixed_rotation: bool,
    ) -> Result<RigidBodyHandle, EngineError> {
        let body_type = if dynamic { BodyType::Dynamic } else { BodyType::Static };
        let desc = BodyDesc::new(ShapeDesc::Polygon { vertices })
            .with_density(density)
            .with_body_type(body_type)
            .fixed_rotation(fixed_rotation);
        self.add_body(actor, &desc)
    }

    /// Adds a dynamic, fixed-rotation character with a ground sensor.
    pub fn add_character(&mut self, actor: &Actor, density: f32) -> Result<RigidBodyHandle, EngineError> {
        let desc = BodyDesc::new(ShapeDesc::Character)
            .with_density(density)
            .with_body_type(BodyType::Dynamic)
            .fixed_rotation(true);
        self.add_body(actor, &desc)
    }

    /// Queues `actor`'s body for removal at the next
    /// [`remove_queued_items`](Self::remove_queued_items).
    pub fn remove_actor(&mut self, actor: ActorId) {
        if !self.removal_queue.contains(&actor) {
            debug!(%actor, "body removal queued");
            self.removal_queue.push(actor);
        }
    }

    /// Returns true if `actor` is waiting in the removal queue.
    pub fn is_removal_pending(&self, actor: ActorId) -> bool {
        self.removal_queue.contains(&actor)
    }

    /// Flushes the removal queue and returns the flushed actor ids.
    ///
    /// Must not be called while a step is running. Publishes
    /// [`Event::ActorRemoved`] for each id.
    pub fn remove_queued_items(&mut self) -> Vec<ActorId> {
        let queued = std::mem::take(&mut self.removal_queue);
        for &actor in &queued {
            if let Some(handle) = self.actor_to_body.remove(&actor) {
                self.body_to_actor.remove(&BodyKey::from(handle));
                self.characters.remove(&actor);
                self.end_contacts_of(actor);
                self.rigid_body_set.remove(
                    handle,
                    &mut self.island_manager,
                    &mut self.collider_set,
                    &mut self.impulse_joint_set,
                    &mut self.multibody_joint_set,
                    true,
                );
                debug!(%actor, "body removed");
            } else {
                debug!(%actor, "no body to remove");
            }
            self.bus.queue_event(Event::ActorRemoved(actor));
        }
        queued
    }

    pub fn find_body(&self, actor: ActorId) -> Result<RigidBodyHandle, EngineError> {
        self.actor_to_body
            .get(&actor)
            .copied()
            .ok_or(EngineError::NotFound(actor))
    }

    pub fn find_actor_id(&self, handle: RigidBodyHandle) -> Option<ActorId> {
        self.body_to_actor.get(&BodyKey::from(handle)).copied()
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.actor_to_body.contains_key(&actor)
    }

    pub fn is_character(&self, actor: ActorId) -> bool {
        self.characters.contains(&actor)
    }

    pub fn body_count(&self) -> usize {
        self.actor_to_body.len()
    }

    fn body(&self, actor: ActorId) -> Result<&RigidBody, EngineError> {
        let handle = self.find_body(actor)?;
        self.rigid_body_set
            .get(handle)
            .ok_or(EngineError::NotFound(actor))
    }

    fn body_mut(&mut self, actor: ActorId) -> Result<&mut RigidBody, EngineError> {
        let handle = self.find_body(actor)?;
        self.rigid_body_set
            .get_mut(handle)
            .ok_or(EngineError::NotFound(actor))
    }

    /// Lever arm from the body's center to `point` (pixels), in meters.
    fn lever_arm(&self, body: &RigidBody, point: Vec2) -> Vec2 {
        let point = self.to_meters(point);
        let center = body.translation();
        Vec2::new(point.x - center.x, point.y - center.y)
    }

    /// Applies `impulse` (N·s) at `point` (pixels).
    pub fn apply_impulse(&mut self, actor: ActorId, impulse: Vec2, point: Vec2) -> Result<(), EngineError> {
        let arm = self.lever_arm(self.body(actor)?, point);
        let body = self.body_mut(actor)?;
        body.apply_impulse(Vector::new(impulse.x, impulse.y), true);
        let torque = arm.perp_dot(impulse);
        if torque.abs() > f32::EPSILON {
            body.apply_torque_impulse(torque, true);
        }
        Ok(())
    }

    /// Adds `force` (N) at `point` (pixels) for the next step.
    pub fn apply_force(&mut self, actor: ActorId, force: Vec2, point: Vec2) -> Result<(), EngineError> {
        let arm = self.lever_arm(self.body(actor)?, point);
        let body = self.body_mut(actor)?;
        body.add_force(Vector::new(force.x, force.y), true);
        let torque = arm.perp_dot(force);
        if torque.abs() > f32::EPSILON {
            body.add_torque(torque, true);
        }
        Ok(())
    }

    /// Adds a torque (N·m) for the next step.
    pub fn apply_torque(&mut self, actor: ActorId, torque: f32) -> Result<(), EngineError> {
        self.body_mut(actor)?.add_torque(torque, true);
        Ok(())
    }

    /// Linear velocity in m/s.
    pub fn linear_velocity(&self, actor: ActorId) -> Result<Vec2, EngineError> {
        let linvel = self.body(actor)?.linvel();
        Ok(Vec2::new(linvel.x, linvel.y))
    }

    pub fn set_linear_velocity(&mut self, actor: ActorId, velocity: Vec2) -> Result<(), EngineError> {
        self.body_mut(actor)?
            .set_linvel(Vector::new(velocity.x, velocity.y), true);
        Ok(())
    }

    pub fn body_mass(&self, actor: ActorId) -> Result<f32, EngineError> {
        Ok(self.body(actor)?.mass())
    }

    /// Body center in pixels.
    pub fn body_position(&self, actor: ActorId) -> Result<Vec2, EngineError> {
        let translation = self.body(actor)?.translation();
        Ok(Vec2::new(translation.x, translation.y) * self.pixels_per_meter)
    }

    /// Body angle in radians.
    pub fn body_rotation(&self, actor: ActorId) -> Result<f32, EngineError> {
        Ok(self.body(actor)?.rotation().angle())
    }

    /// Returns true if any collider of `a` currently touches a collider of `b`.
    pub fn is_bodies_colliding(&self, a: ActorId, b: ActorId) -> bool {
        self.touching.contains_key(&ordered_pair(a, b))
    }

    /// Every actor with a body, in id order.
    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.actor_to_body.keys().copied()
    }

    pub fn to_meters(&self, pixels: Vec2) -> Vec2 {
        pixels / self.pixels_per_meter
    }

    pub fn pixels_per_meter(&self) -> f32 {
        self.pixels_per_meter
    }

    /// Returns the current simulation frame number.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Removes every body and clears the queues. Gravity, scale and the bus
    /// are kept.
    pub fn reset(&mut self) {
        let config = PhysicsConfig {
            gravity: Vec2::new(self.gravity.x, self.gravity.y),
            pixels_per_meter: self.pixels_per_meter,
            fixed_timestep: self.integration_parameters.dt,
            ..PhysicsConfig::default()
        };
        *self = Self::new(&config, Rc::clone(&self.bus));
    }
}

impl PhysicsPort for RefCell<PhysicsWorld> {
    fn linear_velocity(&self, actor: ActorId) -> Result<Vec2, EngineError> {
        self.borrow().linear_velocity(actor)
    }

    fn apply_impulse(&self, actor: ActorId, impulse: Vec2, point: Vec2) -> Result<(), EngineError> {
        self.borrow_mut().apply_impulse(actor, impulse, point)
    }
}
