//! Engine loop: owns the actors and the subsystems and fixes the per-frame
//! order.
//!
//! One tick runs, in order:
//! 1. leftover queued events are dispatched;
//! 2. control components read input and push their bodies;
//! 3. the physics world steps and queues collision events;
//! 4. collision events are dispatched;
//! 5. deferred removals are flushed (physics, scene, actor records);
//! 6. body positions are copied to actors and their scene nodes.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use glam::Vec2;
use rapier2d::prelude::RigidBodyHandle;
use tracing::{debug, info, trace, warn};

use crate::actor::{Actor, ActorId, ActorKind};
use crate::config::EngineConfig;
use crate::control::{ControlComponent, ControlPorts};
use crate::error::{EngineError, RenderError};
use crate::event::{Event, EventBus, EventType, ListenerId};
use crate::physics::{BodyDesc, PhysicsWorld};
use crate::ports::{AudioPort, InputPort};
use crate::scene::{NodeId, SceneGraph, SceneNode, SceneRenderer};

pub struct Engine {
    config: EngineConfig,
    bus: Rc<EventBus>,
    physics: Rc<RefCell<PhysicsWorld>>,
    scene: Rc<RefCell<SceneGraph>>,
    audio: Rc<dyn AudioPort>,
    input: Rc<dyn InputPort>,
    actors: BTreeMap<ActorId, Actor>,
    controls: BTreeMap<ActorId, ControlComponent>,
    /// Actors whose destruction was requested through the bus.
    destroyed: Rc<RefCell<Vec<ActorId>>>,
    destroy_listener: ListenerId,
    next_actor_id: u32,
    frame: u64,
    accumulator: f32,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("frame", &self.frame)
            .field("actors", &self.actors.len())
            .field("controls", &self.controls.len())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: EngineConfig, audio: Rc<dyn AudioPort>, input: Rc<dyn InputPort>) -> Self {
        let bus = Rc::new(EventBus::new());
        let physics = Rc::new(RefCell::new(PhysicsWorld::new(&config.physics, Rc::clone(&bus))));
        let scene = Rc::new(RefCell::new(SceneGraph::new()));
        let destroyed = Rc::new(RefCell::new(Vec::new()));

        // Weak: the physics world holds the bus, the bus holds this handler.
        let physics_ref = Rc::downgrade(&physics);
        let scene_ref = Rc::downgrade(&scene);
        let destroyed_ref = Rc::clone(&destroyed);
        let destroy_listener = bus.subscribe(EventType::DestroyActor, move |event| {
            let Event::DestroyActor(actor) = event else {
                warn!(?event, "unexpected payload for DestroyActor");
                return;
            };
            if let Some(physics) = physics_ref.upgrade() {
                physics.borrow_mut().remove_actor(*actor);
            }
            if let Some(scene) = scene_ref.upgrade()
                && let Err(err) = scene.borrow_mut().remove_child(*actor)
            {
                trace!(%actor, %err, "actor has no scene node");
            }
            destroyed_ref.borrow_mut().push(*actor);
        });

        info!(
            pixels_per_meter = config.physics.pixels_per_meter,
            timestep = config.physics.fixed_timestep,
            "engine created"
        );

        Self {
            config,
            bus,
            physics,
            scene,
            audio,
            input,
            actors: BTreeMap::new(),
            controls: BTreeMap::new(),
            destroyed,
            destroy_listener,
            next_actor_id: 1,
            frame: 0,
            accumulator: 0.0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    pub fn physics(&self) -> &Rc<RefCell<PhysicsWorld>> {
        &self.physics
    }

    pub fn scene(&self) -> &Rc<RefCell<SceneGraph>> {
        &self.scene
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn create_actor(&mut self, kind: ActorKind, position: Vec2, scale: Vec2) -> ActorId {
        let id = ActorId(self.next_actor_id);
        self.next_actor_id += 1;
        let actor = Actor::new(id, kind)
            .with_position(position)
            .with_scale(scale);
        self.actors.insert(id, actor);
        debug!(actor = %id, ?kind, "actor created");
        id
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    fn require_actor(&self, id: ActorId) -> Result<&Actor, EngineError> {
        self.actors.get(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn add_body(&mut self, id: ActorId, desc: &BodyDesc) -> Result<RigidBodyHandle, EngineError> {
        let actor = self.require_actor(id)?;
        self.physics.borrow_mut().add_body(actor, desc)
    }

    /// Adds the actor's scene subtree root, placed at the actor's position.
    pub fn add_node(&mut self, id: ActorId, node: SceneNode) -> Result<NodeId, EngineError> {
        let position = self.require_actor(id)?.position;
        self.scene
            .borrow_mut()
            .add_child(id, node.with_position(position))
    }

    /// Adds a satellite node below `parent`.
    pub fn attach_node(&mut self, parent: NodeId, node: SceneNode) -> Result<NodeId, EngineError> {
        self.scene.borrow_mut().attach(parent, node)
    }

    /// Gives the actor keyboard control.
    pub fn attach_control(&mut self, id: ActorId) -> Result<(), EngineError> {
        self.require_actor(id)?;
        if self.controls.contains_key(&id) {
            return Err(EngineError::DuplicateRegistration(id));
        }
        let ports = ControlPorts {
            physics: self.physics.clone(),
            scene: self.scene.clone(),
            audio: Rc::clone(&self.audio),
            input: Rc::clone(&self.input),
        };
        let control = ControlComponent::new(id, self.config.control.clone(), ports, Rc::clone(&self.bus));
        self.controls.insert(id, control);
        Ok(())
    }

    pub fn control(&self, id: ActorId) -> Option<&ControlComponent> {
        self.controls.get(&id)
    }

    /// Requests destruction. Body, node and record go away at the end of
    /// the tick that dispatches the request.
    pub fn destroy_actor(&self, id: ActorId) {
        self.bus.queue_event(Event::DestroyActor(id));
    }

    /// Runs one fixed step of `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        self.bus.update();

        for (id, control) in &mut self.controls {
            if let Some(actor) = self.actors.get(id) {
                control.update(actor, dt);
            }
        }

        self.physics.borrow_mut().step(dt);
        self.bus.update();

        self.flush_removals();
        self.sync_visible_scene();
        self.frame += 1;
    }

    /// Feeds wall-clock time into the fixed-step accumulator. Returns the
    /// number of ticks run.
    pub fn advance(&mut self, frame_time: f32) -> u32 {
        let step = self.config.physics.fixed_timestep;
        let max_substeps = self.config.physics.max_substeps;
        self.accumulator += frame_time;

        let mut ticks = 0;
        while self.accumulator >= step && ticks < max_substeps {
            self.tick(step);
            self.accumulator -= step;
            ticks += 1;
        }
        if self.accumulator >= step {
            trace!(backlog = self.accumulator, "dropping simulation backlog");
            self.accumulator = 0.0;
        }
        ticks
    }

    fn flush_removals(&mut self) {
        let mut removed = self.physics.borrow_mut().remove_queued_items();
        self.scene.borrow_mut().flush_removals();
        removed.append(&mut self.destroyed.borrow_mut());

        for id in removed {
            self.controls.remove(&id);
            if self.actors.remove(&id).is_some() {
                debug!(actor = %id, "actor destroyed");
            }
        }
    }

    /// Copies body transforms to actors and their scene nodes.
    pub fn sync_visible_scene(&mut self) {
        let physics = self.physics.borrow();
        let mut scene = self.scene.borrow_mut();
        for actor in self.actors.values_mut() {
            if let (Ok(center), Ok(rotation)) = (physics.body_position(actor.id), physics.body_rotation(actor.id)) {
                actor.set_center(center);
                actor.rotation = rotation;
            }
            let Ok(node) = scene.node_for_actor(actor.id) else {
                continue;
            };
            if let Ok(node) = scene.node_mut(node) {
                node.local_position = actor.position;
                node.rotation = actor.rotation;
            }
        }
    }

    pub fn render(&self, renderer: &mut dyn SceneRenderer) -> Result<(), RenderError> {
        self.scene.borrow().render(renderer)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.bus
            .unsubscribe(self.destroy_listener, EventType::DestroyActor);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::audio::audio_channel;
    use crate::control::AnimationState;
    use crate::input::{Key, KeyboardState};
    use crate::physics::{BodyType, PHYSICS_DT, ShapeDesc};
    use crate::scene::{Light, Transform2D};

    struct World {
        engine: Engine,
        keyboard: Rc<KeyboardState>,
        floor: ActorId,
        player: ActorId,
    }

    fn world() -> World {
        let keyboard = Rc::new(KeyboardState::new());
        let (audio, _rx) = audio_channel();
        let mut engine = Engine::new(EngineConfig::default(), Rc::new(audio), keyboard.clone());

        let floor = engine.create_actor(ActorKind::Static, Vec2::new(0.0, 400.0), Vec2::new(800.0, 40.0));
        engine
            .add_body(floor, &BodyDesc::new(ShapeDesc::Box { hit_box_scale: 1.0 }))
            .unwrap();

        let player = engine.create_actor(ActorKind::Player, Vec2::new(100.0, 331.0), Vec2::new(32.0, 64.0));
        engine
            .add_body(
                player,
                &BodyDesc::new(ShapeDesc::Character).with_body_type(BodyType::Dynamic),
            )
            .unwrap();
        let node = engine
            .add_node(
                player,
                SceneNode::sprite("player", "textures/player.png", Vec2::new(32.0, 64.0)),
            )
            .unwrap();
        engine
            .attach_node(node, SceneNode::light("lantern", Light::default()))
            .unwrap();
        engine.attach_control(player).unwrap();

        World {
            engine,
            keyboard,
            floor,
            player,
        }
    }

    fn run_until(engine: &mut Engine, max_ticks: u32, mut done: impl FnMut(&Engine) -> bool) -> bool {
        for _ in 0..max_ticks {
            engine.tick(PHYSICS_DT);
            if done(engine) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_jump_and_land() {
        let World {
            mut engine,
            keyboard,
            floor,
            player,
        } = world();
        // Still airborne after two ticks, with mass properties settled.
        run_until(&mut engine, 2, |_| false);

        keyboard.press(Key::Space);
        engine.tick(PHYSICS_DT);
        keyboard.release(Key::Space);
        let state = engine.control(player).unwrap().state();
        assert!(state.is_jumping);
        assert_eq!(state.animation, AnimationState::Jumping);
        assert!(engine.physics().borrow().linear_velocity(player).unwrap().y < 0.0);

        let landed = run_until(&mut engine, 240, |engine| {
            !engine.control(player).unwrap().state().is_jumping
        });
        assert!(landed);

        engine.tick(PHYSICS_DT);
        let control = engine.control(player).unwrap();
        assert_eq!(control.state().animation, AnimationState::Idle);
        assert!(control.on_ground());
        assert!(engine.physics().borrow().is_bodies_colliding(floor, player));

        // The capsule is still pushing out of the floor right after landing.
        let settled = run_until(&mut engine, 60, |engine| {
            engine
                .physics()
                .borrow()
                .linear_velocity(player)
                .is_ok_and(|v| v.length() < 0.05)
        });
        assert!(settled);
        run_until(&mut engine, 10, |_| false);
        let bottom = engine.actor(player).unwrap().position.y + 64.0;
        assert!((bottom - 400.0).abs() < 2.0, "feet at {bottom}");

        let scene = engine.scene().borrow();
        let node = scene.node_for_actor(player).unwrap();
        let sprite = scene.node(node).unwrap().sprite_state().unwrap();
        assert_eq!(sprite.animation.as_deref(), Some("idle"));
    }

    #[test]
    fn test_walk_moves_player() {
        let World {
            mut engine,
            keyboard,
            player,
            ..
        } = world();
        run_until(&mut engine, 60, |_| false);
        let start = engine.actor(player).unwrap().position.x;

        keyboard.press(Key::D);
        run_until(&mut engine, 30, |_| false);

        assert!(engine.actor(player).unwrap().position.x > start);
        assert_eq!(
            engine.control(player).unwrap().state().animation,
            AnimationState::Walking
        );
        let max = engine.config().control.max_velocity;
        let vx = engine.physics().borrow().linear_velocity(player).unwrap().x;
        assert!(vx <= max + 0.2, "speed {vx}");

        let scene = engine.scene().borrow();
        let node = scene.node_for_actor(player).unwrap();
        assert_eq!(scene.node(node).unwrap().local_position, engine.actor(player).unwrap().position);
    }

    #[test]
    fn test_destroy_requested_from_handler() {
        let World {
            mut engine,
            floor,
            player,
            ..
        } = world();
        let landed = Rc::new(Cell::new(false));
        let body_present = Rc::new(Cell::new(false));

        let bus = Rc::clone(engine.bus());
        let physics = Rc::clone(engine.physics());
        let (landed_in, present_in) = (Rc::clone(&landed), Rc::clone(&body_present));
        engine.bus().subscribe(EventType::PostCollisionAdd, move |event| {
            if let Event::PostCollisionAdd(contact) = event
                && contact.is_sensor_contact_for(player)
                && !landed_in.get()
            {
                landed_in.set(true);
                present_in.set(physics.borrow().contains(player));
                bus.queue_event(Event::DestroyActor(player));
            }
        });

        assert!(run_until(&mut engine, 120, |_| landed.get()));
        assert!(body_present.get());
        assert!(engine.actor(player).is_some());

        engine.tick(PHYSICS_DT);
        assert!(engine.actor(player).is_none());
        assert!(engine.control(player).is_none());
        assert!(!engine.physics().borrow().contains(player));
        assert!(engine.scene().borrow().node_for_actor(player).is_err());
        assert_eq!(engine.bus().listener_count(EventType::PostCollisionAdd), 1);
        assert!(engine.actor(floor).is_some());
    }

    #[test]
    fn test_destroying_the_ground_lifts_the_player() {
        let World {
            mut engine,
            floor,
            player,
            ..
        } = world();

        assert!(run_until(&mut engine, 120, |engine| {
            engine.control(player).is_some_and(ControlComponent::on_ground)
        }));

        engine.destroy_actor(floor);
        engine.tick(PHYSICS_DT);
        assert!(engine.actor(floor).is_none());
        engine.tick(PHYSICS_DT);

        let control = engine.control(player).unwrap();
        assert!(!control.on_ground());
        assert!(!engine.physics().borrow().is_bodies_colliding(floor, player));
    }

    #[test]
    fn test_actor_removed_follows_the_flush() {
        let World {
            mut engine,
            floor,
            player,
            ..
        } = world();
        let removed = Rc::new(RefCell::new(Vec::new()));
        let removed_in = Rc::clone(&removed);
        engine.bus().subscribe(EventType::ActorRemoved, move |event| {
            if let Event::ActorRemoved(actor) = event {
                removed_in.borrow_mut().push(*actor);
            }
        });

        engine.destroy_actor(player);
        engine.tick(PHYSICS_DT);
        assert!(engine.actor(player).is_none());
        assert!(removed.borrow().is_empty());

        engine.tick(PHYSICS_DT);
        assert_eq!(*removed.borrow(), vec![player]);
        assert!(engine.actor(floor).is_some());
    }

    #[test]
    fn test_destroy_actor_without_body() {
        let keyboard = Rc::new(KeyboardState::new());
        let (audio, _rx) = audio_channel();
        let mut engine = Engine::new(EngineConfig::default(), Rc::new(audio), keyboard);
        let prop = engine.create_actor(ActorKind::Empty, Vec2::new(10.0, 10.0), Vec2::ONE);
        engine.add_node(prop, SceneNode::transform("prop")).unwrap();

        engine.destroy_actor(prop);
        assert!(engine.actor(prop).is_some());
        engine.tick(PHYSICS_DT);

        assert!(engine.actor(prop).is_none());
        assert!(engine.scene().borrow().is_empty());
    }

    #[test]
    fn test_advance_uses_fixed_steps() {
        let World { mut engine, .. } = world();

        assert_eq!(engine.advance(PHYSICS_DT * 0.25), 0);
        assert_eq!(engine.frame(), 0);
        assert_eq!(engine.advance(PHYSICS_DT), 1);
        assert_eq!(engine.frame(), 1);

        // A long stall is capped and the backlog dropped.
        assert_eq!(engine.advance(1.0), 5);
        assert_eq!(engine.advance(0.0), 0);
        assert_eq!(engine.frame(), 6);
    }

    #[test]
    fn test_attach_control_requires_actor() {
        let World { mut engine, player, .. } = world();
        assert_eq!(
            engine.attach_control(ActorId(99)),
            Err(EngineError::NotFound(ActorId(99)))
        );
        assert_eq!(
            engine.attach_control(player),
            Err(EngineError::DuplicateRegistration(player))
        );
    }

    #[test]
    fn test_render_walks_scene() {
        struct Count(usize);
        impl SceneRenderer for Count {
            fn draw(&mut self, _id: NodeId, _node: &SceneNode, _world: Transform2D) -> Result<(), RenderError> {
                self.0 += 1;
                Ok(())
            }
        }

        let World { engine, .. } = world();
        let mut count = Count(0);
        engine.render(&mut count).unwrap();
        assert_eq!(count.0, 3);
    }
}
