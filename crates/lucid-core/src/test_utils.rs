//! Shared fixtures for unit tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crossbeam_channel::Receiver;
use glam::Vec2;

use crate::actor::{Actor, ActorId, ActorKind};
use crate::audio::{AudioCmd, audio_channel};
use crate::config::ControlConfig;
use crate::control::{ControlComponent, ControlPorts};
use crate::error::EngineError;
use crate::event::{ContactSide, ContactSnapshot, EventBus};
use crate::input::KeyboardState;
use crate::ports::PhysicsPort;
use crate::scene::{Light, NodeId, SceneGraph, SceneNode};

/// Physics port returning a fixed velocity and recording impulses.
#[derive(Default)]
pub struct StubPhysics {
    pub velocity: Cell<Vec2>,
    pub impulses: RefCell<Vec<(ActorId, Vec2, Vec2)>>,
    /// Answer every call with `NotFound`.
    pub missing: Cell<bool>,
}

impl PhysicsPort for StubPhysics {
    fn linear_velocity(&self, actor: ActorId) -> Result<Vec2, EngineError> {
        if self.missing.get() {
            return Err(EngineError::NotFound(actor));
        }
        Ok(self.velocity.get())
    }

    fn apply_impulse(&self, actor: ActorId, impulse: Vec2, point: Vec2) -> Result<(), EngineError> {
        if self.missing.get() {
            return Err(EngineError::NotFound(actor));
        }
        self.impulses.borrow_mut().push((actor, impulse, point));
        Ok(())
    }
}

pub fn player() -> Actor {
    Actor::new(ActorId(1), ActorKind::Player)
        .with_position(Vec2::new(100.0, 300.0))
        .with_scale(Vec2::new(32.0, 64.0))
}

/// Contact between `a` and `b`. Sensor sides are flagged as characters.
pub fn contact(a: ActorId, a_sensor: bool, b: ActorId, b_sensor: bool, touching: bool) -> ContactSnapshot {
    ContactSnapshot {
        a: ContactSide {
            actor: a,
            is_sensor: a_sensor,
            is_character: a_sensor,
        },
        b: ContactSide {
            actor: b,
            is_sensor: b_sensor,
            is_character: b_sensor,
        },
        touching,
    }
}

/// A control component for [`player`] wired to a stub physics port, a real
/// scene with a sprite and a lantern, a keyboard and an audio channel.
pub struct ControlFixture {
    pub control: ControlComponent,
    pub bus: Rc<EventBus>,
    pub physics: Rc<StubPhysics>,
    pub scene: Rc<RefCell<SceneGraph>>,
    pub keyboard: Rc<KeyboardState>,
    pub audio_rx: Receiver<AudioCmd>,
    pub node: NodeId,
    pub lantern: NodeId,
}

impl ControlFixture {
    pub fn new() -> Self {
        let bus = Rc::new(EventBus::new());
        let physics = Rc::new(StubPhysics::default());
        let keyboard = Rc::new(KeyboardState::new());
        let (audio, audio_rx) = audio_channel();

        let mut graph = SceneGraph::new();
        let node = graph
            .add_child(
                ActorId(1),
                SceneNode::sprite("player", "textures/player.png", Vec2::new(32.0, 64.0)),
            )
            .unwrap();
        let lantern = graph
            .attach(node, SceneNode::light("lantern", Light::default()))
            .unwrap();
        let scene = Rc::new(RefCell::new(graph));

        let ports = ControlPorts {
            physics: physics.clone(),
            scene: scene.clone(),
            audio: Rc::new(audio),
            input: keyboard.clone(),
        };
        let control = ControlComponent::new(ActorId(1), ControlConfig::default(), ports, Rc::clone(&bus));

        Self {
            control,
            bus,
            physics,
            scene,
            keyboard,
            audio_rx,
            node,
            lantern,
        }
    }
}
