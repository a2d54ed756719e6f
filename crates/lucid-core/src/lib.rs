//! Lucid Core Library
//!
//! 2D engine core: an event bus, a `Rapier2D` physics world keyed by actor,
//! a scene graph, and the keyboard control component that ties them together.
//!
//! Everything runs on one thread. Subsystems are shared through
//! `Rc<RefCell<_>>`; components reach them through the narrow traits in
//! [`ports`].

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod actor;
pub mod audio;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod event;
pub mod input;
pub mod physics;
pub mod ports;
pub mod scene;

#[cfg(test)]
pub(crate) mod test_utils;

pub use actor::{Actor, ActorId, ActorKind};
pub use audio::{AudioChannel, AudioCmd, audio_channel};
pub use config::{ConfigError, ControlConfig, EngineConfig, PhysicsConfig};
pub use control::{AnimationState, ControlComponent, ControlPorts, ControlState};
pub use engine::Engine;
pub use error::{EngineError, RenderError};
pub use event::{ContactSide, ContactSnapshot, Event, EventBus, EventType, ListenerId};
pub use input::{Key, KeyboardState};
pub use physics::{BodyDesc, BodyType, PHYSICS_DT, PhysicsWorld, ShapeDesc};
pub use ports::{AudioPort, InputPort, PhysicsPort, ScenePort};
pub use scene::{
    Light, NodeId, NodeKind, SceneGraph, SceneNode, SceneRenderer, Sprite, Transform2D,
    TransformStack,
};
