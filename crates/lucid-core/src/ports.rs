//! Narrow capability interfaces handed to per-actor components.
//!
//! Components receive these at construction instead of reaching for global
//! subsystems. Every method takes `&self`; implementations over shared
//! subsystems borrow them only for the duration of the call.

use glam::Vec2;

use crate::actor::ActorId;
use crate::error::EngineError;
use crate::input::Key;
use crate::scene::NodeId;

/// Body queries and impulses, keyed by actor.
pub trait PhysicsPort {
    /// Linear velocity in m/s.
    fn linear_velocity(&self, actor: ActorId) -> Result<Vec2, EngineError>;

    /// Applies `impulse` (N·s) at `point` (world pixels).
    fn apply_impulse(&self, actor: ActorId, impulse: Vec2, point: Vec2) -> Result<(), EngineError>;
}

/// The scene operations a component may perform on its own nodes.
pub trait ScenePort {
    fn node_for_actor(&self, actor: ActorId) -> Result<NodeId, EngineError>;

    /// Requests `name` on a sprite node. Fire-and-forget.
    fn activate_animation(&self, node: NodeId, name: &str) -> Result<(), EngineError>;

    fn set_reverse(&self, node: NodeId, reverse: bool) -> Result<(), EngineError>;

    fn is_reversed(&self, node: NodeId) -> Result<bool, EngineError>;

    /// Children of `node` that are light nodes, in child order.
    fn light_children(&self, node: NodeId) -> Result<Vec<NodeId>, EngineError>;

    fn set_local_position(&self, node: NodeId, position: Vec2) -> Result<(), EngineError>;
}

pub trait AudioPort {
    fn play_sound(&self, clip: &str);

    fn set_listener_position(&self, position: Vec2);
}

/// Polled keyboard state.
pub trait InputPort {
    fn is_key_pressed(&self, key: Key) -> bool;
}
