//! Actors: the identity that ties a physics body and a scene node together.

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Unique identifier of a game object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Gameplay classification of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActorKind {
    #[default]
    Empty,
    Player,
    Static,
    Enemy,
    Interactable,
}

/// A game object in world space.
///
/// `position` is the top-left corner and `scale` the size, both in pixels.
/// The actor owns neither its body nor its node: the physics world and the
/// scene graph look them up by [`ActorId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub kind: ActorKind,
    pub position: Vec2,
    pub scale: Vec2,
    pub rotation: f32,
}

impl Actor {
    pub fn new(id: ActorId, kind: ActorKind) -> Self {
        Self {
            id,
            kind,
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation: 0.0,
        }
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec2) -> Self {
        self.scale = scale;
        self
    }

    /// Center of the actor's bounding box, where its body sits.
    pub fn center(&self) -> Vec2 {
        self.position + self.scale * 0.5
    }

    /// Moves the actor so that its center lands on `center`.
    pub fn set_center(&mut self, center: Vec2) {
        self.position = center - self.scale * 0.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_roundtrip() {
        let mut actor = Actor::new(ActorId(1), ActorKind::Player)
            .with_position(Vec2::new(10.0, 20.0))
            .with_scale(Vec2::new(32.0, 64.0));
        assert_eq!(actor.center(), Vec2::new(26.0, 52.0));

        actor.set_center(Vec2::new(100.0, 100.0));
        assert_eq!(actor.position, Vec2::new(84.0, 68.0));
    }

    #[test]
    fn test_actor_id_display() {
        assert_eq!(ActorId(7).to_string(), "actor#7");
    }
}
