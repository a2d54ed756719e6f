//! Error types shared by the physics world, the scene graph and the control path.
//!
//! None of these are fatal: lookups hand them back to the caller, which logs
//! and skips the operation for the current frame.

use crate::actor::ActorId;
use crate::event::EventType;
use crate::scene::NodeId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("No body or node registered for {0}")]
    NotFound(ActorId),

    #[error("Scene node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("{0} is already registered")]
    DuplicateRegistration(ActorId),

    #[error("Unexpected event payload: expected {expected:?}, got {actual:?}")]
    InvalidContact {
        expected: EventType,
        actual: EventType,
    },

    #[error("Scene node {node} is not a {expected} node")]
    NodeKindMismatch {
        node: NodeId,
        expected: &'static str,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),
}

/// Failure reported by a [`SceneRenderer`](crate::scene::SceneRenderer).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to draw {node}: {reason}")]
    DrawFailed { node: NodeId, reason: String },
}
