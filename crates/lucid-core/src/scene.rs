//! Scene graph: a rooted tree of transform, sprite and light nodes.
//!
//! Each actor owns at most one subtree, found through the actor→node map.
//! Satellite nodes (a lantern held by the player, say) are attached below the
//! actor's node with [`SceneGraph::attach`]. Removal is two-phase: nodes are
//! marked in [`SceneGraph::remove_child`] and torn down by
//! [`SceneGraph::flush_removals`] at the end of the frame.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::actor::ActorId;
use crate::error::{EngineError, RenderError};
use crate::ports::ScenePort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sprite {
    pub texture: String,
    /// Animation requested by gameplay. Playback belongs to the renderer.
    pub animation: Option<String>,
    /// Mirrored horizontally (facing left).
    pub reverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 64.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Transform,
    Sprite(Sprite),
    Light(Light),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Transform => "transform",
            NodeKind::Sprite(_) => "sprite",
            NodeKind::Light(_) => "light",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    /// Offset from the parent, in pixels.
    pub local_position: Vec2,
    pub rotation: f32,
    pub size: Vec2,
    actor: Option<ActorId>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    removed: bool,
}

impl SceneNode {
    fn with_kind(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            local_position: Vec2::ZERO,
            rotation: 0.0,
            size: Vec2::ZERO,
            actor: None,
            parent: None,
            children: Vec::new(),
            removed: false,
        }
    }

    pub fn transform(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Transform)
    }

    pub fn sprite(name: impl Into<String>, texture: impl Into<String>, size: Vec2) -> Self {
        let sprite = Sprite {
            texture: texture.into(),
            ..Sprite::default()
        };
        Self {
            size,
            ..Self::with_kind(name, NodeKind::Sprite(sprite))
        }
    }

    pub fn light(name: impl Into<String>, light: Light) -> Self {
        Self::with_kind(name, NodeKind::Light(light))
    }

    pub fn with_position(mut self, position: Vec2) -> Self {
        self.local_position = position;
        self
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn is_light(&self) -> bool {
        matches!(self.kind, NodeKind::Light(_))
    }

    pub fn sprite_state(&self) -> Option<&Sprite> {
        match &self.kind {
            NodeKind::Sprite(sprite) => Some(sprite),
            _ => None,
        }
    }
}

/// Accumulated world transform of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    pub translation: Vec2,
    pub rotation: f32,
}

impl Transform2D {
    pub const IDENTITY: Transform2D = Transform2D {
        translation: Vec2::ZERO,
        rotation: 0.0,
    };

    /// Composes a child's local offset and rotation onto this transform.
    pub fn then(&self, local_position: Vec2, local_rotation: f32) -> Self {
        Self {
            translation: self.translation + Vec2::from_angle(self.rotation).rotate(local_position),
            rotation: self.rotation + local_rotation,
        }
    }
}

/// Stack of world transforms used by the render walk.
#[derive(Debug, Clone)]
pub struct TransformStack {
    stack: Vec<Transform2D>,
}

impl Default for TransformStack {
    fn default() -> Self {
        Self {
            stack: vec![Transform2D::IDENTITY],
        }
    }
}

impl TransformStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top(&self) -> Transform2D {
        self.stack.last().copied().unwrap_or(Transform2D::IDENTITY)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Pushes the composition of the top with a local transform. The entry
    /// is popped when the guard drops.
    pub fn push(&mut self, local_position: Vec2, local_rotation: f32) -> TransformGuard<'_> {
        let next = self.top().then(local_position, local_rotation);
        self.stack.push(next);
        TransformGuard { stack: self }
    }
}

pub struct TransformGuard<'a> {
    stack: &'a mut TransformStack,
}

impl Deref for TransformGuard<'_> {
    type Target = TransformStack;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl DerefMut for TransformGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

impl Drop for TransformGuard<'_> {
    fn drop(&mut self) {
        self.stack.stack.pop();
    }
}

/// Consumes the scene during [`SceneGraph::render`]. The scene is read-only
/// for the whole walk.
pub trait SceneRenderer {
    fn draw(&mut self, id: NodeId, node: &SceneNode, world: Transform2D) -> Result<(), RenderError>;
}

#[derive(Debug)]
pub struct SceneGraph {
    nodes: BTreeMap<NodeId, SceneNode>,
    actor_nodes: BTreeMap<ActorId, NodeId>,
    pending_removal: Vec<NodeId>,
    next_id: u32,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::ROOT, SceneNode::transform("root"));
        Self {
            nodes,
            actor_nodes: BTreeMap::new(),
            pending_removal: Vec::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, parent: NodeId, mut node: SceneNode) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        node.parent = Some(parent);
        node.children.clear();
        node.removed = false;
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(id);
        }
        id
    }

    /// Adds `node` under the root as the subtree of `actor`.
    pub fn add_child(&mut self, actor: ActorId, mut node: SceneNode) -> Result<NodeId, EngineError> {
        if self.actor_nodes.contains_key(&actor) {
            return Err(EngineError::DuplicateRegistration(actor));
        }
        node.actor = Some(actor);
        let id = self.insert(NodeId::ROOT, node);
        self.actor_nodes.insert(actor, id);
        debug!(%actor, node = %id, "scene node added");
        Ok(id)
    }

    /// Adds `node` as the last child of `parent`, inheriting its actor.
    pub fn attach(&mut self, parent: NodeId, mut node: SceneNode) -> Result<NodeId, EngineError> {
        let parent_node = self.live_node(parent)?;
        node.actor = parent_node.actor;
        let id = self.insert(parent, node);
        trace!(%parent, node = %id, "scene node attached");
        Ok(id)
    }

    pub fn node_for_actor(&self, actor: ActorId) -> Result<NodeId, EngineError> {
        self.actor_nodes
            .get(&actor)
            .copied()
            .ok_or(EngineError::NotFound(actor))
    }

    pub fn node(&self, id: NodeId) -> Result<&SceneNode, EngineError> {
        self.nodes.get(&id).ok_or(EngineError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut SceneNode, EngineError> {
        self.nodes.get_mut(&id).ok_or(EngineError::NodeNotFound(id))
    }

    fn live_node(&self, id: NodeId) -> Result<&SceneNode, EngineError> {
        self.node(id)
            .and_then(|node| if node.removed { Err(EngineError::NodeNotFound(id)) } else { Ok(node) })
    }

    /// Children of `id` in insertion order.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], EngineError> {
        Ok(self.node(id)?.children())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn set_local_position(&mut self, id: NodeId, position: Vec2) -> Result<(), EngineError> {
        self.node_mut(id)?.local_position = position;
        Ok(())
    }

    fn sprite_mut(&mut self, id: NodeId) -> Result<&mut Sprite, EngineError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Sprite(sprite) => Ok(sprite),
            _ => Err(EngineError::NodeKindMismatch {
                node: id,
                expected: "sprite",
            }),
        }
    }

    pub fn activate_animation(&mut self, id: NodeId, name: &str) -> Result<(), EngineError> {
        let sprite = self.sprite_mut(id)?;
        if sprite.animation.as_deref() != Some(name) {
            trace!(node = %id, animation = name, "animation activated");
            sprite.animation = Some(name.to_string());
        }
        Ok(())
    }

    pub fn set_reverse(&mut self, id: NodeId, reverse: bool) -> Result<(), EngineError> {
        self.sprite_mut(id)?.reverse = reverse;
        Ok(())
    }

    pub fn is_reversed(&self, id: NodeId) -> Result<bool, EngineError> {
        self.node(id)?
            .sprite_state()
            .map(|sprite| sprite.reverse)
            .ok_or(EngineError::NodeKindMismatch {
                node: id,
                expected: "sprite",
            })
    }

    pub fn set_light(&mut self, id: NodeId, light: Light) -> Result<(), EngineError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Light(current) => {
                *current = light;
                Ok(())
            }
            _ => Err(EngineError::NodeKindMismatch {
                node: id,
                expected: "light",
            }),
        }
    }

    pub fn light_children(&self, id: NodeId) -> Result<Vec<NodeId>, EngineError> {
        let node = self.node(id)?;
        Ok(node
            .children
            .iter()
            .copied()
            .filter(|child| self.nodes.get(child).is_some_and(SceneNode::is_light))
            .collect())
    }

    /// Marks `actor`'s subtree for removal. It stays reachable until
    /// [`flush_removals`](Self::flush_removals) but is no longer rendered.
    pub fn remove_child(&mut self, actor: ActorId) -> Result<(), EngineError> {
        let root = self.node_for_actor(actor)?;
        if self.pending_removal.contains(&root) {
            return Ok(());
        }
        for id in self.subtree(root) {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.removed = true;
            }
        }
        self.pending_removal.push(root);
        debug!(%actor, node = %root, "scene subtree marked for removal");
        Ok(())
    }

    /// Tears down every marked subtree. Returns the number of nodes dropped.
    pub fn flush_removals(&mut self) -> usize {
        let mut dropped = 0;
        for root in std::mem::take(&mut self.pending_removal) {
            let parent = self.nodes.get(&root).and_then(SceneNode::parent);
            if let Some(parent_node) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
                parent_node.children.retain(|child| *child != root);
            }
            for id in self.subtree(root) {
                if let Some(node) = self.nodes.remove(&id)
                    && let Some(actor) = node.actor
                    && self.actor_nodes.get(&actor) == Some(&id)
                {
                    self.actor_nodes.remove(&actor);
                }
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "scene removals flushed");
        }
        dropped
    }

    /// `root` and all its descendants, depth-first.
    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                out.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Walks the scene depth-first from the root.
    pub fn render(&self, renderer: &mut dyn SceneRenderer) -> Result<(), RenderError> {
        let mut stack = TransformStack::new();
        self.render_with_stack(renderer, &mut stack)
    }

    /// Like [`render`](Self::render) but starting from an existing stack.
    /// The stack is left at its original depth, error or not.
    pub fn render_with_stack(
        &self,
        renderer: &mut dyn SceneRenderer,
        stack: &mut TransformStack,
    ) -> Result<(), RenderError> {
        self.render_node(NodeId::ROOT, renderer, stack)
    }

    fn render_node(
        &self,
        id: NodeId,
        renderer: &mut dyn SceneRenderer,
        stack: &mut TransformStack,
    ) -> Result<(), RenderError> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        if node.removed {
            return Ok(());
        }

        let mut guard = stack.push(node.local_position, node.rotation);
        renderer.draw(id, node, guard.top())?;
        for child in &node.children {
            self.render_node(*child, renderer, &mut guard)?;
        }
        Ok(())
    }
}

impl ScenePort for RefCell<SceneGraph> {
    fn node_for_actor(&self, actor: ActorId) -> Result<NodeId, EngineError> {
        self.borrow().node_for_actor(actor)
    }

    fn activate_animation(&self, node: NodeId, name: &str) -> Result<(), EngineError> {
        self.borrow_mut().activate_animation(node, name)
    }

    fn set_reverse(&self, node: NodeId, reverse: bool) -> Result<(), EngineError> {
        self.borrow_mut().set_reverse(node, reverse)
    }

    fn is_reversed(&self, node: NodeId) -> Result<bool, EngineError> {
        self.borrow().is_reversed(node)
    }

    fn light_children(&self, node: NodeId) -> Result<Vec<NodeId>, EngineError> {
        self.borrow().light_children(node)
    }

    fn set_local_position(&self, node: NodeId, position: Vec2) -> Result<(), EngineError> {
        self.borrow_mut().set_local_position(node, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        drawn: Vec<(NodeId, Vec2)>,
        fail_on: Option<NodeId>,
    }

    impl SceneRenderer for Recorder {
        fn draw(&mut self, id: NodeId, _node: &SceneNode, world: Transform2D) -> Result<(), RenderError> {
            if self.fail_on == Some(id) {
                return Err(RenderError::DrawFailed {
                    node: id,
                    reason: "texture missing".to_string(),
                });
            }
            self.drawn.push((id, world.translation));
            Ok(())
        }
    }

    fn player_scene() -> (SceneGraph, NodeId, NodeId) {
        let mut scene = SceneGraph::new();
        let body = scene
            .add_child(
                ActorId(1),
                SceneNode::sprite("player", "textures/player.png", Vec2::new(32.0, 64.0))
                    .with_position(Vec2::new(100.0, 50.0)),
            )
            .unwrap();
        let lantern = scene
            .attach(
                body,
                SceneNode::light("lantern", Light::default()).with_position(Vec2::new(12.0, 10.0)),
            )
            .unwrap();
        (scene, body, lantern)
    }

    #[test]
    fn test_add_child_and_lookup() {
        let (scene, body, lantern) = player_scene();
        assert_eq!(scene.node_for_actor(ActorId(1)).unwrap(), body);
        assert_eq!(scene.node(lantern).unwrap().actor(), Some(ActorId(1)));
        assert_eq!(scene.node(lantern).unwrap().parent(), Some(body));
        assert_eq!(scene.node_for_actor(ActorId(9)), Err(EngineError::NotFound(ActorId(9))));
    }

    #[test]
    fn test_duplicate_actor_node_rejected() {
        let (mut scene, _, _) = player_scene();
        let err = scene
            .add_child(ActorId(1), SceneNode::transform("again"))
            .unwrap_err();
        assert_eq!(err, EngineError::DuplicateRegistration(ActorId(1)));
    }

    #[test]
    fn test_attach_to_missing_parent() {
        let mut scene = SceneGraph::new();
        let err = scene
            .attach(NodeId(42), SceneNode::transform("orphan"))
            .unwrap_err();
        assert_eq!(err, EngineError::NodeNotFound(NodeId(42)));
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let (mut scene, body, lantern) = player_scene();
        let hat = scene.attach(body, SceneNode::transform("hat")).unwrap();
        let second = scene
            .attach(body, SceneNode::light("second", Light::default()))
            .unwrap();

        assert_eq!(scene.children(body).unwrap(), &[lantern, hat, second]);
        assert_eq!(scene.light_children(body).unwrap(), vec![lantern, second]);
    }

    #[test]
    fn test_sprite_operations() {
        let (mut scene, body, lantern) = player_scene();

        scene.activate_animation(body, "walk").unwrap();
        scene.set_reverse(body, true).unwrap();
        let sprite = scene.node(body).unwrap().sprite_state().unwrap();
        assert_eq!(sprite.animation.as_deref(), Some("walk"));
        assert!(scene.is_reversed(body).unwrap());

        assert_eq!(
            scene.activate_animation(lantern, "walk"),
            Err(EngineError::NodeKindMismatch {
                node: lantern,
                expected: "sprite",
            })
        );
        assert!(scene.set_light(lantern, Light { radius: 10.0, ..Light::default() }).is_ok());
    }

    #[test]
    fn test_removal_is_two_phase() {
        let (mut scene, body, lantern) = player_scene();
        let nodes_before = scene.len();

        scene.remove_child(ActorId(1)).unwrap();
        assert!(scene.node(lantern).unwrap().is_removed());
        assert_eq!(scene.node_for_actor(ActorId(1)).unwrap(), body);

        let mut recorder = Recorder::default();
        scene.render(&mut recorder).unwrap();
        assert_eq!(recorder.drawn.len(), 1, "only the root is drawn");

        assert_eq!(scene.flush_removals(), 2);
        assert_eq!(scene.len(), nodes_before - 2);
        assert!(scene.children(NodeId::ROOT).unwrap().is_empty());
        assert_eq!(scene.node_for_actor(ActorId(1)), Err(EngineError::NotFound(ActorId(1))));
        assert_eq!(scene.flush_removals(), 0);
    }

    #[test]
    fn test_render_composes_transforms_depth_first() {
        let (scene, body, lantern) = player_scene();
        let mut recorder = Recorder::default();

        scene.render(&mut recorder).unwrap();

        assert_eq!(
            recorder.drawn,
            vec![
                (NodeId::ROOT, Vec2::ZERO),
                (body, Vec2::new(100.0, 50.0)),
                (lantern, Vec2::new(112.0, 60.0)),
            ]
        );
    }

    #[test]
    fn test_failing_subtree_still_pops() {
        let (scene, _, lantern) = player_scene();
        let mut recorder = Recorder {
            fail_on: Some(lantern),
            ..Recorder::default()
        };
        let mut stack = TransformStack::new();

        let result = scene.render_with_stack(&mut recorder, &mut stack);

        assert!(matches!(result, Err(RenderError::DrawFailed { node, .. }) if node == lantern));
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top(), Transform2D::IDENTITY);
    }

    #[test]
    fn test_rotated_parent() {
        let parent = Transform2D {
            translation: Vec2::new(10.0, 0.0),
            rotation: std::f32::consts::FRAC_PI_2,
        };
        let child = parent.then(Vec2::new(1.0, 0.0), 0.0);
        assert!((child.translation - Vec2::new(10.0, 1.0)).length() < 1e-5);
    }
}
