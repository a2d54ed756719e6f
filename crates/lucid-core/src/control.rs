//! Player control: keyboard-driven movement, jumping and animation state.

use std::cell::Cell;
use std::rc::Rc;

use glam::Vec2;
use tracing::{debug, trace, warn};

use crate::actor::{Actor, ActorId};
use crate::config::ControlConfig;
use crate::error::EngineError;
use crate::event::{Event, EventBus, EventType, ListenerId};
use crate::ports::{AudioPort, InputPort, PhysicsPort, ScenePort};
use crate::scene::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationState {
    #[default]
    Idle,
    Walking,
    Jumping,
}

impl AnimationState {
    /// Jumping wins over walking, walking over idle.
    pub fn resolve(is_jumping: bool, moved: bool) -> Self {
        if is_jumping {
            AnimationState::Jumping
        } else if moved {
            AnimationState::Walking
        } else {
            AnimationState::Idle
        }
    }
}

/// Ground-sensor begins and ends seen by one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroundContacts {
    pub begins: u32,
    pub ends: u32,
}

impl GroundContacts {
    fn begin(&mut self) {
        self.begins += 1;
    }

    fn end(&mut self) {
        self.ends += 1;
        if self.ends >= self.begins {
            *self = Self::default();
        }
    }

    pub fn on_ground(&self) -> bool {
        self.begins > self.ends
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    pub max_velocity: f32,
    pub is_jumping: bool,
    pub moved: bool,
    pub animation: AnimationState,
    pub ground: GroundContacts,
}

impl ControlState {
    pub fn new(max_velocity: f32) -> Self {
        Self {
            max_velocity,
            is_jumping: false,
            moved: false,
            animation: AnimationState::Idle,
            ground: GroundContacts::default(),
        }
    }
}

/// Capabilities a control component works through.
#[derive(Clone)]
pub struct ControlPorts {
    pub physics: Rc<dyn PhysicsPort>,
    pub scene: Rc<dyn ScenePort>,
    pub audio: Rc<dyn AudioPort>,
    pub input: Rc<dyn InputPort>,
}

/// Drives one actor from keyboard input.
///
/// Subscribes to ground contacts on construction and unsubscribes on drop.
pub struct ControlComponent {
    actor: ActorId,
    config: ControlConfig,
    state: Rc<Cell<ControlState>>,
    ports: ControlPorts,
    bus: Rc<EventBus>,
    begin_listener: ListenerId,
    end_listener: ListenerId,
}

impl std::fmt::Debug for ControlComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlComponent")
            .field("actor", &self.actor)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl ControlComponent {
    pub fn new(actor: ActorId, config: ControlConfig, ports: ControlPorts, bus: Rc<EventBus>) -> Self {
        let state = Rc::new(Cell::new(ControlState::new(config.max_velocity)));

        let begin_state = Rc::clone(&state);
        let begin_listener = bus.subscribe(EventType::PostCollisionAdd, move |event| {
            if let Err(err) = on_collision_begin(&begin_state, actor, event) {
                warn!(%actor, %err, "collision begin ignored");
            }
        });
        let end_state = Rc::clone(&state);
        let end_listener = bus.subscribe(EventType::PostCollisionRemove, move |event| {
            if let Err(err) = on_collision_end(&end_state, actor, event) {
                warn!(%actor, %err, "collision end ignored");
            }
        });
        debug!(%actor, "control component attached");

        Self {
            actor,
            config,
            state,
            ports,
            bus,
            begin_listener,
            end_listener,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn state(&self) -> ControlState {
        self.state.get()
    }

    pub fn on_ground(&self) -> bool {
        self.state.get().ground.on_ground()
    }

    /// Runs one frame of input handling for `owner`.
    ///
    /// A missing body or scene node skips the affected steps for this frame.
    pub fn update(&mut self, owner: &Actor, dt: f32) {
        let velocity = match self.ports.physics.linear_velocity(self.actor) {
            Ok(velocity) => velocity,
            Err(err) => {
                debug!(actor = %self.actor, %err, "control update skipped");
                return;
            }
        };
        let node = self.ports.scene.node_for_actor(self.actor).ok();
        let mut state = self.state.get();
        state.moved = false;

        let bindings = self.config.bindings;
        let step = state.max_velocity * self.config.move_impulse_scale * dt;
        let center = owner.center();

        // The cap only gates the push; intent and facing follow the key.
        if self.ports.input.is_key_pressed(bindings.left) {
            if velocity.x > -state.max_velocity {
                self.push(Vec2::new(-step, 0.0), center);
            }
            state.moved = true;
            self.face(node, true);
        }
        if self.ports.input.is_key_pressed(bindings.right) {
            if velocity.x < state.max_velocity {
                self.push(Vec2::new(step, 0.0), center);
            }
            state.moved = true;
            self.face(node, false);
        }

        if self.ports.input.is_key_pressed(bindings.jump) && !state.is_jumping {
            self.ports.audio.play_sound(&self.config.jump_clip);
            if velocity.y >= self.config.jump_velocity_threshold {
                self.push(Vec2::new(0.0, -self.config.jump_impulse), center);
            } else {
                trace!(actor = %self.actor, vy = velocity.y, "jump impulse suppressed");
            }
            state.is_jumping = true;
        }

        state.animation = AnimationState::resolve(state.is_jumping, state.moved);
        self.state.set(state);

        if let Some(node) = node {
            let name = match state.animation {
                AnimationState::Idle => &self.config.animations.idle,
                AnimationState::Walking => &self.config.animations.walk,
                AnimationState::Jumping => &self.config.animations.jump,
            };
            if let Err(err) = self.ports.scene.activate_animation(node, name) {
                debug!(actor = %self.actor, %err, "animation not applied");
            }
            if let Err(err) = self.place_lights(node) {
                debug!(actor = %self.actor, %err, "lights not placed");
            }
        }

        self.ports.audio.set_listener_position(owner.position);
    }

    fn push(&self, impulse: Vec2, point: Vec2) {
        if let Err(err) = self.ports.physics.apply_impulse(self.actor, impulse, point) {
            debug!(actor = %self.actor, %err, "impulse dropped");
        }
    }

    fn face(&self, node: Option<NodeId>, reverse: bool) {
        if let Some(node) = node
            && let Err(err) = self.ports.scene.set_reverse(node, reverse)
        {
            debug!(actor = %self.actor, %err, "facing not applied");
        }
    }

    /// Keeps held lights on the side the sprite faces.
    fn place_lights(&self, node: NodeId) -> Result<(), EngineError> {
        let reversed = self.ports.scene.is_reversed(node).unwrap_or(false);
        let offset = self.config.lantern_offset;
        let offset = if reversed { Vec2::new(-offset.x, offset.y) } else { offset };
        for light in self.ports.scene.light_children(node)? {
            self.ports.scene.set_local_position(light, offset)?;
        }
        Ok(())
    }
}

impl Drop for ControlComponent {
    fn drop(&mut self) {
        self.bus
            .unsubscribe(self.begin_listener, EventType::PostCollisionAdd);
        self.bus
            .unsubscribe(self.end_listener, EventType::PostCollisionRemove);
        debug!(actor = %self.actor, "control component detached");
    }
}

/// Landing: the first touching ground contact ends the jump.
fn on_collision_begin(state: &Cell<ControlState>, actor: ActorId, event: &Event) -> Result<(), EngineError> {
    let Event::PostCollisionAdd(contact) = event else {
        return Err(EngineError::InvalidContact {
            expected: EventType::PostCollisionAdd,
            actual: event.event_type(),
        });
    };
    if !contact.touching || !contact.is_sensor_contact_for(actor) {
        return Ok(());
    }

    let mut current = state.get();
    current.ground.begin();
    current.is_jumping = false;
    current.animation = AnimationState::Idle;
    state.set(current);
    trace!(%actor, "landed");
    Ok(())
}

fn on_collision_end(state: &Cell<ControlState>, actor: ActorId, event: &Event) -> Result<(), EngineError> {
    let Event::PostCollisionRemove(contact) = event else {
        return Err(EngineError::InvalidContact {
            expected: EventType::PostCollisionRemove,
            actual: event.event_type(),
        });
    };
    if !contact.is_sensor_contact_for(actor) {
        return Ok(());
    }

    let mut current = state.get();
    current.ground.end();
    state.set(current);
    Ok(())
}
