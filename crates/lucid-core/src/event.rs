//! Typed publish/subscribe bus.
//!
//! Decouples physics from gameplay and gameplay from presentation. Events are
//! immutable values with a closed payload ([`Event`]) and a tag
//! ([`EventType`]) used to route them to listeners.
//!
//! Delivery is either immediate ([`EventBus::trigger_event`]) or queued
//! ([`EventBus::queue_event`], drained by [`EventBus::update`]). Any event
//! published while a dispatch is running is queued, and a drain only delivers
//! the events that were queued before it started. A handler that publishes
//! therefore never recurses into the bus; its events wait for the next drain.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::actor::ActorId;

/// Routing tag of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    PostCollisionAdd,
    PostCollisionRemove,
    DestroyActor,
    ActorRemoved,
}

/// One side of a contact, captured while the physics record was still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactSide {
    pub actor: ActorId,
    pub is_sensor: bool,
    pub is_character: bool,
}

/// Snapshot of a contact between two fixtures.
///
/// The physics engine's own contact record is only valid inside its callback;
/// this copy carries what gameplay needs afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactSnapshot {
    pub a: ContactSide,
    pub b: ContactSide,
    pub touching: bool,
}

impl ContactSnapshot {
    /// True when exactly one of the two fixtures is a sensor.
    pub fn exactly_one_sensor(&self) -> bool {
        self.a.is_sensor != self.b.is_sensor
    }

    /// True when one of the two bodies is a tracked character.
    pub fn involves_character(&self) -> bool {
        self.a.is_character || self.b.is_character
    }

    /// The side belonging to `actor`, if any.
    pub fn side_of(&self, actor: ActorId) -> Option<&ContactSide> {
        if self.a.actor == actor {
            Some(&self.a)
        } else if self.b.actor == actor {
            Some(&self.b)
        } else {
            None
        }
    }

    /// True when `actor`'s sensor touches a solid fixture.
    ///
    /// This is the ground/trigger signal: sensor-vs-sensor and solid-vs-solid
    /// pairs never qualify.
    pub fn is_sensor_contact_for(&self, actor: ActorId) -> bool {
        self.exactly_one_sensor() && self.side_of(actor).is_some_and(|side| side.is_sensor)
    }
}

/// Engine event with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A sensor/solid pair involving a character started touching.
    PostCollisionAdd(ContactSnapshot),
    /// A sensor/solid pair involving a character stopped touching.
    PostCollisionRemove(ContactSnapshot),
    /// Request to destroy an actor at the next safe point.
    DestroyActor(ActorId),
    /// The actor's body was flushed from the physics world.
    ///
    /// Queued by the flush, so subscribers see it on the next dispatch, when
    /// the engine has already dropped the actor's record and control. Game
    /// code uses it to release whatever it keyed by the id.
    ActorRemoved(ActorId),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::PostCollisionAdd(_) => EventType::PostCollisionAdd,
            Self::PostCollisionRemove(_) => EventType::PostCollisionRemove,
            Self::DestroyActor(_) => EventType::DestroyActor,
            Self::ActorRemoved(_) => EventType::ActorRemoved,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Handler = Rc<RefCell<dyn FnMut(&Event)>>;

struct Listener {
    id: ListenerId,
    handler: Handler,
}

/// Single-threaded event bus.
///
/// All methods take `&self` so handlers holding an `Rc<EventBus>` can publish
/// or unsubscribe while a dispatch is in progress.
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<BTreeMap<EventType, Vec<Listener>>>,
    queue: RefCell<VecDeque<Event>>,
    next_id: Cell<u64>,
    dispatch_depth: Cell<u32>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_types", &self.listeners.borrow().len())
            .field("queued", &self.queue.borrow().len())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events tagged `event_type`.
    ///
    /// Handlers of one type run in registration order.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: impl FnMut(&Event) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        self.listeners
            .borrow_mut()
            .entry(event_type)
            .or_default()
            .push(Listener {
                id,
                handler: Rc::new(RefCell::new(handler)),
            });
        debug!(?event_type, listener = id.0, "listener subscribed");
        id
    }

    /// Removes a listener. Returns false (and does nothing) if it was not
    /// registered for `event_type`.
    pub fn unsubscribe(&self, listener: ListenerId, event_type: EventType) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != listener);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(&event_type);
        }
        if removed {
            debug!(?event_type, listener = listener.0, "listener unsubscribed");
        }
        removed
    }

    /// Number of listeners registered for `event_type`.
    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners
            .borrow()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Queues `event` for the next [`update`](Self::update).
    pub fn queue_event(&self, event: Event) {
        trace!(event_type = ?event.event_type(), "event queued");
        self.queue.borrow_mut().push_back(event);
    }

    /// Alias of [`queue_event`](Self::queue_event).
    pub fn publish(&self, event: Event) {
        self.queue_event(event);
    }

    /// Delivers `event` immediately and returns the number of handlers run.
    ///
    /// Called from inside a handler, the event is queued instead and 0 is
    /// returned.
    pub fn trigger_event(&self, event: &Event) -> usize {
        if self.dispatch_depth.get() > 0 {
            self.queue_event(event.clone());
            return 0;
        }
        self.dispatch(event)
    }

    /// Drops every queued event of `event_type`. Returns how many were dropped.
    pub fn abort_event(&self, event_type: EventType) -> usize {
        let mut queue = self.queue.borrow_mut();
        let before = queue.len();
        queue.retain(|e| e.event_type() != event_type);
        before - queue.len()
    }

    /// Number of events waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Delivers the events queued so far, in order.
    ///
    /// Events queued by handlers during this call stay queued for the next
    /// call. Returns the number of events delivered.
    pub fn update(&self) -> usize {
        let batch = std::mem::take(&mut *self.queue.borrow_mut());
        let count = batch.len();
        for event in &batch {
            self.dispatch(event);
        }
        count
    }

    fn dispatch(&self, event: &Event) -> usize {
        let event_type = event.event_type();
        // Snapshot so handlers may (un)subscribe while we iterate.
        let snapshot: Vec<(ListenerId, Handler)> = match self.listeners.borrow().get(&event_type) {
            Some(list) => list.iter().map(|l| (l.id, Rc::clone(&l.handler))).collect(),
            None => return 0,
        };

        self.dispatch_depth.set(self.dispatch_depth.get() + 1);
        let mut delivered = 0;
        for (id, handler) in snapshot {
            if !self.is_registered(id, event_type) {
                continue;
            }
            let Ok(mut handler) = handler.try_borrow_mut() else {
                continue;
            };
            (&mut *handler)(event);
            delivered += 1;
        }
        self.dispatch_depth.set(self.dispatch_depth.get() - 1);
        delivered
    }

    fn is_registered(&self, id: ListenerId, event_type: EventType) -> bool {
        self.listeners
            .borrow()
            .get(&event_type)
            .is_some_and(|list| list.iter().any(|l| l.id == id))
    }
}
