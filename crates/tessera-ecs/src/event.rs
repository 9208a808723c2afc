//! Synchronous world notifications.
//!
//! A [`World`](crate::world::World) owns one [`EventHooks`] list. The same
//! list is shared (by handle) with every component store the registry
//! creates, so entity and component notifications reach the same listeners,
//! in registration order, at the moment the triggering call is made.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::component::ComponentTypeId;
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// WorldEvent
// ---------------------------------------------------------------------------

/// Something that happened to an entity or one of its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    /// An entity id was allocated.
    EntityCreated(Entity),
    /// An entity was queued for destruction. Fired after the
    /// `ComponentRemoved` events of its cascaded component removals.
    EntityDestroyed(Entity),
    /// A component was bound to an entity (visible immediately).
    ComponentAdded {
        entity: Entity,
        component: ComponentTypeId,
    },
    /// A component was queued for removal (committed at the next flush).
    ComponentRemoved {
        entity: Entity,
        component: ComponentTypeId,
    },
}

/// A boxed listener callback.
pub type Listener = Box<dyn FnMut(&WorldEvent)>;

// ---------------------------------------------------------------------------
// EventHooks
// ---------------------------------------------------------------------------

/// Shared, ordered list of listeners.
///
/// Cloning produces another handle to the same list.
#[derive(Clone, Default)]
pub struct EventHooks {
    listeners: Rc<RefCell<Vec<Listener>>>,
}

impl EventHooks {
    /// An empty listener list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Listeners run in the order they were added.
    ///
    /// Subscribing from inside a listener is ignored with a warning.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: FnMut(&WorldEvent) + 'static,
    {
        match self.listeners.try_borrow_mut() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(_) => {
                tracing::warn!("listener subscribed while events are being delivered -- ignored")
            }
        }
    }

    /// Deliver `event` to every listener.
    ///
    /// An event emitted while another is being delivered is dropped.
    pub fn emit(&self, event: WorldEvent) {
        match self.listeners.try_borrow_mut() {
            Ok(mut listeners) => {
                for listener in listeners.iter_mut() {
                    listener(&event);
                }
            }
            Err(_) => tracing::warn!(?event, "event emitted from inside a listener -- dropped"),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHooks")
            .field("listeners", &self.listeners.try_borrow().map(|l| l.len()).ok())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
