pub mod entity;
pub mod events;

pub use entity::{EntityKey, EntityValue};
pub use events::{
    DispatchError, DispatchMode, Event, EventBus, EventBusBuilder, EventHandler, EventKind,
    HandlerError, SubscriptionHandle,
};
