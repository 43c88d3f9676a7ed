//! Typed entity change events and the bus that delivers them.
//!
//! An entity store publishes an [`Event`] right after each successful
//! mutation; subscribers (the cache invalidation coordinator, audit hooks,
//! tests) receive it through an [`EventBus`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          EventBus                             │
//! │      subscriptions: RwLock<Vec<Subscription>> (kind filter)   │
//! └───────────────────────────────────────────────────────────────┘
//!        │ Inline: awaited on the     │ Async: one FIFO queue +
//!        │ publisher's task           │ worker task per subscriber
//!        ▼                            ▼
//!   ┌──────────┐                 ┌──────────┐
//!   │ Handler  │                 │ Handler  │
//!   └──────────┘                 └──────────┘
//! ```
//!
//! Every handler invocation is wrapped in a timeout and panic guard. A
//! failing handler is reported to the bus's [`SubscriberExceptionHandler`]
//! and never affects other subscribers or the publisher.
//!
//! # Module Structure
//!
//! - [`types`]: [`Event`] and [`EventKind`]
//! - [`hooks`]: handler trait, closure handlers and error types
//! - [`bus`]: the bus itself, dispatch modes and subscription handles
//! - [`registry`]: named buses managed by an explicit registry object

pub mod bus;
pub mod hooks;
pub mod registry;
pub mod types;

pub use bus::{DispatchMode, EventBus, EventBusBuilder, SubscriptionHandle};
pub use hooks::{
    DispatchError, EventHandler, ExceptionContext, FnHandler, HandlerError,
    LoggingExceptionHandler, SubscriberExceptionHandler,
};
pub use registry::{BusRegistry, RegistryError};
pub use types::{Event, EventKind};
