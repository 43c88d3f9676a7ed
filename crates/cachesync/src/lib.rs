//! Event-driven cache invalidation.
//!
//! An [`EventedStore`](cachesync_storage::EventedStore) publishes an event
//! after every successful mutation; the [`CacheInvalidationCoordinator`]
//! receives it over the bus and refreshes or invalidates the matching
//! [`LoadingCache`](cachesync_cache::LoadingCache) entry.
//!
//! ```text
//! store.update(id) -> bus.publish(Updated) -> coordinator -> cache.refresh(id)
//! store.delete(id) -> bus.publish(Deleted) -> coordinator -> cache.invalidate(id)
//! ```
//!
//! [`wiring::build`] assembles the pieces from an [`AppConfig`].

pub mod config;
pub mod coordinator;
pub mod demo;
pub mod model;
pub mod observability;
pub mod store_loader;
pub mod wiring;

pub use config::{AppConfig, BusSettings, CacheSettings, CoordinatorSettings, LoggingConfig};
pub use coordinator::{CacheInvalidationCoordinator, CoordinatorAction, CoordinatorStats};
pub use model::User;
pub use store_loader::StoreLoader;
pub use wiring::CacheSystem;
