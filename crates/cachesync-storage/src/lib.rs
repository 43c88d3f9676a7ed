//! Entity storage for cachesync.
//!
//! - [`EntityStore`]: the authoritative store contract
//! - [`MemoryStore`]: concurrent in-memory backend
//! - [`EventedStore`]: wrapper publishing change events to an event bus

pub mod error;
pub mod evented;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use evented::EventedStore;
pub use memory::MemoryStore;
pub use traits::EntityStore;
