//! Bounds shared by every component that moves entity ids and values around.

use std::fmt::Debug;
use std::hash::Hash;

/// Identity of an entity: the cache key and the event key.
///
/// Blanket-implemented for every type that satisfies the bounds, so plain
/// `u64` or `String` ids work without ceremony.
pub trait EntityKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// An entity value as stored, cached and carried in event payloads.
pub trait EntityValue: Clone + Send + Sync + 'static {}

impl<T> EntityValue for T where T: Clone + Send + Sync + 'static {}
