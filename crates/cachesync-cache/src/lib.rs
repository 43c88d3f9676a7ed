//! Bounded loading cache.
//!
//! [`LoadingCache`] fetches missing values through a [`Loader`], shares one
//! in-flight load between concurrent readers of the same key and serves the
//! previous value while a refresh runs. Capacity (by count or by weight),
//! expiry and refresh policies come from [`CacheOptions`] / [`CacheBuilder`].

pub mod cache;
pub mod error;
pub mod listener;
pub mod loader;
pub mod options;
pub mod stats;
pub mod weigher;

pub use cache::{EntryState, LoadingCache};
pub use error::{ErrorSink, LoadError, RefreshError, TracingErrorSink};
pub use listener::{RemovalCause, RemovalListener};
pub use loader::{FnLoader, Loader};
pub use options::{CacheBuilder, CacheOptions, RefreshMode};
pub use stats::{CacheStatistics, CacheStatsSnapshot};
pub use weigher::Weigher;
