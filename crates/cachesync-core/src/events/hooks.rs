//! Handler traits for the event bus.
//!
//! Handlers are asynchronous and isolated: an error, panic or timeout in
//! one handler is reported through a [`SubscriberExceptionHandler`] and
//! does not stop delivery to the others.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use super::types::Event;
use crate::entity::{EntityKey, EntityValue};

/// Error type returned by handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Handler execution failed with a message.
    #[error("Handler execution failed: {0}")]
    Execution(String),

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        HandlerError::Execution(msg.into())
    }
}

/// A delivery failure for one subscriber.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Subscriber '{subscriber}' failed: {source}")]
    Handler {
        subscriber: String,
        #[source]
        source: HandlerError,
    },

    #[error("Subscriber '{subscriber}' panicked: {message}")]
    Panicked { subscriber: String, message: String },

    #[error("Subscriber '{subscriber}' timed out after {timeout:?}")]
    Timeout {
        subscriber: String,
        timeout: Duration,
    },
}

impl DispatchError {
    /// Name of the subscriber whose delivery failed.
    pub fn subscriber(&self) -> &str {
        match self {
            DispatchError::Handler { subscriber, .. }
            | DispatchError::Panicked { subscriber, .. }
            | DispatchError::Timeout { subscriber, .. } => subscriber,
        }
    }
}

// ============================================================================
// Handler Traits
// ============================================================================

/// Trait for event subscribers.
///
/// # Implementation Notes
///
/// - `handle` runs under the bus's handler timeout
/// - Errors are reported to the bus's exception handler, never to the publisher
/// - In async dispatch mode each subscriber sees events one at a time, in
///   publish order
#[async_trait]
pub trait EventHandler<K, V>: Send + Sync
where
    K: EntityKey,
    V: EntityValue,
{
    /// Name used in logs and exception reports.
    fn name(&self) -> &str;

    /// Handle an entity change event.
    async fn handle(&self, event: &Event<K, V>) -> Result<(), HandlerError>;

    /// Called when the handler is subscribed.
    async fn on_start(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called when the handler is unsubscribed or the bus shuts down.
    async fn on_shutdown(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Adapts an async closure into an [`EventHandler`].
///
/// ```ignore
/// let handle = bus
///     .subscribe_fn("audit", &[EventKind::Deleted], |event| async move {
///         tracing::info!(id = ?event.entity_id, "entity removed");
///         Ok(())
///     })
///     .await;
/// ```
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<K, V, F, Fut> EventHandler<K, V> for FnHandler<F>
where
    K: EntityKey,
    V: EntityValue,
    F: Fn(Event<K, V>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event<K, V>) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

// ============================================================================
// Exception handling
// ============================================================================

/// Where a delivery failure happened.
#[derive(Debug)]
pub struct ExceptionContext<'a, K, V> {
    /// Name of the bus that dispatched the event.
    pub bus: &'a str,
    /// The event being delivered.
    pub event: &'a Event<K, V>,
}

/// Receives every [`DispatchError`] raised on a bus.
pub trait SubscriberExceptionHandler<K, V>: Send + Sync {
    fn handle_exception(&self, error: &DispatchError, context: &ExceptionContext<'_, K, V>);
}

/// Default exception handler: log and move on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

impl<K: EntityKey, V> SubscriberExceptionHandler<K, V> for LoggingExceptionHandler {
    fn handle_exception(&self, error: &DispatchError, context: &ExceptionContext<'_, K, V>) {
        error!(
            bus = %context.bus,
            subscriber = %error.subscriber(),
            kind = %context.event.kind,
            entity_id = ?context.event.entity_id,
            error = %error,
            "Event delivery failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = FnHandler::new("echo", |event: Event<u64, String>| async move {
            if event.entity_id == 0 {
                return Err(HandlerError::execution("id must be > 0"));
            }
            Ok(())
        });

        assert_eq!(EventHandler::<u64, String>::name(&handler), "echo");

        let ok = Event::created(1u64, "Alvin".to_string());
        let rejected = Event::created(0u64, "Alvin".to_string());
        assert!(EventHandler::handle(&handler, &ok).await.is_ok());
        assert!(EventHandler::handle(&handler, &rejected).await.is_err());
    }

    #[test]
    fn test_handler_error_display() {
        let err = HandlerError::execution("something went wrong");
        assert_eq!(
            err.to_string(),
            "Handler execution failed: something went wrong"
        );

        let err = HandlerError::from(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_dispatch_error_subscriber() {
        let err = DispatchError::Timeout {
            subscriber: "slow".into(),
            timeout: Duration::from_millis(10),
        };
        assert_eq!(err.subscriber(), "slow");

        let err = DispatchError::Handler {
            subscriber: "coordinator".into(),
            source: HandlerError::execution("boom"),
        };
        assert_eq!(
            err.to_string(),
            "Subscriber 'coordinator' failed: Handler execution failed: boom"
        );
    }
}
