//! The event bus: subscription registry plus dispatch.
//!
//! Two dispatch modes are supported:
//!
//! - [`DispatchMode::Inline`]: `publish` awaits every matching handler, in
//!   subscription order, on the publisher's task. When `publish` returns the
//!   event has been fully processed.
//! - [`DispatchMode::Async`]: each subscription owns an unbounded FIFO queue
//!   drained by its own worker task. `publish` only enqueues, so there is a
//!   window between publishing and the handler observing the event.
//!
//! In both modes a subscriber sees the events of one publisher in publish
//! order. Nothing is guaranteed across publishers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hooks::{
    DispatchError, EventHandler, ExceptionContext, FnHandler, HandlerError,
    LoggingExceptionHandler, SubscriberExceptionHandler,
};
use super::types::{Event, EventKind};
use crate::entity::{EntityKey, EntityValue};

/// Default timeout for a single handler invocation.
const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// How a bus delivers events to its subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Handlers run on the publisher's task before `publish` returns.
    #[default]
    Inline,
    /// Handlers run on per-subscriber worker tasks.
    Async,
}

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: Uuid,
    name: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the subscribed handler.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Subscription<K, V> {
    id: Uuid,
    kinds: Vec<EventKind>,
    handler: Arc<dyn EventHandler<K, V>>,
    /// Async mode only: the subscriber's queue and its worker.
    queue: Option<mpsc::UnboundedSender<Event<K, V>>>,
    worker: Option<JoinHandle<()>>,
}

/// Everything a delivery needs, cheap to clone into worker tasks.
struct DispatchContext<K, V> {
    bus: Arc<str>,
    timeout: Duration,
    exceptions: Arc<dyn SubscriberExceptionHandler<K, V>>,
}

impl<K, V> Clone for DispatchContext<K, V> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            timeout: self.timeout,
            exceptions: self.exceptions.clone(),
        }
    }
}

impl<K: EntityKey, V: EntityValue> DispatchContext<K, V> {
    /// Deliver one event to one handler with timeout and panic protection.
    async fn deliver(&self, handler: &Arc<dyn EventHandler<K, V>>, event: &Event<K, V>) {
        let subscriber = handler.name().to_string();

        let result = tokio::time::timeout(self.timeout, async {
            AssertUnwindSafe(handler.handle(event)).catch_unwind().await
        })
        .await;

        let failure = match result {
            Ok(Ok(Ok(()))) => {
                debug!(
                    bus = %self.bus,
                    subscriber = %subscriber,
                    kind = %event.kind,
                    "Handler executed successfully"
                );
                return;
            }
            Ok(Ok(Err(source))) => DispatchError::Handler { subscriber, source },
            Ok(Err(panic)) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                DispatchError::Panicked {
                    subscriber,
                    message,
                }
            }
            Err(_) => DispatchError::Timeout {
                subscriber,
                timeout: self.timeout,
            },
        };

        let context = ExceptionContext {
            bus: &self.bus,
            event,
        };
        self.exceptions.handle_exception(&failure, &context);
    }
}

/// Typed publish/subscribe bus for entity change events.
///
/// The subscriber list sits behind a reader-writer lock: publishing takes
/// the read side only, (un)subscribing takes the write side.
pub struct EventBus<K, V> {
    mode: DispatchMode,
    context: DispatchContext<K, V>,
    subscriptions: RwLock<Vec<Subscription<K, V>>>,
}

impl<K: EntityKey, V: EntityValue> EventBus<K, V> {
    /// Create an inline bus with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        EventBusBuilder::new(name).build()
    }

    /// Start building a bus.
    pub fn builder(name: impl Into<String>) -> EventBusBuilder<K, V> {
        EventBusBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.bus
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Register a handler for the given kinds (an empty slice means all kinds).
    pub async fn subscribe(
        &self,
        kinds: &[EventKind],
        handler: Arc<dyn EventHandler<K, V>>,
    ) -> SubscriptionHandle {
        let name = handler.name().to_string();
        if let Err(e) = handler.on_start().await {
            warn!(bus = %self.name(), subscriber = %name, error = %e, "Handler on_start failed");
        }

        let id = Uuid::new_v4();
        let (queue, worker) = match self.mode {
            DispatchMode::Inline => (None, None),
            DispatchMode::Async => {
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = tokio::spawn(run_worker(
                    self.context.clone(),
                    handler.clone(),
                    rx,
                ));
                (Some(tx), Some(worker))
            }
        };

        self.subscriptions.write().await.push(Subscription {
            id,
            kinds: kinds.to_vec(),
            handler,
            queue,
            worker,
        });
        debug!(bus = %self.name(), subscriber = %name, kinds = ?kinds, "Registered subscriber");

        SubscriptionHandle { id, name }
    }

    /// Register an async closure as a handler.
    pub async fn subscribe_fn<F, Fut>(
        &self,
        name: impl Into<String>,
        kinds: &[EventKind],
        f: F,
    ) -> SubscriptionHandle
    where
        F: Fn(Event<K, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(kinds, Arc::new(FnHandler::new(name, f))).await
    }

    /// Remove a subscription. Returns false if the handle was unknown.
    ///
    /// In async mode, events already queued for the subscriber are still
    /// delivered before its worker stops.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.write().await;
            match subscriptions.iter().position(|s| s.id == handle.id) {
                Some(index) => subscriptions.remove(index),
                None => return false,
            }
        };

        let Subscription {
            handler,
            queue,
            worker,
            ..
        } = removed;
        // Closing the queue lets the worker drain and exit.
        drop(queue);
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(bus = %self.name(), subscriber = %handle.name, error = %e, "Worker ended abnormally");
            }
        }
        if let Err(e) = handler.on_shutdown().await {
            warn!(bus = %self.name(), subscriber = %handle.name, error = %e, "Handler on_shutdown failed");
        }
        debug!(bus = %self.name(), subscriber = %handle.name, "Unsubscribed");
        true
    }

    /// Publish an event to every matching subscriber.
    ///
    /// Returns the number of subscribers the event was delivered (inline) or
    /// enqueued (async) to. Handler failures never surface here.
    pub async fn publish(&self, event: Event<K, V>) -> usize {
        match self.mode {
            DispatchMode::Inline => {
                let handlers: Vec<_> = {
                    let subscriptions = self.subscriptions.read().await;
                    subscriptions
                        .iter()
                        .filter(|s| event.matches_kinds(&s.kinds))
                        .map(|s| s.handler.clone())
                        .collect()
                };

                for handler in &handlers {
                    self.context.deliver(handler, &event).await;
                }
                handlers.len()
            }
            DispatchMode::Async => {
                let subscriptions = self.subscriptions.read().await;
                let mut delivered = 0;
                for subscription in subscriptions
                    .iter()
                    .filter(|s| event.matches_kinds(&s.kinds))
                {
                    let Some(queue) = &subscription.queue else {
                        continue;
                    };
                    if queue.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        warn!(
                            bus = %self.name(),
                            subscriber = %subscription.handler.name(),
                            "Subscriber queue closed, event dropped"
                        );
                    }
                }
                delivered
            }
        }
    }

    /// Get the number of active subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Remove every subscription, drain async queues and run `on_shutdown`.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.subscriptions.write().await.drain(..).collect();
        let count = drained.len();

        for subscription in drained {
            let Subscription {
                handler,
                queue,
                worker,
                ..
            } = subscription;
            drop(queue);
            if let Some(worker) = worker {
                if let Err(e) = worker.await {
                    warn!(bus = %self.name(), subscriber = %handler.name(), error = %e, "Worker ended abnormally");
                }
            }
            if let Err(e) = handler.on_shutdown().await {
                warn!(bus = %self.name(), subscriber = %handler.name(), error = %e, "Handler on_shutdown failed");
            }
        }

        info!(bus = %self.name(), subscribers = count, "Event bus shut down");
    }
}

async fn run_worker<K: EntityKey, V: EntityValue>(
    context: DispatchContext<K, V>,
    handler: Arc<dyn EventHandler<K, V>>,
    mut queue: mpsc::UnboundedReceiver<Event<K, V>>,
) {
    while let Some(event) = queue.recv().await {
        context.deliver(&handler, &event).await;
    }
    debug!(bus = %context.bus, subscriber = %handler.name(), "Subscriber worker stopped");
}

impl<K, V> std::fmt::Debug for EventBus<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.context.bus)
            .field("mode", &self.mode)
            .field("timeout", &self.context.timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`EventBus`].
pub struct EventBusBuilder<K, V> {
    name: String,
    mode: DispatchMode,
    timeout: Duration,
    exceptions: Arc<dyn SubscriberExceptionHandler<K, V>>,
}

impl<K: EntityKey, V: EntityValue> EventBusBuilder<K, V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: DispatchMode::default(),
            timeout: DEFAULT_HANDLER_TIMEOUT,
            exceptions: Arc::new(LoggingExceptionHandler),
        }
    }

    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Upper bound for a single handler invocation.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the default logging exception handler.
    pub fn exception_handler(mut self, handler: Arc<dyn SubscriberExceptionHandler<K, V>>) -> Self {
        self.exceptions = handler;
        self
    }

    pub fn build(self) -> EventBus<K, V> {
        EventBus {
            mode: self.mode,
            context: DispatchContext {
                bus: Arc::from(self.name),
                timeout: self.timeout,
                exceptions: self.exceptions,
            },
            subscriptions: RwLock::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        name: &'static str,
        count: AtomicU32,
    }

    impl CountingHandler {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                count: AtomicU32::new(0),
            }
        }

        fn count(&self) -> u32 {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl EventHandler<u64, String> for CountingHandler {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _event: &Event<u64, String>) -> Result<(), HandlerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanicHandler;

    #[async_trait::async_trait]
    impl EventHandler<u64, String> for PanicHandler {
        fn name(&self) -> &str {
            "panic_handler"
        }

        async fn handle(&self, _event: &Event<u64, String>) -> Result<(), HandlerError> {
            panic!("This handler panics!");
        }
    }

    /// Records every failure so tests can assert on them.
    #[derive(Default)]
    struct RecordingExceptions {
        failures: Mutex<Vec<(String, u64)>>,
    }

    impl SubscriberExceptionHandler<u64, String> for RecordingExceptions {
        fn handle_exception(
            &self,
            error: &DispatchError,
            context: &ExceptionContext<'_, u64, String>,
        ) {
            self.failures
                .lock()
                .unwrap()
                .push((error.subscriber().to_string(), context.event.entity_id));
        }
    }

    #[tokio::test]
    async fn test_inline_publish_reaches_matching_subscribers() {
        let bus = EventBus::<u64, String>::new("repo");
        let all = Arc::new(CountingHandler::new("all"));
        let deletes = Arc::new(CountingHandler::new("deletes"));

        bus.subscribe(&[], all.clone()).await;
        bus.subscribe(&[EventKind::Deleted], deletes.clone()).await;
        assert_eq!(bus.subscriber_count().await, 2);

        assert_eq!(bus.publish(Event::created(1, "Alvin".into())).await, 1);
        assert_eq!(bus.publish(Event::deleted(1)).await, 2);

        assert_eq!(all.count(), 2);
        assert_eq!(deletes.count(), 1);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::<u64, String>::new("empty");
        assert_eq!(bus.publish(Event::deleted(1)).await, 0);
    }

    #[tokio::test]
    async fn test_panic_isolation() {
        let exceptions = Arc::new(RecordingExceptions::default());
        let bus = EventBus::<u64, String>::builder("repo")
            .exception_handler(exceptions.clone())
            .build();

        let counter = Arc::new(CountingHandler::new("counter"));
        bus.subscribe(&[], Arc::new(PanicHandler)).await;
        bus.subscribe(&[], counter.clone()).await;

        // Must not panic the publisher even though the first handler does.
        bus.publish(Event::created(7, "Alvin".into())).await;

        assert_eq!(counter.count(), 1);
        let failures = exceptions.failures.lock().unwrap();
        assert_eq!(failures.as_slice(), &[("panic_handler".to_string(), 7)]);
    }

    #[tokio::test]
    async fn test_handler_error_reported() {
        let exceptions = Arc::new(RecordingExceptions::default());
        let bus = EventBus::<u64, String>::builder("repo")
            .exception_handler(exceptions.clone())
            .build();

        bus.subscribe_fn("validator", &[EventKind::Created], |event| async move {
            if event.entity_id == 0 {
                return Err(HandlerError::execution("User.id must be greater than 0"));
            }
            Ok(())
        })
        .await;

        bus.publish(Event::created(0, "Alvin".into())).await;
        bus.publish(Event::created(1, "Emma".into())).await;

        let failures = exceptions.failures.lock().unwrap();
        assert_eq!(failures.as_slice(), &[("validator".to_string(), 0)]);
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let exceptions = Arc::new(RecordingExceptions::default());
        let bus = EventBus::<u64, String>::builder("repo")
            .handler_timeout(Duration::from_millis(20))
            .exception_handler(exceptions.clone())
            .build();

        bus.subscribe_fn("slow", &[], |_event| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        bus.publish(Event::deleted(3)).await;
        assert_eq!(exceptions.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_async_mode_preserves_publish_order() {
        let bus = EventBus::<u64, String>::builder("async")
            .mode(DispatchMode::Async)
            .build();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe_fn("recorder", &[], move |event| {
            let sink = sink.clone();
            async move {
                // Yield so a broken queue would have a chance to reorder.
                tokio::task::yield_now().await;
                sink.lock().unwrap().push(event.entity_id);
                Ok(())
            }
        })
        .await;

        for id in 0..50u64 {
            assert_eq!(bus.publish(Event::deleted(id)).await, 1);
        }

        // Shutdown drains the queue before returning.
        bus.shutdown().await;
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::<u64, String>::new("repo");
        let counter = Arc::new(CountingHandler::new("counter"));
        let handle = bus.subscribe(&[], counter.clone()).await;

        bus.publish(Event::deleted(1)).await;
        assert!(bus.unsubscribe(&handle).await);
        assert!(!bus.unsubscribe(&handle).await);
        bus.publish(Event::deleted(2)).await;

        assert_eq!(counter.count(), 1);
        assert_eq!(handle.name(), "counter");
    }

    #[tokio::test]
    async fn test_async_unsubscribe_drains_queue() {
        let bus = EventBus::<u64, String>::builder("async")
            .mode(DispatchMode::Async)
            .build();
        let counter = Arc::new(CountingHandler::new("counter"));
        let handle = bus.subscribe(&[], counter.clone()).await;

        for id in 0..10 {
            bus.publish(Event::deleted(id)).await;
        }
        bus.unsubscribe(&handle).await;

        assert_eq!(counter.count(), 10);
    }
}
