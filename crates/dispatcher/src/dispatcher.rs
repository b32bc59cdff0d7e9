//! Dispatcher - event loop owning the consumer registry
//!
//! Registration, unregistration and fan-out requests are queued as events and
//! applied by a single event loop task, the only writer of the registry.
//! Ack-triggered delivery runs synchronously on the acking thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{DispatcherConfig, Message, ReceiveHandler, Source, Trigger};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::consumer::Consumer;
use crate::error::DispatcherError;

/// Event applied by the event loop
pub(crate) enum Event {
    Register(Arc<Consumer>),
    Unregister(u64),
    Dispatch,
}

/// State shared by the dispatcher handle, the event loop and consumers
pub(crate) struct Shared {
    quota: usize,
    source: Arc<dyn Source>,
    events: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    runtime: Handle,
    next_id: AtomicU64,
    registered: AtomicUsize,
    dispatch_pending: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    /// Queue an event without blocking
    ///
    /// When the queue is full the event is handed to a task that waits for
    /// room, so registry changes are never lost.
    pub(crate) fn enqueue(&self, event: Event) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                trace!("event queue full, deferring event");
                let events = self.events.clone();
                self.runtime.spawn(async move {
                    if events.send(event).await.is_err() {
                        debug!("event loop stopped, deferred event dropped");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event loop stopped, event dropped");
            }
        }
    }

    /// Request a fan-out round; coalesced while one is already queued
    pub(crate) fn request_dispatch(&self) {
        if !self.dispatch_pending.swap(true, Ordering::SeqCst) {
            self.enqueue(Event::Dispatch);
        }
    }

    /// Route a consumer acknowledgment to the source
    pub(crate) fn ack(&self, consumer: &Consumer, msg: &Message, requeue: bool) {
        if requeue {
            self.source.on_nack(msg.clone());
            observability::record_requeued(1);
            return;
        }
        self.source.on_ack(msg);
        self.dispatch(consumer);
    }

    /// Fill a consumer up to quota
    ///
    /// Returns `false` when the source ran dry. Only one caller fills a given
    /// consumer at a time; a concurrent or reentrant call asks the running
    /// one to make another pass and returns immediately.
    pub(crate) fn dispatch(&self, consumer: &Consumer) -> bool {
        if !consumer.begin_dispatch() {
            return true;
        }
        loop {
            let more = self.fill(consumer);
            if consumer.finish_dispatch() {
                return more;
            }
        }
    }

    fn fill(&self, consumer: &Consumer) -> bool {
        while consumer.is_active() && consumer.pending() < self.quota {
            let Some(msg) = self.source.next() else {
                return false;
            };

            match consumer.push(&msg) {
                Ok(()) => {
                    self.source.on_sent(&msg);
                    observability::record_delivered(consumer.id(), &msg);
                }
                Err(DispatcherError::ConsumerUnregistered { consumer_id }) => {
                    trace!(consumer_id, message_id = msg.id(), "push raced unregister");
                    self.source.on_nack(msg);
                    observability::record_requeued(1);
                    return true;
                }
                Err(DispatcherError::Released { .. }) => return true,
                Err(e) => {
                    warn!(
                        consumer_id = consumer.id(),
                        message_id = msg.id(),
                        error = %e,
                        "handler failed, unregistering consumer"
                    );
                    observability::record_handler_failure(consumer.id());
                    consumer.unregister();
                    return true;
                }
            }
        }
        true
    }
}

/// Message dispatcher
///
/// Cheap to clone; every clone drives the same event loop.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Create a dispatcher and start its source
    ///
    /// Must be called within a tokio runtime. Events queue up until the
    /// event loop runs (see [`Dispatcher::spawn`]).
    pub fn new(config: &DispatcherConfig, source: Arc<dyn Source>) -> Result<Self, DispatcherError> {
        if config.quota == 0 {
            return Err(DispatcherError::config("dispatcher.quota", "must be greater than 0"));
        }
        if config.event_queue_size == 0 {
            return Err(DispatcherError::config(
                "dispatcher.event_queue_size",
                "must be greater than 0",
            ));
        }
        let runtime = Handle::try_current().map_err(|_| DispatcherError::NoRuntime)?;

        let (events, events_rx) = mpsc::channel(config.event_queue_size);
        let shared = Arc::new(Shared {
            quota: config.quota,
            source,
            events,
            events_rx: Mutex::new(Some(events_rx)),
            runtime,
            next_id: AtomicU64::new(0),
            registered: AtomicUsize::new(0),
            dispatch_pending: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&shared);
        let trigger: Trigger = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.request_dispatch();
            }
        });
        shared.source.start(trigger).map_err(DispatcherError::Source)?;

        info!(
            quota = config.quota,
            event_queue_size = config.event_queue_size,
            "Dispatcher created"
        );
        Ok(Self { shared })
    }

    /// Per-consumer in-flight limit
    pub fn quota(&self) -> usize {
        self.shared.quota
    }

    /// Consumers currently in the registry, as last seen by the event loop
    pub fn consumer_count(&self) -> usize {
        self.shared.registered.load(Ordering::SeqCst)
    }

    /// Register a consumer
    ///
    /// Returns immediately. Delivery starts once the event loop has applied
    /// the registration.
    pub fn register(&self, handler: ReceiveHandler) -> Arc<Consumer> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let consumer = Arc::new(Consumer::new(id, self.shared.quota, handler, &self.shared));
        self.shared.enqueue(Event::Register(Arc::clone(&consumer)));
        debug!(consumer_id = id, "consumer registration queued");
        consumer
    }

    /// Request delivery to every registered consumer
    pub fn trigger(&self) {
        self.shared.request_dispatch();
    }

    /// Run the event loop until [`Dispatcher::shutdown`]
    ///
    /// Only one loop may run per dispatcher; a second call returns at once.
    #[instrument(name = "dispatcher_event_loop", skip(self), fields(quota = self.shared.quota))]
    pub async fn run(&self) {
        let events = self
            .shared
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut events) = events else {
            warn!("event loop already running");
            return;
        };

        info!("Dispatcher event loop started");
        let mut registry: HashMap<u64, Arc<Consumer>> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                Event::Register(consumer) => {
                    if !consumer.is_active() {
                        debug!(consumer_id = consumer.id(), "consumer gone before registration");
                        continue;
                    }
                    registry.insert(consumer.id(), Arc::clone(&consumer));
                    self.update_registered(registry.len());
                    debug!(consumer_id = consumer.id(), "consumer registered");
                    self.shared.dispatch(&consumer);
                }
                Event::Unregister(id) => {
                    if registry.remove(&id).is_some() {
                        self.update_registered(registry.len());
                        debug!(consumer_id = id, "consumer removed from registry");
                    }
                }
                Event::Dispatch => {
                    self.shared.dispatch_pending.store(false, Ordering::SeqCst);
                    for consumer in registry.values() {
                        if !self.shared.dispatch(consumer) {
                            trace!("source exhausted, fan-out stopped");
                            break;
                        }
                    }
                }
            }
        }

        info!(consumers = registry.len(), "Dispatcher event loop stopped");
    }

    fn update_registered(&self, count: usize) {
        self.shared.registered.store(count, Ordering::SeqCst);
        observability::record_consumers(count);
    }

    /// Spawn the event loop as a background task
    pub fn spawn(&self) -> JoinHandle<()> {
        let this = self.clone();
        self.shared.runtime.spawn(async move {
            this.run().await;
        })
    }

    /// Stop the event loop
    ///
    /// Consumers stay usable for acks; nothing new is registered or fanned out.
    pub fn shutdown(&self) {
        info!("Dispatcher shutdown requested");
        self.shared.cancel.cancel();
    }
}
