//! Consumer facade.
//!
//! [`BusHub`] is the one interface panels see: an explicitly owned hub object
//! the application creates once and hands to each panel (clones are cheap and
//! share the same connection and registry). There is no ambient global state,
//! which keeps the hub constructible and testable in isolation.
//!
//! Lifecycle: [`BusHub::new`] builds the client without touching the network,
//! [`BusHub::connect`] spawns the single connection worker, and
//! [`BusHub::shutdown`] tears it down at application exit. In between, any
//! number of panels subscribe, publish and release registrations through the
//! hub — across arbitrarily many mount/unmount cycles.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BusConfig;
use crate::connection::{BusStats, BusStatus, ConnectionState, ConnectionWorker, MqttLink};
use crate::dispatch::MessageDispatcher;
use crate::error::BusError;
use crate::message::{Handler, PublishOptions};
use crate::registry::{lock_registry, BrokerLink, SubscriptionRegistry};

/// What the single connection worker is currently doing.
enum WorkerSlot {
    /// Built but not yet spawned; holds everything the worker will own.
    Idle {
        client: AsyncClient,
        eventloop: EventLoop,
        status_tx: watch::Sender<ConnectionState>,
    },
    Running(JoinHandle<()>),
    Stopped,
}

struct HubInner {
    config: BusConfig,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    link: Arc<dyn BrokerLink>,
    stats: Arc<BusStats>,
    status_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    worker: Mutex<WorkerSlot>,
}

/// Shared handle to the bus core. Clone freely; all clones refer to the same
/// connection, registry and counters.
#[derive(Clone)]
pub struct BusHub {
    inner: Arc<HubInner>,
}

impl BusHub {
    /// Builds the hub and the underlying MQTT client.
    ///
    /// No network I/O happens here; the connection is established by
    /// [`connect`](Self::connect). Fails only on invalid configuration.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;

        let options = config.mqtt_options();
        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        let link: Arc<dyn BrokerLink> = Arc::new(MqttLink::new(client.clone()));
        let registry = Arc::new(Mutex::new(SubscriptionRegistry::new(link.clone())));
        let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                registry,
                link,
                stats: Arc::new(BusStats::default()),
                status_rx,
                cancel: CancellationToken::new(),
                worker: Mutex::new(WorkerSlot::Idle {
                    client,
                    eventloop,
                    status_tx,
                }),
            }),
        })
    }

    /// Starts the connection worker.
    ///
    /// Idempotent: calling it while the worker is already running (or after
    /// shutdown) is a logged no-op, so any number of panels may request the
    /// connection without ever creating a second one. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.lock_worker();
        match std::mem::replace(&mut *slot, WorkerSlot::Stopped) {
            WorkerSlot::Idle {
                client,
                eventloop,
                status_tx,
            } => {
                let dispatcher =
                    MessageDispatcher::new(self.inner.registry.clone(), self.inner.stats.clone());
                let worker = ConnectionWorker::create(
                    self.inner.config.clone(),
                    client,
                    eventloop,
                    self.inner.registry.clone(),
                    dispatcher,
                    status_tx,
                );
                let cancel = self.inner.cancel.clone();
                let handle = tokio::spawn(async move {
                    let running = worker.activate();
                    let draining = running.run_until_shutdown(cancel).await;
                    let _stopped = draining.finish();
                });
                info!("bus connection worker spawned");
                *slot = WorkerSlot::Running(handle);
            }
            other => {
                debug!("connect() on an already started hub is a no-op");
                *slot = other;
            }
        }
    }

    /// Registers `handler` for `filter` and returns the guard that owns the
    /// registration.
    ///
    /// The first registration for a filter issues the broker-level subscribe;
    /// later ones share it. Never fails: broker rejections are logged and the
    /// filter is restored on the next (re)connect.
    #[must_use = "dropping the Subscription releases the registration"]
    pub fn subscribe(&self, filter: impl Into<String>, handler: Handler) -> Subscription {
        let filter = filter.into();
        lock_registry(&self.inner.registry).subscribe(&filter, handler.clone());
        Subscription {
            hub: self.clone(),
            filter,
            handler: Some(handler),
        }
    }

    /// Removes a `(filter, handler)` registration.
    ///
    /// Silent no-op for unknown pairs; teardown paths may call this twice or
    /// out of order. The broker-level unsubscribe goes out only when the last
    /// handler for the filter is removed.
    pub fn unsubscribe(&self, filter: &str, handler: &Handler) {
        lock_registry(&self.inner.registry).unsubscribe(filter, handler);
    }

    /// Fire-and-forget publish.
    ///
    /// Forwards to the broker only while connected; otherwise the message is
    /// dropped with a warning. No offline queue, consistent with the QoS 0,
    /// at-most-once semantics used across the bus.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>, options: Option<PublishOptions>) {
        if !self.is_ready() {
            warn!("dropping publish to '{}': bus is not connected", topic);
            return;
        }

        let options = options.unwrap_or_default();
        match self
            .inner
            .link
            .request_publish(topic, payload.into(), options.qos, options.retain)
        {
            Ok(()) => self.inner.stats.note_sent(),
            Err(e) => warn!("{}", e),
        }
    }

    /// Current link health.
    pub fn connection_status(&self) -> ConnectionState {
        self.inner.status_rx.borrow().clone()
    }

    /// True iff the broker link is up.
    pub fn is_ready(&self) -> bool {
        matches!(self.connection_status(), ConnectionState::Connected)
    }

    /// A watch receiver for reactive status displays; await
    /// [`changed`](watch::Receiver::changed) instead of polling.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_rx.clone()
    }

    /// Snapshot of connection state and traffic counters.
    pub fn status(&self) -> BusStatus {
        BusStatus {
            connection_state: self.connection_status(),
            messages_received: self.inner.stats.messages_received(),
            messages_sent: self.inner.stats.messages_sent(),
            last_activity: self.inner.stats.last_activity(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Tears the connection down: cancels the worker, which sends the MQTT
    /// DISCONNECT, and waits for the task to finish. After shutdown the hub
    /// stays usable for local bookkeeping but never reconnects.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handle = {
            let mut slot = self.lock_worker();
            match std::mem::replace(&mut *slot, WorkerSlot::Stopped) {
                WorkerSlot::Running(handle) => Some(handle),
                _ => None,
            }
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("connection worker task failed: {}", e);
            }
        }
        info!("bus hub shut down");
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, WorkerSlot> {
        match self.inner.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Registration handle returned by [`BusHub::subscribe`].
///
/// Dropping it releases the registration, so holding the guard for exactly as
/// long as a panel is mounted guarantees release on every exit path. When the
/// guard held the last handler for its filter, the broker-level subscription
/// is torn down with it.
#[must_use = "dropping the Subscription releases the registration"]
pub struct Subscription {
    hub: BusHub,
    filter: String,
    handler: Option<Handler>,
}

impl Subscription {
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Explicitly releases the registration. Equivalent to dropping.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(handler) = self.handler.take() {
            self.hub.unsubscribe(&self.filter, &handler);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_inner();
    }
}
