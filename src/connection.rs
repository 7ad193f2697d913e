//! Broker connection lifecycle.
//!
//! One worker owns the single physical connection: it polls the rumqttc event
//! loop, reflects link health into a watch channel, retries failed connects
//! indefinitely, and restores the registry's subscription set after every
//! completed (re)connect.
//!
//! # Worker phases (statum)
//!
//! ```text
//! Standby ──► Running ──► Draining ──► Stopped
//!             (poll loop)  (DISCONNECT sent)
//! ```
//!
//! The phases cover the worker task's own lifecycle. Link health is a
//! separate, dynamic [`ConnectionState`] that cycles while the worker is
//! `Running`:
//!
//! ```text
//! Connecting ──► Connected ──► Error ──► Connecting ──► ...
//! ```
//!
//! Transport failures never terminate the worker; only cancellation through
//! the hub's shutdown does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, NetworkOptions, Packet, QoS};
use statum::{machine, state};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BusConfig;
use crate::dispatch::MessageDispatcher;
use crate::error::BusError;
use crate::message::BusMessage;
use crate::registry::{lock_registry, BrokerLink, SubscriptionRegistry};

/// Health of the broker link, as observed by consumers.
///
/// Transitions are sent only by the connection worker; everyone else holds a
/// read side of the watch channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transport or broker failure; the worker is waiting out the reconnect
    /// period before trying again.
    Error(String),
}

/// Traffic counters backing the dashboard's connection indicator.
#[derive(Debug, Default)]
pub struct BusStats {
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    last_activity: Mutex<Option<DateTime<Local>>>,
}

impl BusStats {
    pub(crate) fn note_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn note_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        if let Ok(mut slot) = self.last_activity.lock() {
            *slot = Some(Local::now());
        }
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> Option<DateTime<Local>> {
        self.last_activity.lock().ok().and_then(|slot| *slot)
    }
}

/// Point-in-time snapshot for status displays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BusStatus {
    pub connection_state: ConnectionState,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub last_activity: Option<DateTime<Local>>,
}

/// rumqttc-backed [`BrokerLink`].
///
/// All requests use the client's non-blocking `try_*` calls: they enqueue
/// into the event loop's request channel and complete asynchronously, so no
/// facade operation ever blocks on the network.
pub(crate) struct MqttLink {
    client: AsyncClient,
}

impl MqttLink {
    pub(crate) fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl BrokerLink for MqttLink {
    fn request_subscribe(&self, filter: &str) -> Result<(), BusError> {
        self.client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| BusError::Subscribe {
                topic: filter.to_string(),
                reason: e.to_string(),
            })
    }

    fn request_unsubscribe(&self, filter: &str) -> Result<(), BusError> {
        self.client
            .try_unsubscribe(filter)
            .map_err(|e| BusError::Unsubscribe {
                topic: filter.to_string(),
                reason: e.to_string(),
            })
    }

    fn request_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        self.client
            .try_publish(topic, qos, retain, payload.to_vec())
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Worker task phases.
#[state]
#[derive(Debug, Clone)]
pub enum WorkerPhase {
    Standby,  // built, event loop not yet polled
    Running,  // polling, reconnecting as needed
    Draining, // cancellation received, disconnect in flight
    Stopped,
}

/// The connection worker: owns the event loop and the write side of the
/// status channel. Created by the hub, driven to completion in a tokio task.
#[machine]
pub struct ConnectionWorker<S: WorkerPhase> {
    config: BusConfig,
    client: AsyncClient,
    eventloop: EventLoop,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    dispatcher: MessageDispatcher,
    status_tx: watch::Sender<ConnectionState>,
}

impl ConnectionWorker<Standby> {
    pub fn create(
        config: BusConfig,
        client: AsyncClient,
        eventloop: EventLoop,
        registry: Arc<Mutex<SubscriptionRegistry>>,
        dispatcher: MessageDispatcher,
        status_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self::new(config, client, eventloop, registry, dispatcher, status_tx)
    }

    /// Applies the handshake timeout and moves into the poll loop phase.
    pub fn activate(mut self) -> ConnectionWorker<Running> {
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(self.config.connect_timeout_secs);
        self.eventloop.set_network_options(network_options);

        info!(
            "activating bus connection worker for {}:{}",
            self.config.host, self.config.port
        );
        self.transition()
    }
}

impl ConnectionWorker<Running> {
    /// Polls the event loop until cancelled.
    ///
    /// Transport failures set [`ConnectionState::Error`], wait out the
    /// reconnect period and try again, with no retry cap. Messages expected
    /// during an outage window are lost (QoS 0 throughout).
    pub async fn run_until_shutdown(
        mut self,
        cancel: CancellationToken,
    ) -> ConnectionWorker<Draining> {
        self.set_state(ConnectionState::Connecting);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested, leaving poll loop");
                    break;
                }
                polled = self.eventloop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        warn!("{}", BusError::Connection(e.to_string()));
                        self.set_state(ConnectionState::Error(e.to_string()));

                        let retry_in = Duration::from_millis(self.config.reconnect_period_ms);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(retry_in) => {}
                        }
                        self.set_state(ConnectionState::Connecting);
                    }
                }
            }
        }

        self.transition()
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("broker session established");
                    self.set_state(ConnectionState::Connected);
                    lock_registry(&self.registry).restore_broker_subscriptions();
                } else {
                    warn!("broker refused connection: {:?}", ack.code);
                    self.set_state(ConnectionState::Error(format!(
                        "connect refused: {:?}",
                        ack.code
                    )));
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = BusMessage::from_publish(publish);
                self.dispatcher.dispatch(&message);
            }
            Event::Incoming(packet) => trace!("incoming: {:?}", packet),
            Event::Outgoing(outgoing) => trace!("outgoing: {:?}", outgoing),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.status_tx.borrow() != state {
            debug!("connection state -> {:?}", state);
        }
        // Send only fails when every receiver is gone; the hub holds one for
        // the whole worker lifetime.
        let _ = self.status_tx.send(state);
    }
}

impl ConnectionWorker<Draining> {
    /// Sends the MQTT DISCONNECT and settles the public state.
    pub fn finish(self) -> ConnectionWorker<Stopped> {
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not sent: {}", e);
        }
        let _ = self.status_tx.send(ConnectionState::Disconnected);
        info!("bus connection worker stopped");
        self.transition()
    }
}

impl ConnectionWorker<Stopped> {}
