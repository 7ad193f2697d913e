//! Inbound message fan-out.
//!
//! One dispatcher instance lives inside the connection worker and sees every
//! inbound publish in broker delivery order. For each message it snapshots
//! the matching handlers under the registry lock, releases the lock, then
//! invokes them one by one. Handlers therefore run in registration order, may
//! freely subscribe or unsubscribe from inside a callback, and a panicking
//! handler cannot take its siblings or later messages down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{error, trace};

use crate::connection::BusStats;
use crate::error::BusError;
use crate::message::BusMessage;
use crate::registry::{lock_registry, SubscriptionRegistry};

pub struct MessageDispatcher {
    registry: Arc<Mutex<SubscriptionRegistry>>,
    stats: Arc<BusStats>,
}

impl MessageDispatcher {
    pub fn new(registry: Arc<Mutex<SubscriptionRegistry>>, stats: Arc<BusStats>) -> Self {
        Self { registry, stats }
    }

    /// Delivers `message` to every handler of every matching filter.
    pub fn dispatch(&self, message: &BusMessage) {
        // Snapshot, then release the lock before any handler runs. A handler
        // that mutates the registry takes effect for the next message.
        let handlers = lock_registry(&self.registry).matching_handlers(&message.topic);

        if handlers.is_empty() {
            trace!("no handlers for '{}'", message.topic);
            return;
        }

        self.stats.note_received();
        trace!(
            "dispatching '{}' to {} handler(s)",
            message.topic,
            handlers.len()
        );

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!("{}", BusError::Handler(message.topic.clone()));
            }
        }
    }
}
