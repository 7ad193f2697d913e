//! Topic subscription bookkeeping.
//!
//! The registry maps each topic filter to the handlers interested in it and
//! owns the 0↔1 rule: a broker-level subscribe goes out when a filter gains
//! its first handler, a broker-level unsubscribe when it loses its last one.
//! Everything in between is purely local bookkeeping, which is what lets many
//! panels share one broker subscription per filter.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use rumqttc::QoS;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::message::Handler;
use crate::topic::filter_matches;

/// Outbound broker requests, as seen from the registry and the publisher.
///
/// The live implementation wraps the rumqttc client; tests inject a
/// recording fake. All methods are fire-and-forget: an `Err` is something to
/// log, never something to surface to a consumer.
pub trait BrokerLink: Send + Sync {
    fn request_subscribe(&self, filter: &str) -> Result<(), BusError>;
    fn request_unsubscribe(&self, filter: &str) -> Result<(), BusError>;
    fn request_publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError>;
}

struct TopicEntry {
    filter: String,
    /// Registration order; dispatch preserves it.
    handlers: Vec<Handler>,
}

/// Filter → handler-set map behind the hub facade.
///
/// Entries are kept in insertion order so dispatch across distinct filters is
/// deterministic. An entry exists iff its handler vector is non-empty.
pub struct SubscriptionRegistry {
    link: Arc<dyn BrokerLink>,
    entries: Vec<TopicEntry>,
}

impl SubscriptionRegistry {
    pub fn new(link: Arc<dyn BrokerLink>) -> Self {
        Self {
            link,
            entries: Vec::new(),
        }
    }

    /// Adds `handler` to `filter`'s handler set.
    ///
    /// Issues the broker-level subscribe only when the filter was previously
    /// unknown. Re-adding an identical `(filter, handler)` pair is a no-op,
    /// so a handler is never invoked twice for one message.
    pub fn subscribe(&mut self, filter: &str, handler: Handler) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.filter == filter) {
            if entry.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                debug!("handler already registered for '{}'", filter);
                return;
            }
            entry.handlers.push(handler);
            debug!(
                "added handler to '{}' ({} registered)",
                filter,
                entry.handlers.len()
            );
            return;
        }

        if let Err(e) = self.link.request_subscribe(filter) {
            warn!("{}", e);
        }
        self.entries.push(TopicEntry {
            filter: filter.to_string(),
            handlers: vec![handler],
        });
        info!("subscribed to '{}'", filter);
    }

    /// Removes `handler` from `filter`'s handler set.
    ///
    /// Issues the broker-level unsubscribe and drops the entry when the set
    /// becomes empty. Unknown `(filter, handler)` pairs are a silent no-op:
    /// component teardown paths may run twice or out of order.
    pub fn unsubscribe(&mut self, filter: &str, handler: &Handler) {
        let Some(idx) = self.entries.iter().position(|e| e.filter == filter) else {
            debug!("unsubscribe for unknown filter '{}'", filter);
            return;
        };

        let entry = &mut self.entries[idx];
        let Some(pos) = entry.handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            debug!("unsubscribe for unregistered handler on '{}'", filter);
            return;
        };
        entry.handlers.remove(pos);

        if entry.handlers.is_empty() {
            self.entries.remove(idx);
            if let Err(e) = self.link.request_unsubscribe(filter) {
                warn!("{}", e);
            }
            info!("unsubscribed from '{}'", filter);
        }
    }

    /// Re-issues a broker-level subscribe for every registered filter.
    ///
    /// Called by the connection worker after each completed (re)connect so
    /// the broker's view matches the registry exactly.
    pub fn restore_broker_subscriptions(&self) {
        for entry in &self.entries {
            if let Err(e) = self.link.request_subscribe(&entry.filter) {
                warn!("restore: {}", e);
            }
        }
        info!(
            "restored {} broker subscription(s) after (re)connect",
            self.entries.len()
        );
    }

    /// Handlers of every filter matching `topic`, in registration order
    /// within each filter and insertion order across filters.
    pub fn matching_handlers(&self, topic: &str) -> Vec<Handler> {
        self.entries
            .iter()
            .filter(|e| filter_matches(&e.filter, topic))
            .flat_map(|e| e.handlers.iter().cloned())
            .collect()
    }

    /// Currently registered filters, in insertion order.
    pub fn filters(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.filter.clone()).collect()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries.iter().any(|e| e.filter == filter)
    }

    pub fn filter_count(&self) -> usize {
        self.entries.len()
    }

    pub fn handler_count(&self, filter: &str) -> usize {
        self.entries
            .iter()
            .find(|e| e.filter == filter)
            .map_or(0, |e| e.handlers.len())
    }
}

/// Locks the shared registry, recovering the guard if a previous holder
/// panicked. Handlers never run under this lock, so a poisoned state can only
/// mean a bug inside registry code itself; the data is still consistent
/// because every mutation completes before the lock is released.
pub(crate) fn lock_registry(
    registry: &Mutex<SubscriptionRegistry>,
) -> MutexGuard<'_, SubscriptionRegistry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{FailingLink, RecordingLink};
    use super::*;
    use crate::message::handler;

    fn noop() -> Handler {
        handler(|_| {})
    }

    #[test]
    fn first_subscribe_issues_broker_subscribe() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());

        registry.subscribe("meters/+/power", noop());

        assert_eq!(link.subscribes(), vec!["meters/+/power".to_string()]);
        assert!(registry.contains("meters/+/power"));
    }

    #[test]
    fn second_handler_shares_the_broker_subscription() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());

        registry.subscribe("meters/m1/power", noop());
        registry.subscribe("meters/m1/power", noop());

        assert_eq!(link.subscribes().len(), 1);
        assert_eq!(registry.handler_count("meters/m1/power"), 2);
    }

    #[test]
    fn duplicate_pair_is_a_noop() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());
        let h = noop();

        registry.subscribe("doors/front/state", h.clone());
        registry.subscribe("doors/front/state", h.clone());

        assert_eq!(registry.handler_count("doors/front/state"), 1);
        assert_eq!(link.subscribes().len(), 1);
    }

    #[test]
    fn unsubscribe_keeps_entry_while_handlers_remain() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());
        let h1 = noop();
        let h2 = noop();

        registry.subscribe("doors/front/state", h1.clone());
        registry.subscribe("doors/front/state", h2);
        registry.unsubscribe("doors/front/state", &h1);

        assert!(link.unsubscribes().is_empty());
        assert_eq!(registry.handler_count("doors/front/state"), 1);
    }

    #[test]
    fn last_unsubscribe_drops_entry_and_broker_subscription() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());
        let h = noop();

        registry.subscribe("doors/front/state", h.clone());
        registry.unsubscribe("doors/front/state", &h);

        assert_eq!(link.unsubscribes(), vec!["doors/front/state".to_string()]);
        assert!(!registry.contains("doors/front/state"));
        assert_eq!(registry.filter_count(), 0);
    }

    #[test]
    fn unknown_pairs_are_silent_noops() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());
        let registered = noop();
        let stranger = noop();

        registry.subscribe("relays/r1/state", registered);

        // Unknown filter, then unknown handler on a known filter. Neither may
        // disturb the existing registration.
        registry.unsubscribe("relays/r9/state", &stranger);
        registry.unsubscribe("relays/r1/state", &stranger);

        assert!(link.unsubscribes().is_empty());
        assert_eq!(registry.handler_count("relays/r1/state"), 1);
    }

    #[test]
    fn restore_reissues_exactly_the_registered_filters() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link.clone());

        registry.subscribe("meters/#", noop());
        registry.subscribe("sensors/+/temp", noop());
        let extra = noop();
        registry.subscribe("doors/front/state", extra.clone());
        registry.unsubscribe("doors/front/state", &extra);

        link.subscribes.lock().unwrap().clear();
        registry.restore_broker_subscriptions();

        assert_eq!(
            link.subscribes(),
            vec!["meters/#".to_string(), "sensors/+/temp".to_string()]
        );
    }

    #[test]
    fn broker_rejection_still_registers_the_handler() {
        let mut registry = SubscriptionRegistry::new(Arc::new(FailingLink));

        registry.subscribe("meters/m1/power", noop());

        // The failure is logged; the handler stays registered so the filter
        // is restored on the next successful (re)connect.
        assert!(registry.contains("meters/m1/power"));
    }

    #[test]
    fn matching_handlers_cover_exact_and_wildcard_filters() {
        let link = Arc::new(RecordingLink::default());
        let mut registry = SubscriptionRegistry::new(link);

        registry.subscribe("sensors/room1/temp", noop());
        registry.subscribe("sensors/+/temp", noop());
        registry.subscribe("sensors/#", noop());
        registry.subscribe("doors/#", noop());

        assert_eq!(registry.matching_handlers("sensors/room1/temp").len(), 3);
        assert_eq!(registry.matching_handlers("sensors/room2/temp").len(), 2);
        assert_eq!(registry.matching_handlers("doors/front/state").len(), 1);
        assert!(registry.matching_handlers("hvac/unit1/mode").is_empty());
    }
}
