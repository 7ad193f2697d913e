//! # facilitybus
//!
//! Shared MQTT connection and subscription multiplexer for the facility
//! monitoring dashboard. Every panel in the dashboard — power meters, access
//! control, relays, environmental sensors — receives live telemetry and sends
//! commands through one [`BusHub`], so a single physical broker connection
//! serves an arbitrary number of independently mounting and unmounting
//! consumers.
//!
//! ## Why This Crate Exists
//!
//! Panels come and go as the operator navigates, but broker connections are
//! expensive and brokers dislike subscription churn. The hub keeps exactly
//! one connection alive, shares broker-level subscriptions between all
//! consumers of a topic filter, restores the full subscription set after
//! every reconnect, and isolates each consumer callback so one buggy panel
//! cannot break another.
//!
//! ## Module Architecture
//!
//! ```text
//! src/
//! ├── config.rs     - BusConfig: endpoint, credentials, timing knobs
//! ├── error.rs      - BusError taxonomy
//! ├── message.rs    - BusMessage, PublishOptions, Handler
//! ├── topic.rs      - segment-wise topic filter matching (+ / #)
//! ├── registry.rs   - filter → handler bookkeeping, 0↔1 broker rule
//! ├── dispatch.rs   - inbound fan-out with per-handler fault isolation
//! ├── connection.rs - event loop worker, reconnect, resubscription
//! └── hub.rs        - BusHub facade and the Subscription guard
//! ```
//!
//! ## Design Philosophy
//!
//! - **One connection, many consumers**: broker-level subscribe/unsubscribe
//!   happens only when a filter's handler set transitions between empty and
//!   non-empty.
//! - **Never crash a caller**: `subscribe`, `unsubscribe` and `publish` do
//!   not return network errors; failures surface through the connection
//!   state and the log.
//! - **Ownership over ambience**: the application owns the hub and injects
//!   it into panels; registrations are RAII guards that release themselves.
//! - **Opaque payloads**: the bus moves raw bytes; decoding belongs to the
//!   handler that knows the topic's shape.
//!
//! ## Usage
//!
//! ```no_run
//! use facilitybus::{handler, BusConfig, BusHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), facilitybus::BusError> {
//!     let config = BusConfig {
//!         host: "broker.plant.local".to_string(),
//!         ..BusConfig::default()
//!     };
//!     let bus = BusHub::new(config)?;
//!     bus.connect();
//!
//!     let temps = bus.subscribe(
//!         "sensors/+/temp",
//!         handler(|msg| println!("{}: {}", msg.topic, msg.payload_lossy())),
//!     );
//!
//!     bus.publish("relays/r1/cmd", "on".as_bytes(), None);
//!
//!     // ... panel lifetime ...
//!     drop(temps);
//!     bus.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod topic;

pub use config::{BusConfig, TransportKind};
pub use connection::{BusStats, BusStatus, ConnectionState};
pub use error::BusError;
pub use hub::{BusHub, Subscription};
pub use message::{handler, BusMessage, Handler, PublishOptions};
pub use registry::BrokerLink;
pub use topic::filter_matches;

// Delivery-guarantee levels come straight from the MQTT client; the bus
// itself runs QoS 0 end to end.
pub use rumqttc::QoS;
