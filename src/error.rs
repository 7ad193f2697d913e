//! Error taxonomy for the bus core.
//!
//! Only configuration problems are returned to callers. Network-layer
//! failures (connect, subscribe, publish) surface through the connection
//! state and the log instead, so UI code calling into the bus from render
//! or teardown paths can never be crashed by transport issues.

use thiserror::Error;

/// Errors produced by the bus core.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport or authentication failure on the broker connection.
    ///
    /// Non-fatal: the connection worker retries indefinitely and the
    /// failure is reflected in [`crate::ConnectionState`].
    #[error("connection error: {0}")]
    Connection(String),

    /// The broker or the request channel rejected a subscribe.
    #[error("subscribe for '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The broker or the request channel rejected an unsubscribe.
    #[error("unsubscribe for '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },

    /// A publish was attempted while disconnected or rejected by the broker.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A consumer callback panicked during dispatch.
    #[error("handler failed while processing '{0}'")]
    Handler(String),

    /// Configuration file could not be read.
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values failed validation.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}
