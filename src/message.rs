//! Message representation and the handler callback type.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDateTime;
use rumqttc::QoS;

/// Inbound message as delivered to handlers.
///
/// The payload is the raw, undecoded byte blob from the wire. Topics on the
/// bus carry heterogeneous payload shapes (JSON telemetry, plain-text relay
/// states, binary meter frames), so decoding is each handler's
/// responsibility. `Bytes` makes the per-handler clone cheap.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
    pub received_at: NaiveDateTime,
}

impl BusMessage {
    pub(crate) fn from_publish(publish: rumqttc::Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retained: publish.retain,
            received_at: chrono::Local::now().naive_local(),
        }
    }

    /// Payload interpreted as UTF-8, for log and monitor surfaces.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = String::from_utf8_lossy(&self.payload)
            .chars()
            .take(48)
            .collect();
        write!(f, "{} {}: {}", self.received_at, self.topic, preview)
    }
}

/// Callback registered for a topic filter.
///
/// Identity is the `Arc` allocation (`Arc::ptr_eq`): registering the same
/// handler value twice is a no-op, and `unsubscribe` removes exactly the
/// handler it is given. The registry only holds clones for dispatch; dropping
/// a registration never touches consumer state.
pub type Handler = Arc<dyn Fn(&BusMessage) + Send + Sync + 'static>;

/// Wraps a closure into the shared [`Handler`] type.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&BusMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Options for an outbound publish. Defaults to QoS 0, non-retained, which is
/// what every consumer on this bus uses.
#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}
