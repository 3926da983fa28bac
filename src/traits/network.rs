//! Pub/sub transport abstraction.
//!
//! The fleet core never owns a network connection. It produces
//! [`Effect`](crate::effect::Effect)s that the service layer executes on an
//! [`MqttClient`], and it consumes [`MqttMessage`]s the client received.
//!
//! # Topic families
//!
//! ```text
//! /trains/track/decoder/configReq/<uri>            inbound
//! /trains/track/decodersupervision/upstream/<uri>  inbound
//! /trains/opState/upstream/<uri>/#                 inbound
//! /trains/statistics/<uri>/#                       inbound
//! everything else                                  outbound
//! ```

// ============================================================================
// Transport
// ============================================================================

/// Broker connection used to execute effects and collect decoder traffic.
///
/// The trait is synchronous: `publish`, `subscribe` and `unsubscribe` hand
/// the request to the client and return without waiting for the broker, and
/// `try_recv` never blocks. Async transports wrap a queue behind it.
///
/// # Example
///
/// ```rust
/// use rs_trainz_fleet::hal::MockMqtt;
/// use rs_trainz_fleet::traits::MqttClient;
///
/// fn ping<M: MqttClient>(client: &mut M, uri: &str) -> Result<(), M::Error> {
///     let topic = format!("/trains/track/decodersupervision/downstream/{}", uri);
///     client.publish(&topic, b"<PING/>", false)
/// }
///
/// let mut mqtt = MockMqtt::new();
/// ping(&mut mqtt, "dec-1").unwrap();
/// assert_eq!(mqtt.published.len(), 1);
/// ```
pub trait MqttClient {
    /// Transport failure.
    type Error;

    /// Queues a publication. Retained messages are replayed to late subscribers.
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter.
    ///
    /// Supports wildcards: `opState/upstream/<uri>/#`
    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Drop a subscription.
    fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Next received message, `None` when the queue is empty.
    fn try_recv(&mut self) -> Option<MqttMessage>;

    /// Whether the broker session is up.
    fn is_connected(&self) -> bool;
}

/// Inbound publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    /// Full topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Builds a message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload text, `None` unless valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
