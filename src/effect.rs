//! Outbound MQTT side effects.
//!
//! Transactions and state changes never talk to the transport directly.
//! They queue [`Effect`]s in the tree's outbox; the service layer drains the
//! outbox and executes each effect fire-and-forget.

use crate::traits::MqttClient;

/// One MQTT operation to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Subscribe to a topic filter.
    Subscribe(String),
    /// Drop a subscription.
    Unsubscribe(String),
    /// Publish a message.
    Publish {
        /// Full topic.
        topic: String,
        /// Payload text.
        payload: String,
        /// Broker keeps the message for late subscribers.
        retain: bool,
    },
}

impl Effect {
    /// Non-retained publication.
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }

    /// Retained publication.
    pub fn publish_retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }

    /// Topic the effect targets.
    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe(t) | Self::Unsubscribe(t) => t,
            Self::Publish { topic, .. } => topic,
        }
    }

    /// Executes the effect on a client.
    pub fn execute<C: MqttClient>(&self, client: &mut C) -> Result<(), C::Error> {
        match self {
            Self::Subscribe(topic) => client.subscribe(topic),
            Self::Unsubscribe(topic) => client.unsubscribe(topic),
            Self::Publish {
                topic,
                payload,
                retain,
            } => client.publish(topic, payload.as_bytes(), *retain),
        }
    }
}
