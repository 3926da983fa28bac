//! `rumqttc`-backed [`MqttClient`].
//!
//! The client half is synchronous: requests are queued with the `try_*`
//! methods of [`AsyncClient`] and inbound publishes are read from a channel.
//! The [`EventLoopDriver`] half owns the rumqttc event loop and must be
//! spawned on a tokio runtime.
//!
//! ```ignore
//! let (client, driver) = RumqttClient::new(options, 64);
//! tokio::spawn(driver.run());
//! let mut runner = FleetMqttRunner::new(state, client);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::traits::{MqttClient, MqttMessage};

/// Delay before the event loop retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// MQTT-related errors
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// Failed to connect to broker
    #[error("connect failed: {0}")]
    Connect(String),
    /// Failed to subscribe to topic
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    /// Failed to publish message
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Synchronous handle on a rumqttc connection.
pub struct RumqttClient {
    client: AsyncClient,
    inbound: mpsc::UnboundedReceiver<MqttMessage>,
    connected: Arc<AtomicBool>,
}

/// Owns the rumqttc event loop and feeds inbound publishes to the client.
pub struct EventLoopDriver {
    eventloop: EventLoop,
    inbound: mpsc::UnboundedSender<MqttMessage>,
    connected: Arc<AtomicBool>,
}

impl RumqttClient {
    /// Creates a client and the driver for its event loop.
    ///
    /// `cap` bounds the number of requests queued towards the broker.
    pub fn new(options: MqttOptions, cap: usize) -> (Self, EventLoopDriver) {
        let (client, eventloop) = AsyncClient::new(options, cap);
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let driver = EventLoopDriver {
            eventloop,
            inbound: tx,
            connected: Arc::clone(&connected),
        };
        let client = Self {
            client,
            inbound: rx,
            connected,
        };
        (client, driver)
    }
}

impl MqttClient for RumqttClient {
    type Error = MqttError;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        self.inbound.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl EventLoopDriver {
    /// Polls the event loop until the client side is dropped.
    ///
    /// Connection errors are logged and retried; rumqttc reconnects on the
    /// next poll.
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    debug!("MQTT ConnAck");
                    self.connected.store(true, Ordering::SeqCst);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = MqttMessage::new(publish.topic, publish.payload.to_vec());
                    if self.inbound.send(msg).is_err() {
                        debug!("MQTT client dropped, stopping event loop");
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let err = MqttError::Connect(e.to_string());
                    warn!(error = %err, "MQTT connection error");
                    self.connected.store(false, Ordering::SeqCst);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}
