//! Mock implementations for testing without a broker or front end.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockMqtt`] | [`MqttClient`] | Captures pub/sub operations |
//! | [`MockRegistrar`] | [`MomRegistrar`] | Records registrations, can fail on demand |
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_fleet::config::Config;
//! use rs_trainz_fleet::fleet::Fleet;
//! use rs_trainz_fleet::hal::MockRegistrar;
//!
//! let registrar = MockRegistrar::new();
//! let mut fleet = Fleet::new(&Config::default(), Box::new(registrar.clone()));
//! fleet
//!     .load_config(
//!         "<Decoders><Decoder>\
//!            <SystemName>east</SystemName><URI>dec-east</URI>\
//!            <MAC>02:00:00:00:00:01</MAC>\
//!          </Decoder></Decoders>",
//!     )
//!     .unwrap();
//!
//! assert_eq!(registrar.registered().len(), 1);
//! ```
//!
//! [`Clock`]: crate::traits::Clock
//! [`MqttClient`]: crate::traits::MqttClient
//! [`MomRegistrar`]: crate::traits::MomRegistrar

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::mo::{MoKind, ObjectId};
use crate::traits::{Clock, DisplayMarker, MomRegistrar, MqttClient, MqttMessage, RegistrarError};

// ============================================================================
// Clock Mock
// ============================================================================

/// Hand-driven time source for supervision tests.
///
/// Clones share the same time, so a test can keep one handle while a
/// service owns another.
///
/// # Example
///
/// ```rust
/// use rs_trainz_fleet::hal::MockClock;
/// use rs_trainz_fleet::traits::Clock;
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockClock {
    current_ms: Arc<AtomicU64>,
}

impl MockClock {
    /// Starts at 0 ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jumps to `ms`.
    pub fn set(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::SeqCst);
    }

    /// Moves forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Broker Mock
// ============================================================================

/// In-memory broker session.
///
/// Publications and subscriptions are recorded; decoder traffic is
/// injected with [`queue_message`](Self::queue_message). While
/// `connected` is false every operation fails.
///
/// # Example
///
/// ```rust
/// use rs_trainz_fleet::hal::MockMqtt;
/// use rs_trainz_fleet::traits::MqttClient;
///
/// let mut mqtt = MockMqtt::new();
///
/// // Queue incoming message
/// mqtt.queue_message("/trains/track/decoder/configReq/dec-1", b"".to_vec());
///
/// // Check subscriptions
/// mqtt.subscribe("/trains/statistics/dec-1/#").unwrap();
/// assert!(mqtt.is_subscribed("/trains/statistics/dec-1/#"));
/// mqtt.unsubscribe("/trains/statistics/dec-1/#").unwrap();
/// assert!(!mqtt.is_subscribed("/trains/statistics/dec-1/#"));
///
/// // Check published messages
/// mqtt.publish("/trains/reboot/dec-1", b"<REBOOT/>", false).unwrap();
/// assert_eq!(mqtt.published_to("/trains/reboot/dec-1").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockMqtt {
    /// Publications as (topic, payload, retain).
    pub published: Vec<(String, Vec<u8>, bool)>,
    /// Live subscriptions.
    pub subscriptions: Vec<String>,
    /// Pending decoder traffic, oldest first.
    pub incoming: Vec<MqttMessage>,
    /// Session state.
    pub connected: bool,
}

impl MockMqtt {
    /// Connected, empty session.
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Injects decoder traffic.
    pub fn queue_message(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.incoming.push(MqttMessage::new(topic, payload));
    }

    /// Whether the filter is live.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|t| t == topic)
    }

    /// Publications on one topic.
    pub fn published_to(&self, topic: &str) -> Vec<&(String, Vec<u8>, bool)> {
        self.published
            .iter()
            .filter(|(t, _, _)| t == topic)
            .collect()
    }
}

impl MqttClient for MockMqtt {
    type Error = ();

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ()> {
        if !self.connected {
            return Err(());
        }
        self.published.push((topic.into(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ()> {
        if !self.connected {
            return Err(());
        }
        if !self.is_subscribed(topic) {
            self.subscriptions.push(topic.into());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), ()> {
        if !self.connected {
            return Err(());
        }
        self.subscriptions.retain(|t| t != topic);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        (!self.incoming.is_empty()).then(|| self.incoming.remove(0))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Registrar Mock
// ============================================================================

#[derive(Debug, Default)]
struct RegistrarLog {
    registered: BTreeMap<ObjectId, (MoKind, String)>,
    unregistered: Vec<ObjectId>,
    renames: Vec<(ObjectId, String)>,
    markers: BTreeMap<ObjectId, DisplayMarker>,
    fail_next: Option<String>,
}

/// Mock front end.
///
/// Clones share one log, so a test can hand a boxed clone to the tree and
/// inspect the original afterwards.
#[derive(Clone, Debug, Default)]
pub struct MockRegistrar {
    log: Arc<Mutex<RegistrarLog>>,
}

impl MockRegistrar {
    /// Creates an empty registrar that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, RegistrarLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rejects the next `register` or `reset_display_name` call.
    pub fn fail_next(&self, reason: &str) {
        self.log().fail_next = Some(reason.to_string());
    }

    /// Currently registered objects with their display names.
    pub fn registered(&self) -> Vec<(ObjectId, String)> {
        self.log()
            .registered
            .iter()
            .map(|(id, (_, name))| (*id, name.clone()))
            .collect()
    }

    /// Objects withdrawn so far, in order.
    pub fn unregistered(&self) -> Vec<ObjectId> {
        self.log().unregistered.clone()
    }

    /// Display name refreshes so far, in order.
    pub fn renames(&self) -> Vec<(ObjectId, String)> {
        self.log().renames.clone()
    }

    /// Last marker set on an object.
    pub fn marker(&self, id: ObjectId) -> Option<DisplayMarker> {
        self.log().markers.get(&id).copied()
    }
}

impl MomRegistrar for MockRegistrar {
    fn register(&mut self, id: ObjectId, kind: MoKind, display_name: &str) -> Result<(), RegistrarError> {
        let mut log = self.log();
        if let Some(reason) = log.fail_next.take() {
            return Err(RegistrarError(reason));
        }
        log.registered.insert(id, (kind, display_name.to_string()));
        Ok(())
    }

    fn unregister(&mut self, id: ObjectId) {
        let mut log = self.log();
        log.registered.remove(&id);
        log.markers.remove(&id);
        log.unregistered.push(id);
    }

    fn reset_display_name(&mut self, id: ObjectId, display_name: &str) -> Result<(), RegistrarError> {
        let mut log = self.log();
        if let Some(reason) = log.fail_next.take() {
            return Err(RegistrarError(reason));
        }
        if let Some(entry) = log.registered.get_mut(&id) {
            entry.1 = display_name.to_string();
        }
        log.renames.push((id, display_name.to_string()));
        Ok(())
    }

    fn set_marker(&mut self, id: ObjectId, marker: DisplayMarker) {
        self.log().markers.insert(id, marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_mqtt_rejects_operations() {
        let mut mqtt = MockMqtt::new();
        mqtt.connected = false;
        assert!(mqtt.publish("t", b"x", false).is_err());
        assert!(mqtt.subscribe("t").is_err());
        assert!(mqtt.published.is_empty());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut mqtt = MockMqtt::new();
        mqtt.subscribe("t").unwrap();
        mqtt.subscribe("t").unwrap();
        assert_eq!(mqtt.subscriptions.len(), 1);
    }

    #[test]
    fn clock_clones_share_time() {
        let clock = MockClock::new();
        let handle = clock.clone();
        handle.advance(250);
        assert_eq!(clock.now_ms(), 250);
    }

    #[test]
    fn registrar_failure_is_one_shot() {
        let mut registrar = MockRegistrar::new();
        registrar.fail_next("busy");
        assert_eq!(
            registrar.register(ObjectId(1), MoKind::Decoder, "east"),
            Err(RegistrarError("busy".into()))
        );
        registrar
            .register(ObjectId(1), MoKind::Decoder, "east")
            .unwrap();
        registrar.reset_display_name(ObjectId(1), "west").unwrap();
        assert_eq!(registrar.registered(), vec![(ObjectId(1), "west".to_string())]);
        registrar.unregister(ObjectId(1));
        assert!(registrar.registered().is_empty());
        assert_eq!(registrar.unregistered(), vec![ObjectId(1)]);
    }
}
