//! MQTT service runner, independent of the concrete client.
//!
//! Works with any implementation of the `MqttClient` trait.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainz_fleet::config::Config;
//! use rs_trainz_fleet::fleet::Fleet;
//! use rs_trainz_fleet::hal::MockMqtt;
//! use rs_trainz_fleet::services::{FleetMqttRunner, SharedFleetState};
//! use rs_trainz_fleet::traits::NullRegistrar;
//!
//! let fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
//! let state = Arc::new(SharedFleetState::new(fleet));
//! let mut runner = FleetMqttRunner::new(state, MockMqtt::new());
//!
//! // In the service loop:
//! runner.run_once();
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use tracing::{info, warn};

use crate::traits::MqttClient;

use super::SharedFleetState;

// ============================================================================
// MQTT Service Runner
// ============================================================================

/// Pumps messages, supervision ticks and effects between a client and the fleet.
pub struct FleetMqttRunner<C: MqttClient> {
    state: Arc<SharedFleetState>,
    client: C,
    was_connected: bool,
}

impl<C> FleetMqttRunner<C>
where
    C: MqttClient,
    C::Error: Debug,
{
    /// Create a new runner.
    pub fn new(state: Arc<SharedFleetState>, client: C) -> Self {
        Self {
            state,
            client,
            was_connected: false,
        }
    }

    /// Get a reference to the MQTT client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get a mutable reference to the MQTT client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Dispatches every pending inbound message. Returns how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(msg) = self.client.try_recv() {
            if self
                .state
                .with_fleet(|fleet| fleet.handle_message(&msg.topic, &msg.payload))
            {
                handled += 1;
            }
        }
        handled
    }

    /// Runs due supervision ticks on the shared time base.
    pub fn tick(&mut self) {
        let now_ms = self.state.now_ms();
        self.state.with_fleet(|fleet| fleet.tick(now_ms));
    }

    /// Executes queued effects. Returns how many succeeded.
    ///
    /// Effects are fire-and-forget: a failed one is logged and dropped.
    pub fn flush(&mut self) -> usize {
        let effects = self.state.with_fleet(|fleet| fleet.drain_effects());
        let mut sent = 0;
        for effect in effects {
            match effect.execute(&mut self.client) {
                Ok(()) => sent += 1,
                Err(e) => warn!(topic = %effect.topic(), error = ?e, "MQTT effect dropped"),
            }
        }
        sent
    }

    /// Re-issues every live subscription after the client (re)connects.
    ///
    /// Returns whether a reconnect was detected.
    pub fn check_connection(&mut self) -> bool {
        let connected = self.client.is_connected();
        let rising = connected && !self.was_connected;
        self.was_connected = connected;
        if rising {
            let count = self.state.with_fleet(|fleet| fleet.resubscribe_all());
            info!(subscriptions = count, "MQTT connected");
        }
        rising
    }

    /// One service loop iteration.
    pub fn run_once(&mut self) {
        self.check_connection();
        self.poll();
        self.tick();
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fleet::Fleet;
    use crate::hal::{MockClock, MockMqtt};
    use crate::protocol::{Topics, PING};
    use crate::traits::NullRegistrar;

    const DOC: &str = "<Decoders><Decoder>\
        <SystemName>east</SystemName><URI>dec-east</URI>\
        <MAC>02:00:00:00:00:01</MAC><AdminState>ENABLE</AdminState>\
        </Decoder></Decoders>";

    fn setup() -> (FleetMqttRunner<MockMqtt>, MockClock) {
        let clock = MockClock::new();
        let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
        fleet.load_config(DOC).unwrap();
        let state = Arc::new(SharedFleetState::with_clock(fleet, clock.clone()));
        (FleetMqttRunner::new(state, MockMqtt::new()), clock)
    }

    #[test]
    fn test_flush_subscribes_and_pushes_config() {
        let (mut runner, _) = setup();
        assert!(runner.flush() > 0);
        let topics = Topics::default();
        for filter in topics.decoder_subscriptions("dec-east") {
            assert!(runner.client().is_subscribed(&filter));
        }
        assert_eq!(
            runner.client().published_to(&topics.config_resp("dec-east")).len(),
            1
        );
    }

    #[test]
    fn test_poll_dispatches_config_request() {
        let (mut runner, _) = setup();
        runner.flush();
        let topics = Topics::default();
        runner
            .client_mut()
            .queue_message(topics.config_req("dec-east"), Vec::new());
        runner
            .client_mut()
            .queue_message("/trains/unrelated", Vec::new());
        assert_eq!(runner.poll(), 1);
        runner.flush();
        assert_eq!(
            runner.client().published_to(&topics.config_resp("dec-east")).len(),
            2
        );
    }

    #[test]
    fn test_tick_sends_pings_on_clock() {
        let (mut runner, clock) = setup();
        runner.flush();
        runner.tick();
        clock.advance(1000);
        runner.tick();
        runner.flush();
        let ping_topic = Topics::default().supervision_downstream("dec-east");
        let pings = runner.client().published_to(&ping_topic);
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].1, PING.as_bytes());
    }

    #[test]
    fn test_failed_effects_are_dropped() {
        let (mut runner, _) = setup();
        runner.client_mut().connected = false;
        assert_eq!(runner.flush(), 0);
        runner.client_mut().connected = true;
        assert_eq!(runner.flush(), 0);
        assert!(runner.client().published.is_empty());
    }

    #[test]
    fn test_reconnect_restores_subscriptions() {
        let (mut runner, _) = setup();
        runner.client_mut().connected = false;
        runner.flush();
        assert!(!runner.check_connection());

        runner.client_mut().connected = true;
        assert!(runner.check_connection());
        runner.flush();
        assert_eq!(runner.client().subscriptions.len(), 4);
        assert!(!runner.check_connection());
    }
}
