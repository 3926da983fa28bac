//! MQTT service for the decoder fleet.
//!
//! Connects to the broker with `rumqttc` and drives a [`FleetMqttRunner`]
//! on a fixed interval. Subscriptions are owned by the fleet: committing a
//! decoder subscribes to its topics and deleting it unsubscribes.
//!
//! **Inbound (per committed decoder `<uri>`):**
//! - `<root>track/decoder/configReq/<uri>`
//! - `<root>track/decodersupervision/upstream/<uri>`
//! - `<root>opState/upstream/<uri>/#`
//! - `<root>statistics/<uri>/#`
//!
//! **Outbound:** configuration responses, pings, reboots, admin and
//! operational state, resource operational state (retained).
//!
//! # Shared State
//!
//! ```ignore
//! let state = Arc::new(SharedFleetState::new(fleet));
//! let router = build_router(Arc::clone(&state), &web_config);
//! let handler = MqttHandler::with_shared_state(Arc::clone(&state), mqtt_config);
//! tokio::spawn(handler.run());
//! ```

use std::sync::Arc;
use std::time::Duration;

use rumqttc::MqttOptions;
use tracing::info;

use crate::config::{MqttConfig as SharedMqttConfig, SupervisionConfig};
use crate::hal::{MqttError, RumqttClient};

use super::mqtt_runner::FleetMqttRunner;
use super::shared::SharedFleetState;

// ============================================================================
// Configuration
// ============================================================================

/// Session settings handed to `rumqttc`.
///
/// Uses `String` where [`crate::config::MqttConfig`] uses bounded strings;
/// convert with [`MqttRuntimeConfig::from_config`].
#[derive(Debug, Clone)]
pub struct MqttRuntimeConfig {
    /// Broker address
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Session client id
    pub client_id: String,
    /// Username and password, if the broker requires them
    pub credentials: Option<(String, String)>,
    /// Broker session keep-alive, seconds
    pub keep_alive_secs: u16,
    /// Service loop interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for MqttRuntimeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "rs-trainz-fleet".to_string(),
            credentials: None,
            keep_alive_secs: 30,
            poll_interval_ms: 100,
        }
    }
}

impl MqttRuntimeConfig {
    /// Broker at `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Derives the session settings from the file configuration
    pub fn from_config(config: &SharedMqttConfig) -> Self {
        let credentials = config.has_auth().then(|| {
            (
                config.username.as_str().to_string(),
                config.password.as_str().to_string(),
            )
        });
        Self {
            host: config.host.as_str().to_string(),
            port: config.port,
            client_id: config.client_id.as_str().to_string(),
            credentials,
            keep_alive_secs: config.keep_alive_secs,
            ..Default::default()
        }
    }

    /// Overrides the client id
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Take the service loop interval from the supervision settings
    pub fn with_supervision(mut self, supervision: &SupervisionConfig) -> Self {
        self.poll_interval_ms = u64::from(supervision.poll_interval_ms.max(1));
        self
    }

    /// Set the service loop interval
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(u64::from(self.keep_alive_secs.max(5))));
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user, pass);
        }
        options
    }
}

// ============================================================================
// MQTT Handler
// ============================================================================

/// Bridges the broker and the shared fleet.
pub struct MqttHandler {
    state: Arc<SharedFleetState>,
    config: MqttRuntimeConfig,
}

impl MqttHandler {
    /// Handler driving the shared fleet.
    pub fn with_shared_state(state: Arc<SharedFleetState>, config: MqttRuntimeConfig) -> Self {
        Self { state, config }
    }

    /// Shared fleet handle.
    pub fn state(&self) -> Arc<SharedFleetState> {
        Arc::clone(&self.state)
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &MqttRuntimeConfig {
        &self.config
    }

    /// Run the MQTT service.
    ///
    /// Runs until the task is cancelled. Connection errors are retried by the
    /// event loop driver; subscriptions are restored on every reconnect.
    pub async fn run(self) -> Result<(), MqttError> {
        let (client, driver) = RumqttClient::new(self.config.options(), 64);
        tokio::spawn(driver.run());

        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "MQTT service started"
        );

        let mut runner = FleetMqttRunner::new(Arc::clone(&self.state), client);
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            runner.run_once();
        }
    }
}
