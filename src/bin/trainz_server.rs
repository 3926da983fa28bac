//! Decoder fleet management server.
//!
//! Runs the REST API and the MQTT service on one shared fleet. Commands
//! from either side are immediately visible to the other.
//!
//! # Usage
//!
//! ```sh
//! trainz_server --config fleet.json --decoders decoders.xml
//! trainz_server --host 192.168.1.10 --topic-root /layout/ --web-port 3000
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rs_trainz_fleet::config::Config;
use rs_trainz_fleet::fleet::Fleet;
use rs_trainz_fleet::mo::{MoKind, ObjectId};
use rs_trainz_fleet::services::{
    run_server_with_state, MqttHandler, MqttRuntimeConfig, SharedFleetState, WebServerConfig,
};
use rs_trainz_fleet::traits::{DisplayMarker, MomRegistrar, RegistrarError};

#[derive(Debug, Parser)]
#[command(name = "trainz_server", version, about = "Model railway decoder fleet server")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,

    /// Root of every decoder topic
    #[arg(long)]
    topic_root: Option<String>,

    /// REST API port
    #[arg(long)]
    web_port: Option<u16>,

    /// Decoder configuration document applied at startup
    #[arg(short, long)]
    decoders: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(host) = &self.host {
            config.mqtt = config.mqtt.with_host(host);
        }
        if let Some(port) = self.port {
            config.mqtt = config.mqtt.with_port(port);
        }
        if let Some(root) = &self.topic_root {
            config.mqtt = config.mqtt.with_topic_root(root);
        }
        if let Some(port) = self.web_port {
            config.web = config.web.with_port(port);
        }
        Ok(config)
    }

    fn decoders_file(&self, config: &Config) -> Option<PathBuf> {
        self.decoders
            .clone()
            .or_else(|| config.server.decoders_file().map(PathBuf::from))
    }
}

/// Front end that only reports to the log.
struct LogRegistrar;

impl MomRegistrar for LogRegistrar {
    fn register(
        &mut self,
        id: ObjectId,
        kind: MoKind,
        display_name: &str,
    ) -> Result<(), RegistrarError> {
        info!(id = %id, kind = %kind, name = %display_name, "object registered");
        Ok(())
    }

    fn unregister(&mut self, id: ObjectId) {
        info!(id = %id, "object withdrawn");
    }

    fn reset_display_name(
        &mut self,
        id: ObjectId,
        display_name: &str,
    ) -> Result<(), RegistrarError> {
        info!(id = %id, name = %display_name, "object renamed");
        Ok(())
    }

    fn set_marker(&mut self, id: ObjectId, marker: DisplayMarker) {
        tracing::debug!(id = %id, marker = ?marker, "marker");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config()?;

    let mut fleet = Fleet::new(&config, Box::new(LogRegistrar));
    if let Some(path) = args.decoders_file(&config) {
        let xml = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let objects = fleet
            .load_config(&xml)
            .with_context(|| format!("applying {}", path.display()))?;
        info!(file = %path.display(), decoders = objects.len(), "configuration loaded");
    }

    let state = Arc::new(SharedFleetState::new(fleet));
    info!(name = %config.server.name, "fleet server starting");

    if config.web.enabled {
        let web_config = WebServerConfig::from_config(&config.web);
        let state_for_web = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = run_server_with_state(state_for_web, web_config).await {
                warn!(error = %e, "web server stopped");
            }
        });
    }

    if config.mqtt.enabled {
        let mqtt_config =
            MqttRuntimeConfig::from_config(&config.mqtt).with_supervision(&config.supervision);
        let handler = MqttHandler::with_shared_state(Arc::clone(&state), mqtt_config);
        handler.run().await.context("MQTT service")?;
    } else {
        warn!("MQTT disabled, outbound decoder traffic is discarded");
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(u64::from(
            config.supervision.poll_interval_ms.max(1),
        )));
        loop {
            interval.tick().await;
            let dropped = state.with_fleet(|fleet| fleet.drain_effects().len());
            if dropped > 0 {
                tracing::debug!(dropped, "effects discarded");
            }
        }
    }

    Ok(())
}
