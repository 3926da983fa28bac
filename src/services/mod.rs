//! Network services for the HTTP API and MQTT integration.
//!
//! - `web` feature: Axum-based HTTP API for operators
//! - `mqtt` feature: rumqttc connection to the decoder broker
//!
//! Both services share one [`Fleet`](crate::fleet::Fleet) through
//! [`SharedFleetState`] wrapped in `Arc`:
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_trainz_fleet::services::SharedFleetState;
//!
//! let state = Arc::new(SharedFleetState::new(fleet));
//!
//! let web_router = build_router(Arc::clone(&state), &web_config);
//! let mqtt_handler = MqttHandler::with_shared_state(Arc::clone(&state), mqtt_config);
//! ```

pub mod api;
pub mod mqtt_runner;
pub mod shared;

#[cfg(feature = "web")]
pub mod web;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use api::*;
pub use mqtt_runner::*;
pub use shared::*;

#[cfg(feature = "web")]
pub use web::*;

#[cfg(feature = "mqtt")]
pub use mqtt::*;
