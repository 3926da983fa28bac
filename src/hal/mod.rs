//! Implementations of the traits defined in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: test doubles for the transport, the clock and the front end
//! - `rumqtt`: rumqttc-backed [`MqttClient`](crate::traits::MqttClient)
//!   (requires `mqtt` feature)

pub mod mock;

#[cfg(feature = "mqtt")]
pub mod rumqtt;

pub use mock::*;

#[cfg(feature = "mqtt")]
pub use rumqtt::*;
