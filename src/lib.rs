//! # rs-trainz-fleet
//!
//! Central management of MQTT-connected model railway decoders: the
//! server keeps a tree of managed objects, applies configuration changes
//! transactionally, tracks each object's operational state and supervises
//! decoders with keep-alive pings.
//!
//! ## Features
//!
//! - **Transactional configuration**: every attribute keeps a committed value
//!   and a staged candidate; a whole subtree is validated, committed and
//!   provisioned as one unit, or aborted
//! - **Address registries**: link numbers, bus addresses and ports are
//!   reserved per parent, collisions fail validation
//! - **Operational state**: independent condition flags, a derived
//!   availability summary, and `ControlBlocked` propagation to descendants
//! - **Alarms**: one per condition, suppressed while the owner is disabled
//! - **Supervision**: periodic pings, loss detection, reboot handling
//!
//! ## Architecture
//!
//! - `attribute`, `schema` - Two-buffer attributes and the per-object field set
//! - `mo` - Managed object kinds and their schemas
//! - `tree`, `transaction` - The object arena and the commit engine
//! - `state`, `alarm`, `topology`, `supervision` - Per-object runtime state
//! - `protocol`, `effect`, `fleet` - MQTT topics, outbound effects, inbound dispatch
//! - `config_doc` - XML configuration documents
//! - `traits`, `hal` - Transport, clock and front-end seams with implementations
//! - `services` - REST API and MQTT service (feature-gated)
//!
//! ## Example
//!
//! ```rust
//! use rs_trainz_fleet::config::Config;
//! use rs_trainz_fleet::fleet::Fleet;
//! use rs_trainz_fleet::state::Summary;
//! use rs_trainz_fleet::traits::NullRegistrar;
//!
//! let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
//! let ids = fleet
//!     .load_config(
//!         "<Decoders><Decoder>\
//!            <SystemName>east</SystemName><URI>dec-east</URI>\
//!            <MAC>02:00:00:00:00:01</MAC><AdminState>ENABLE</AdminState>\
//!          </Decoder></Decoders>",
//!     )
//!     .unwrap();
//!
//! // Subscriptions, state publications and the config push are queued.
//! assert!(!fleet.drain_effects().is_empty());
//!
//! // Enabled and configured, the decoder is in service.
//! let decoder = fleet.tree().get(ids[0]).unwrap();
//! assert_eq!(decoder.state().summary(), Summary::Available);
//! ```

#![warn(missing_docs)]

/// Operational alarms derived from condition flags.
pub mod alarm;
/// Two-buffer transactional attributes.
pub mod attribute;
/// Server configuration (JSON).
pub mod config;
/// XML configuration documents.
pub mod config_doc;
/// Outbound MQTT side effects.
pub mod effect;
/// Errors and result codes.
pub mod error;
/// Inbound traffic dispatch and operator requests.
pub mod fleet;
/// Implementations of the collaborator traits.
pub mod hal;
/// Managed object kinds and instances.
pub mod mo;
/// MQTT topic scheme and payloads.
pub mod protocol;
/// Ordered attribute sets.
pub mod schema;
/// Admin state, condition flags and availability.
pub mod state;
/// Decoder keep-alive supervision.
pub mod supervision;
/// Per-parent address registries.
pub mod topology;
/// Collaborator traits.
pub mod traits;
/// The managed object arena.
pub mod tree;

mod transaction;

/// Network services for the REST API and MQTT (feature-gated).
#[cfg(any(feature = "web", feature = "mqtt"))]
pub mod services;

// Re-exports for convenience
pub use alarm::{Alarm, Criticality};
pub use attribute::{AttrValue, ManagedAttribute};
pub use config::{Config, MqttConfig, SupervisionConfig, WebConfig};
pub use effect::Effect;
pub use error::{ConfigError, ResultCode};
pub use fleet::Fleet;
pub use mo::{ManagedObject, MoKind, ObjectId};
pub use schema::Schema;
pub use state::{AdminState, Condition, ConditionSet, OperationalState, Summary};
pub use topology::{TopologyDomain, TopologyTable};
pub use traits::{Clock, MomRegistrar, MqttClient, MqttMessage};
pub use tree::ObjectTree;
