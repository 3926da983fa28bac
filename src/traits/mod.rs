//! Trait definitions for the collaborators the fleet core talks to.
//!
//! # Submodules
//!
//! - `clock`: time source for supervision deadlines
//! - `network`: MQTT client trait and inbound message type
//! - `registrar`: front-end registration surface
//!
//! The core consumes these, it never implements them. Test doubles live
//! in [`crate::hal::mock`].

pub mod clock;
pub mod network;
pub mod registrar;

pub use clock::*;
pub use network::*;
pub use registrar::*;
