//! Registration surface for operator front ends.
//!
//! A front end (GUI, dashboard) keeps its own view of the managed objects.
//! The transaction engine registers objects once they are first
//! provisioned, refreshes their display names and updates their display
//! markers; it never reads anything back.

use crate::mo::{MoKind, ObjectId};

/// Marker a front end shows next to an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayMarker {
    /// Available.
    Normal,
    /// Admin-disabled.
    Inactive,
    /// Unavailable for a local reason.
    Fault,
    /// Unavailable because an ancestor is.
    ControlBlock,
}

/// Registration rejected by the front end.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("registration rejected: {0}")]
pub struct RegistrarError(pub String);

/// Front-end registration collaborator.
pub trait MomRegistrar: Send {
    /// Announces a newly provisioned object.
    fn register(
        &mut self,
        id: ObjectId,
        kind: MoKind,
        display_name: &str,
    ) -> Result<(), RegistrarError>;

    /// Withdraws a deleted object.
    fn unregister(&mut self, id: ObjectId);

    /// Refreshes the display name of a registered object.
    fn reset_display_name(&mut self, id: ObjectId, display_name: &str)
        -> Result<(), RegistrarError>;

    /// Updates the display marker of a registered object.
    fn set_marker(&mut self, id: ObjectId, marker: DisplayMarker);
}

/// Registrar for deployments without a front end.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRegistrar;

impl MomRegistrar for NullRegistrar {
    fn register(&mut self, _: ObjectId, _: MoKind, _: &str) -> Result<(), RegistrarError> {
        Ok(())
    }

    fn unregister(&mut self, _: ObjectId) {}

    fn reset_display_name(&mut self, _: ObjectId, _: &str) -> Result<(), RegistrarError> {
        Ok(())
    }

    fn set_marker(&mut self, _: ObjectId, _: DisplayMarker) {}
}
