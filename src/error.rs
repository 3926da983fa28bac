//! Error and result-code types for configuration transactions.
//!
//! Every failure that can end a transaction is a [`ConfigError`]. Callers at
//! the edge (REST, CLI) report the [`ResultCode`] together with the error's
//! display text as the human-readable reason.

use serde::{Deserialize, Serialize};

use crate::mo::{MoKind, ObjectId};
use crate::topology::{TopologyDomain, TopologyError};

/// Terminal result code of a configuration operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    /// Operation succeeded.
    Ok,
    /// A parameter was out of range or malformed.
    ParamError,
    /// The name, address or transaction already exists.
    AlreadyExists,
    /// The referenced object does not exist.
    DoesNotExist,
    /// No capacity left for another child.
    NoResources,
    /// The operation is not allowed in the current state.
    NotPermitted,
    /// Failure after candidate data was committed.
    InternalError,
    /// The configuration document could not be parsed.
    ParseError,
}

impl ResultCode {
    /// Returns a short upper-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::ParamError => "PARAM_ERROR",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::DoesNotExist => "DOES_NOT_EXIST",
            Self::NoResources => "NO_RESOURCES",
            Self::NotPermitted => "NOT_PERMITTED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ParseError => "PARSE_ERROR",
        }
    }
}

/// Errors raised while staging, validating or committing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Another sibling already uses this system name.
    #[error("System name already in use: {0}")]
    SystemNameAlreadyInUse(String),

    /// Another sibling already holds this address.
    #[error("Address {address} already in use ({domain})")]
    AddressAlreadyInUse {
        /// Address space the collision happened in.
        domain: TopologyDomain,
        /// The contested address.
        address: String,
    },

    /// The parent has no capacity left for another child of this kind.
    #[error("Too many children: at most {max} allowed ({domain})")]
    TooManyChildren {
        /// Address space that is exhausted.
        domain: TopologyDomain,
        /// Maximum number of members.
        max: usize,
    },

    /// A transaction is already in flight.
    #[error("Already updating: transaction in progress on object {0}")]
    AlreadyUpdating(ObjectId),

    /// No transaction is in flight for this object.
    #[error("No update in progress on object {0}")]
    NotUpdating(ObjectId),

    /// A candidate value was rejected by its validator.
    #[error("Invalid value for {attr}: {reason}")]
    InvalidValue {
        /// Attribute name.
        attr: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The schema has no attribute with this name.
    #[error("No such attribute: {0}")]
    NoSuchAttribute(String),

    /// The attribute exists but holds a different value type.
    #[error("Type mismatch for attribute {0}")]
    TypeMismatch(String),

    /// The object id is unknown.
    #[error("Object {0} does not exist")]
    NoSuchObject(ObjectId),

    /// The parent kind cannot own this child kind.
    #[error("{parent} cannot own a {child}")]
    ChildNotAllowed {
        /// Kind of the parent.
        parent: MoKind,
        /// Kind of the rejected child.
        child: MoKind,
    },

    /// Deletion preconditions are not met.
    #[error("Object {id} cannot be deleted: {reason}")]
    NotDeletable {
        /// Object that was asked to delete itself.
        id: ObjectId,
        /// Unmet precondition.
        reason: &'static str,
    },

    /// A mandatory field is missing from the configuration document.
    #[error("Missing mandatory field {field} in <{element}>")]
    MissingField {
        /// Element being parsed.
        element: String,
        /// Missing field name.
        field: String,
    },

    /// The configuration document is not well formed.
    #[error("Malformed configuration document: {0}")]
    Malformed(String),

    /// The effectful commit phase failed; committed data is kept.
    #[error("Commit failed on object {id}: {reason}")]
    CommitFailed {
        /// Object whose re-provisioning failed.
        id: ObjectId,
        /// Failure reported by the collaborator.
        reason: String,
    },
}

impl ConfigError {
    /// Maps the error to its terminal result code.
    pub fn rc(&self) -> ResultCode {
        match self {
            Self::SystemNameAlreadyInUse(_)
            | Self::AddressAlreadyInUse { .. }
            | Self::AlreadyUpdating(_) => ResultCode::AlreadyExists,
            Self::TooManyChildren { .. } => ResultCode::NoResources,
            Self::InvalidValue { .. }
            | Self::NoSuchAttribute(_)
            | Self::TypeMismatch(_)
            | Self::ChildNotAllowed { .. } => ResultCode::ParamError,
            Self::NoSuchObject(_) => ResultCode::DoesNotExist,
            Self::NotUpdating(_) | Self::NotDeletable { .. } => ResultCode::NotPermitted,
            Self::MissingField { .. } | Self::Malformed(_) => ResultCode::ParseError,
            Self::CommitFailed { .. } => ResultCode::InternalError,
        }
    }

    /// Maps a registry failure in `domain` to the transaction error.
    pub fn from_topology(domain: TopologyDomain, err: TopologyError) -> Self {
        match err {
            TopologyError::AddressInUse { address, .. } if domain == TopologyDomain::SystemName => {
                Self::SystemNameAlreadyInUse(address)
            }
            TopologyError::AddressInUse { address, .. } => {
                Self::AddressAlreadyInUse { domain, address }
            }
            TopologyError::NoResources { max } => Self::TooManyChildren { domain, max },
        }
    }

    /// Whether the error happened before any committed state changed.
    pub fn is_validation_error(&self) -> bool {
        !matches!(self, Self::CommitFailed { .. })
    }
}
