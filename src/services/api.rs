//! API request and response types for the REST surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alarm::Alarm;
use crate::attribute::AttrValue;
use crate::error::{ConfigError, ResultCode};
use crate::mo::{fields, ManagedObject, MoKind, ObjectId};
use crate::schema::Presence;
use crate::state::{AdminState, Summary};
use crate::supervision::Supervision;

// ============================================================================
// Response Types
// ============================================================================

/// API response wrapper for consistent JSON structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (present when success=true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present when success=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result code of a failed configuration operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<ResultCode>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            rc: None,
        }
    }

    /// Create an error response
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            rc: None,
        }
    }

    /// Create an error response carrying the operation's result code
    pub fn from_error(error: &ConfigError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            rc: Some(error.rc()),
        }
    }
}

/// One row of the object listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    /// Object id
    pub id: ObjectId,
    /// Object type
    pub kind: MoKind,
    /// Display name (empty until first commit)
    pub name: String,
    /// Parent id, absent for the root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ObjectId>,
    /// Configured admin state
    pub admin: AdminState,
    /// Derived availability
    pub summary: Summary,
    /// Raised conditions by wire name
    pub conditions: Vec<String>,
}

impl From<&ManagedObject> for ObjectSummary {
    fn from(node: &ManagedObject) -> Self {
        let state = node.state();
        Self {
            id: node.id(),
            kind: node.kind(),
            name: node.display_name().to_string(),
            parent: node.parent(),
            admin: state.admin(),
            summary: state.summary(),
            conditions: state
                .conditions()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
        }
    }
}

/// Full view of one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDetail {
    /// Summary fields
    #[serde(flatten)]
    pub object: ObjectSummary,
    /// Committed document fields as text (absent = never committed)
    pub attributes: BTreeMap<String, Option<String>>,
    /// Committed child ids
    pub children: Vec<ObjectId>,
    /// Currently reported alarms
    pub alarms: Vec<Alarm>,
    /// Keep-alive state, decoders only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervision: Option<Supervision>,
}

impl From<&ManagedObject> for ObjectDetail {
    fn from(node: &ManagedObject) -> Self {
        let attributes = node
            .schema()
            .fields()
            .filter(|(spec, _)| spec.presence != Presence::Internal)
            .map(|(spec, attr)| (spec.name.to_string(), attr.committed_text()))
            .collect();
        Self {
            object: ObjectSummary::from(node),
            attributes,
            children: node.committed_children(),
            alarms: node.alarms().reported().cloned().collect(),
            supervision: node.supervision().cloned(),
        }
    }
}

/// Result of applying a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigApplied {
    /// Top-level objects named by the document
    pub objects: Vec<ObjectId>,
}

/// Result of a simple operator action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Object the action applied to
    pub id: ObjectId,
    /// What happened
    pub result: String,
}

impl ActionResponse {
    /// Action completed
    pub fn done(id: ObjectId, result: impl Into<String>) -> Self {
        Self {
            id,
            result: result.into(),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Body of `POST /api/objects/:id/admin`.
///
/// Accepts the document tokens (`ENABLE`, `DISABLE`) as well as the wire
/// tokens (`ONLINE`, `OFFLINE`), case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Requested admin state
    pub state: String,
}

impl AdminRequest {
    /// Parses the requested state.
    pub fn admin_state(&self) -> Result<AdminState, ConfigError> {
        AdminState::from_text(&self.state).ok_or_else(|| ConfigError::InvalidValue {
            attr: fields::ADMIN_STATE.to_string(),
            reason: format!("unknown admin state '{}'", self.state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fleet::Fleet;
    use crate::traits::NullRegistrar;

    #[test]
    fn test_api_response_ok() {
        let json = serde_json::to_string(&ApiResponse::ok(42)).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":42"));
        assert!(!json.contains("error"));
        assert!(!json.contains("rc"));
    }

    #[test]
    fn test_api_response_from_error() {
        let err = ConfigError::NoSuchObject(ObjectId(7));
        let json = serde_json::to_string(&ApiResponse::<()>::from_error(&err)).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"rc\":\"DOES_NOT_EXIST\""));
    }

    #[test]
    fn test_admin_request_parsing() {
        let req = AdminRequest {
            state: "enable".into(),
        };
        assert_eq!(req.admin_state().unwrap(), AdminState::Enabled);
        let req = AdminRequest {
            state: "OFFLINE".into(),
        };
        assert_eq!(req.admin_state().unwrap(), AdminState::Disabled);
        let req = AdminRequest {
            state: "maybe".into(),
        };
        assert!(matches!(
            req.admin_state(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_object_detail_uses_committed_values() {
        let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
        let id = fleet
            .load_config(
                "<Decoders><Decoder>\
                   <SystemName>east</SystemName><URI>dec-east</URI>\
                   <MAC>02:00:00:00:00:01</MAC>\
                 </Decoder></Decoders>",
            )
            .unwrap()[0];
        let detail = ObjectDetail::from(fleet.tree().get(id).unwrap());
        assert_eq!(detail.object.name, "east");
        assert_eq!(detail.object.kind, MoKind::Decoder);
        assert_eq!(
            detail.attributes.get("URI"),
            Some(&Some("dec-east".to_string()))
        );
        assert!(detail.supervision.is_some());
        assert!(detail
            .object
            .conditions
            .iter()
            .all(|c| c != "INIT"));
    }
}
