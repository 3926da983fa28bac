//! Managed objects: the business objects of the decoder fleet.
//!
//! A [`ManagedObject`] composes a [`Schema`], an [`OperationalState`] and an
//! [`AlarmSet`]; parents also own a [`TopologyTable`] for their children.
//! Objects live in the [`ObjectTree`](crate::tree::ObjectTree) arena and
//! refer to each other by [`ObjectId`].
//!
//! # Hierarchy
//!
//! ```text
//! Server (root)
//! └── Decoder
//!     ├── LightgroupsLink
//!     │   └── LightGroup
//!     └── SatelliteLink
//!         └── Satellite
//!             ├── Sensor
//!             └── Actuator
//! ```

pub mod fields;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alarm::AlarmSet;
use crate::schema::Schema;
use crate::state::{AdminState, ConditionSet, OperationalState};
use crate::supervision::Supervision;
use crate::topology::{TopologyDomain, TopologyTable};

// ============================================================================
// Identity
// ============================================================================

/// Arena index of a managed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// The server root.
    pub const ROOT: ObjectId = ObjectId(0);
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Kinds
// ============================================================================

/// Type of a managed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MoKind {
    /// Tree root.
    Server,
    /// Field-deployed decoder.
    Decoder,
    /// Decoder link driving light groups.
    LightgroupsLink,
    /// Decoder link driving satellites.
    SatelliteLink,
    /// Group of signal lights.
    LightGroup,
    /// Satellite controller on a link.
    Satellite,
    /// Sensor input on a satellite.
    Sensor,
    /// Actuator output on a satellite.
    Actuator,
}

impl MoKind {
    /// Every kind that can appear in a configuration document.
    pub const CONFIGURABLE: [MoKind; 7] = [
        MoKind::Decoder,
        MoKind::LightgroupsLink,
        MoKind::SatelliteLink,
        MoKind::LightGroup,
        MoKind::Satellite,
        MoKind::Sensor,
        MoKind::Actuator,
    ];

    /// Element name in the configuration document.
    pub fn element(&self) -> &'static str {
        match self {
            Self::Server => "Server",
            Self::Decoder => "Decoder",
            Self::LightgroupsLink => "LightgroupsLink",
            Self::SatelliteLink => "SatelliteLink",
            Self::LightGroup => "LightGroup",
            Self::Satellite => "Satellite",
            Self::Sensor => "Sensor",
            Self::Actuator => "Actuator",
        }
    }

    /// Kind for a document element name.
    pub fn from_element(name: &str) -> Option<MoKind> {
        Self::CONFIGURABLE.into_iter().find(|k| k.element() == name)
    }

    /// Whether `child` may be owned by this kind.
    pub fn allows_child(&self, child: MoKind) -> bool {
        matches!(
            (self, child),
            (Self::Server, MoKind::Decoder)
                | (Self::Decoder, MoKind::LightgroupsLink)
                | (Self::Decoder, MoKind::SatelliteLink)
                | (Self::LightgroupsLink, MoKind::LightGroup)
                | (Self::SatelliteLink, MoKind::Satellite)
                | (Self::Satellite, MoKind::Sensor)
                | (Self::Satellite, MoKind::Actuator)
        )
    }

    /// Builds the schema for a new object of this kind.
    pub fn schema(&self) -> Schema {
        let schema = Schema::new().with(&fields::BASE).with(&fields::ADMIN);
        let schema = match self {
            Self::Server => schema,
            Self::Decoder => schema.with(&fields::DECODER),
            Self::LightgroupsLink => schema.with(&fields::LIGHTGROUPS_LINK),
            Self::SatelliteLink => schema.with(&fields::SATELLITE_LINK),
            Self::LightGroup => schema.with(&fields::LIGHT_GROUP),
            Self::Satellite => schema.with(&fields::SATELLITE),
            Self::Sensor => schema.with(&fields::SENSOR),
            Self::Actuator => schema.with(&fields::ACTUATOR),
        };
        schema.with(&fields::CHILD_LIST)
    }

    /// Addresses this kind reserves in its parent during validation.
    pub fn reservations(&self) -> &'static [(TopologyDomain, &'static str)] {
        use TopologyDomain::*;
        match self {
            Self::Server => &[],
            Self::Decoder => &[
                (SystemName, fields::SYSTEM_NAME),
                (DecoderUri, fields::URI),
                (DecoderMac, fields::MAC),
            ],
            Self::LightgroupsLink => &[
                (SystemName, fields::SYSTEM_NAME),
                (LightgroupsLink, fields::LINK),
            ],
            Self::SatelliteLink => &[
                (SystemName, fields::SYSTEM_NAME),
                (SatelliteLink, fields::LINK),
            ],
            Self::LightGroup => &[
                (SystemName, fields::SYSTEM_NAME),
                (LightGroupAddress, fields::ADDRESS),
            ],
            Self::Satellite => &[
                (SystemName, fields::SYSTEM_NAME),
                (SatelliteAddress, fields::ADDRESS),
            ],
            Self::Sensor => &[
                (SystemName, fields::SYSTEM_NAME),
                (SensorPort, fields::PORT),
            ],
            Self::Actuator => &[
                (SystemName, fields::SYSTEM_NAME),
                (ActuatorPort, fields::PORT),
            ],
        }
    }

    /// Topic family for per-resource `OPSTATE` publications.
    pub fn resource_family(&self) -> Option<&'static str> {
        match self {
            Self::LightGroup => Some("lightgroup"),
            Self::Sensor => Some("sensor"),
            Self::Actuator => Some("actuator"),
            _ => None,
        }
    }

    /// Error counters carried by this kind's statistics reports.
    pub fn stat_counters(&self) -> &'static [&'static str] {
        match self {
            Self::LightgroupsLink | Self::SatelliteLink => {
                &["rxCrcErr", "remCrcErr", "rxSymErr", "rxSizeErr", "wdErr"]
            }
            Self::Satellite => &["rxCrcErr", "txCrcErr", "wdErr"],
            _ => &[],
        }
    }
}

impl fmt::Display for MoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element())
    }
}

// ============================================================================
// Managed Object
// ============================================================================

/// One node of the object tree.
#[derive(Debug)]
pub struct ManagedObject {
    id: ObjectId,
    kind: MoKind,
    parent: Option<ObjectId>,
    pub(crate) schema: Schema,
    pub(crate) state: OperationalState,
    pub(crate) alarms: AlarmSet,
    pub(crate) topology: TopologyTable,
    pub(crate) supervision: Option<Supervision>,
    pub(crate) display_name: String,
    /// Committed at least once.
    pub(crate) committed_once: bool,
    /// Committed by `commit0`, waiting for `commit1`.
    pub(crate) pending_provision: bool,
    /// Display name changed since registration.
    pub(crate) rename_pending: bool,
    /// Known to the registrar.
    pub(crate) registered: bool,
    /// Decoder committed while disabled; configuration not pushed yet.
    pub(crate) config_pending: bool,
    /// Live MQTT subscriptions owned by this object.
    pub(crate) subscriptions: Vec<String>,
    /// Last statistics counters reported.
    pub(crate) last_stats: BTreeMap<String, u64>,
}

impl ManagedObject {
    pub(crate) fn new(id: ObjectId, kind: MoKind, parent: Option<ObjectId>) -> Self {
        Self {
            id,
            kind,
            parent,
            schema: kind.schema(),
            state: OperationalState::new(),
            alarms: AlarmSet::new(""),
            topology: TopologyTable::new(),
            supervision: None,
            display_name: String::new(),
            committed_once: false,
            pending_provision: false,
            rename_pending: false,
            registered: false,
            config_pending: false,
            subscriptions: Vec::new(),
            last_stats: BTreeMap::new(),
        }
    }

    pub(crate) fn root() -> Self {
        let mut root = Self::new(ObjectId::ROOT, MoKind::Server, None);
        // The root is in service from the start and never transacts itself.
        let _ = root.schema.set(fields::SYSTEM_NAME, String::from("server"));
        let _ = root.schema.set(fields::ADMIN_STATE, AdminState::Enabled);
        root.schema.commit_all();
        root.state = OperationalState::with(AdminState::Enabled, ConditionSet::EMPTY);
        root.alarms.set_suppressed(false);
        root.committed_once = true;
        root
    }

    /// Arena id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Object kind.
    pub fn kind(&self) -> MoKind {
        self.kind
    }

    /// Parent id, `None` for the root.
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Transactional attributes.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Runtime state.
    pub fn state(&self) -> &OperationalState {
        &self.state
    }

    /// Alarms mirroring the condition flags.
    pub fn alarms(&self) -> &AlarmSet {
        &self.alarms
    }

    /// Registries for this object's children.
    pub fn topology(&self) -> &TopologyTable {
        &self.topology
    }

    /// Supervision state, decoders only.
    pub fn supervision(&self) -> Option<&Supervision> {
        self.supervision.as_ref()
    }

    /// Path of system names from the top-level decoder, empty until first commit.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Committed system name, falling back to the candidate.
    pub fn system_name(&self) -> &str {
        self.schema
            .effective::<String>(fields::SYSTEM_NAME)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Committed URI for decoders.
    pub fn uri(&self) -> Option<&str> {
        if self.kind != MoKind::Decoder {
            return None;
        }
        self.schema
            .committed::<String>(fields::URI)
            .ok()
            .flatten()
            .map(String::as_str)
    }

    /// Never committed yet.
    pub fn is_provisional(&self) -> bool {
        !self.committed_once
    }

    /// Child ids including uncommitted ones.
    pub fn children(&self) -> Vec<ObjectId> {
        self.schema
            .candidate::<Vec<ObjectId>>(fields::CHILDREN)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed child ids.
    pub fn committed_children(&self) -> Vec<ObjectId> {
        self.schema
            .committed::<Vec<ObjectId>>(fields::CHILDREN)
            .ok()
            .flatten()
            .cloned()
            .unwrap_or_default()
    }

    /// Live MQTT subscriptions.
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Whether a configuration push is waiting for the decoder to be enabled.
    pub fn config_pending(&self) -> bool {
        self.config_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Condition, Summary};

    #[test]
    fn containment_rules() {
        assert!(MoKind::Server.allows_child(MoKind::Decoder));
        assert!(MoKind::SatelliteLink.allows_child(MoKind::Satellite));
        assert!(!MoKind::SatelliteLink.allows_child(MoKind::LightGroup));
        assert!(!MoKind::Decoder.allows_child(MoKind::Satellite));
        assert!(!MoKind::Sensor.allows_child(MoKind::Actuator));
    }

    #[test]
    fn element_names_round_trip() {
        for kind in MoKind::CONFIGURABLE {
            assert_eq!(MoKind::from_element(kind.element()), Some(kind));
        }
        assert_eq!(MoKind::from_element("Server"), None);
    }

    #[test]
    fn schemas_carry_kind_fields() {
        let decoder = MoKind::Decoder.schema();
        assert!(decoder.contains(fields::URI));
        assert!(decoder.contains(fields::CHILDREN));
        assert!(!decoder.contains(fields::PORT));
        assert_eq!(
            MoKind::Actuator.schema().fragments(),
            ["base", "admin", "actuator", "children"]
        );
    }

    #[test]
    fn new_object_is_provisional_and_unavailable() {
        let obj = ManagedObject::new(ObjectId(3), MoKind::Satellite, Some(ObjectId(2)));
        assert!(obj.is_provisional());
        assert!(obj.schema().is_dirty());
        assert!(obj.state().has(Condition::Init));
        assert_eq!(obj.state().summary(), Summary::Unavailable);
        assert!(obj.children().is_empty());
    }

    #[test]
    fn root_is_available() {
        let root = ManagedObject::root();
        assert_eq!(root.state().summary(), Summary::Available);
        assert!(!root.schema().is_dirty());
        assert_eq!(root.system_name(), "server");
    }
}
