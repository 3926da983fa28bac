//! Attribute names and schema fragments per object kind.
//!
//! Attribute names double as element names in the configuration document.

use std::sync::Arc;

use crate::attribute::{in_range, one_of, topic_safe, Attribute, ManagedAttribute, Validator};
use crate::mo::ObjectId;
use crate::schema::{FieldSpec, Presence, SchemaFragment};
use crate::state::AdminState;

// ============================================================================
// Names
// ============================================================================

/// Unique name among siblings, used in topics.
pub const SYSTEM_NAME: &str = "SystemName";
/// Free-form operator name.
pub const USER_NAME: &str = "UserName";
/// Free-form description.
pub const DESCRIPTION: &str = "Description";
/// Configured admin state.
pub const ADMIN_STATE: &str = "AdminState";
/// Decoder URI, used in topics.
pub const URI: &str = "URI";
/// Decoder MAC address.
pub const MAC: &str = "MAC";
/// Supervision period in milliseconds.
pub const KEEP_ALIVE_PERIOD: &str = "KeepAlivePeriod";
/// Missed pings before supervision is lost.
pub const MAX_MISSED_PINGS: &str = "MaxMissedPings";
/// Link number on the decoder.
pub const LINK: &str = "Link";
/// Bus address on a link.
pub const ADDRESS: &str = "Address";
/// Port on a satellite.
pub const PORT: &str = "Port";
/// Resource type.
pub const TYPE: &str = "Type";
/// Resource sub type.
pub const SUB_TYPE: &str = "SubType";
/// Light group property string.
pub const PROPERTY: &str = "Property";
/// Child object ids.
pub const CHILDREN: &str = "Children";

/// Accepts `xx:xx:xx:xx:xx:xx` hex MAC addresses.
pub fn mac_address() -> Validator<String> {
    Arc::new(|v: &String| {
        let parts: Vec<&str> = v.split(':').collect();
        let valid = parts.len() == 6
            && parts
                .iter()
                .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
        if valid {
            Ok(())
        } else {
            Err(format!("{:?} is not a MAC address", v))
        }
    })
}

// ============================================================================
// Builders
// ============================================================================

fn text(initial: &str) -> ManagedAttribute<String> {
    ManagedAttribute::new(initial.to_string())
}

fn system_name() -> Box<dyn Attribute> {
    Box::new(text("").with_validator(topic_safe()))
}

fn free_text() -> Box<dyn Attribute> {
    Box::new(text(""))
}

fn admin_state() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(AdminState::Disabled))
}

fn uri() -> Box<dyn Attribute> {
    Box::new(text("").with_validator(topic_safe()))
}

fn mac() -> Box<dyn Attribute> {
    Box::new(text("").with_validator(mac_address()))
}

fn keep_alive_period() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(1000i64).with_validator(in_range(100, 60_000)))
}

fn max_missed_pings() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(3i64).with_validator(in_range(1, 100)))
}

fn lightgroups_link() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(0i64).with_validator(in_range(0, 0)))
}

fn satellite_link() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(0i64).with_validator(in_range(0, 1)))
}

fn light_group_address() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(0i64).with_validator(in_range(0, 255)))
}

fn light_group_type() -> Box<dyn Attribute> {
    Box::new(text("LIGHT").with_validator(one_of(&["SIGNAL MAST", "LIGHT", "SEQUENCE"])))
}

fn satellite_address() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(0i64).with_validator(in_range(0, 254)))
}

fn sensor_port() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(0i64).with_validator(in_range(0, 7)))
}

fn sensor_type() -> Box<dyn Attribute> {
    Box::new(text("DIGITAL").with_validator(one_of(&["DIGITAL", "ANALOG"])))
}

fn actuator_port() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::new(0i64).with_validator(in_range(0, 3)))
}

fn actuator_type() -> Box<dyn Attribute> {
    Box::new(text("SERVO").with_validator(one_of(&["SERVO", "SOLENOID", "PWM", "ONOFF"])))
}

fn children() -> Box<dyn Attribute> {
    Box::new(ManagedAttribute::<Vec<ObjectId>>::new(Vec::new()))
}

// ============================================================================
// Fragments
// ============================================================================

const fn field(
    name: &'static str,
    presence: Presence,
    build: fn() -> Box<dyn Attribute>,
) -> FieldSpec {
    FieldSpec {
        name,
        presence,
        build,
    }
}

/// Name and description, shared by every kind.
pub static BASE: SchemaFragment = SchemaFragment {
    name: "base",
    fields: &[
        field(SYSTEM_NAME, Presence::Mandatory, system_name),
        field(USER_NAME, Presence::Optional, free_text),
        field(DESCRIPTION, Presence::Optional, free_text),
    ],
};

/// Configured admin state.
pub static ADMIN: SchemaFragment = SchemaFragment {
    name: "admin",
    fields: &[field(ADMIN_STATE, Presence::Optional, admin_state)],
};

/// Decoder identity and supervision parameters.
pub static DECODER: SchemaFragment = SchemaFragment {
    name: "decoder",
    fields: &[
        field(URI, Presence::Mandatory, uri),
        field(MAC, Presence::Mandatory, mac),
        field(KEEP_ALIVE_PERIOD, Presence::Optional, keep_alive_period),
        field(MAX_MISSED_PINGS, Presence::Optional, max_missed_pings),
    ],
};

/// Light group link number.
pub static LIGHTGROUPS_LINK: SchemaFragment = SchemaFragment {
    name: "lightgroups-link",
    fields: &[field(LINK, Presence::Mandatory, lightgroups_link)],
};

/// Satellite link number.
pub static SATELLITE_LINK: SchemaFragment = SchemaFragment {
    name: "satellite-link",
    fields: &[field(LINK, Presence::Mandatory, satellite_link)],
};

/// Light group address and kind.
pub static LIGHT_GROUP: SchemaFragment = SchemaFragment {
    name: "light-group",
    fields: &[
        field(ADDRESS, Presence::Mandatory, light_group_address),
        field(TYPE, Presence::Optional, light_group_type),
        field(PROPERTY, Presence::Optional, free_text),
    ],
};

/// Satellite address.
pub static SATELLITE: SchemaFragment = SchemaFragment {
    name: "satellite",
    fields: &[field(ADDRESS, Presence::Mandatory, satellite_address)],
};

/// Sensor port and kind.
pub static SENSOR: SchemaFragment = SchemaFragment {
    name: "sensor",
    fields: &[
        field(PORT, Presence::Mandatory, sensor_port),
        field(TYPE, Presence::Optional, sensor_type),
    ],
};

/// Actuator port and kind.
pub static ACTUATOR: SchemaFragment = SchemaFragment {
    name: "actuator",
    fields: &[
        field(PORT, Presence::Mandatory, actuator_port),
        field(TYPE, Presence::Optional, actuator_type),
        field(SUB_TYPE, Presence::Optional, free_text),
    ],
};

/// Child list.
pub static CHILD_LIST: SchemaFragment = SchemaFragment {
    name: "children",
    fields: &[field(CHILDREN, Presence::Internal, children)],
};
