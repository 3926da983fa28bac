//! Edge case and boundary condition tests for the fleet server

use rs_trainz_fleet::mo::fields;
use rs_trainz_fleet::protocol::Topics;
use rs_trainz_fleet::traits::NullRegistrar;
use rs_trainz_fleet::{
    AdminState, Condition, Config, ConfigError, Effect, Fleet, MoKind, ObjectId, ResultCode,
    Summary, TopologyDomain,
};

const LAYOUT: &str = r#"<Decoders>
  <Decoder>
    <SystemName>east</SystemName><URI>dec-east</URI>
    <MAC>02:00:00:00:00:01</MAC><AdminState>ENABLE</AdminState>
    <SatelliteLink>
      <SystemName>link0</SystemName><Link>0</Link><AdminState>ENABLE</AdminState>
      <Satellite>
        <SystemName>sat1</SystemName><Address>1</Address><AdminState>ENABLE</AdminState>
        <Sensor><SystemName>s0</SystemName><Port>0</Port><AdminState>ENABLE</AdminState></Sensor>
      </Satellite>
    </SatelliteLink>
  </Decoder>
</Decoders>"#;

struct Layout {
    fleet: Fleet,
    decoder: ObjectId,
    link: ObjectId,
    satellite: ObjectId,
    sensor: ObjectId,
}

fn layout() -> Layout {
    let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    let decoder = fleet.load_config(LAYOUT).unwrap()[0];
    let tree = fleet.tree();
    let link = tree.find_by_display_name(decoder, "east/link0").unwrap();
    let satellite = tree.find_by_display_name(decoder, "east/link0/sat1").unwrap();
    let sensor = tree.find_by_display_name(decoder, "east/link0/sat1/s0").unwrap();
    fleet.drain_effects();
    Layout {
        fleet,
        decoder,
        link,
        satellite,
        sensor,
    }
}

fn summary(fleet: &Fleet, id: ObjectId) -> Summary {
    fleet.tree().get(id).unwrap().state().summary()
}

// ============================================================================
// Deletion
// ============================================================================

#[test]
fn server_root_cannot_be_deleted() {
    let mut l = layout();
    let err = l.fleet.delete(ObjectId::ROOT).unwrap_err();
    assert!(matches!(err, ConfigError::NotDeletable { .. }));
    assert_eq!(err.rc(), ResultCode::NotPermitted);
}

#[test]
fn enabled_object_cannot_be_deleted() {
    let mut l = layout();
    assert!(matches!(
        l.fleet.delete(l.sensor),
        Err(ConfigError::NotDeletable { .. })
    ));
    assert!(l.fleet.tree().exists(l.sensor));
}

#[test]
fn parent_with_children_cannot_be_deleted() {
    let mut l = layout();
    l.fleet.set_admin(l.satellite, AdminState::Disabled).unwrap();
    assert!(matches!(
        l.fleet.delete(l.satellite),
        Err(ConfigError::NotDeletable { .. })
    ));
}

#[test]
fn nothing_is_deleted_during_a_transaction() {
    let mut l = layout();
    l.fleet.set_admin(l.sensor, AdminState::Disabled).unwrap();
    l.fleet.tree_mut().start_update(l.decoder).unwrap();
    assert!(matches!(
        l.fleet.delete(l.sensor),
        Err(ConfigError::NotDeletable { .. })
    ));
    l.fleet.tree_mut().abort_update(l.decoder).unwrap();
    l.fleet.delete(l.sensor).unwrap();
    assert!(!l.fleet.tree().exists(l.sensor));
}

#[test]
fn deleting_bottom_up_releases_everything() {
    let mut l = layout();
    for id in [l.sensor, l.satellite, l.link, l.decoder] {
        l.fleet.set_admin(id, AdminState::Disabled).unwrap();
        l.fleet.delete(id).unwrap();
    }
    assert_eq!(l.fleet.tree().len(), 1);
    assert_eq!(l.fleet.decoder_by_uri("dec-east"), None);

    let unsubscribed = l
        .fleet
        .drain_effects()
        .into_iter()
        .filter(|e| matches!(e, Effect::Unsubscribe(_)))
        .count();
    assert_eq!(unsubscribed, 4);

    // Name, URI and link number are all free again.
    l.fleet.load_config(LAYOUT).unwrap();
    assert!(l.fleet.decoder_by_uri("dec-east").is_some());
}

#[test]
fn deleted_port_can_be_reused() {
    let mut l = layout();
    l.fleet.set_admin(l.sensor, AdminState::Disabled).unwrap();
    l.fleet.delete(l.sensor).unwrap();
    let holder = l
        .fleet
        .tree()
        .get(l.satellite)
        .unwrap()
        .topology()
        .registry(TopologyDomain::SensorPort)
        .and_then(|ports| ports.holder(&"0".to_string()));
    assert_eq!(holder, None);

    let doc = LAYOUT.replace("<SystemName>s0</SystemName>", "<SystemName>s9</SystemName>");
    l.fleet.load_config(&doc).unwrap();
    assert!(l
        .fleet
        .tree()
        .find_by_display_name(l.decoder, "east/link0/sat1/s9")
        .is_some());
}

#[test]
fn unknown_object_is_reported() {
    let mut l = layout();
    let err = l.fleet.delete(ObjectId(999)).unwrap_err();
    assert_eq!(err, ConfigError::NoSuchObject(ObjectId(999)));
    assert_eq!(err.rc(), ResultCode::DoesNotExist);
}

// ============================================================================
// Inbound traffic
// ============================================================================

#[test]
fn foreign_topics_are_ignored() {
    let mut l = layout();
    assert!(!l.fleet.handle_message("/elsewhere/opState/upstream/dec-east/east", b""));
    assert!(!l.fleet.handle_message("/trains/track/decoder/unknown/dec-east", b""));
    assert!(!l.fleet.handle_message("", b""));
    assert!(l.fleet.drain_effects().is_empty());
}

#[test]
fn op_state_for_unknown_object_is_ignored() {
    let mut l = layout();
    let topic = Topics::default().op_state_upstream("dec-east", "east/link9");
    assert!(!l.fleet.handle_message(&topic, b"DISCONNECTED"));
}

#[test]
fn bad_op_state_payload_changes_nothing() {
    let mut l = layout();
    let topic = Topics::default().op_state_upstream("dec-east", "east/link0");
    assert!(!l.fleet.handle_message(&topic, b"DISCONNECTED,MELTED"));
    assert_eq!(summary(&l.fleet, l.link), Summary::Available);
}

#[test]
fn wrong_supervision_payload_is_not_a_ping() {
    let mut l = layout();
    let topic = Topics::default().supervision_upstream("dec-east");
    assert!(!l.fleet.handle_message(&topic, b"<PONG/>"));
}

#[test]
fn disconnected_link_blocks_its_subtree() {
    let mut l = layout();
    let topic = Topics::default().op_state_upstream("dec-east", "east/link0");
    assert!(l.fleet.handle_message(&topic, b"DISCONNECTED"));

    assert_eq!(summary(&l.fleet, l.decoder), Summary::Available);
    assert_eq!(summary(&l.fleet, l.link), Summary::Unavailable);
    for id in [l.satellite, l.sensor] {
        let state = l.fleet.tree().get(id).unwrap().state();
        assert!(state.has(Condition::ControlBlocked));
        assert_eq!(state.summary(), Summary::Unavailable);
    }

    let effects = l.fleet.drain_effects();
    assert!(effects.contains(&Effect::publish_retained(
        Topics::default().resource_op_state("sensor", "east/link0/sat1/s0"),
        "<OPSTATE>UNAVAILABLE</OPSTATE>"
    )));

    assert!(l.fleet.handle_message(&topic, b""));
    assert_eq!(summary(&l.fleet, l.sensor), Summary::Available);
}

#[test]
fn remote_report_cannot_raise_server_flags() {
    let mut l = layout();
    let topic = Topics::default().op_state_upstream("dec-east", "east/link0/sat1");
    assert!(l.fleet.handle_message(&topic, b"CBL,SERVERUNAVAILABLE"));
    let state = l.fleet.tree().get(l.satellite).unwrap().state();
    assert!(!state.has(Condition::ControlBlocked));
    assert!(!state.has(Condition::ServerUnavailable));
}

// ============================================================================
// Configuration documents
// ============================================================================

#[test]
fn malformed_document_is_a_parse_error() {
    let mut l = layout();
    let err = l.fleet.load_config("<Decoders><Decoder>").unwrap_err();
    assert!(matches!(err, ConfigError::Malformed(_)));
    assert_eq!(err.rc(), ResultCode::ParseError);
    assert_eq!(l.fleet.tree().updating(), None);
}

#[test]
fn truncated_document_changes_nothing() {
    let mut l = layout();
    let before = l.fleet.tree().len();
    let cut = LAYOUT.trim_end().trim_end_matches("</Decoders>");
    let doc = cut.replace("dec-east", "dec-other");

    let err = l.fleet.load_config(&doc).unwrap_err();
    assert!(matches!(err, ConfigError::Malformed(_)));
    assert_eq!(l.fleet.tree().len(), before);
    assert_eq!(l.fleet.tree().updating(), None);
    assert_eq!(l.fleet.decoder_by_uri("dec-east"), Some(l.decoder));
    assert_eq!(l.fleet.decoder_by_uri("dec-other"), None);
}

#[test]
fn content_after_the_root_is_rejected() {
    let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    for doc in [
        format!("{}<Decoder/>", LAYOUT),
        format!("{}<Decoders/>", LAYOUT),
        format!("{}trailing", LAYOUT),
    ] {
        let err = fleet.load_config(&doc).unwrap_err();
        assert_eq!(err.rc(), ResultCode::ParseError, "{}", doc);
    }
    assert_eq!(fleet.tree().len(), 1);
}

#[test]
fn lone_root_tag_is_rejected() {
    let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    assert!(matches!(
        fleet.load_config("<Decoders>"),
        Err(ConfigError::Malformed(_))
    ));
    assert_eq!(fleet.load_config("<Decoders/>"), Ok(Vec::new()));
}

#[test]
fn duplicate_sibling_names_in_one_document_collide() {
    let mut l = layout();
    let before = l.fleet.tree().len();
    let doc = r#"<Decoders><Decoder>
        <SystemName>west</SystemName><URI>dec-west</URI><MAC>02:00:00:00:00:02</MAC>
        <SatelliteLink><SystemName>l</SystemName><Link>0</Link></SatelliteLink>
        <SatelliteLink><SystemName>l</SystemName><Link>1</Link></SatelliteLink>
    </Decoder></Decoders>"#;

    assert_eq!(
        l.fleet.load_config(doc),
        Err(ConfigError::SystemNameAlreadyInUse("l".into()))
    );
    assert_eq!(l.fleet.tree().len(), before);
    assert_eq!(l.fleet.decoder_by_uri("dec-west"), None);
}

#[test]
fn duplicate_decoders_in_one_document_collide() {
    let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    let doc = r#"<Decoders>
        <Decoder><SystemName>east</SystemName><URI>dec-a</URI><MAC>02:00:00:00:00:01</MAC></Decoder>
        <Decoder><SystemName>east</SystemName><URI>dec-b</URI><MAC>02:00:00:00:00:02</MAC></Decoder>
    </Decoders>"#;

    let err = fleet.load_config(doc).unwrap_err();
    assert_eq!(err, ConfigError::SystemNameAlreadyInUse("east".into()));
    assert_eq!(err.rc(), ResultCode::AlreadyExists);
    assert_eq!(fleet.tree().len(), 1);
}

#[test]
fn mac_addresses_collide_regardless_of_case() {
    let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    let upper = r#"<Decoders><Decoder>
        <SystemName>east</SystemName><URI>dec-east</URI><MAC>02:AA:00:00:00:01</MAC>
    </Decoder></Decoders>"#;
    fleet.load_config(upper).unwrap();

    let lower = r#"<Decoders><Decoder>
        <SystemName>west</SystemName><URI>dec-west</URI><MAC>02:aa:00:00:00:01</MAC>
    </Decoder></Decoders>"#;
    let err = fleet.load_config(lower).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::AddressAlreadyInUse {
            domain: TopologyDomain::DecoderMac,
            ..
        }
    ));
    assert_eq!(err.rc(), ResultCode::AlreadyExists);
    assert_eq!(fleet.decoder_by_uri("dec-west"), None);
    assert_eq!(fleet.tree().len(), 2);
}

#[test]
fn wrong_containment_is_rejected() {
    let mut l = layout();
    let doc = r#"<Decoders><Decoder>
        <SystemName>east</SystemName><URI>dec-east</URI><MAC>02:00:00:00:00:01</MAC>
        <Sensor><SystemName>s1</SystemName><Port>1</Port></Sensor>
    </Decoder></Decoders>"#;
    assert_eq!(
        l.fleet.load_config(doc),
        Err(ConfigError::ChildNotAllowed {
            parent: MoKind::Decoder,
            child: MoKind::Sensor,
        })
    );
}

#[test]
fn missing_address_is_reported() {
    let mut l = layout();
    let doc = LAYOUT.replace("<Address>1</Address>", "");
    let err = l.fleet.load_config(&doc).unwrap_err();
    assert_eq!(
        err,
        ConfigError::MissingField {
            element: "Satellite".into(),
            field: "Address".into(),
        }
    );
}

#[test]
fn unknown_field_is_rejected() {
    let mut l = layout();
    let doc = LAYOUT.replace("<Port>0</Port>", "<Port>0</Port><Colour>red</Colour>");
    assert_eq!(
        l.fleet.load_config(&doc),
        Err(ConfigError::NoSuchAttribute("Colour".into()))
    );
}

#[test]
fn children_cannot_be_staged_directly() {
    let mut l = layout();
    let tree = l.fleet.tree_mut();
    tree.start_update(l.decoder).unwrap();
    assert_eq!(
        tree.set_attr_text(l.decoder, fields::CHILDREN, "1"),
        Err(ConfigError::NoSuchAttribute("Children".into()))
    );
    tree.abort_update(l.decoder).unwrap();
}

#[test]
fn staging_outside_a_transaction_is_refused() {
    let mut l = layout();
    let tree = l.fleet.tree_mut();
    assert_eq!(
        tree.set_attr_text(l.sensor, fields::PORT, "1"),
        Err(ConfigError::NotUpdating(l.sensor))
    );

    // A transaction on a sibling subtree does not cover the decoder.
    tree.start_update(l.satellite).unwrap();
    assert_eq!(
        tree.set_attr_text(l.decoder, fields::USER_NAME, "x"),
        Err(ConfigError::NotUpdating(l.decoder))
    );
    assert!(matches!(
        tree.start_update(l.decoder),
        Err(ConfigError::AlreadyUpdating(_))
    ));
    tree.abort_update(l.satellite).unwrap();
}

#[test]
fn boundary_values_are_accepted() {
    let mut l = layout();
    let doc = LAYOUT
        .replace("<Address>1</Address>", "<Address>254</Address>")
        .replace("<Port>0</Port>", "<Port>7</Port>")
        .replace(
            "<AdminState>ENABLE</AdminState>\n    <SatelliteLink>",
            "<AdminState>ENABLE</AdminState><KeepAlivePeriod>60000</KeepAlivePeriod>\
             <MaxMissedPings>100</MaxMissedPings>\n    <SatelliteLink>",
        );
    l.fleet.load_config(&doc).unwrap();
    let sup = l.fleet.tree().get(l.decoder).unwrap().supervision().unwrap();
    assert_eq!(sup.period_ms(), 60000);
    assert_eq!(sup.max_missed(), 100);
}

#[test]
fn values_past_the_boundary_are_rejected() {
    for (from, to) in [
        ("<Address>1</Address>", "<Address>255</Address>"),
        ("<Port>0</Port>", "<Port>8</Port>"),
        ("<Link>0</Link>", "<Link>2</Link>"),
    ] {
        let mut l = layout();
        let err = l.fleet.load_config(&LAYOUT.replace(from, to)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{}: {:?}", to, err);
        assert_eq!(err.rc(), ResultCode::ParamError);
    }
}

#[test]
fn unparsable_admin_state_is_rejected() {
    let mut l = layout();
    let doc = LAYOUT.replacen(
        "<AdminState>ENABLE</AdminState>",
        "<AdminState>MAYBE</AdminState>",
        1,
    );
    assert!(matches!(
        l.fleet.load_config(&doc),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert_eq!(
        l.fleet.tree().get(l.decoder).unwrap().state().admin(),
        AdminState::Enabled
    );
}

#[test]
fn empty_document_is_a_no_op() {
    let mut l = layout();
    assert_eq!(l.fleet.load_config("<Decoders/>"), Ok(Vec::new()));
    assert!(l.fleet.drain_effects().is_empty());
}
