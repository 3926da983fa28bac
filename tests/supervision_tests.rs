//! Integration tests for decoder supervision and the inbound protocol.

use rs_trainz_fleet::protocol::{Topics, PING, REBOOT};
use rs_trainz_fleet::{
    AdminState, Condition, Config, Criticality, Effect, Fleet, ObjectId, Summary,
    SupervisionConfig,
};
use rs_trainz_fleet::traits::NullRegistrar;

fn decoder_doc(admin: &str, extra: &str) -> String {
    format!(
        "<Decoders><Decoder>\
           <SystemName>east</SystemName><URI>dec-east</URI>\
           <MAC>02:00:00:00:00:01</MAC><AdminState>{}</AdminState>{}\
           <LightgroupsLink><SystemName>lg</SystemName><Link>0</Link>\
             <AdminState>ENABLE</AdminState>\
             <LightGroup><SystemName>mast1</SystemName><Address>4</Address>\
               <AdminState>ENABLE</AdminState></LightGroup>\
           </LightgroupsLink>\
         </Decoder></Decoders>",
        admin, extra
    )
}

fn fleet_with(admin: &str, extra: &str) -> (Fleet, ObjectId) {
    let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
    let id = fleet.load_config(&decoder_doc(admin, extra)).unwrap()[0];
    fleet.drain_effects();
    (fleet, id)
}

fn pings(effects: &[Effect]) -> usize {
    let topic = Topics::default().supervision_downstream("dec-east");
    effects
        .iter()
        .filter(|e| **e == Effect::publish(topic.clone(), PING))
        .count()
}

fn upstream_ping(fleet: &mut Fleet) -> bool {
    let topic = Topics::default().supervision_upstream("dec-east");
    fleet.handle_message(&topic, PING.as_bytes())
}

#[test]
fn enabled_decoder_is_pinged_every_period() {
    let (mut fleet, _) = fleet_with("ENABLE", "");
    fleet.tick(0);
    fleet.tick(500);
    assert_eq!(pings(&fleet.drain_effects()), 0);

    fleet.tick(1000);
    fleet.tick(1500);
    fleet.tick(2000);
    assert_eq!(pings(&fleet.drain_effects()), 2);
}

#[test]
fn missed_pings_mark_decoder_lost() {
    let (mut fleet, dec) = fleet_with("ENABLE", "");
    for now in [0, 1000, 2000] {
        fleet.tick(now);
    }
    assert!(!fleet.tree().get(dec).unwrap().state().has(Condition::ServerUnavailable));

    fleet.tick(3000);
    let node = fleet.tree().get(dec).unwrap();
    assert!(node.state().has(Condition::ServerUnavailable));
    assert_eq!(node.state().summary(), Summary::Unavailable);

    let alarms = fleet.alarms();
    let lost = alarms
        .iter()
        .find(|a| a.kind == Condition::ServerUnavailable)
        .unwrap();
    assert_eq!(lost.source, "east");
    assert_eq!(lost.criticality, Criticality::Critical);
    assert!(alarms.iter().any(|a| a.kind == Condition::ControlBlocked && a.source == "east/lg"));

    let effects = fleet.drain_effects();
    let resource_topic = Topics::default().resource_op_state("lightgroup", "east/lg/mast1");
    assert!(effects.contains(&Effect::publish_retained(
        resource_topic,
        "<OPSTATE>UNAVAILABLE</OPSTATE>"
    )));
}

#[test]
fn upstream_ping_restores_decoder() {
    let (mut fleet, dec) = fleet_with("ENABLE", "");
    for now in [0, 1000, 2000, 3000, 4000] {
        fleet.tick(now);
    }
    assert!(fleet.tree().get(dec).unwrap().state().has(Condition::ServerUnavailable));

    assert!(upstream_ping(&mut fleet));
    let node = fleet.tree().get(dec).unwrap();
    assert!(!node.state().has(Condition::ServerUnavailable));
    assert_eq!(node.state().summary(), Summary::Available);
    assert_eq!(node.supervision().unwrap().missed(), 0);
    assert!(fleet.alarms().is_empty());

    let mast = fleet.tree().find_by_display_name(dec, "east/lg/mast1").unwrap();
    assert_eq!(
        fleet.tree().get(mast).unwrap().state().summary(),
        Summary::Available
    );
}

#[test]
fn regular_pings_keep_decoder_available() {
    let (mut fleet, dec) = fleet_with("ENABLE", "");
    fleet.tick(0);
    for round in 1..10u64 {
        fleet.tick(round * 1000);
        assert!(upstream_ping(&mut fleet));
    }
    assert_eq!(
        fleet.tree().get(dec).unwrap().state().summary(),
        Summary::Available
    );
}

#[test]
fn disabled_decoder_is_not_supervised() {
    let (mut fleet, dec) = fleet_with("DISABLE", "");
    for now in [0, 1000, 2000, 3000, 4000] {
        fleet.tick(now);
    }
    assert_eq!(pings(&fleet.drain_effects()), 0);
    let node = fleet.tree().get(dec).unwrap();
    assert!(!node.state().has(Condition::ServerUnavailable));
    assert!(!node.supervision().unwrap().is_armed());
}

#[test]
fn disabling_stops_supervision_and_suppresses_alarms() {
    let (mut fleet, dec) = fleet_with("ENABLE", "");
    for now in [0, 1000, 2000, 3000] {
        fleet.tick(now);
    }
    assert!(!fleet.alarms().is_empty());

    fleet.set_admin(dec, AdminState::Disabled).unwrap();
    assert!(fleet.alarms().iter().all(|a| a.source != "east"));
    let node = fleet.tree().get(dec).unwrap();
    assert!(node.state().has(Condition::ServerUnavailable));
    assert_eq!(node.supervision().unwrap().missed(), 0);

    fleet.drain_effects();
    fleet.tick(4000);
    fleet.tick(5000);
    assert_eq!(pings(&fleet.drain_effects()), 0);
}

#[test]
fn configured_period_is_used() {
    let (mut fleet, dec) = fleet_with(
        "ENABLE",
        "<KeepAlivePeriod>500</KeepAlivePeriod><MaxMissedPings>2</MaxMissedPings>",
    );
    let sup = fleet.tree().get(dec).unwrap().supervision().unwrap();
    assert_eq!(sup.period_ms(), 500);
    assert_eq!(sup.max_missed(), 2);

    fleet.tick(0);
    fleet.tick(500);
    fleet.tick(1000);
    assert!(fleet.tree().get(dec).unwrap().state().has(Condition::ServerUnavailable));
}

#[test]
fn server_defaults_seed_new_decoders() {
    let config = Config::default().with_supervision(
        SupervisionConfig::default()
            .with_keep_alive_period_ms(250)
            .with_max_missed_pings(5),
    );
    let mut fleet = Fleet::new(&config, Box::new(NullRegistrar));
    let dec = fleet.load_config(&decoder_doc("ENABLE", "")).unwrap()[0];
    let sup = fleet.tree().get(dec).unwrap().supervision().unwrap();
    assert_eq!(sup.period_ms(), 250);
    assert_eq!(sup.max_missed(), 5);
}

#[test]
fn reboot_skips_exactly_one_ping() {
    let (mut fleet, dec) = fleet_with("ENABLE", "");
    fleet.tick(0);
    fleet.reboot(dec).unwrap();
    let effects = fleet.drain_effects();
    assert_eq!(
        effects,
        vec![Effect::publish(Topics::default().reboot("dec-east"), REBOOT)]
    );

    fleet.tick(1000);
    assert_eq!(pings(&fleet.drain_effects()), 0);
    fleet.tick(2000);
    assert_eq!(pings(&fleet.drain_effects()), 1);
}

// ============================================================================
// Configuration requests
// ============================================================================

#[test]
fn config_request_answered_when_enabled() {
    let (mut fleet, _) = fleet_with("ENABLE", "");
    let topics = Topics::default();
    assert!(fleet.handle_message(&topics.config_req("dec-east"), b""));

    let effects = fleet.drain_effects();
    let response = effects
        .iter()
        .find_map(|e| match e {
            Effect::Publish { topic, payload, .. } if *topic == topics.config_resp("dec-east") => {
                Some(payload.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(response.contains("<URI>dec-east</URI>"));
    assert!(response.contains("<SystemName>mast1</SystemName>"));
    assert!(!response.contains("Children"));
}

#[test]
fn config_request_ignored_when_disabled() {
    let (mut fleet, dec) = fleet_with("DISABLE", "");
    let topics = Topics::default();
    assert!(!fleet.handle_message(&topics.config_req("dec-east"), b""));
    assert!(fleet.drain_effects().is_empty());
    assert!(fleet.tree().get(dec).unwrap().config_pending());

    fleet.set_admin(dec, AdminState::Enabled).unwrap();
    let effects = fleet.drain_effects();
    assert!(effects
        .iter()
        .any(|e| e.topic() == topics.config_resp("dec-east")));
    let node = fleet.tree().get(dec).unwrap();
    assert!(!node.state().has(Condition::Unconfigured));
    assert!(!node.config_pending());
}

#[test]
fn config_request_from_unknown_decoder() {
    let (mut fleet, _) = fleet_with("ENABLE", "");
    let topics = Topics::default();
    assert!(!fleet.handle_message(&topics.config_req("dec-west"), b""));
    assert!(fleet.drain_effects().is_empty());
}
