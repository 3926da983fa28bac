//! Protocol dispatcher on top of the object tree.
//!
//! [`Fleet`] turns inbound decoder traffic and timer ticks into state
//! changes, and operator requests into transactions. It never touches the
//! transport: everything outbound is queued as an [`Effect`] and picked up
//! with [`Fleet::drain_effects`].
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_fleet::config::Config;
//! use rs_trainz_fleet::fleet::Fleet;
//! use rs_trainz_fleet::traits::NullRegistrar;
//!
//! let mut fleet = Fleet::new(&Config::default(), Box::new(NullRegistrar));
//! fleet
//!     .load_config(
//!         "<Decoders><Decoder>\
//!            <SystemName>east</SystemName><URI>dec-east</URI>\
//!            <MAC>02:00:00:00:00:01</MAC><AdminState>ENABLE</AdminState>\
//!          </Decoder></Decoders>",
//!     )
//!     .unwrap();
//!
//! // The decoder pings; the server records it.
//! assert!(fleet.handle_message("/trains/track/decodersupervision/upstream/dec-east", b"<PING/>"));
//! ```

use tracing::{debug, info, warn};

use crate::alarm::Alarm;
use crate::config::Config;
use crate::config_doc;
use crate::effect::Effect;
use crate::error::ConfigError;
use crate::mo::{fields, ObjectId};
use crate::protocol::{is_ping, Inbound, StatReport, PING, REBOOT};
use crate::state::{AdminState, Condition, ConditionSet};
use crate::traits::MomRegistrar;
use crate::tree::ObjectTree;

/// The decoder fleet: object tree plus protocol handling.
#[derive(Debug)]
pub struct Fleet {
    tree: ObjectTree,
}

impl Fleet {
    /// Creates an empty fleet.
    pub fn new(config: &Config, registrar: Box<dyn MomRegistrar>) -> Self {
        let tree = ObjectTree::new(config.mqtt.topics(), registrar)
            .with_supervision_defaults(config.supervision.clone());
        Self { tree }
    }

    /// Read access to the object tree.
    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    /// Write access to the object tree, for staging custom transactions.
    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        &mut self.tree
    }

    /// Takes all queued effects.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.tree.drain_effects()
    }

    /// Queues a subscribe for every live subscription, e.g. after a reconnect.
    ///
    /// Returns the number of queued subscriptions.
    pub fn resubscribe_all(&mut self) -> usize {
        let filters: Vec<String> = self
            .tree
            .iter()
            .flat_map(|n| n.subscriptions().iter().cloned())
            .collect();
        let count = filters.len();
        self.tree
            .outbox
            .extend(filters.into_iter().map(Effect::Subscribe));
        count
    }

    /// Committed decoder with this URI.
    pub fn decoder_by_uri(&self, uri: &str) -> Option<ObjectId> {
        self.tree.decoder_by_uri(uri)
    }

    /// Alarms currently reported across the fleet.
    pub fn alarms(&self) -> Vec<&Alarm> {
        self.tree.reported_alarms()
    }

    // ========================================================================
    // Operator requests
    // ========================================================================

    /// Applies a configuration document.
    pub fn load_config(&mut self, xml: &str) -> Result<Vec<ObjectId>, ConfigError> {
        config_doc::apply_document(&mut self.tree, xml)
    }

    /// Renders the committed configuration.
    pub fn export_config(&self) -> Result<String, ConfigError> {
        config_doc::render_document(&self.tree)
    }

    /// Changes the configured admin state of one object in its own transaction.
    pub fn set_admin(&mut self, id: ObjectId, admin: AdminState) -> Result<(), ConfigError> {
        self.tree.start_update(id)?;
        if let Err(e) = self.tree.set_attr(id, fields::ADMIN_STATE, admin) {
            self.tree.abort_update(id)?;
            return Err(e);
        }
        self.tree.commit_update(id)
    }

    /// Deletes a childless, admin-disabled object.
    pub fn delete(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        self.tree.delete(id)
    }

    /// Asks a decoder to reboot.
    ///
    /// The next supervision tick skips its downstream ping.
    pub fn reboot(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        let node = self.tree.get(id)?;
        let Some(uri) = node.uri().map(str::to_string) else {
            return Err(ConfigError::InvalidValue {
                attr: fields::URI.to_string(),
                reason: format!("object {} is not a committed decoder", id),
            });
        };
        let topic = self.tree.topics().reboot(&uri);
        self.tree.outbox.push(Effect::publish(topic, REBOOT));
        if let Some(sup) = self.tree.node_mut(id)?.supervision.as_mut() {
            sup.request_restart();
        }
        info!(id = %id, uri = %uri, "reboot requested");
        Ok(())
    }

    // ========================================================================
    // Inbound traffic
    // ========================================================================

    /// Dispatches one inbound message.
    ///
    /// Returns `false` for topics the server does not handle, unknown
    /// decoders or objects, and unparsable payloads.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> bool {
        let Some(inbound) = self.tree.topics().parse(topic) else {
            debug!(topic = %topic, "ignoring topic");
            return false;
        };
        let payload = String::from_utf8_lossy(payload);
        match inbound {
            Inbound::ConfigRequest { uri } => self.on_config_request(&uri),
            Inbound::Ping { uri } => self.on_ping(&uri, &payload),
            Inbound::OpState { uri, name } => self.on_op_state(&uri, &name, &payload),
            Inbound::Statistics { uri, name } => self.on_statistics(&uri, &name, &payload),
        }
    }

    fn on_config_request(&mut self, uri: &str) -> bool {
        let Some(id) = self.decoder_by_uri(uri) else {
            debug!(uri = %uri, "config request from unknown decoder");
            return false;
        };
        let enabled = self
            .tree
            .get(id)
            .map(|n| n.state().admin().is_enabled())
            .unwrap_or(false);
        if !enabled {
            debug!(uri = %uri, "config request from disabled decoder ignored");
            return false;
        }
        match self.tree.push_config(id) {
            Ok(()) => true,
            Err(e) => {
                warn!(uri = %uri, error = %e, "config request failed");
                false
            }
        }
    }

    fn on_ping(&mut self, uri: &str, payload: &str) -> bool {
        if !is_ping(payload) {
            debug!(uri = %uri, payload = %payload, "unexpected supervision payload");
            return false;
        }
        let Some(id) = self.decoder_by_uri(uri) else {
            debug!(uri = %uri, "ping from unknown decoder");
            return false;
        };
        let was_lost = match self.tree.node_mut(id) {
            Ok(node) => node
                .supervision
                .as_mut()
                .map(|sup| sup.on_ping())
                .unwrap_or(false),
            Err(_) => return false,
        };
        debug!(uri = %uri, "ping received");
        if was_lost {
            info!(uri = %uri, "decoder reachable again");
        }
        self.tree
            .clear_condition(id, Condition::ServerUnavailable, None)
            .is_ok()
    }

    fn resolve(&self, uri: &str, name: &str) -> Option<ObjectId> {
        let decoder = self.decoder_by_uri(uri)?;
        self.tree.find_by_display_name(decoder, name)
    }

    fn on_op_state(&mut self, uri: &str, name: &str, payload: &str) -> bool {
        let Some(id) = self.resolve(uri, name) else {
            debug!(uri = %uri, name = %name, "op state for unknown object");
            return false;
        };
        let reported = match ConditionSet::decode(payload) {
            Ok(flags) => flags,
            Err(e) => {
                warn!(uri = %uri, name = %name, error = %e, "bad op state payload");
                return false;
            }
        };
        let set = reported.intersection(ConditionSet::REMOTE);
        let clear = ConditionSet::REMOTE.difference(reported);
        let correlation = self.tree.next_correlation();
        self.tree
            .apply_conditions(id, set, clear, Some(correlation))
            .is_ok()
    }

    fn on_statistics(&mut self, uri: &str, name: &str, payload: &str) -> bool {
        let Some(id) = self.resolve(uri, name) else {
            debug!(uri = %uri, name = %name, "statistics for unknown object");
            return false;
        };
        let report = match StatReport::parse(payload) {
            Ok(report) => report,
            Err(e) => {
                warn!(uri = %uri, name = %name, error = %e, "bad statistics report");
                return false;
            }
        };
        let Ok(node) = self.tree.node_mut(id) else {
            return false;
        };
        let errored = report.increased(&node.last_stats, node.kind().stat_counters());
        node.last_stats = report.counters;
        let result = if errored {
            self.tree.set_condition(id, Condition::ErroredSecond, None)
        } else {
            self.tree.clear_condition(id, Condition::ErroredSecond, None)
        };
        result.is_ok()
    }

    // ========================================================================
    // Supervision
    // ========================================================================

    /// Runs due supervision ticks for every armed decoder.
    pub fn tick(&mut self, now_ms: u64) {
        let armed: Vec<ObjectId> = self
            .tree
            .iter()
            .filter(|n| n.supervision().map(|s| s.is_armed()).unwrap_or(false))
            .map(|n| n.id())
            .collect();
        for id in armed {
            let Ok(node) = self.tree.node_mut(id) else {
                continue;
            };
            let Some(tick) = node.supervision.as_mut().and_then(|s| s.poll(now_ms)) else {
                continue;
            };
            let Some(uri) = node.uri().map(str::to_string) else {
                continue;
            };
            let already_lost = node.state().has(Condition::ServerUnavailable);

            if tick.send_ping {
                let topic = self.tree.topics().supervision_downstream(&uri);
                self.tree.outbox.push(Effect::publish(topic, PING));
                debug!(uri = %uri, missed = tick.missed, "ping sent");
            }
            if tick.lost && !already_lost {
                warn!(uri = %uri, missed = tick.missed, "decoder lost");
                let correlation = self.tree.next_correlation();
                if let Err(e) =
                    self.tree
                        .set_condition(id, Condition::ServerUnavailable, Some(correlation))
                {
                    warn!(uri = %uri, error = %e, "loss of contact not recorded");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockRegistrar;
    use crate::protocol::Topics;
    use crate::state::Summary;

    const DOC: &str = r#"<Decoders><Decoder>
        <SystemName>east</SystemName><URI>dec-east</URI>
        <MAC>02:00:00:00:00:01</MAC><AdminState>ENABLE</AdminState>
        <SatelliteLink><SystemName>link0</SystemName><Link>0</Link>
          <AdminState>ENABLE</AdminState>
        </SatelliteLink>
    </Decoder></Decoders>"#;

    fn fleet() -> (Fleet, ObjectId, ObjectId) {
        let mut fleet = Fleet::new(&Config::default(), Box::new(MockRegistrar::new()));
        let dec = fleet.load_config(DOC).unwrap()[0];
        let link = fleet.tree().find_by_display_name(dec, "east/link0").unwrap();
        fleet.drain_effects();
        (fleet, dec, link)
    }

    #[test]
    fn unknown_topics_are_ignored() {
        let (mut fleet, _, _) = fleet();
        assert!(!fleet.handle_message("/other/topic", b""));
        assert!(!fleet.handle_message("/trains/track/decodersupervision/upstream/nobody", b"<PING/>"));
    }

    #[test]
    fn op_state_touches_remote_flags_only() {
        let (mut fleet, _, link) = fleet();
        let topic = "/trains/opState/upstream/dec-east/east/link0";
        assert!(fleet.handle_message(topic, b"DISCONNECTED,INTFAIL"));
        let state = fleet.tree().get(link).unwrap().state();
        assert!(state.has(Condition::Disconnected));
        assert!(!state.has(Condition::InternalFailure));

        assert!(fleet.handle_message(topic, b""));
        assert!(!fleet.tree().get(link).unwrap().state().has(Condition::Disconnected));
        assert_eq!(fleet.tree().get(link).unwrap().state().summary(), Summary::Available);
    }

    #[test]
    fn statistics_drive_errored_second() {
        let (mut fleet, _, link) = fleet();
        let topic = "/trains/statistics/dec-east/east/link0";
        fleet.handle_message(topic, b"<statReport><rxCrcErr>2</rxCrcErr></statReport>");
        assert!(fleet.tree().get(link).unwrap().state().has(Condition::ErroredSecond));
        assert_eq!(fleet.tree().get(link).unwrap().state().summary(), Summary::Available);

        fleet.handle_message(topic, b"<statReport><rxCrcErr>2</rxCrcErr></statReport>");
        assert!(!fleet.tree().get(link).unwrap().state().has(Condition::ErroredSecond));
    }

    #[test]
    fn reboot_suppresses_next_ping() {
        let (mut fleet, dec, _) = fleet();
        fleet.reboot(dec).unwrap();
        let topics = Topics::default();
        assert_eq!(
            fleet.drain_effects(),
            vec![Effect::publish(topics.reboot("dec-east"), REBOOT)]
        );
        fleet.tick(0);
        fleet.tick(1000);
        assert!(fleet.drain_effects().is_empty());
        fleet.tick(2000);
        assert_eq!(
            fleet.drain_effects(),
            vec![Effect::publish(topics.supervision_downstream("dec-east"), PING)]
        );
    }

    #[test]
    fn reboot_requires_decoder() {
        let (mut fleet, _, link) = fleet();
        assert!(matches!(
            fleet.reboot(link),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn resubscribe_covers_live_subscriptions() {
        let (mut fleet, _, _) = fleet();
        assert_eq!(fleet.resubscribe_all(), 4);
        let effects = fleet.drain_effects();
        assert!(effects.iter().all(|e| matches!(e, Effect::Subscribe(_))));
        assert!(effects.contains(&Effect::Subscribe(
            Topics::default().config_req("dec-east")
        )));
    }
}
