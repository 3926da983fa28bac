//! The transaction engine.
//!
//! Configuration changes are staged into candidate buffers and then applied
//! to a whole subtree in phases:
//!
//! 1. [`validate`](ObjectTree::validate): re-check candidates and reserve
//!    addresses in each parent's registries. No committed state changes.
//! 2. [`commit0`](ObjectTree::commit0): copy candidates to committed.
//!    Cannot fail.
//! 3. [`commit1`](ObjectTree::commit1): provision the committed objects
//!    (subscriptions, supervision, admin state, front-end registration).
//!    Failures are reported, committed data is kept.
//!
//! [`abort`](ObjectTree::abort) discards candidates instead; objects that
//! were never committed are removed.
//!
//! One transaction runs at a time. Callers normally use the lifecycle
//! wrapper:
//!
//! ```rust
//! use rs_trainz_fleet::mo::{fields, MoKind, ObjectId};
//! use rs_trainz_fleet::tree::ObjectTree;
//!
//! let mut tree = ObjectTree::default();
//! tree.start_update(ObjectId::ROOT).unwrap();
//! let dec = tree.add_child(ObjectId::ROOT, MoKind::Decoder).unwrap();
//! tree.set_attr_text(dec, fields::SYSTEM_NAME, "east").unwrap();
//! tree.set_attr_text(dec, fields::URI, "dec-east").unwrap();
//! tree.set_attr_text(dec, fields::MAC, "02:00:00:00:00:01").unwrap();
//! tree.commit_update(ObjectId::ROOT).unwrap();
//!
//! assert_eq!(tree.decoder_by_uri("dec-east"), Some(dec));
//! ```

use tracing::{error, info, warn};

use crate::config_doc;
use crate::effect::Effect;
use crate::error::ConfigError;
use crate::mo::{fields, MoKind, ObjectId};
use crate::state::{AdminState, Condition, ConditionSet};
use crate::topology::TopologyDomain;
use crate::tree::{display_marker, ObjectTree};

#[derive(Default)]
struct Provisioning {
    any: bool,
    first_error: Option<ConfigError>,
}

impl Provisioning {
    fn record(&mut self, result: Result<(), ConfigError>) {
        if let Err(e) = result {
            self.first_error.get_or_insert(e);
        }
    }
}

impl ObjectTree {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Root of the transaction in flight.
    pub fn updating(&self) -> Option<ObjectId> {
        self.updating
    }

    /// Opens a transaction on the subtree rooted at `id`.
    pub fn start_update(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        self.get(id)?;
        if let Some(active) = self.updating {
            return Err(ConfigError::AlreadyUpdating(active));
        }
        self.updating = Some(id);
        Ok(())
    }

    fn ensure_active(&self, id: ObjectId) -> Result<(), ConfigError> {
        if self.updating == Some(id) {
            Ok(())
        } else {
            Err(ConfigError::NotUpdating(id))
        }
    }

    /// Validates and applies the transaction, then closes it.
    ///
    /// A validation failure aborts the transaction and is returned. A
    /// provisioning failure is returned after all committed data is kept.
    pub fn commit_update(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        self.ensure_active(id)?;
        if let Err(e) = self.validate(id) {
            warn!(id = %id, error = %e, "validation failed, aborting");
            self.abort(id);
            self.updating = None;
            return Err(e);
        }
        self.commit0(id);
        let result = self.commit1(id);
        self.updating = None;
        match &result {
            Ok(()) => info!(id = %id, "transaction committed"),
            Err(e) => warn!(id = %id, error = %e, "transaction committed with errors"),
        }
        result
    }

    /// Discards the transaction and closes it.
    pub fn abort_update(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        self.ensure_active(id)?;
        self.abort(id);
        self.updating = None;
        info!(id = %id, "transaction aborted");
        Ok(())
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Checks candidates and reserves addresses, children first.
    ///
    /// Stops at the first failure. Reservations already made are undone by
    /// [`abort`](Self::abort).
    pub fn validate(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        for child in self.children_of(id) {
            self.validate(child)?;
        }
        let node = self.get(id)?;
        if !node.schema().is_dirty() {
            return Ok(());
        }
        node.schema().validate_all()?;
        let Some(parent) = node.parent() else {
            return Ok(());
        };
        let mut wanted = Vec::new();
        for (domain, attr) in node.kind().reservations() {
            wanted.push((*domain, domain.canonical(node.schema().candidate_text(attr)?)));
        }
        let parent = self.node_mut(parent)?;
        for (domain, address) in wanted {
            parent
                .topology
                .reserve(domain, id, address)
                .map_err(|e| ConfigError::from_topology(domain, e))?;
        }
        Ok(())
    }

    /// Copies candidates to committed for every dirty object in the subtree.
    pub fn commit0(&mut self, id: ObjectId) {
        self.commit0_walk(id);
        self.refresh_display_names(id);
    }

    fn commit0_walk(&mut self, id: ObjectId) {
        for child in self.children_of(id) {
            self.commit0_walk(child);
        }
        if let Ok(node) = self.node_mut(id) {
            if node.schema.is_dirty() {
                node.schema.commit_all();
                node.committed_once = true;
                node.pending_provision = true;
            }
        }
    }

    /// Provisions every object committed by [`commit0`](Self::commit0).
    ///
    /// Continues past failures and returns the first one.
    pub fn commit1(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        let mut outcome = Provisioning::default();
        self.commit1_walk(id, &mut outcome);
        match outcome.first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn commit1_walk(&mut self, id: ObjectId, outcome: &mut Provisioning) {
        let mut subtree = Provisioning::default();
        for child in self.children_of(id) {
            self.commit1_walk(child, &mut subtree);
        }
        let Ok(node) = self.get(id) else {
            return;
        };
        let is_decoder = node.kind() == MoKind::Decoder;
        if node.pending_provision {
            if is_decoder {
                // The push below replaces any deferred one.
                if let Ok(node) = self.node_mut(id) {
                    node.config_pending = false;
                }
            }
            subtree.any = true;
            let result = self.provision(id);
            subtree.record(result);
        }
        if is_decoder && subtree.any {
            let result = self.deliver_config(id);
            subtree.record(result);
        }
        outcome.any |= subtree.any;
        if let Some(e) = subtree.first_error {
            outcome.first_error.get_or_insert(e);
        }
    }

    fn deliver_config(&mut self, decoder: ObjectId) -> Result<(), ConfigError> {
        if self.get(decoder)?.state().admin().is_enabled() {
            self.push_config(decoder)
        } else {
            self.node_mut(decoder)?.config_pending = true;
            Ok(())
        }
    }

    fn provision(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        let node = self.get(id)?;
        let kind = node.kind();
        let wanted = node
            .uri()
            .map(|uri| self.topics.decoder_subscriptions(uri))
            .unwrap_or_default();
        let admin = node
            .schema()
            .committed::<AdminState>(fields::ADMIN_STATE)?
            .copied()
            .unwrap_or_default();
        let timing = match kind {
            MoKind::Decoder => {
                let period = node.schema().effective::<i64>(fields::KEEP_ALIVE_PERIOD)?;
                let max = node.schema().effective::<i64>(fields::MAX_MISSED_PINGS)?;
                Some((
                    u64::try_from(*period).unwrap_or(1000),
                    u32::try_from(*max).unwrap_or(3),
                ))
            }
            _ => None,
        };

        let node = self.node_mut(id)?;
        node.pending_provision = false;
        let stale: Vec<String> = node
            .subscriptions
            .iter()
            .filter(|t| !wanted.contains(t))
            .cloned()
            .collect();
        let fresh: Vec<String> = wanted
            .iter()
            .filter(|t| !node.subscriptions.contains(t))
            .cloned()
            .collect();
        node.subscriptions = wanted;
        if let (Some(sup), Some((period, max))) = (node.supervision.as_mut(), timing) {
            sup.configure(period, max);
        }
        self.outbox.extend(stale.into_iter().map(Effect::Unsubscribe));
        self.outbox.extend(fresh.into_iter().map(Effect::Subscribe));

        // Decoders stay unconfigured until their configuration is delivered.
        let cleared = match kind {
            MoKind::Decoder => ConditionSet::only(Condition::Init),
            _ => ConditionSet::CREATED,
        };
        self.apply_conditions(id, ConditionSet::EMPTY, cleared, None)?;
        self.set_admin_state(id, admin)?;
        self.sync_registrar(id)
    }

    fn sync_registrar(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        let node = self.get(id)?;
        let kind = node.kind();
        if kind == MoKind::Server {
            return Ok(());
        }
        let name = node.display_name().to_string();
        let registered = node.registered;
        let rename = node.rename_pending;
        let marker = display_marker(node.state().admin(), node.state().conditions());

        let result = if !registered {
            self.registrar.register(id, kind, &name)
        } else if rename {
            self.registrar.reset_display_name(id, &name)
        } else {
            Ok(())
        };
        match result {
            Ok(()) => {
                let node = self.node_mut(id)?;
                node.registered = true;
                node.rename_pending = false;
                self.registrar.set_marker(id, marker);
                Ok(())
            }
            Err(e) => {
                error!(id = %id, name = %name, error = %e, "provisioning failed");
                self.set_condition(id, Condition::InternalFailure, None)?;
                Err(ConfigError::CommitFailed {
                    id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Discards candidates in the subtree and removes never-committed objects.
    pub fn abort(&mut self, id: ObjectId) {
        self.abort_walk(id);
        for current in self.subtree(id) {
            self.restore_reservations(current);
        }
    }

    fn abort_walk(&mut self, id: ObjectId) {
        for child in self.children_of(id) {
            self.abort_walk(child);
        }
        let Ok(node) = self.get(id) else {
            return;
        };
        if node.is_provisional() {
            self.remove_node(id);
            return;
        }
        let parent = node.parent();
        if let Ok(node) = self.node_mut(id) {
            node.schema.abort_all();
        }
        if let Some(parent) = parent.and_then(|p| self.node_mut(p).ok()) {
            parent.topology.release_all(id);
        }
    }

    fn restore_reservations(&mut self, id: ObjectId) {
        let Ok(node) = self.get(id) else {
            return;
        };
        let Some(parent) = node.parent() else {
            return;
        };
        let wanted: Vec<(TopologyDomain, String)> = node
            .kind()
            .reservations()
            .iter()
            .filter_map(|(domain, attr)| {
                node.schema()
                    .committed_text(attr)
                    .ok()
                    .flatten()
                    .map(|value| (*domain, value))
            })
            .collect();
        let Ok(parent) = self.node_mut(parent) else {
            return;
        };
        for (domain, address) in wanted {
            if let Err(e) = parent.topology.reserve(domain, id, address) {
                warn!(id = %id, domain = %domain, error = %e, "could not restore reservation");
            }
        }
    }

    // ========================================================================
    // Configuration delivery
    // ========================================================================

    /// Publishes the committed configuration of a decoder on `configResp`.
    ///
    /// Clears the decoder's `Unconfigured` flag.
    pub fn push_config(&mut self, decoder: ObjectId) -> Result<(), ConfigError> {
        let Some(uri) = self.get(decoder)?.uri().map(str::to_string) else {
            return Ok(());
        };
        let body = config_doc::render_object(self, decoder)?;
        let topic = self.topics.config_resp(&uri);
        self.outbox.push(Effect::publish(topic, body));
        self.node_mut(decoder)?.config_pending = false;
        self.clear_condition(decoder, Condition::Unconfigured, None)?;
        info!(id = %decoder, uri = %uri, "configuration pushed");
        Ok(())
    }
}
