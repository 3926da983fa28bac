//! The managed object arena.
//!
//! [`ObjectTree`] owns every [`ManagedObject`], keyed by [`ObjectId`]. A
//! node refers to its parent by id only; children are listed in the
//! transactional `Children` attribute, so aborting a transaction also
//! reverts provisional children.
//!
//! All node removal goes through one path which releases the node's
//! address reservations in its parent, withdraws its subscriptions and
//! unregisters it from the front end. Aborted creations and explicit
//! deletes therefore clean up the same way.
//!
//! State changes run synchronously: when an object's availability flips,
//! `ControlBlocked` is set or cleared on every child (and recursively on
//! their children) before the call returns.
//!
//! The transaction engine lives in [`crate::transaction`].

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::alarm::Alarm;
use crate::attribute::AttrValue;
use crate::config::SupervisionConfig;
use crate::effect::Effect;
use crate::error::ConfigError;
use crate::mo::{fields, ManagedObject, MoKind, ObjectId};
use crate::protocol::{adm_state_payload, op_state_payload, Topics};
use crate::state::{
    AdminState, Condition, ConditionSet, StateCallback, StateChange, Summary,
};
use crate::supervision::Supervision;
use crate::traits::{DisplayMarker, MomRegistrar, NullRegistrar};

/// Arena of managed objects rooted at the server node.
pub struct ObjectTree {
    nodes: BTreeMap<ObjectId, ManagedObject>,
    next_id: u32,
    pub(crate) updating: Option<ObjectId>,
    pub(crate) outbox: Vec<Effect>,
    pub(crate) registrar: Box<dyn MomRegistrar>,
    pub(crate) topics: Topics,
    defaults: SupervisionConfig,
    next_correlation: u64,
}

impl ObjectTree {
    /// Creates a tree holding only the root.
    pub fn new(topics: Topics, registrar: Box<dyn MomRegistrar>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ObjectId::ROOT, ManagedObject::root());
        Self {
            nodes,
            next_id: 1,
            updating: None,
            outbox: Vec::new(),
            registrar,
            topics,
            defaults: SupervisionConfig::default(),
            next_correlation: 1,
        }
    }

    /// Sets the supervision defaults seeded into new decoders.
    pub fn with_supervision_defaults(mut self, defaults: SupervisionConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Topic scheme.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Object by id.
    pub fn get(&self, id: ObjectId) -> Result<&ManagedObject, ConfigError> {
        self.nodes.get(&id).ok_or(ConfigError::NoSuchObject(id))
    }

    pub(crate) fn node_mut(&mut self, id: ObjectId) -> Result<&mut ManagedObject, ConfigError> {
        self.nodes.get_mut(&id).ok_or(ConfigError::NoSuchObject(id))
    }

    /// Whether the id is live.
    pub fn exists(&self, id: ObjectId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of objects including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Only the root is present.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// All objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ManagedObject> {
        self.nodes.values()
    }

    /// Parent of an object.
    pub fn parent_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.nodes.get(&id).and_then(|n| n.parent())
    }

    /// Children including uncommitted ones; empty for unknown ids.
    pub fn children_of(&self, id: ObjectId) -> Vec<ObjectId> {
        self.nodes
            .get(&id)
            .map(|n| n.children())
            .unwrap_or_default()
    }

    /// Whether `id` is `ancestor` or lies below it.
    pub fn is_within(&self, id: ObjectId, ancestor: ObjectId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }

    /// Ids of the subtree rooted at `id`, parents before children.
    pub fn subtree(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.exists(current) {
                continue;
            }
            out.push(current);
            let mut children = self.children_of(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Child of `parent` with this kind and system name.
    pub fn find_child(&self, parent: ObjectId, kind: MoKind, name: &str) -> Option<ObjectId> {
        self.children_of(parent).into_iter().find(|child| {
            self.nodes
                .get(child)
                .map(|n| n.kind() == kind && n.system_name() == name)
                .unwrap_or(false)
        })
    }

    /// Nearest decoder at or above `id`.
    pub fn decoder_of(&self, id: ObjectId) -> Option<ObjectId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.nodes.get(&current)?;
            if node.kind() == MoKind::Decoder {
                return Some(current);
            }
            cursor = node.parent();
        }
        None
    }

    /// Committed decoder with this URI.
    pub fn decoder_by_uri(&self, uri: &str) -> Option<ObjectId> {
        self.nodes
            .values()
            .find(|n| n.uri() == Some(uri))
            .map(|n| n.id())
    }

    /// Object below `under` with this display name.
    pub fn find_by_display_name(&self, under: ObjectId, name: &str) -> Option<ObjectId> {
        self.subtree(under)
            .into_iter()
            .find(|id| self.nodes.get(id).map(|n| n.display_name()) == Some(name))
    }

    fn decoder_uri_of(&self, id: ObjectId) -> Option<String> {
        let decoder = self.decoder_of(id)?;
        self.nodes.get(&decoder)?.uri().map(str::to_string)
    }

    /// Alarms that are active and not suppressed, across the tree.
    pub fn reported_alarms(&self) -> Vec<&Alarm> {
        self.nodes
            .values()
            .flat_map(|n| n.alarms().reported())
            .collect()
    }

    /// New correlation id for a batch of state changes.
    pub fn next_correlation(&mut self) -> u64 {
        let id = self.next_correlation;
        self.next_correlation += 1;
        id
    }

    // ========================================================================
    // Outbox
    // ========================================================================

    /// Effects queued since the last drain.
    pub fn pending_effects(&self) -> &[Effect] {
        &self.outbox
    }

    /// Takes all queued effects.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.outbox)
    }

    // ========================================================================
    // Staging
    // ========================================================================

    fn ensure_staging(&self, id: ObjectId) -> Result<(), ConfigError> {
        match self.updating {
            Some(root) if self.is_within(id, root) => Ok(()),
            _ => Err(ConfigError::NotUpdating(id)),
        }
    }

    /// Creates a provisional child inside the running transaction.
    pub fn add_child(&mut self, parent: ObjectId, kind: MoKind) -> Result<ObjectId, ConfigError> {
        self.ensure_staging(parent)?;
        let parent_node = self.get(parent)?;
        if !parent_node.kind().allows_child(kind) {
            return Err(ConfigError::ChildNotAllowed {
                parent: parent_node.kind(),
                child: kind,
            });
        }
        let parent_summary = parent_node.state().summary();

        let id = ObjectId(self.next_id);
        let mut node = ManagedObject::new(id, kind, Some(parent));
        if kind == MoKind::Decoder {
            node.schema.set(
                fields::KEEP_ALIVE_PERIOD,
                i64::from(self.defaults.keep_alive_period_ms),
            )?;
            node.schema.set(
                fields::MAX_MISSED_PINGS,
                i64::from(self.defaults.max_missed_pings),
            )?;
            node.supervision = Some(Supervision::new(
                u64::from(self.defaults.keep_alive_period_ms),
                self.defaults.max_missed_pings,
            ));
        }
        if parent_summary == Summary::Unavailable {
            if let Some(change) = node.state.set_condition(Condition::ControlBlocked, None) {
                node.alarms.apply(change.changed, change.conditions);
            }
        }

        let children = self
            .node_mut(parent)?
            .schema
            .get_mut::<Vec<ObjectId>>(fields::CHILDREN)?;
        let mut list = children.candidate().clone();
        list.push(id);
        children
            .set_candidate(list)
            .map_err(|reason| ConfigError::InvalidValue {
                attr: fields::CHILDREN.to_string(),
                reason,
            })?;

        self.next_id += 1;
        self.nodes.insert(id, node);
        debug!(id = %id, parent = %parent, kind = %kind, "object created");
        Ok(id)
    }

    /// Existing child with this name, or a new provisional one.
    ///
    /// Returns the id and whether it was created.
    pub fn get_or_create_child(
        &mut self,
        parent: ObjectId,
        kind: MoKind,
        name: &str,
    ) -> Result<(ObjectId, bool), ConfigError> {
        if let Some(id) = self.find_child(parent, kind, name) {
            return Ok((id, false));
        }
        let id = self.add_child(parent, kind)?;
        self.set_attr(id, fields::SYSTEM_NAME, name.to_string())?;
        Ok((id, true))
    }

    /// Stages a typed attribute value inside the running transaction.
    pub fn set_attr<T: AttrValue>(
        &mut self,
        id: ObjectId,
        name: &str,
        value: T,
    ) -> Result<(), ConfigError> {
        self.ensure_staging(id)?;
        self.node_mut(id)?.schema.set(name, value)
    }

    /// Stages an attribute value parsed from text inside the running transaction.
    pub fn set_attr_text(&mut self, id: ObjectId, name: &str, text: &str) -> Result<(), ConfigError> {
        self.ensure_staging(id)?;
        if name == fields::CHILDREN {
            return Err(ConfigError::NoSuchAttribute(name.to_string()));
        }
        self.node_mut(id)?.schema.set_text(name, text)
    }

    /// Deletes a childless, admin-disabled object.
    pub fn delete(&mut self, id: ObjectId) -> Result<(), ConfigError> {
        let node = self.get(id)?;
        let refuse = |reason| Err(ConfigError::NotDeletable { id, reason });
        if id == ObjectId::ROOT {
            return refuse("the server root cannot be deleted");
        }
        if self.updating.is_some() {
            return refuse("a transaction is in progress");
        }
        if !node.children().is_empty() {
            return refuse("children must be deleted first");
        }
        let configured = node
            .schema()
            .committed::<AdminState>(fields::ADMIN_STATE)?
            .copied()
            .unwrap_or_default();
        if node.state().admin().is_enabled() || configured.is_enabled() {
            return refuse("admin state must be DISABLE");
        }
        let name = node.display_name().to_string();
        self.remove_node(id);
        info!(id = %id, name = %name, "object deleted");
        Ok(())
    }

    /// Single removal path: children, reservations, subscriptions, registration.
    pub(crate) fn remove_node(&mut self, id: ObjectId) {
        for child in self.children_of(id) {
            self.remove_node(child);
        }
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if let Some(parent) = node.parent().and_then(|p| self.nodes.get_mut(&p)) {
            parent.topology.release_all(id);
            if let Ok(children) = parent.schema.get_mut::<Vec<ObjectId>>(fields::CHILDREN) {
                children.amend(|ids| ids.retain(|c| *c != id));
            }
        }
        let kind = node.kind();
        if node.registered {
            self.registrar.unregister(id);
        }
        self.outbox
            .extend(node.subscriptions.into_iter().map(Effect::Unsubscribe));
        debug!(id = %id, kind = %kind, "object removed");
    }

    /// Recomputes display names top-down after a commit.
    pub(crate) fn refresh_display_names(&mut self, id: ObjectId) {
        for current in self.subtree(id) {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if node.kind() == MoKind::Server || !node.committed_once {
                continue;
            }
            let own = node
                .schema()
                .committed::<String>(fields::SYSTEM_NAME)
                .ok()
                .flatten()
                .cloned()
                .unwrap_or_default();
            let name = match node.parent().and_then(|p| self.nodes.get(&p)) {
                Some(parent) if parent.kind() != MoKind::Server => {
                    format!("{}/{}", parent.display_name(), own)
                }
                _ => own,
            };
            if let Some(node) = self.nodes.get_mut(&current) {
                if node.display_name != name {
                    node.display_name = name;
                    node.alarms.set_source(&node.display_name);
                    if node.registered {
                        node.rename_pending = true;
                        node.pending_provision = true;
                    }
                }
            }
        }
    }

    // ========================================================================
    // Operational state
    // ========================================================================

    /// Registers a state callback on one object.
    pub fn on_state_change(
        &mut self,
        id: ObjectId,
        filter: ConditionSet,
        callback: StateCallback,
    ) -> Result<(), ConfigError> {
        self.node_mut(id)?.state.on_change(filter, callback);
        Ok(())
    }

    /// Raises a condition flag.
    pub fn set_condition(
        &mut self,
        id: ObjectId,
        condition: Condition,
        correlation: Option<u64>,
    ) -> Result<(), ConfigError> {
        self.apply_conditions(id, condition.into(), ConditionSet::EMPTY, correlation)
            .map(|_| ())
    }

    /// Clears a condition flag.
    pub fn clear_condition(
        &mut self,
        id: ObjectId,
        condition: Condition,
        correlation: Option<u64>,
    ) -> Result<(), ConfigError> {
        self.apply_conditions(id, ConditionSet::EMPTY, condition.into(), correlation)
            .map(|_| ())
    }

    /// Raises and clears flags in one step; returns the change, if any.
    pub fn apply_conditions(
        &mut self,
        id: ObjectId,
        set: ConditionSet,
        clear: ConditionSet,
        correlation: Option<u64>,
    ) -> Result<Option<StateChange>, ConfigError> {
        let change = self.node_mut(id)?.state.apply(set, clear, correlation);
        if let Some(change) = &change {
            self.after_state_change(id, change);
        }
        Ok(change)
    }

    /// Switches the runtime admin state of an object.
    ///
    /// Enabling re-syncs `ControlBlocked` from the parent, arms supervision,
    /// lifts alarm suppression and delivers a deferred configuration push.
    /// Disabling suppresses alarms and stops supervision; conditions persist.
    pub fn set_admin_state(&mut self, id: ObjectId, admin: AdminState) -> Result<(), ConfigError> {
        if self.get(id)?.state().admin() == admin {
            return Ok(());
        }
        if admin.is_enabled() {
            let parent_summary = self
                .parent_of(id)
                .and_then(|p| self.nodes.get(&p))
                .map(|p| p.state().summary());
            match parent_summary {
                Some(Summary::Unavailable) => {
                    self.set_condition(id, Condition::ControlBlocked, None)?
                }
                Some(Summary::Available) => {
                    self.clear_condition(id, Condition::ControlBlocked, None)?
                }
                None => {}
            }
        }

        let node = self.node_mut(id)?;
        node.alarms.set_suppressed(!admin.is_enabled());
        if let Some(sup) = node.supervision.as_mut() {
            if admin.is_enabled() {
                sup.arm();
            } else {
                sup.disarm();
            }
        }
        let change = node.state.set_admin(admin);
        let config_pending = node.config_pending;
        let name = node.display_name().to_string();
        if let Some(change) = &change {
            self.after_state_change(id, change);
        }
        info!(id = %id, name = %name, admin = ?admin, "admin state changed");

        if admin.is_enabled() && config_pending {
            self.push_config(id)?;
        }
        Ok(())
    }

    fn after_state_change(&mut self, id: ObjectId, change: &StateChange) {
        let uri = self.decoder_uri_of(id);
        let children = self.children_of(id);
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.alarms.apply(change.changed, change.conditions);
        let name = node.display_name().to_string();
        let kind = node.kind();
        let registered = node.registered;

        if !name.is_empty() {
            if let Some(uri) = uri.as_deref() {
                if !change.changed.is_empty() {
                    self.outbox.push(Effect::publish(
                        self.topics.op_state_downstream(uri, &name),
                        change.conditions.encode(),
                    ));
                }
                if change.admin_changed {
                    self.outbox.push(Effect::publish_retained(
                        self.topics.adm_state_downstream(uri, &name),
                        adm_state_payload(change.admin),
                    ));
                }
            }
            if let Some(family) = kind.resource_family() {
                if change.summary_changed() {
                    self.outbox.push(Effect::publish_retained(
                        self.topics.resource_op_state(family, &name),
                        op_state_payload(change.summary),
                    ));
                }
            }
        }
        if registered {
            self.registrar
                .set_marker(id, display_marker(change.admin, change.conditions));
        }
        debug!(
            id = %id,
            conditions = %change.conditions.encode(),
            summary = ?change.summary,
            correlation = ?change.correlation,
            "state changed"
        );

        if change.summary_changed() {
            for child in children {
                let result = match change.summary {
                    Summary::Unavailable => {
                        self.set_condition(child, Condition::ControlBlocked, change.correlation)
                    }
                    Summary::Available => {
                        self.clear_condition(child, Condition::ControlBlocked, change.correlation)
                    }
                };
                if let Err(e) = result {
                    warn!(
                        parent = %id,
                        child = %child,
                        error = %e,
                        "control block not propagated"
                    );
                }
            }
        }
    }
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new(Topics::default(), Box::new(NullRegistrar))
    }
}

impl std::fmt::Debug for ObjectTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTree")
            .field("nodes", &self.nodes.len())
            .field("updating", &self.updating)
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

/// Marker for a front end given the current state.
pub fn display_marker(admin: AdminState, conditions: ConditionSet) -> DisplayMarker {
    if !admin.is_enabled() {
        return DisplayMarker::Inactive;
    }
    if Summary::of(admin, conditions) == Summary::Available {
        return DisplayMarker::Normal;
    }
    let local = conditions
        .difference(Condition::ControlBlocked.into())
        .iter()
        .any(|c| c.affects_availability());
    if local {
        DisplayMarker::Fault
    } else {
        DisplayMarker::ControlBlock
    }
}
