//! Operational state: admin switch, condition flags and availability.
//!
//! Every managed object carries an [`OperationalState`]. Independent causes
//! raise and clear [`Condition`] flags; the availability [`Summary`] is a
//! pure function of the admin state and the active flags.
//!
//! # Conditions
//!
//! | Flag | Wire name | Raised by |
//! |------|-----------|-----------|
//! | `Init` | `INIT` | object creation, cleared by commit |
//! | `Disconnected` | `DISCONNECTED` | decoder report |
//! | `Unconfigured` | `UNCONFIGURED` | creation, cleared once configuration is delivered |
//! | `ServerUnavailable` | `SERVERUNAVAILABLE` | missed supervision pings |
//! | `ClientUnavailable` | `CLIENTUNAVAILABLE` | decoder report |
//! | `ErroredSecond` | `ERRSEC` | statistics errors (does not affect availability) |
//! | `ControlBlocked` | `CBL` | ancestor unavailable |
//! | `InternalFailure` | `INTFAIL` | commit-phase failure |
//!
//! ```rust
//! use rs_trainz_fleet::state::{AdminState, Condition, OperationalState, Summary};
//!
//! let mut state = OperationalState::new();
//! assert_eq!(state.summary(), Summary::Unavailable);
//!
//! state.set_admin(AdminState::Enabled);
//! state.clear_condition(Condition::Init, None);
//! state.clear_condition(Condition::Unconfigured, None);
//! assert_eq!(state.summary(), Summary::Available);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attribute::AttrValue;

// ============================================================================
// Admin State
// ============================================================================

/// Operator-controlled switch, independent of runtime health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    /// Object is in service.
    Enabled,
    /// Object is out of service (initial state).
    #[default]
    Disabled,
}

impl AdminState {
    /// Payload token for `admState` topics.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Enabled => "ONLINE",
            Self::Disabled => "OFFLINE",
        }
    }

    /// Whether the admin state is `Enabled`.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl AttrValue for AdminState {
    fn to_text(&self) -> String {
        match self {
            Self::Enabled => "ENABLE",
            Self::Disabled => "DISABLE",
        }
        .to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "ENABLE" | "ENABLED" | "ONLINE" => Some(Self::Enabled),
            "DISABLE" | "DISABLED" | "OFFLINE" => Some(Self::Disabled),
            _ => None,
        }
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// An independently raised operational problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Condition {
    /// Object created, not yet provisioned.
    Init = 1 << 0,
    /// Decoder reports the resource as disconnected.
    Disconnected = 1 << 1,
    /// Configuration not yet delivered.
    Unconfigured = 1 << 2,
    /// Supervision pings from the decoder stopped.
    ServerUnavailable = 1 << 3,
    /// Decoder reports that it lost its peer.
    ClientUnavailable = 1 << 4,
    /// Error counters increased during the last statistics period.
    ErroredSecond = 1 << 5,
    /// An ancestor is disabled or failed.
    ControlBlocked = 1 << 6,
    /// Re-provisioning failed after commit.
    InternalFailure = 1 << 7,
}

impl Condition {
    /// All conditions in bit order.
    pub const ALL: [Condition; 8] = [
        Condition::Init,
        Condition::Disconnected,
        Condition::Unconfigured,
        Condition::ServerUnavailable,
        Condition::ClientUnavailable,
        Condition::ErroredSecond,
        Condition::ControlBlocked,
        Condition::InternalFailure,
    ];

    /// Bit of this condition in a [`ConditionSet`].
    pub const fn bit(self) -> u16 {
        self as u16
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Disconnected => "DISCONNECTED",
            Self::Unconfigured => "UNCONFIGURED",
            Self::ServerUnavailable => "SERVERUNAVAILABLE",
            Self::ClientUnavailable => "CLIENTUNAVAILABLE",
            Self::ErroredSecond => "ERRSEC",
            Self::ControlBlocked => "CBL",
            Self::InternalFailure => "INTFAIL",
        }
    }

    /// Parses a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether the flag makes an object unavailable.
    pub fn affects_availability(&self) -> bool {
        !matches!(self, Self::ErroredSecond)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`Condition`] flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConditionSet(u16);

impl ConditionSet {
    /// No flags.
    pub const EMPTY: ConditionSet = ConditionSet(0);

    /// Every flag.
    pub const ALL: ConditionSet = ConditionSet(0xff);

    /// Flags a decoder may report for its own resources.
    pub const REMOTE: ConditionSet = ConditionSet(
        Condition::Disconnected.bit() | Condition::ClientUnavailable.bit(),
    );

    /// Initial flags of a freshly created object.
    pub const CREATED: ConditionSet =
        ConditionSet(Condition::Init.bit() | Condition::Unconfigured.bit());

    /// Set containing one flag.
    pub const fn only(condition: Condition) -> Self {
        Self(condition.bit())
    }

    /// Raw bits.
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// Whether the flag is present.
    pub fn contains(&self, condition: Condition) -> bool {
        self.0 & condition.bit() != 0
    }

    /// Adds a flag; returns `true` if it was not present.
    pub fn insert(&mut self, condition: Condition) -> bool {
        let added = !self.contains(condition);
        self.0 |= condition.bit();
        added
    }

    /// Removes a flag; returns `true` if it was present.
    pub fn remove(&mut self, condition: Condition) -> bool {
        let removed = self.contains(condition);
        self.0 &= !condition.bit();
        removed
    }

    /// No flags set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether the two sets share a flag.
    pub fn intersects(&self, other: ConditionSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Flags in both sets.
    pub fn intersection(&self, other: ConditionSet) -> ConditionSet {
        ConditionSet(self.0 & other.0)
    }

    /// Flags in either set.
    pub fn union(&self, other: ConditionSet) -> ConditionSet {
        ConditionSet(self.0 | other.0)
    }

    /// Flags in `self` but not in `other`.
    pub fn difference(&self, other: ConditionSet) -> ConditionSet {
        ConditionSet(self.0 & !other.0)
    }

    /// Flags that differ between the sets.
    pub fn symmetric_difference(&self, other: ConditionSet) -> ConditionSet {
        ConditionSet(self.0 ^ other.0)
    }

    /// Iterates contained flags in bit order.
    pub fn iter(&self) -> impl Iterator<Item = Condition> + '_ {
        Condition::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// Comma-separated wire encoding, empty for no flags.
    pub fn encode(&self) -> String {
        self.iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses the wire encoding.
    pub fn decode(text: &str) -> Result<ConditionSet, String> {
        let mut set = ConditionSet::EMPTY;
        for name in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let condition =
                Condition::from_wire(name).ok_or_else(|| format!("unknown condition {:?}", name))?;
            set.insert(condition);
        }
        Ok(set)
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        let mut set = ConditionSet::EMPTY;
        for condition in iter {
            set.insert(condition);
        }
        set
    }
}

impl From<Condition> for ConditionSet {
    fn from(condition: Condition) -> Self {
        ConditionSet::only(condition)
    }
}

impl fmt::Debug for ConditionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Derived availability of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Summary {
    /// Enabled and free of availability-affecting conditions.
    Available,
    /// Disabled or failed.
    Unavailable,
}

impl Summary {
    /// Pure availability function.
    pub fn of(admin: AdminState, conditions: ConditionSet) -> Summary {
        let blocking = conditions
            .iter()
            .any(|c| c.affects_availability());
        if admin.is_enabled() && !blocking {
            Summary::Available
        } else {
            Summary::Unavailable
        }
    }

    /// Payload token for per-resource `OPSTATE` topics.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

// ============================================================================
// Operational State
// ============================================================================

/// Notification passed to state callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    /// Flags that flipped in this change.
    pub changed: ConditionSet,
    /// Active flags after the change.
    pub conditions: ConditionSet,
    /// Whether the admin state flipped.
    pub admin_changed: bool,
    /// Admin state after the change.
    pub admin: AdminState,
    /// Summary before the change.
    pub previous_summary: Summary,
    /// Summary after the change.
    pub summary: Summary,
    /// Optional id correlating the change with its cause.
    pub correlation: Option<u64>,
}

impl StateChange {
    /// Whether availability flipped.
    pub fn summary_changed(&self) -> bool {
        self.previous_summary != self.summary
    }

    /// Flags raised by this change.
    pub fn raised(&self) -> ConditionSet {
        self.changed.intersection(self.conditions)
    }

    /// Flags ceased by this change.
    pub fn ceased(&self) -> ConditionSet {
        self.changed.difference(self.conditions)
    }
}

/// Callback invoked on state changes.
pub type StateCallback = Box<dyn FnMut(&StateChange) + Send>;

/// Per-object condition aggregator.
pub struct OperationalState {
    admin: AdminState,
    conditions: ConditionSet,
    callbacks: Vec<(ConditionSet, StateCallback)>,
}

impl OperationalState {
    /// Initial state: disabled, `{Init, Unconfigured}`.
    pub fn new() -> Self {
        Self {
            admin: AdminState::Disabled,
            conditions: ConditionSet::CREATED,
            callbacks: Vec::new(),
        }
    }

    /// State with explicit admin state and flags (used for the tree root).
    pub fn with(admin: AdminState, conditions: ConditionSet) -> Self {
        Self {
            admin,
            conditions,
            callbacks: Vec::new(),
        }
    }

    /// Current admin state.
    pub fn admin(&self) -> AdminState {
        self.admin
    }

    /// Active flags.
    pub fn conditions(&self) -> ConditionSet {
        self.conditions
    }

    /// Whether a flag is active.
    pub fn has(&self, condition: Condition) -> bool {
        self.conditions.contains(condition)
    }

    /// Derived availability.
    pub fn summary(&self) -> Summary {
        Summary::of(self.admin, self.conditions)
    }

    /// Registers a callback for changes touching `filter`.
    ///
    /// Admin state changes are delivered to every callback.
    pub fn on_change(&mut self, filter: ConditionSet, callback: StateCallback) {
        self.callbacks.push((filter, callback));
    }

    /// Raises a flag.
    pub fn set_condition(
        &mut self,
        condition: Condition,
        correlation: Option<u64>,
    ) -> Option<StateChange> {
        self.apply(ConditionSet::only(condition), ConditionSet::EMPTY, correlation)
    }

    /// Clears a flag.
    pub fn clear_condition(
        &mut self,
        condition: Condition,
        correlation: Option<u64>,
    ) -> Option<StateChange> {
        self.apply(ConditionSet::EMPTY, ConditionSet::only(condition), correlation)
    }

    /// Raises `set` and clears `clear` in one step.
    ///
    /// Returns `None` when nothing changed. Callbacks have run when this
    /// returns.
    pub fn apply(
        &mut self,
        set: ConditionSet,
        clear: ConditionSet,
        correlation: Option<u64>,
    ) -> Option<StateChange> {
        let previous = self.conditions;
        let previous_summary = self.summary();
        self.conditions = previous.difference(clear).union(set);
        let changed = previous.symmetric_difference(self.conditions);
        if changed.is_empty() {
            return None;
        }
        let change = StateChange {
            changed,
            conditions: self.conditions,
            admin_changed: false,
            admin: self.admin,
            previous_summary,
            summary: self.summary(),
            correlation,
        };
        self.notify(&change);
        Some(change)
    }

    /// Changes the admin state.
    pub fn set_admin(&mut self, admin: AdminState) -> Option<StateChange> {
        if admin == self.admin {
            return None;
        }
        let previous_summary = self.summary();
        self.admin = admin;
        let change = StateChange {
            changed: ConditionSet::EMPTY,
            conditions: self.conditions,
            admin_changed: true,
            admin,
            previous_summary,
            summary: self.summary(),
            correlation: None,
        };
        self.notify(&change);
        Some(change)
    }

    fn notify(&mut self, change: &StateChange) {
        for (filter, callback) in &mut self.callbacks {
            if change.admin_changed || change.changed.intersects(*filter) {
                callback(change);
            }
        }
    }
}

impl Default for OperationalState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationalState")
            .field("admin", &self.admin)
            .field("conditions", &self.conditions)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
