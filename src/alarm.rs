//! Alarms mirroring condition flags.
//!
//! Each [`Condition`] has exactly one [`Alarm`] per object. The alarm is
//! active while the flag is raised; while the object is admin-disabled the
//! alarm is suppressed and neither raise nor cease is reported.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::{Condition, ConditionSet};

/// Severity tier of an alarm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// Service affecting, immediate action.
    Critical,
    /// Service affecting.
    Major,
    /// Degraded.
    Minor,
    /// Needs attention.
    Warning,
    /// Informational.
    Info,
}

impl Criticality {
    /// Default tier for alarms mirroring a condition.
    pub fn for_condition(condition: Condition) -> Self {
        match condition {
            Condition::ServerUnavailable | Condition::InternalFailure => Self::Critical,
            Condition::Disconnected | Condition::ClientUnavailable => Self::Major,
            Condition::ErroredSecond => Self::Minor,
            Condition::Unconfigured | Condition::ControlBlocked => Self::Warning,
            Condition::Init => Self::Info,
        }
    }
}

fn describe(condition: Condition) -> &'static str {
    match condition {
        Condition::Init => "Object is initialising",
        Condition::Disconnected => "Resource reported disconnected by decoder",
        Condition::Unconfigured => "Configuration has not been delivered",
        Condition::ServerUnavailable => "Decoder supervision lost, pings missing",
        Condition::ClientUnavailable => "Decoder reports its peer unavailable",
        Condition::ErroredSecond => "Errors reported in the last statistics period",
        Condition::ControlBlocked => "Blocked by an unavailable parent",
        Condition::InternalFailure => "Provisioning failed after commit",
    }
}

/// A named problem reported against one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// Condition the alarm mirrors.
    pub kind: Condition,
    /// Display name of the owning object.
    pub source: String,
    /// Severity tier.
    pub criticality: Criticality,
    /// Human readable text.
    pub description: String,
    /// Whether the underlying condition is raised.
    pub active: bool,
    /// Whether reporting is suppressed by admin state.
    pub admin_suppressed: bool,
}

impl Alarm {
    /// Creates an inactive alarm for a condition.
    pub fn new(kind: Condition, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            criticality: Criticality::for_condition(kind),
            description: describe(kind).to_string(),
            active: false,
            admin_suppressed: false,
        }
    }

    /// Active and not suppressed.
    pub fn is_reported(&self) -> bool {
        self.active && !self.admin_suppressed
    }

    fn report_raise(&self) {
        warn!(
            source = %self.source,
            alarm = %self.kind,
            criticality = ?self.criticality,
            "alarm raised: {}",
            self.description
        );
    }

    fn report_cease(&self) {
        info!(source = %self.source, alarm = %self.kind, "alarm ceased");
    }
}

/// The alarms owned by one object, one per condition.
#[derive(Clone, Debug)]
pub struct AlarmSet {
    alarms: Vec<Alarm>,
}

impl AlarmSet {
    /// Creates inactive alarms for every condition.
    ///
    /// A freshly created object is admin-disabled, so the set starts
    /// suppressed.
    pub fn new(source: &str) -> Self {
        let alarms = Condition::ALL
            .into_iter()
            .map(|kind| Alarm {
                admin_suppressed: true,
                ..Alarm::new(kind, source)
            })
            .collect();
        Self { alarms }
    }

    /// Alarm mirroring a condition.
    pub fn get(&self, kind: Condition) -> &Alarm {
        // ALL is in bit order, so the index is the bit position.
        &self.alarms[(kind.bit().trailing_zeros()) as usize]
    }

    fn get_mut(&mut self, kind: Condition) -> &mut Alarm {
        &mut self.alarms[(kind.bit().trailing_zeros()) as usize]
    }

    /// All alarms.
    pub fn iter(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.iter()
    }

    /// Alarms that are active and not suppressed.
    pub fn reported(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.iter().filter(|a| a.is_reported())
    }

    /// Updates the source after the owner's display name changed.
    pub fn set_source(&mut self, source: &str) {
        for alarm in &mut self.alarms {
            if alarm.source != source {
                alarm.source = source.to_string();
            }
        }
    }

    /// Mirrors the flags that changed; reports unless suppressed.
    pub fn apply(&mut self, changed: ConditionSet, conditions: ConditionSet) {
        for kind in changed.iter() {
            let alarm = self.get_mut(kind);
            alarm.active = conditions.contains(kind);
            if alarm.admin_suppressed {
                continue;
            }
            if alarm.active {
                alarm.report_raise();
            } else {
                alarm.report_cease();
            }
        }
    }

    /// Suppresses or un-suppresses every alarm.
    ///
    /// On un-suppress, alarms whose condition persisted are reported again.
    pub fn set_suppressed(&mut self, suppressed: bool) {
        for alarm in &mut self.alarms {
            if alarm.admin_suppressed == suppressed {
                continue;
            }
            alarm.admin_suppressed = suppressed;
            if !suppressed && alarm.active {
                alarm.report_raise();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_alarm_per_condition() {
        let set = AlarmSet::new("dec-1");
        assert_eq!(set.iter().count(), Condition::ALL.len());
        for kind in Condition::ALL {
            assert_eq!(set.get(kind).kind, kind);
        }
        assert_eq!(
            set.get(Condition::ServerUnavailable).criticality,
            Criticality::Critical
        );
    }

    #[test]
    fn suppressed_alarm_tracks_condition_silently() {
        let mut set = AlarmSet::new("dec-1");
        set.apply(
            Condition::ServerUnavailable.into(),
            Condition::ServerUnavailable.into(),
        );
        let alarm = set.get(Condition::ServerUnavailable);
        assert!(alarm.active);
        assert!(!alarm.is_reported());

        set.set_suppressed(false);
        assert_eq!(set.reported().count(), 1);
    }

    #[test]
    fn cease_deactivates() {
        let mut set = AlarmSet::new("dec-1");
        set.set_suppressed(false);
        set.apply(Condition::Disconnected.into(), Condition::Disconnected.into());
        set.apply(Condition::Disconnected.into(), ConditionSet::EMPTY);
        assert_eq!(set.reported().count(), 0);
    }

    #[test]
    fn source_follows_display_name() {
        let mut set = AlarmSet::new("dec-1");
        set.set_source("top-decoder");
        assert!(set.iter().all(|a| a.source == "top-decoder"));
    }
}
