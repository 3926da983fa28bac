//! Two-buffer transactional attributes.
//!
//! A [`ManagedAttribute`] keeps a committed value next to a staged candidate.
//! Writes go to the candidate and must pass the attribute's validator; the
//! transaction engine later either commits (candidate → committed) or aborts
//! (committed → candidate).
//!
//! ```rust
//! use rs_trainz_fleet::attribute::{in_range, ManagedAttribute};
//!
//! let mut port = ManagedAttribute::new(0i64).with_validator(in_range(0, 7));
//! port.commit();
//!
//! assert!(port.set_candidate(9).is_err());
//! port.set_candidate(3).unwrap();
//! assert!(port.is_changed());
//!
//! port.abort();
//! assert_eq!(*port.candidate(), 0);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::mo::ObjectId;

/// Values that can live in a [`ManagedAttribute`].
///
/// The text form is what the configuration document and the REST surface
/// carry.
pub trait AttrValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Renders the value as document text.
    fn to_text(&self) -> String;

    /// Parses a value from document text.
    fn from_text(text: &str) -> Option<Self>;
}

impl AttrValue for String {
    fn to_text(&self) -> String {
        self.clone()
    }

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl AttrValue for i64 {
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl AttrValue for bool {
    fn to_text(&self) -> String {
        if *self { "YES" } else { "NO" }.to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "YES" | "TRUE" | "1" => Some(true),
            "NO" | "FALSE" | "0" => Some(false),
            _ => None,
        }
    }
}

impl AttrValue for Vec<ObjectId> {
    fn to_text(&self) -> String {
        self.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn from_text(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return Some(Vec::new());
        }
        text.split(',')
            .map(|part| part.trim().parse::<u32>().ok().map(ObjectId))
            .collect()
    }
}

/// Candidate check run before a value is accepted.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Accepts integers in `min..=max`.
pub fn in_range(min: i64, max: i64) -> Validator<i64> {
    Arc::new(move |v: &i64| {
        if (min..=max).contains(v) {
            Ok(())
        } else {
            Err(format!("{} is outside {}..={}", v, min, max))
        }
    })
}

/// Accepts one of a fixed set of upper-case tokens.
pub fn one_of(options: &'static [&'static str]) -> Validator<String> {
    Arc::new(move |v: &String| {
        if options.contains(&v.as_str()) {
            Ok(())
        } else {
            Err(format!("{:?} is not one of {:?}", v, options))
        }
    })
}

/// Accepts identifiers usable inside an MQTT topic level.
pub fn topic_safe() -> Validator<String> {
    Arc::new(|v: &String| {
        if v.is_empty() {
            Err("must not be empty".into())
        } else if v
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '+' | '#'))
        {
            Err(format!("{:?} contains whitespace or topic separators", v))
        } else {
            Ok(())
        }
    })
}

/// What an abort did to an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortOutcome {
    /// Candidate was restored from the committed value.
    Reverted,
    /// The attribute was never committed and must be discarded.
    Discard,
}

/// A typed attribute with committed and candidate buffers.
#[derive(Clone)]
pub struct ManagedAttribute<T: AttrValue> {
    committed: Option<T>,
    candidate: T,
    dirty: bool,
    validator: Option<Validator<T>>,
}

impl<T: AttrValue> ManagedAttribute<T> {
    /// Creates a provisional attribute; it is dirty until first committed.
    pub fn new(initial: T) -> Self {
        Self {
            committed: None,
            candidate: initial,
            dirty: true,
            validator: None,
        }
    }

    /// Attaches a validator.
    pub fn with_validator(mut self, validator: Validator<T>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Runs the validator against a value without staging it.
    pub fn validate(&self, value: &T) -> Result<(), String> {
        match &self.validator {
            Some(check) => check(value),
            None => Ok(()),
        }
    }

    /// Stages a new candidate value.
    pub fn set_candidate(&mut self, value: T) -> Result<(), String> {
        self.validate(&value)?;
        self.candidate = value;
        self.dirty = true;
        Ok(())
    }

    /// Staged value.
    pub fn candidate(&self) -> &T {
        &self.candidate
    }

    /// Committed value, `None` before the first commit.
    pub fn committed(&self) -> Option<&T> {
        self.committed.as_ref()
    }

    /// Written since the last commit or abort.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Candidate differs from the committed value.
    pub fn is_changed(&self) -> bool {
        self.committed.as_ref() != Some(&self.candidate)
    }

    /// Copies candidate → committed.
    pub fn commit(&mut self) {
        self.committed = Some(self.candidate.clone());
        self.dirty = false;
    }

    /// Copies committed → candidate.
    pub fn abort(&mut self) -> AbortOutcome {
        self.dirty = false;
        match &self.committed {
            Some(value) => {
                self.candidate = value.clone();
                AbortOutcome::Reverted
            }
            None => AbortOutcome::Discard,
        }
    }

    /// Applies an edit to both buffers without staging it.
    ///
    /// Used for bookkeeping that bypasses the transaction (deleting a child).
    pub fn amend(&mut self, edit: impl Fn(&mut T)) {
        edit(&mut self.candidate);
        if let Some(committed) = self.committed.as_mut() {
            edit(committed);
        }
    }
}

impl<T: AttrValue> fmt::Debug for ManagedAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedAttribute")
            .field("committed", &self.committed)
            .field("candidate", &self.candidate)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Type-erased view used by [`Schema`](crate::schema::Schema).
pub trait Attribute: fmt::Debug + Send + Sync {
    /// See [`ManagedAttribute::is_dirty`].
    fn is_dirty(&self) -> bool;
    /// See [`ManagedAttribute::is_changed`].
    fn is_changed(&self) -> bool;
    /// Re-runs the validator on the staged candidate.
    fn check(&self) -> Result<(), String>;
    /// See [`ManagedAttribute::commit`].
    fn commit(&mut self);
    /// See [`ManagedAttribute::abort`].
    fn abort(&mut self) -> AbortOutcome;
    /// Candidate rendered as text.
    fn candidate_text(&self) -> String;
    /// Committed value rendered as text.
    fn committed_text(&self) -> Option<String>;
    /// Parses and stages a candidate from text.
    fn set_text(&mut self, text: &str) -> Result<(), String>;
    /// Downcasting support.
    fn as_any(&self) -> &dyn Any;
    /// Downcasting support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: AttrValue> Attribute for ManagedAttribute<T> {
    fn is_dirty(&self) -> bool {
        ManagedAttribute::is_dirty(self)
    }

    fn is_changed(&self) -> bool {
        ManagedAttribute::is_changed(self)
    }

    fn check(&self) -> Result<(), String> {
        self.validate(&self.candidate)
    }

    fn commit(&mut self) {
        ManagedAttribute::commit(self)
    }

    fn abort(&mut self) -> AbortOutcome {
        ManagedAttribute::abort(self)
    }

    fn candidate_text(&self) -> String {
        self.candidate.to_text()
    }

    fn committed_text(&self) -> Option<String> {
        self.committed.as_ref().map(AttrValue::to_text)
    }

    fn set_text(&mut self, text: &str) -> Result<(), String> {
        let value = T::from_text(text).ok_or_else(|| format!("cannot parse {:?}", text))?;
        self.set_candidate(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_attribute_is_provisional() {
        let attr = ManagedAttribute::new(String::from("dec-1"));
        assert!(attr.is_dirty());
        assert!(attr.is_changed());
        assert!(attr.committed().is_none());
    }

    #[test]
    fn commit_clears_flags() {
        let mut attr = ManagedAttribute::new(5i64);
        attr.commit();
        assert!(!attr.is_dirty());
        assert!(!attr.is_changed());
        assert_eq!(attr.committed(), Some(&5));
    }

    #[test]
    fn writing_same_value_is_dirty_but_unchanged() {
        let mut attr = ManagedAttribute::new(5i64);
        attr.commit();
        attr.set_candidate(5).unwrap();
        assert!(attr.is_dirty());
        assert!(!attr.is_changed());
    }

    #[test]
    fn rejected_value_leaves_candidate_alone() {
        let mut attr = ManagedAttribute::new(1i64).with_validator(in_range(0, 3));
        attr.commit();
        assert!(attr.set_candidate(4).is_err());
        assert_eq!(*attr.candidate(), 1);
        assert!(!attr.is_dirty());
    }

    #[test]
    fn abort_restores_committed() {
        let mut attr = ManagedAttribute::new(String::from("a"));
        attr.commit();
        attr.set_candidate("b".into()).unwrap();
        assert_eq!(attr.abort(), AbortOutcome::Reverted);
        assert_eq!(attr.candidate(), "a");
        assert!(!attr.is_dirty());
    }

    #[test]
    fn abort_of_never_committed_discards() {
        let mut attr = ManagedAttribute::new(String::from("a"));
        assert_eq!(attr.abort(), AbortOutcome::Discard);
    }

    #[test]
    fn amend_touches_both_buffers() {
        let mut attr = ManagedAttribute::new(vec![ObjectId(1), ObjectId(2)]);
        attr.commit();
        attr.amend(|ids| ids.retain(|id| *id != ObjectId(1)));
        assert_eq!(attr.committed(), Some(&vec![ObjectId(2)]));
        assert_eq!(attr.candidate(), &vec![ObjectId(2)]);
        assert!(!attr.is_dirty());
    }

    #[test]
    fn text_round_trip_through_erased_view() {
        let mut attr: Box<dyn Attribute> = Box::new(ManagedAttribute::new(0i64));
        attr.set_text(" 12 ").unwrap();
        assert_eq!(attr.candidate_text(), "12");
        assert!(attr.set_text("twelve").is_err());
    }

    #[test]
    fn validators() {
        assert!(one_of(&["SERVO", "PWM"])(&"PWM".to_string()).is_ok());
        assert!(one_of(&["SERVO", "PWM"])(&"pwm".to_string()).is_err());
        assert!(topic_safe()(&"sat-1".to_string()).is_ok());
        assert!(topic_safe()(&"sat 1".to_string()).is_err());
        assert!(topic_safe()(&"a/b".to_string()).is_err());
        assert!(topic_safe()(&String::new()).is_err());
    }

    #[test]
    fn bool_text_forms() {
        assert_eq!(bool::from_text("yes"), Some(true));
        assert_eq!(bool::from_text("0"), Some(false));
        assert_eq!(true.to_text(), "YES");
    }
}
