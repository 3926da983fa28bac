//! Schemas: ordered sets of managed attributes built from fragments.
//!
//! A business object owns exactly one [`Schema`]. It is assembled by
//! appending [`SchemaFragment`]s (base fields, admin state, type specific
//! fields, child list), and exposes the whole-object transactional view
//! (`is_dirty`, `is_changed`, `commit_all`, `abort_all`).

use crate::attribute::{AbortOutcome, AttrValue, Attribute, ManagedAttribute};
use crate::error::ConfigError;

/// Whether a field must be present in a configuration document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// Missing field fails the parse.
    Mandatory,
    /// Missing field keeps the default.
    Optional,
    /// Bookkeeping field, never written to or read from documents.
    Internal,
}

/// Describes one field of a fragment.
#[derive(Debug)]
pub struct FieldSpec {
    /// Attribute name (also the document element name).
    pub name: &'static str,
    /// Document presence rule.
    pub presence: Presence,
    /// Builds the attribute with its default value and validator.
    pub build: fn() -> Box<dyn Attribute>,
}

/// A named group of fields appended to a schema as a unit.
#[derive(Debug)]
pub struct SchemaFragment {
    /// Fragment name, for diagnostics.
    pub name: &'static str,
    /// Fields in document order.
    pub fields: &'static [FieldSpec],
}

#[derive(Debug)]
struct Field {
    spec: &'static FieldSpec,
    attr: Box<dyn Attribute>,
}

/// Ordered attribute set owned by one business object.
#[derive(Debug, Default)]
pub struct Schema {
    fragments: Vec<&'static str>,
    fields: Vec<Field>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment, builder style.
    pub fn with(mut self, fragment: &'static SchemaFragment) -> Self {
        self.append(fragment);
        self
    }

    /// Appends a fragment. Fields whose name is already present are skipped.
    pub fn append(&mut self, fragment: &'static SchemaFragment) {
        for spec in fragment.fields {
            if self.contains(spec.name) {
                continue;
            }
            self.fields.push(Field {
                spec,
                attr: (spec.build)(),
            });
        }
        self.fragments.push(fragment.name);
    }

    /// Names of the appended fragments in order.
    pub fn fragments(&self) -> &[&'static str] {
        &self.fragments
    }

    /// Whether an attribute with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.spec.name == name)
    }

    /// Iterates fields in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static FieldSpec, &dyn Attribute)> {
        self.fields.iter().map(|f| (f.spec, f.attr.as_ref()))
    }

    fn field(&self, name: &str) -> Result<&dyn Attribute, ConfigError> {
        self.fields
            .iter()
            .find(|f| f.spec.name == name)
            .map(|f| f.attr.as_ref())
            .ok_or_else(|| ConfigError::NoSuchAttribute(name.to_string()))
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut dyn Attribute, ConfigError> {
        match self.fields.iter_mut().find(|f| f.spec.name == name) {
            Some(f) => Ok(f.attr.as_mut()),
            None => Err(ConfigError::NoSuchAttribute(name.to_string())),
        }
    }

    /// Typed access to an attribute.
    pub fn get<T: AttrValue>(&self, name: &str) -> Result<&ManagedAttribute<T>, ConfigError> {
        self.field(name)?
            .as_any()
            .downcast_ref::<ManagedAttribute<T>>()
            .ok_or_else(|| ConfigError::TypeMismatch(name.to_string()))
    }

    /// Typed mutable access to an attribute.
    pub fn get_mut<T: AttrValue>(
        &mut self,
        name: &str,
    ) -> Result<&mut ManagedAttribute<T>, ConfigError> {
        self.field_mut(name)?
            .as_any_mut()
            .downcast_mut::<ManagedAttribute<T>>()
            .ok_or_else(|| ConfigError::TypeMismatch(name.to_string()))
    }

    /// Stages a typed candidate value.
    pub fn set<T: AttrValue>(&mut self, name: &str, value: T) -> Result<(), ConfigError> {
        self.get_mut::<T>(name)?
            .set_candidate(value)
            .map_err(|reason| ConfigError::InvalidValue {
                attr: name.to_string(),
                reason,
            })
    }

    /// Stages a candidate parsed from text.
    pub fn set_text(&mut self, name: &str, text: &str) -> Result<(), ConfigError> {
        self.field_mut(name)?
            .set_text(text)
            .map_err(|reason| ConfigError::InvalidValue {
                attr: name.to_string(),
                reason,
            })
    }

    /// Candidate value of a typed attribute.
    pub fn candidate<T: AttrValue>(&self, name: &str) -> Result<&T, ConfigError> {
        Ok(self.get::<T>(name)?.candidate())
    }

    /// Committed value of a typed attribute, `None` before the first commit.
    pub fn committed<T: AttrValue>(&self, name: &str) -> Result<Option<&T>, ConfigError> {
        Ok(self.get::<T>(name)?.committed())
    }

    /// Committed value if present, otherwise the candidate.
    pub fn effective<T: AttrValue>(&self, name: &str) -> Result<&T, ConfigError> {
        let attr = self.get::<T>(name)?;
        Ok(attr.committed().unwrap_or(attr.candidate()))
    }

    /// Candidate of any attribute rendered as text.
    pub fn candidate_text(&self, name: &str) -> Result<String, ConfigError> {
        Ok(self.field(name)?.candidate_text())
    }

    /// Committed value of any attribute rendered as text.
    pub fn committed_text(&self, name: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.field(name)?.committed_text())
    }

    /// Any attribute written since the last commit or abort.
    pub fn is_dirty(&self) -> bool {
        self.fields.iter().any(|f| f.attr.is_dirty())
    }

    /// Any attribute whose candidate differs from its committed value.
    pub fn is_changed(&self) -> bool {
        self.fields.iter().any(|f| f.attr.is_changed())
    }

    /// Whether a single attribute is changed. Unknown names read as unchanged.
    pub fn is_field_changed(&self, name: &str) -> bool {
        self.field(name).map(|a| a.is_changed()).unwrap_or(false)
    }

    /// Re-validates every dirty candidate, failing on the first rejection.
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        for field in self.fields.iter().filter(|f| f.attr.is_dirty()) {
            field
                .attr
                .check()
                .map_err(|reason| ConfigError::InvalidValue {
                    attr: field.spec.name.to_string(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Commits every attribute.
    pub fn commit_all(&mut self) {
        for field in &mut self.fields {
            field.attr.commit();
        }
    }

    /// Aborts every attribute, dropping the ones that were never committed.
    ///
    /// Returns the number of discarded attributes.
    pub fn abort_all(&mut self) -> usize {
        let before = self.fields.len();
        self.fields
            .retain_mut(|f| f.attr.abort() == AbortOutcome::Reverted);
        before - self.fields.len()
    }
}
