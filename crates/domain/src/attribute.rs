//! Attribute specifications.
//!
//! An attribute is one controllable/observable property of a Thing. Its
//! spec carries the declared semantic properties (purpose, role, …) that
//! the [resolver](crate::resolver) matches references against, plus the
//! name of the validator applied to mutations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{TetherError, ValidationError};

/// Property key carrying the semantic purpose tag (e.g. `level`, `on`).
pub const PROP_PURPOSE: &str = "purpose";
/// Property key carrying the reading/control role tags.
pub const PROP_ROLE: &str = "role";
/// Property key for the human-readable name; ignored during matching.
pub const PROP_NAME: &str = "name";

/// Role tag for attributes that report hardware state.
pub const ROLE_READING: &str = "reading";
/// Role tag for attributes that command hardware.
pub const ROLE_CONTROL: &str = "control";

/// A declared property value: scalar text or a list of tags.
///
/// List-valued properties match by containment, scalars by equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    List(Vec<String>),
}

impl PropertyValue {
    /// Whether this property value contains `tag` (equality for scalars).
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        match self {
            Self::Text(text) => text == tag,
            Self::List(items) => items.iter().any(|item| item == tag),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Specification of one attribute of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// The attribute's native key (e.g. `brightness`).
    pub code: String,
    /// Declared semantic properties, matched by the resolver.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Name of the validator applied to desired-state mutations.
    #[serde(default)]
    pub validator: Option<String>,
}

impl AttributeSpec {
    /// Create a builder for constructing an [`AttributeSpec`].
    #[must_use]
    pub fn builder(code: impl Into<String>) -> AttributeSpecBuilder {
        AttributeSpecBuilder {
            spec: Self {
                code: code.into(),
                properties: BTreeMap::new(),
                validator: None,
            },
        }
    }

    /// The declared semantic purpose, if any.
    #[must_use]
    pub fn purpose(&self) -> Option<&str> {
        match self.properties.get(PROP_PURPOSE) {
            Some(PropertyValue::Text(text)) => Some(text),
            Some(PropertyValue::List(items)) => items.first().map(String::as_str),
            None => None,
        }
    }

    /// Whether the attribute carries the given role tag.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.properties
            .get(PROP_ROLE)
            .is_some_and(|value| value.contains(role))
    }

    /// Check spec invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] when the code is empty.
    pub fn validate(&self) -> Result<(), TetherError> {
        if self.code.is_empty() {
            return Err(ValidationError::EmptyAttributeCode.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`AttributeSpec`].
#[derive(Debug)]
pub struct AttributeSpecBuilder {
    spec: AttributeSpec,
}

impl AttributeSpecBuilder {
    /// Declare the semantic purpose tag.
    #[must_use]
    pub fn purpose(self, purpose: impl Into<String>) -> Self {
        self.property(PROP_PURPOSE, PropertyValue::Text(purpose.into()))
    }

    /// Append a role tag (`reading` / `control`). Repeated calls
    /// accumulate into a list.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        let role = role.into();
        let entry = self
            .spec
            .properties
            .entry(PROP_ROLE.to_string())
            .or_insert_with(|| PropertyValue::List(Vec::new()));
        match entry {
            PropertyValue::List(items) => items.push(role),
            PropertyValue::Text(existing) => {
                let first = existing.clone();
                *entry = PropertyValue::List(vec![first, role]);
            }
        }
        self
    }

    /// Set an arbitrary declared property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.spec.properties.insert(key.into(), value);
        self
    }

    /// Name the validator applied to desired-state mutations.
    #[must_use]
    pub fn validator(mut self, name: impl Into<String>) -> Self {
        self.spec.validator = Some(name.into());
        self
    }

    /// Consume the builder, validate, and return the spec.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] when the code is empty.
    pub fn build(self) -> Result<AttributeSpec, TetherError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
