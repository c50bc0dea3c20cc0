//! Model descriptors.
//!
//! A Thing does not inherit from a model class; it holds a reference to a
//! descriptor listing its attributes, the bridge filter it can bind to,
//! and the init data handed to the bridge at setup. Descriptors are plain
//! data and deserialize from the daemon's configuration file.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeSpec;
use crate::band::StateMap;
use crate::error::{TetherError, ValidationError};
use crate::identity::{BridgeIdentity, IdentityFilter};

/// Describes one kind of Thing: its attribute layout and which bridges
/// it can bind to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model type code (e.g. `demo-light`).
    pub code: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Attribute layout.
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    /// Which bridge identities this model accepts.
    #[serde(default)]
    pub bridge_filter: IdentityFilter,
    /// Init data handed to the bridge at setup time.
    #[serde(default)]
    pub initd: StateMap,
}

impl ModelDescriptor {
    /// Create a builder for constructing a [`ModelDescriptor`].
    #[must_use]
    pub fn builder(code: impl Into<String>) -> ModelDescriptorBuilder {
        ModelDescriptorBuilder {
            descriptor: Self {
                code: code.into(),
                name: None,
                attributes: Vec::new(),
                bridge_filter: IdentityFilter::any(),
                initd: StateMap::new(),
            },
        }
    }

    /// Whether a bridge with this identity is acceptable for the model.
    #[must_use]
    pub fn supports(&self, identity: &BridgeIdentity) -> bool {
        identity.overlaps(&self.bridge_filter)
    }

    /// Look up an attribute spec by code.
    #[must_use]
    pub fn attribute(&self, code: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|spec| spec.code == code)
    }

    /// Check descriptor invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] when the code is empty, an
    /// attribute is invalid, or attribute codes collide.
    pub fn validate(&self) -> Result<(), TetherError> {
        if self.code.is_empty() {
            return Err(ValidationError::EmptyModelCode.into());
        }
        for (index, spec) in self.attributes.iter().enumerate() {
            spec.validate()?;
            if self.attributes[..index].iter().any(|s| s.code == spec.code) {
                return Err(ValidationError::DuplicateAttributeCode(spec.code.clone()).into());
            }
        }
        Ok(())
    }
}

/// Step-by-step builder for [`ModelDescriptor`].
#[derive(Debug)]
pub struct ModelDescriptorBuilder {
    descriptor: ModelDescriptor,
}

impl ModelDescriptorBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = Some(name.into());
        self
    }

    /// Append an attribute spec.
    #[must_use]
    pub fn attribute(mut self, spec: AttributeSpec) -> Self {
        self.descriptor.attributes.push(spec);
        self
    }

    /// Constrain which bridge identities the model accepts.
    #[must_use]
    pub fn bridge_filter(mut self, filter: IdentityFilter) -> Self {
        self.descriptor.bridge_filter = filter;
        self
    }

    /// Set the init data handed to the bridge at setup time.
    #[must_use]
    pub fn initd(mut self, initd: StateMap) -> Self {
        self.descriptor.initd = initd;
        self
    }

    /// Consume the builder, validate, and return the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Validation`] on invariant failure.
    pub fn build(self) -> Result<ModelDescriptor, TetherError> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }
}
