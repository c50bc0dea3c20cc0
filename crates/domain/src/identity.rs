//! Bridge identities and identity overlap.
//!
//! A bridge identity distinguishes one physical device instance from
//! another: the driver name plus adapter-specific fields (address,
//! service, serial, …). The derived thing-id is deterministic, so
//! rediscovering the same hardware always lands on the same key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, composable identity of a bridge instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeIdentity {
    /// Driver name (e.g. `virtual`, `ble`, `rest`).
    pub driver: String,
    /// Adapter-specific identity fields (address, service, serial, …).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl BridgeIdentity {
    /// Identity carrying only the driver name (typical for exemplars).
    #[must_use]
    pub fn for_driver(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add an identity field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Look up an identity field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Derive the deterministic thing-id for this identity.
    ///
    /// UUIDv5 over the canonical rendering, prefixed with the driver
    /// name so logs stay readable.
    #[must_use]
    pub fn thing_id(&self) -> String {
        let mut canonical = self.driver.clone();
        for (key, value) in &self.fields {
            canonical.push('\n');
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(value);
        }
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.as_bytes());
        format!("{}:{}", self.driver, uuid.simple())
    }

    /// Overlap test: every constraint in `filter` must hold here.
    #[must_use]
    pub fn overlaps(&self, filter: &IdentityFilter) -> bool {
        if let Some(driver) = &filter.driver
            && driver != &self.driver
        {
            return false;
        }
        filter
            .fields
            .iter()
            .all(|(key, value)| self.field(key) == Some(value.as_str()))
    }
}

impl fmt::Display for BridgeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.driver)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Partial identity used to filter exemplars and candidates.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFilter {
    /// Constrain the driver name.
    #[serde(default)]
    pub driver: Option<String>,
    /// Constrain identity fields (all must match exactly).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl IdentityFilter {
    /// Filter matching any identity.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter constraining only the driver name.
    #[must_use]
    pub fn for_driver(driver: impl Into<String>) -> Self {
        Self {
            driver: Some(driver.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field constraint.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
