//! Thing identifier.
//!
//! Unlike a random UUID, a [`ThingId`] is *composed*: it only exists once a
//! Thing is bound to a bridge, and is derived from the bridge identity plus
//! the model code. Identical hardware rediscovered later produces the same
//! id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identifier for a bound Thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThingId(String);

impl ThingId {
    /// Compose an id from a bridge thing-id and a model code.
    #[must_use]
    pub fn compose(bridge_thing_id: &str, model_code: &str) -> Self {
        Self(format!("{bridge_thing_id}:{model_code}"))
    }

    /// Access the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ThingId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ThingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
