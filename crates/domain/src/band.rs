//! Bands — named partitions of a Thing's state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// A flat code → value dictionary, the currency of band updates and
/// adapter pushes.
pub type StateMap = BTreeMap<String, AttributeValue>;

/// The named partitions of a Thing's state.
///
/// `Istate` holds values observed from hardware, `Ostate` the values a
/// caller wants the hardware to take. The remaining bands are plain
/// metadata dictionaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// Model metadata (code, name, attribute layout).
    Model,
    /// Descriptive metadata, including the composed thing-id.
    Meta,
    /// Observed state, written by the bound adapter.
    Istate,
    /// Desired state, written by callers.
    Ostate,
    /// Connection state (reachability).
    Connection,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => f.write_str("model"),
            Self::Meta => f.write_str("meta"),
            Self::Istate => f.write_str("istate"),
            Self::Ostate => f.write_str("ostate"),
            Self::Connection => f.write_str("connection"),
        }
    }
}

/// Well-known key for reachability inside the `connection` band.
pub const CONNECTION_REACHABLE: &str = "reachable";

/// Well-known key for the composed thing-id inside the `meta` band.
pub const META_THING_ID: &str = "thing-id";

/// Timestamp key stamped on every meta/connection band update.
pub const META_UPDATED: &str = "updated";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_lowercase_band_name() {
        assert_eq!(Band::Istate.to_string(), "istate");
        assert_eq!(Band::Connection.to_string(), "connection");
    }

    #[test]
    fn should_roundtrip_band_through_serde() {
        let json = serde_json::to_string(&Band::Ostate).unwrap();
        assert_eq!(json, "\"ostate\"");
        let parsed: Band = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Band::Ostate);
    }
}
