//! Engine events.
//!
//! Carried on the in-process event bus. Per-attribute state changes and
//! meta changes are also delivered through Thing-level callbacks; the bus
//! versions exist so observers can watch the whole engine without holding
//! a Thing.

use crate::id::ThingId;
use crate::identity::BridgeIdentity;
use crate::value::AttributeValue;

/// Something the engine did or observed.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A Thing was bound to a bridge and registered.
    NewThing { thing_id: ThingId },
    /// Discovery surfaced a bridge instance.
    Discovered { identity: BridgeIdentity },
    /// A surfaced bridge instance was filtered out (no accepting model,
    /// or a post-bind compatibility check failed).
    Ignored { identity: BridgeIdentity },
    /// A Thing was unbound from its bridge.
    Disconnected { thing_id: ThingId },
    /// One attribute of a Thing changed.
    State {
        thing_id: ThingId,
        code: String,
        value: Option<AttributeValue>,
    },
    /// A Thing's metadata or reachability changed.
    Meta { thing_id: ThingId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_clone_state_event() {
        let event = EngineEvent::State {
            thing_id: ThingId::compose("virtual:1", "demo"),
            code: "brightness".to_string(),
            value: Some(AttributeValue::Int(50)),
        };
        let copy = event.clone();
        assert!(matches!(copy, EngineEvent::State { code, .. } if code == "brightness"));
    }
}
