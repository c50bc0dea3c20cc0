//! Attribute reference resolution.
//!
//! A caller may refer to an attribute by its native code (`brightness`),
//! by a purpose shorthand (`:level`), by an expanded purpose string
//! (`attr:level`), or by a structured predicate query. Resolution returns
//! exactly one attribute or nothing; when a purpose is shared by a paired
//! reading/control attribute the caller's intent breaks the tie.

use std::collections::BTreeMap;

use crate::attribute::{
    AttributeSpec, PROP_NAME, PROP_PURPOSE, PropertyValue, ROLE_CONTROL, ROLE_READING,
};

/// What the caller wants to do with the resolved attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Get,
    Set,
    Subscribe,
}

/// A parsed attribute reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrRef {
    /// Native attribute code.
    Code(String),
    /// Semantic purpose tag.
    Purpose(String),
    /// Structured predicate query over declared properties.
    Query(BTreeMap<String, PropertyValue>),
}

impl AttrRef {
    /// Parse a textual reference.
    ///
    /// `:level` is a purpose shorthand; a key containing `:` is an
    /// expanded purpose (the namespace is stripped to its term);
    /// anything else is a native code.
    #[must_use]
    pub fn parse(key: &str) -> Self {
        if let Some(term) = key.strip_prefix(':') {
            Self::Purpose(term.to_string())
        } else if let Some((_, term)) = key.rsplit_once(':') {
            Self::Purpose(term.to_string())
        } else {
            Self::Code(key.to_string())
        }
    }
}

impl From<&str> for AttrRef {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}

/// Resolve a reference to exactly one attribute spec, or `None`.
#[must_use]
pub fn resolve<'a>(
    attributes: &'a [AttributeSpec],
    reference: &AttrRef,
    intent: Intent,
) -> Option<&'a AttributeSpec> {
    match reference {
        AttrRef::Code(code) => attributes.iter().find(|spec| &spec.code == code),
        AttrRef::Purpose(purpose) => {
            let mut query = BTreeMap::new();
            query.insert(
                PROP_PURPOSE.to_string(),
                PropertyValue::Text(purpose.clone()),
            );
            resolve_query(attributes, &query, intent)
        }
        AttrRef::Query(query) => resolve_query(attributes, query, intent),
    }
}

fn resolve_query<'a>(
    attributes: &'a [AttributeSpec],
    query: &BTreeMap<String, PropertyValue>,
    intent: Intent,
) -> Option<&'a AttributeSpec> {
    let matches: Vec<&AttributeSpec> = attributes
        .iter()
        .filter(|spec| matches_query(spec, query))
        .collect();

    match matches.as_slice() {
        [] => None,
        [only] => Some(*only),
        _ => Some(tie_break(&matches, intent)),
    }
}

/// Superset match: every query predicate must hold on the declared
/// properties. `@`-prefixed keys and the name predicate are ignored.
fn matches_query(spec: &AttributeSpec, query: &BTreeMap<String, PropertyValue>) -> bool {
    query.iter().all(|(key, wanted)| {
        if key.starts_with('@') || key == PROP_NAME {
            return true;
        }
        let Some(declared) = spec.properties.get(key) else {
            return false;
        };
        match (declared, wanted) {
            // list-valued properties match by containment
            (PropertyValue::List(_), PropertyValue::Text(tag)) => declared.contains(tag),
            (PropertyValue::List(_), PropertyValue::List(tags)) => {
                tags.iter().all(|tag| declared.contains(tag))
            }
            // scalars by equality
            (PropertyValue::Text(have), PropertyValue::Text(want)) => have == want,
            (PropertyValue::Text(_), PropertyValue::List(_)) => false,
        }
    })
}

/// Deterministic choice among attributes sharing a purpose: `set`
/// prefers the control role, `get`/`subscribe` the reading role, then
/// reading, then control, then the first match.
fn tie_break<'a>(matches: &[&'a AttributeSpec], intent: Intent) -> &'a AttributeSpec {
    let reading = matches.iter().find(|spec| spec.has_role(ROLE_READING)).copied();
    let control = matches.iter().find(|spec| spec.has_role(ROLE_CONTROL)).copied();

    match intent {
        Intent::Set => {
            if let Some(spec) = control {
                return spec;
            }
        }
        Intent::Get | Intent::Subscribe => {
            if let Some(spec) = reading {
                return spec;
            }
        }
    }

    reading.or(control).unwrap_or(matches[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeSpec;

    fn paired_attributes(reading_first: bool) -> Vec<AttributeSpec> {
        let reading = AttributeSpec::builder("level")
            .purpose("level")
            .role(ROLE_READING)
            .build()
            .unwrap();
        let control = AttributeSpec::builder("set-level")
            .purpose("level")
            .role(ROLE_CONTROL)
            .build()
            .unwrap();
        if reading_first {
            vec![reading, control]
        } else {
            vec![control, reading]
        }
    }

    #[test]
    fn should_resolve_native_code_directly() {
        let attrs = paired_attributes(true);
        let found = resolve(&attrs, &AttrRef::parse("set-level"), Intent::Get).unwrap();
        assert_eq!(found.code, "set-level");
    }

    #[test]
    fn should_fail_on_unknown_code() {
        let attrs = paired_attributes(true);
        assert!(resolve(&attrs, &AttrRef::parse("missing"), Intent::Get).is_none());
    }

    #[test]
    fn should_parse_purpose_shorthand() {
        assert_eq!(
            AttrRef::parse(":level"),
            AttrRef::Purpose("level".to_string())
        );
    }

    #[test]
    fn should_parse_expanded_purpose() {
        assert_eq!(
            AttrRef::parse("attr:level"),
            AttrRef::Purpose("level".to_string())
        );
    }

    #[test]
    fn should_prefer_control_for_set_regardless_of_order() {
        for reading_first in [true, false] {
            let attrs = paired_attributes(reading_first);
            let found = resolve(&attrs, &AttrRef::parse(":level"), Intent::Set).unwrap();
            assert_eq!(found.code, "set-level", "reading_first={reading_first}");
        }
    }

    #[test]
    fn should_prefer_reading_for_get_regardless_of_order() {
        for reading_first in [true, false] {
            let attrs = paired_attributes(reading_first);
            let found = resolve(&attrs, &AttrRef::parse(":level"), Intent::Get).unwrap();
            assert_eq!(found.code, "level", "reading_first={reading_first}");
        }
    }

    #[test]
    fn should_prefer_reading_for_subscribe() {
        let attrs = paired_attributes(false);
        let found = resolve(&attrs, &AttrRef::parse(":level"), Intent::Subscribe).unwrap();
        assert_eq!(found.code, "level");
    }

    #[test]
    fn should_fall_back_to_control_for_get_when_no_reading() {
        let attrs = vec![
            AttributeSpec::builder("a")
                .purpose("level")
                .build()
                .unwrap(),
            AttributeSpec::builder("b")
                .purpose("level")
                .role(ROLE_CONTROL)
                .build()
                .unwrap(),
        ];
        let found = resolve(&attrs, &AttrRef::parse(":level"), Intent::Get).unwrap();
        assert_eq!(found.code, "b");
    }

    #[test]
    fn should_fall_back_to_first_match_when_no_roles() {
        let attrs = vec![
            AttributeSpec::builder("a")
                .purpose("level")
                .build()
                .unwrap(),
            AttributeSpec::builder("b")
                .purpose("level")
                .build()
                .unwrap(),
        ];
        let found = resolve(&attrs, &AttrRef::parse(":level"), Intent::Set).unwrap();
        assert_eq!(found.code, "a");
    }

    #[test]
    fn should_resolve_single_attribute_with_both_roles() {
        let attrs = vec![
            AttributeSpec::builder("brightness")
                .purpose("level")
                .role(ROLE_READING)
                .role(ROLE_CONTROL)
                .build()
                .unwrap(),
        ];
        for intent in [Intent::Get, Intent::Set, Intent::Subscribe] {
            let found = resolve(&attrs, &AttrRef::parse(":level"), intent).unwrap();
            assert_eq!(found.code, "brightness");
        }
    }

    #[test]
    fn should_ignore_at_prefixed_and_name_predicates() {
        let attrs = paired_attributes(true);
        let mut query = BTreeMap::new();
        query.insert(
            PROP_PURPOSE.to_string(),
            PropertyValue::Text("level".to_string()),
        );
        query.insert("@id".to_string(), PropertyValue::Text("#x".to_string()));
        query.insert(
            PROP_NAME.to_string(),
            PropertyValue::Text("whatever".to_string()),
        );
        let found = resolve(&attrs, &AttrRef::Query(query), Intent::Get).unwrap();
        assert_eq!(found.code, "level");
    }

    #[test]
    fn should_match_list_predicate_by_containment() {
        let attrs = vec![
            AttributeSpec::builder("x")
                .purpose("level")
                .role(ROLE_READING)
                .role(ROLE_CONTROL)
                .build()
                .unwrap(),
        ];
        let mut query = BTreeMap::new();
        query.insert(
            "role".to_string(),
            PropertyValue::List(vec!["reading".to_string(), "control".to_string()]),
        );
        let found = resolve(&attrs, &AttrRef::Query(query), Intent::Get).unwrap();
        assert_eq!(found.code, "x");
    }

    #[test]
    fn should_not_match_when_predicate_absent() {
        let attrs = vec![AttributeSpec::builder("x").build().unwrap()];
        let mut query = BTreeMap::new();
        query.insert(
            PROP_PURPOSE.to_string(),
            PropertyValue::Text("level".to_string()),
        );
        assert!(resolve(&attrs, &AttrRef::Query(query), Intent::Get).is_none());
    }
}
