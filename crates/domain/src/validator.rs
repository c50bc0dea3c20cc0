//! Named validators.
//!
//! A model attribute names its validator by key; the registry resolves
//! the key to a function at Thing construction time. Validators run
//! synchronously per mutation and may replace the value; clearing it
//! discards the mutation entirely.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::value::AttributeValue;

/// Mutation context handed to a validator.
#[derive(Debug)]
pub struct Validation {
    /// Code of the attribute being mutated.
    pub code: String,
    /// Candidate value. The validator may replace it; `None` discards
    /// the mutation.
    pub value: Option<AttributeValue>,
}

/// A validator function resolved by name.
pub type ValidatorFn = Arc<dyn Fn(&mut Validation) + Send + Sync>;

/// Registry of named validator functions.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: BTreeMap<String, ValidatorFn>,
}

impl ValidatorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin validators
    /// (`boolean`, `percent`, `non-negative`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("boolean", |validation: &mut Validation| {
            if let Some(value) = validation.value.take() {
                validation.value = Some(AttributeValue::Bool(value.truthy()));
            }
        });
        registry.register("percent", |validation: &mut Validation| {
            validation.value = match validation.value.take() {
                Some(value) => value
                    .as_f64()
                    .map(|n| AttributeValue::Float(n.clamp(0.0, 100.0))),
                None => None,
            };
        });
        registry.register("non-negative", |validation: &mut Validation| {
            validation.value = match validation.value.take() {
                Some(value) => match value.as_f64() {
                    Some(n) if n >= 0.0 => Some(value),
                    _ => None,
                },
                None => None,
            };
        });
        registry
    }

    /// Register a validator under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, validator: F)
    where
        F: Fn(&mut Validation) + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Arc::new(validator));
    }

    /// Resolve a validator by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ValidatorFn> {
        self.validators.get(name).cloned()
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("names", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(registry: &ValidatorRegistry, name: &str, value: AttributeValue) -> Option<AttributeValue> {
        let validator = registry.get(name).unwrap();
        let mut validation = Validation {
            code: "x".to_string(),
            value: Some(value),
        };
        validator(&mut validation);
        validation.value
    }

    #[test]
    fn should_coerce_truthy_values_to_bool() {
        let registry = ValidatorRegistry::with_builtins();
        assert_eq!(
            run(&registry, "boolean", AttributeValue::Int(1)),
            Some(AttributeValue::Bool(true))
        );
        assert_eq!(
            run(&registry, "boolean", AttributeValue::String("off".to_string())),
            Some(AttributeValue::Bool(false))
        );
    }

    #[test]
    fn should_clamp_percent_into_range() {
        let registry = ValidatorRegistry::with_builtins();
        assert_eq!(
            run(&registry, "percent", AttributeValue::Int(150)),
            Some(AttributeValue::Float(100.0))
        );
        assert_eq!(
            run(&registry, "percent", AttributeValue::Float(-3.0)),
            Some(AttributeValue::Float(0.0))
        );
    }

    #[test]
    fn should_discard_non_numeric_percent() {
        let registry = ValidatorRegistry::with_builtins();
        assert_eq!(
            run(&registry, "percent", AttributeValue::String("dim".to_string())),
            None
        );
    }

    #[test]
    fn should_discard_negative_values() {
        let registry = ValidatorRegistry::with_builtins();
        assert_eq!(
            run(&registry, "non-negative", AttributeValue::Int(-1)),
            None
        );
        assert_eq!(
            run(&registry, "non-negative", AttributeValue::Int(7)),
            Some(AttributeValue::Int(7))
        );
    }

    #[test]
    fn should_return_none_for_unknown_name() {
        let registry = ValidatorRegistry::with_builtins();
        assert!(registry.get("no-such-validator").is_none());
    }

    #[test]
    fn should_allow_custom_registration() {
        let mut registry = ValidatorRegistry::new();
        registry.register("always-five", |validation: &mut Validation| {
            validation.value = Some(AttributeValue::Int(5));
        });
        assert_eq!(
            run(&registry, "always-five", AttributeValue::Int(1)),
            Some(AttributeValue::Int(5))
        );
    }
}
