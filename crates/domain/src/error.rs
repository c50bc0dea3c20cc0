//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! Resolution failures ([`NotFoundError`]) degrade gracefully: callers log
//! and treat the operation as a no-op. Invariant violations
//! ([`InvariantError`]) are contract breaches and fail the offending call.

/// Umbrella error for the engine.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("invariant violated")]
    Invariant(#[from] InvariantError),

    #[error("validation failed")]
    Validation(#[from] ValidationError),

    /// A second adapter reported an identity that is already bound.
    /// First-bound wins; the new candidate is dropped.
    #[error("duplicate binding for {key}")]
    DuplicateBinding { key: String },
}

/// A reference could not be resolved to a concrete object.
#[derive(Debug, thiserror::Error)]
#[error("{kind} not found: {key}")]
pub struct NotFoundError {
    /// What was being looked up (`"Attribute"`, `"Model"`, `"Thing"`).
    pub kind: &'static str,
    /// The reference that failed to resolve.
    pub key: String,
}

/// Contract violations. These are programming errors, not runtime
/// conditions, and halt the offending call.
#[derive(Debug, thiserror::Error)]
pub enum InvariantError {
    /// `start` was called while a transaction was already open.
    #[error("cannot nest start/end transactions")]
    NestedTransaction,

    /// An attribute resolved against the model descriptor has no
    /// corresponding state slot.
    #[error("resolved attribute {code} has no state slot")]
    AttributeVanished { code: String },
}

/// Construction/configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("model code must not be empty")]
    EmptyModelCode,

    #[error("attribute code must not be empty")]
    EmptyAttributeCode,

    #[error("duplicate attribute code: {0}")]
    DuplicateAttributeCode(String),

    /// A bridge exemplar was registered without a driver identity.
    #[error("bridge exemplar has no driver identity")]
    MissingDriverIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_not_found_with_kind_and_key() {
        let err = NotFoundError {
            kind: "Attribute",
            key: ":level".to_string(),
        };
        assert_eq!(err.to_string(), "Attribute not found: :level");
    }

    #[test]
    fn should_convert_not_found_into_tether_error() {
        let err: TetherError = NotFoundError {
            kind: "Thing",
            key: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, TetherError::NotFound(_)));
    }

    #[test]
    fn should_convert_invariant_into_tether_error() {
        let err: TetherError = InvariantError::NestedTransaction.into();
        assert!(matches!(
            err,
            TetherError::Invariant(InvariantError::NestedTransaction)
        ));
    }
}
