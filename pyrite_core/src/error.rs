//! Error taxonomy for the type system.
//!
//! Hierarchy conflicts always report every offending class, not just the
//! first one found. Attribute absence is *not* an error inside the type
//! system (the cache layer encodes it as `None`); `AttributeNotFound` exists
//! for the language-surface boundary only.

use thiserror::Error;

/// Errors produced by type construction, rebasing, and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// The hierarchy cannot be linearized, metaclasses conflict, or two
    /// bases have incomposable instance layouts. `classes` names every
    /// class involved in the conflict.
    #[error("inconsistent hierarchy: {reason}: {}", classes.join(", "))]
    InconsistentHierarchy {
        reason: String,
        classes: Vec<String>,
    },

    /// The bases specification is malformed: wrong arity, duplicate base,
    /// empty or non-type element.
    #[error("invalid bases: {0}")]
    InvalidBasesSpec(String),

    /// Attempted mutation of a frozen type.
    #[error("cannot modify immutable type '{0}'")]
    ImmutableType(String),

    /// Raised only at the language-surface boundary; lookups inside the
    /// type system return `Option` instead.
    #[error("type '{type_name}' has no attribute '{attribute}'")]
    AttributeNotFound {
        type_name: String,
        attribute: String,
    },

    /// The operation is not supported by the operand's type (empty slot).
    #[error("unsupported operation '{operation}' for type '{type_name}'")]
    UnsupportedOperation {
        operation: String,
        type_name: String,
    },

    /// A managed callable failed; carries the callable's own message.
    #[error("{0}")]
    CallFailed(String),
}

impl ObjectError {
    /// Build an `InconsistentHierarchy` from any class-name iterator.
    pub fn hierarchy<I, S>(reason: &str, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ObjectError::InconsistentHierarchy {
            reason: reason.to_string(),
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }
}
