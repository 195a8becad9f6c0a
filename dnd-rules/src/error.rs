//! Error kinds surfaced by the rules engine.
//!
//! Rule failures (`InsufficientSlots`, `SpellNotPrepared`, ...) are expected
//! outcomes that a calling agent narrates around; `InvariantViolation` means a
//! mutation produced a state that breaks a rule and was discarded.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the engine and its store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("entity {0} not found")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("no level {level} spell slots remaining")]
    InsufficientSlots { level: u8 },

    #[error("{spell} is not prepared")]
    SpellNotPrepared { spell: String },

    #[error("not enough {resource}: need {requested}, have {available}")]
    InsufficientResource {
        resource: String,
        requested: u32,
        available: u32,
    },

    #[error("unknown condition: {0}")]
    UnknownCondition(String),

    #[error("{0}")]
    EntityUnavailable(String),

    #[error("entity {0} is busy, retry with the same idempotency key")]
    Busy(String),
}

impl RulesError {
    /// Stable snake_case name used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            RulesError::NotFound(_) => "not_found",
            RulesError::InvalidParameter(_) => "invalid_parameter",
            RulesError::InvariantViolation(_) => "invariant_violation",
            RulesError::InsufficientSlots { .. } => "insufficient_slots",
            RulesError::SpellNotPrepared { .. } => "spell_not_prepared",
            RulesError::InsufficientResource { .. } => "insufficient_resource",
            RulesError::UnknownCondition(_) => "unknown_condition",
            RulesError::EntityUnavailable(_) => "entity_unavailable",
            RulesError::Busy(_) => "busy",
        }
    }

    /// Only serialization timeouts are safe to retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RulesError::Busy(_))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RulesError::InvalidParameter(message.into())
    }
}

/// Wire form of an error: `{ "kind": ..., "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&RulesError> for ErrorBody {
    fn from(err: &RulesError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(RulesError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            RulesError::InsufficientSlots { level: 3 }.kind(),
            "insufficient_slots"
        );
        assert_eq!(RulesError::Busy("x".into()).kind(), "busy");
    }

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(RulesError::Busy("x".into()).is_retryable());
        assert!(!RulesError::InvalidParameter("x".into()).is_retryable());
        assert!(!RulesError::InvariantViolation("x".into()).is_retryable());
    }

    #[test]
    fn test_error_body() {
        let err = RulesError::SpellNotPrepared {
            spell: "Shield".into(),
        };
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, "spell_not_prepared");
        assert_eq!(body.message, "Shield is not prepared");
    }
}
