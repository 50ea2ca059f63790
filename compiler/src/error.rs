// error.rs — Fatal specialization errors
//
// Fatal conditions abort the run: once the shared program representation may
// be inconsistent there is no safe partial output. Non-fatal degradations are
// `diag::Diagnostic`s instead and never travel through this type.

use thiserror::Error;

use crate::diag::{codes, DiagCode};

/// Result alias used by every fallible pass.
pub type Result<T> = std::result::Result<T, SpecError>;

/// A fatal error. Every variant names the model object or construct at fault.
#[derive(Debug, Error)]
pub enum SpecError {
    /// A component kind, expression node or value conversion the specializer
    /// cannot express statically.
    #[error("{object}: {construct} is not supported because {reason}")]
    Unsupported {
        object: String,
        construct: String,
        reason: String,
    },

    /// A bookkeeping lookup that must succeed did not, or an invariant
    /// trusted by a later pass was broken by an earlier one.
    #[error("analysis inconsistency in {context}: {message}")]
    Inconsistency { context: String, message: String },

    /// The watchdog budget ran out. The run did not complete.
    #[error("did not complete: watchdog expired during {pass} after {elapsed_ms}ms")]
    WatchdogExpired { pass: &'static str, elapsed_ms: u128 },

    /// The model description is malformed.
    #[error("model error: {0}")]
    Model(String),

    /// An attribute expression failed to parse or evaluate.
    #[error("expression error in {object}: {message}")]
    Expression { object: String, message: String },

    #[error("model description is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpecError {
    pub fn unsupported(
        object: impl Into<String>,
        construct: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SpecError::Unsupported {
            object: object.into(),
            construct: construct.into(),
            reason: reason.into(),
        }
    }

    pub fn inconsistency(context: impl Into<String>, message: impl Into<String>) -> Self {
        SpecError::Inconsistency {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn expression(object: impl Into<String>, message: impl Into<String>) -> Self {
        SpecError::Expression {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Stable code of the error diagnostic recorded for this failure.
    pub fn code(&self) -> Option<DiagCode> {
        match self {
            SpecError::Unsupported { .. } => Some(codes::E0100),
            SpecError::Expression { .. } => Some(codes::E0101),
            SpecError::Inconsistency { .. } => Some(codes::E0200),
            SpecError::WatchdogExpired { .. } | SpecError::Model(_) | SpecError::Json(_) => None,
        }
    }

    /// True for the operator-visible "did not complete" condition.
    pub fn is_watchdog(&self) -> bool {
        matches!(self, SpecError::WatchdogExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_names_object_and_reason() {
        let e = SpecError::unsupported("Demo.fn", "actor kind MathFunction", "it dynamically creates ports");
        assert_eq!(
            e.to_string(),
            "Demo.fn: actor kind MathFunction is not supported because it dynamically creates ports"
        );
        assert_eq!(e.code(), Some(codes::E0100));
    }

    #[test]
    fn watchdog_reports_did_not_complete() {
        let e = SpecError::WatchdogExpired {
            pass: "inline_tokens",
            elapsed_ms: 12,
        };
        assert!(e.is_watchdog());
        assert_eq!(e.code(), None);
        assert!(e.to_string().starts_with("did not complete"));
    }
}
