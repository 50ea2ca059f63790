// diag.rs — Unified diagnostics model
//
// Shared diagnostic type for the non-fatal degradation paths of every pass.
// A diagnostic is attached to a model object (by qualified name) rather than
// a source span: the inputs are model graphs, not text files.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0300`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// Unsupported component kind.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Attribute expression failed to parse or evaluate.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Bookkeeping lookup failed or an earlier pass broke an invariant.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Stage certificate obligation failed.
    pub const E0600: DiagCode = DiagCode("E0600");
    /// Ambiguous named-object reference left as a dynamic lookup.
    pub const W0300: DiagCode = DiagCode("W0300");
    /// Token arithmetic left boxed because an operand type stayed unknown.
    pub const W0301: DiagCode = DiagCode("W0301");
    /// Ignored editor-only attribute.
    pub const W0302: DiagCode = DiagCode("W0302");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining why a site degraded.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub subject: Option<String>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Qualified model object name or generated method the message is about.
    pub subject: String,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or causes.
    pub fn new(level: DiagLevel, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            subject: subject.into(),
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn warning(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, subject, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, subject: Option<String>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            subject,
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.subject, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.subject, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        for cause in &self.cause_chain {
            match &cause.subject {
                Some(s) => write!(f, "\n  caused by: {} ({})", cause.message, s)?,
                None => write!(f, "\n  caused by: {}", cause.message)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "Demo.ramp", "something failed");
        assert_eq!(format!("{d}"), "error: Demo.ramp: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::warning("Demo.scale.fire", "ambiguous reference")
            .with_code(codes::W0300);
        assert_eq!(
            format!("{d}"),
            "warning[W0300]: Demo.scale.fire: ambiguous reference"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Warning, "Demo.acc", "type unknown")
            .with_code(codes::W0301)
            .with_hint("declare the port type")
            .with_cause("input port is unconnected", Some("Demo.acc.input".into()));

        assert_eq!(d.code, Some(codes::W0301));
        assert_eq!(d.hint.as_deref(), Some("declare the port type"));
        assert_eq!(d.cause_chain.len(), 1);
        assert!(format!("{d}").contains("caused by: input port is unconnected (Demo.acc.input)"));
    }
}
