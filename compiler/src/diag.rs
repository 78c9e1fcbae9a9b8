// diag.rs — Unified diagnostics model
//
// Diagnostic types shared by the judge and the CLI driver. Node ids take the
// place of source spans.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::NodeId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code is never reused for a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// No kernel table for the node's (operator type, backend).
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Narrowing left no combination.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// The precision policy demands a dtype the kernel does not declare.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Sibling subgraphs disagree on an output dtype.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Shape range count differs from the number of unknown dims.
    pub const E0104: DiagCode = DiagCode("E0104");

    /// A lenient match reduced precision within a dtype family.
    pub const W0100: DiagCode = DiagCode("W0100");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CauseRecord {
    pub message: String,
    pub node: Option<NodeId>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub node: Option<NodeId>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or causes.
    pub fn new(level: DiagLevel, node: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            node,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, node: Option<NodeId>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            node,
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
        match &self.code {
            Some(code) => write!(f, "{}[{}]: ", level, code)?,
            None => write!(f, "{}: ", level)?,
        }
        if let Some(node) = self.node {
            write!(f, "{}: ", node)?;
        }
        write!(f, "{}", self.message)?;
        for cause in &self.cause_chain {
            match cause.node {
                Some(node) => write!(f, "\n  caused by {}: {}", node, cause.message)?,
                None => write!(f, "\n  caused by: {}", cause.message)?,
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, None, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_node() {
        let d = Diagnostic::new(DiagLevel::Warning, Some(NodeId(3)), "precision reduced")
            .with_code(codes::W0100);
        assert_eq!(format!("{d}"), "warning[W0100]: %3: precision reduced");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Error, Some(NodeId(1)), "no admissible combination")
            .with_code(codes::E0101)
            .with_hint("add a kernel combination")
            .with_cause("inside subgraph 'then'", Some(NodeId(0)));

        assert_eq!(d.code, Some(codes::E0101));
        assert_eq!(d.hint.as_deref(), Some("add a kernel combination"));
        assert_eq!(d.cause_chain.len(), 1);
        assert_eq!(
            format!("{d}"),
            "error[E0101]: %1: no admissible combination\n  caused by %0: inside subgraph 'then'\n  hint: add a kernel combination"
        );
    }
}
