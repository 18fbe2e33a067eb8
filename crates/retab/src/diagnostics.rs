//! user facing problems
//!
//! Problems caused by user input are never returned as errors. They are collected as [Diagnostic]s
//! so a single evaluation reports every failure at once.
use crate::source::SourceRange;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// What kind of failure a diagnostic describes
///
/// [DiagnosticKind::Structural] and [DiagnosticKind::Parse] problems do not go away by evaluating again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// something referenced is not (yet) known
    Unresolved,
    /// name collisions, missing attributes, wrong label counts
    Structural,
    /// a value was read before its block finished evaluating
    Incomplete,
    /// the generated document violates its schema
    Schema,
    /// invalid hcl syntax
    Parse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub summary: String,
    pub detail: String,
    pub subject: Option<SourceRange>,
}

impl Diagnostic {
    pub fn error(
        kind: DiagnosticKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
        subject: impl Into<Option<SourceRange>>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            summary: summary.into(),
            detail: detail.into(),
            subject: subject.into(),
        }
    }

    pub fn warning(
        kind: DiagnosticKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
        subject: impl Into<Option<SourceRange>>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, summary, detail, subject)
        }
    }

    pub fn unresolved(
        summary: impl Into<String>,
        detail: impl Into<String>,
        subject: impl Into<Option<SourceRange>>,
    ) -> Self {
        Self::error(DiagnosticKind::Unresolved, summary, detail, subject)
    }

    pub fn structural(
        summary: impl Into<String>,
        detail: impl Into<String>,
        subject: impl Into<Option<SourceRange>>,
    ) -> Self {
        Self::error(DiagnosticKind::Structural, summary, detail, subject)
    }

    pub fn incomplete(
        detail: impl Into<String>,
        subject: impl Into<Option<SourceRange>>,
    ) -> Self {
        Self::error(DiagnosticKind::Incomplete, "incomplete block", detail, subject)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };

        if let Some(subject) = &self.subject {
            write!(f, "{subject}: ")?;
        }
        write!(f, "{severity}: {}", self.summary)?;
        if !self.detail.is_empty() {
            write!(f, "; {}", self.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::trace!(%diagnostic, "diagnostic");
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        for diagnostic in other.0 {
            self.push(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// True when every error in here will be reported again on any retry
    pub fn is_structural(&self) -> bool {
        self.has_errors()
            && self.errors().all(|diagnostic| {
                matches!(
                    diagnostic.kind,
                    DiagnosticKind::Structural | DiagnosticKind::Parse
                )
            })
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|diagnostic| diagnostic.is_error())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(value: Diagnostic) -> Self {
        Self(vec![value])
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<T: IntoIterator<Item = Diagnostic>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::error::Error for Diagnostics {}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, diagnostic) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn structural_only_when_all_errors_are_structural() {
        let mut diagnostics: Diagnostics =
            Diagnostic::structural("missing attribute", "", None).into();
        diagnostics.push(Diagnostic::warning(
            DiagnosticKind::Unresolved,
            "just a warning",
            "",
            None,
        ));
        assert!(diagnostics.is_structural());

        diagnostics.push(Diagnostic::unresolved("unknown variable", "", None));
        assert!(!diagnostics.is_structural());
    }

    #[test]
    fn warnings_are_not_errors() {
        let diagnostics: Diagnostics =
            Diagnostic::warning(DiagnosticKind::Structural, "missing gen block", "", None).into();
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.to_string(), "warning: missing gen block");
    }
}
