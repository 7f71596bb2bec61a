//! Structured diagnostics collected during an inference run.
//!
//! Every problem the analyzer works around (missing evidence, a refused layout change,
//! an unresolvable call) is recorded as a [`Diagnostic`] and emitted as a `tracing`
//! event at the same time. The collected list is handed back to the caller by
//! `apply` and can be drained at any point.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, warn};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

/// The part of the analyzer a diagnostic comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Subsystem {
    /// Struct layout changes.
    MemberMerge,
    /// Local and global variable inference.
    Variables,
    /// Return value inference.
    ReturnValues,
    /// Expression type resolution.
    Expressions,
    /// Cross-function type propagation.
    Propagation,
    /// Indirect call resolution.
    ImplicitCalls,
    /// Writing results back to the type database.
    WriteBack,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemberMerge => "member-merge",
            Self::Variables => "variables",
            Self::ReturnValues => "return-values",
            Self::Expressions => "expressions",
            Self::Propagation => "propagation",
            Self::ImplicitCalls => "implicit-calls",
            Self::WriteBack => "write-back",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Not enough (or contradictory) evidence; the result is unknown.
    UnknownEvidence,
    /// A layout or declaration change was refused; the previous state is kept.
    RefusedMutation,
    /// An indirect call could not be resolved; no edge is recorded.
    UnresolvableCall,
    /// Malformed input aborted the analysis of one variable.
    ContractViolation,
    /// Propagation met a parameter that already has a different type.
    PropagationConflict,
}

impl DiagnosticKind {
    /// Default severity for the kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::ContractViolation => Severity::Error,
            Self::UnknownEvidence
            | Self::RefusedMutation
            | Self::UnresolvableCall
            | Self::PropagationConflict => Severity::Warning,
        }
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub subsystem: Subsystem,
    /// What the diagnostic is about: a variable, a struct member, a call site.
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.subsystem, self.subject, self.message
        )
    }
}

/// Diagnostics collected over one run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic and emits it as a tracing event.
    pub fn report(
        &mut self,
        kind: DiagnosticKind,
        subsystem: Subsystem,
        subject: impl fmt::Display,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            severity: kind.severity(),
            kind,
            subsystem,
            subject: subject.to_string(),
            message: message.into(),
        });
    }

    /// Records missing evidence that is expected and not worth a warning.
    pub fn note(
        &mut self,
        subsystem: Subsystem,
        subject: impl fmt::Display,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic {
            severity: Severity::Debug,
            kind: DiagnosticKind::UnknownEvidence,
            subsystem,
            subject: subject.to_string(),
            message: message.into(),
        });
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        emit(&diagnostic);
        self.items.push(diagnostic);
    }

    pub fn unknown_evidence(
        &mut self,
        subsystem: Subsystem,
        subject: impl fmt::Display,
        message: impl Into<String>,
    ) {
        self.report(DiagnosticKind::UnknownEvidence, subsystem, subject, message);
    }

    pub fn refused(
        &mut self,
        subsystem: Subsystem,
        subject: impl fmt::Display,
        message: impl Into<String>,
    ) {
        self.report(DiagnosticKind::RefusedMutation, subsystem, subject, message);
    }

    pub fn unresolvable_call(&mut self, subject: impl fmt::Display, message: impl Into<String>) {
        self.report(
            DiagnosticKind::UnresolvableCall,
            Subsystem::ImplicitCalls,
            subject,
            message,
        );
    }

    pub fn contract_violation(
        &mut self,
        subsystem: Subsystem,
        subject: impl fmt::Display,
        message: impl Into<String>,
    ) {
        self.report(DiagnosticKind::ContractViolation, subsystem, subject, message);
    }

    pub fn conflict(&mut self, subject: impl fmt::Display, message: impl Into<String>) {
        self.report(
            DiagnosticKind::PropagationConflict,
            Subsystem::Propagation,
            subject,
            message,
        );
    }

    /// Drops the unknown-evidence diagnostics about `subject`, once something else has
    /// typed it. Returns how many were dropped.
    pub fn retract_unknown(&mut self, subject: &str) -> usize {
        let before = self.items.len();
        self.items
            .retain(|d| !(d.kind == DiagnosticKind::UnknownEvidence && d.subject == subject));
        before - self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Diagnostics of one kind.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drains every collected diagnostic.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.items)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

fn emit(d: &Diagnostic) {
    match d.severity {
        Severity::Debug => debug!(
            subsystem = %d.subsystem,
            subject = %d.subject,
            kind = ?d.kind,
            "{}",
            d.message
        ),
        Severity::Warning => warn!(
            subsystem = %d.subsystem,
            subject = %d.subject,
            kind = ?d.kind,
            "{}",
            d.message
        ),
        Severity::Error => error!(
            subsystem = %d.subsystem,
            subject = %d.subject,
            kind = ?d.kind,
            "{}",
            d.message
        ),
    }
}
