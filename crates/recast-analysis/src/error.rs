//! Error types for recast-analysis.

use recast_types::{TypeError, Variable};
use thiserror::Error;

/// Errors that can abort the analysis of a single variable.
///
/// None of these abort a run: the analyzer catches them at the variable boundary,
/// records a diagnostic and degrades the variable to unknown.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A use chain that cannot be walked against the variable's type.
    #[error("malformed use chain on {var}: {reason}")]
    MalformedChain { var: Variable, reason: String },

    /// No function body at the address.
    #[error("no function at {0:#x}")]
    UnknownFunction(u64),

    /// The function has no such local slot.
    #[error("function {function:#x} has no local slot {slot}")]
    UnknownLocal { function: u64, slot: usize },

    /// Nested inference went deeper than the configured limit.
    #[error("inference depth limit of {0} reached")]
    RecursionLimit(usize),

    /// Type database refusal.
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;
    use recast_types::StructId;

    #[test]
    fn test_error_display() {
        let err = AnalysisError::UnknownLocal {
            function: 0x401000,
            slot: 3,
        };
        assert_eq!(err.to_string(), "function 0x401000 has no local slot 3");

        let err: AnalysisError = TypeError::UnknownStruct(StructId(2)).into();
        assert_eq!(err.to_string(), "unknown struct struct#2");
    }
}
