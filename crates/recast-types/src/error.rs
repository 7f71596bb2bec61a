//! Error types for recast-types.

use thiserror::Error;

use crate::types::StructId;
use crate::variable::Variable;

/// Errors raised by the type database and the structure store.
#[derive(Debug, Error)]
pub enum TypeError {
    /// The struct does not exist (or was deleted in the current run).
    #[error("unknown struct {0}")]
    UnknownStruct(StructId),

    /// No member starts at the offset.
    #[error("{id} has no member at offset {offset:#x}")]
    MissingMember { id: StructId, offset: usize },

    /// Setting the member type would run into the following member.
    #[error("{id}: member at {offset:#x} of size {size} would overlap member at {next:#x}")]
    MemberOverlap {
        id: StructId,
        offset: usize,
        size: usize,
        next: usize,
    },

    /// The offset falls inside a member that starts earlier.
    #[error("{id}: offset {offset:#x} lies inside member at {start:#x}")]
    MidMember {
        id: StructId,
        offset: usize,
        start: usize,
    },

    /// The struct existed before the current run and may not be changed by it.
    #[error("{0} is not provisional and cannot be modified")]
    ImmutableStruct(StructId),

    /// A type without a known size cannot be placed in a layout.
    #[error("type {0} has no known size")]
    Unsized(String),

    /// The database refused a declared type.
    #[error("refusing to declare {var} as {ty}")]
    DeclarationRefused { var: Variable, ty: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for type database operations.
pub type TypeResult<T> = Result<T, TypeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TypeError::MemberOverlap {
            id: StructId(3),
            offset: 2,
            size: 4,
            next: 4,
        };
        assert_eq!(
            err.to_string(),
            "struct#3: member at 0x2 of size 4 would overlap member at 0x4"
        );

        let err = TypeError::UnknownStruct(StructId(7));
        assert_eq!(err.to_string(), "unknown struct struct#7");
    }
}
