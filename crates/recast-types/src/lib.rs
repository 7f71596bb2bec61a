//! # recast-types
//!
//! Type model and struct layout storage for recast.
//!
//! This crate provides:
//! - Variable identities (function locals and globals)
//! - Type representation (integers, floats, pointers, arrays, struct references)
//! - Struct layouts with overlap-refusing member operations
//! - The [`TypeDatabase`] capability and an in-memory implementation
//! - A staging overlay that keeps an inference run's changes undoable
//!
//! # Example
//!
//! ```
//! use recast_types::{MemoryTypeDatabase, StagedDatabase, TypeDatabase, TypeInfo, Variable};
//!
//! let mut staged = StagedDatabase::new(MemoryTypeDatabase::new());
//! let id = staged.create_struct(None);
//! {
//!     let mut s = staged.provisional_structure(id).unwrap();
//!     s.add_member(8).unwrap();
//!     s.set_member_type(8, TypeInfo::int()).unwrap();
//! }
//! staged
//!     .set_declared_type(&Variable::local(0x1000, 0), TypeInfo::struct_ptr(id))
//!     .unwrap();
//!
//! // Nothing reaches the wrapped database until commit.
//! assert!(!staged.inner().has_struct(id));
//! staged.commit().unwrap();
//! assert_eq!(staged.inner().size_of(&TypeInfo::structure(id)), Some(12));
//! ```

pub mod database;
pub mod error;
pub mod staging;
pub mod structure;
pub mod types;
pub mod variable;

pub use database::{
    ArchInfo, MemberTargetTable, MemoryTypeDatabase, TypeDatabase, TypeDatabaseStats,
    MEMBER_TARGET_TABLE_VERSION,
};
pub use error::{TypeError, TypeResult};
pub use staging::{CommitReport, StagedDatabase};
pub use structure::{default_member_name, Member, StructType, Structure};
pub use types::*;
pub use variable::Variable;
