//! # recast-analysis
//!
//! Usage-driven struct and pointer type reconstruction for decompiled code.
//!
//! This crate provides:
//! - A use-chain model of variable reads, writes and call arguments
//! - A program model with function bodies, imports and a call graph
//! - Memoized type inference for locals, globals, return values and expressions
//! - Struct synthesis from member accesses, with overlap-safe member merging
//! - Propagation of new struct types across call boundaries
//! - Resolution of indirect calls through struct members
//! - A commit/rollback protocol over a staged type database
//!
//! ## Example
//!
//! ```
//! use recast_analysis::{Expr, FunctionBody, MemoryProgram, StructAnalyzer, UseChain};
//! use recast_types::{MemoryTypeDatabase, TypeDatabase, TypeInfo};
//!
//! // void init(struct s *a1) { a1->f0 = 0; a1->f8 = 0; }
//! let init = FunctionBody::new(0x401000, "init").with_args(1);
//! let a1 = init.var(0);
//! let init = init
//!     .write(a1, UseChain::deref_at(0), Expr::num(0, 4))
//!     .write(a1, UseChain::deref_at(8), Expr::num(0, 8));
//! let program = MemoryProgram::new().with_function(init);
//!
//! let mut analyzer = StructAnalyzer::new(&program, MemoryTypeDatabase::new());
//! let ty = analyzer.analyze_lvar(0x401000, 0);
//! assert!(ty.is_struct_bearing());
//!
//! let summary = analyzer.apply().unwrap();
//! assert_eq!(summary.structs_committed.len(), 1);
//!
//! let db = analyzer.into_database();
//! let id = summary.structs_committed[0];
//! assert_eq!(db.size_of(&TypeInfo::structure(id)), Some(16));
//! ```

pub mod callgraph;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod expr;
pub mod program;
pub mod struct_analyzer;
pub mod type_analyzer;
pub mod uses;

pub use callgraph::{CallEdge, CallGraph, CallGraphNode, CallSite, CallType};
pub use config::{AnalysisPass, AnalyzerConfig, DEFAULT_MAX_DEPTH};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity, Subsystem};
pub use error::{AnalysisError, AnalysisResult};
pub use expr::Expr;
pub use program::{parse_address, FunctionBody, Import, LocalVar, MemoryProgram, Program};
pub use struct_analyzer::{ApplySummary, StructAnalyzer};
pub use type_analyzer::{Resolution, TypeAnalyzer, WriteBack};
pub use uses::{
    is_helper_intrinsic, CallCast, CallTarget, ChainShape, ChainTarget, FuncCall,
    ImplicitSource, ReturnSite, UseChain, VarRead, VarUse, VarUses, VarWrite, HELPER_INTRINSICS,
};
