//! Run-scoped inference state.
//!
//! [`TypeAnalyzer`] owns everything one inference run produces: memo tables for local
//! variables, globals and return values, the set of structs created by the run, the call
//! edges it discovered and its diagnostics. All struct changes go through a
//! [`StagedDatabase`], so the run is either committed as a whole with
//! [`TypeAnalyzer::commit`] or dropped with [`TypeAnalyzer::rollback`].

use recast_types::{StagedDatabase, StructId, TypeDatabase, TypeInfo, Variable};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::callgraph::CallEdge;
use crate::config::AnalyzerConfig;
use crate::diagnostics::{Diagnostics, Subsystem};
use crate::error::AnalysisResult;

/// Memo entry of one inference.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Inference has started and not finished; re-entry yields unknown.
    InProgress,
    Resolved(TypeInfo),
}

impl Resolution {
    /// The resolved type, if any.
    pub fn resolved(&self) -> Option<&TypeInfo> {
        match self {
            Resolution::Resolved(ty) => Some(ty),
            Resolution::InProgress => None,
        }
    }
}

/// Result of writing a run back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBack {
    /// Variables whose declared type was written.
    pub variables_typed: usize,
    /// Structs flushed to the wrapped database.
    pub structs_committed: Vec<StructId>,
    /// Call edges discovered by the run.
    pub call_edges: Vec<CallEdge>,
}

/// Memoized inference state over a staged type database.
#[derive(Debug)]
pub struct TypeAnalyzer<D: TypeDatabase> {
    pub(crate) db: StagedDatabase<D>,
    pub(crate) config: AnalyzerConfig,
    pub(crate) lvars: BTreeMap<(u64, usize), Resolution>,
    pub(crate) gvars: BTreeMap<u64, Resolution>,
    pub(crate) retvals: BTreeMap<u64, Resolution>,
    pub(crate) new_types: BTreeSet<StructId>,
    pub(crate) new_xrefs: Vec<CallEdge>,
    pub(crate) diagnostics: Diagnostics,
}

impl<D: TypeDatabase> TypeAnalyzer<D> {
    pub fn new(db: D, config: AnalyzerConfig) -> Self {
        Self {
            db: StagedDatabase::new(db),
            config,
            lvars: BTreeMap::new(),
            gvars: BTreeMap::new(),
            retvals: BTreeMap::new(),
            new_types: BTreeSet::new(),
            new_xrefs: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// The staged database, including this run's uncommitted changes.
    pub fn database(&self) -> &StagedDatabase<D> {
        &self.db
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The memo entry of a variable.
    pub fn resolution(&self, var: &Variable) -> Option<&Resolution> {
        match *var {
            Variable::Local { function, slot } => self.lvars.get(&(function, slot)),
            Variable::Global(address) => self.gvars.get(&address),
        }
    }

    /// The type inferred for a variable so far; unknown when not resolved.
    pub fn var_type(&self, var: &Variable) -> TypeInfo {
        self.resolution(var)
            .and_then(Resolution::resolved)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn set_resolution(&mut self, var: &Variable, resolution: Resolution) {
        match *var {
            Variable::Local { function, slot } => {
                self.lvars.insert((function, slot), resolution);
            }
            Variable::Global(address) => {
                self.gvars.insert(address, resolution);
            }
        }
    }

    /// The return type inferred for a function so far.
    pub fn retval_type(&self, function: u64) -> TypeInfo {
        self.retvals
            .get(&function)
            .and_then(Resolution::resolved)
            .cloned()
            .unwrap_or_default()
    }

    /// Every variable with a memo entry, locals first.
    pub fn tracked_variables(&self) -> Vec<Variable> {
        self.lvars
            .keys()
            .map(|&(function, slot)| Variable::local(function, slot))
            .chain(self.gvars.keys().map(|&address| Variable::global(address)))
            .collect()
    }

    /// Structs created by this run.
    pub fn new_types(&self) -> &BTreeSet<StructId> {
        &self.new_types
    }

    pub fn is_new_type(&self, id: StructId) -> bool {
        self.new_types.contains(&id)
    }

    /// Whether `ty` reaches a struct created by this run.
    pub fn is_provisional_type(&self, ty: &TypeInfo) -> bool {
        ty.final_struct_id()
            .map(|id| self.is_new_type(id))
            .unwrap_or(false)
    }

    /// Creates an empty provisional struct.
    pub fn create_struct(&mut self) -> StructId {
        let name = self.config.struct_name(self.db.next_struct_id().0);
        let id = self.db.create_struct(Some(&name));
        self.new_types.insert(id);
        debug!(id = id.0, name = %name, "created struct");
        id
    }

    /// Whether the run holds no state at all.
    pub fn is_clean(&self) -> bool {
        self.lvars.is_empty()
            && self.gvars.is_empty()
            && self.retvals.is_empty()
            && self.new_types.is_empty()
            && self.new_xrefs.is_empty()
            && self.db.is_clean()
    }

    /// Writes every known variable type back, flushes the staged database and resets
    /// the run.
    ///
    /// A declaration the database refuses is reported and skipped.
    pub fn commit(&mut self) -> AnalysisResult<WriteBack> {
        let mut declarations = Vec::new();
        for ((function, slot), resolution) in std::mem::take(&mut self.lvars) {
            declarations.push((Variable::local(function, slot), resolution));
        }
        for (address, resolution) in std::mem::take(&mut self.gvars) {
            declarations.push((Variable::global(address), resolution));
        }

        for (var, resolution) in declarations {
            let Resolution::Resolved(ty) = resolution else {
                continue;
            };
            if ty.is_unknown() {
                continue;
            }
            if let Err(err) = self.db.set_declared_type(&var, ty) {
                self.diagnostics
                    .refused(Subsystem::WriteBack, var, err.to_string());
            }
        }

        let report = self.db.commit()?;
        for (var, err) in report.refused {
            self.diagnostics
                .refused(Subsystem::WriteBack, var, err.to_string());
        }

        self.retvals.clear();
        self.new_types.clear();
        Ok(WriteBack {
            variables_typed: report.declared.len(),
            structs_committed: report.structs,
            call_edges: std::mem::take(&mut self.new_xrefs),
        })
    }

    /// Drops every provisional struct and all run state.
    pub fn rollback(&mut self) {
        self.db.discard();
        self.lvars.clear();
        self.gvars.clear();
        self.retvals.clear();
        self.new_types.clear();
        self.new_xrefs.clear();
        self.diagnostics.clear();
    }

    /// Drains the collected diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<crate::diagnostics::Diagnostic> {
        self.diagnostics.take()
    }

    pub fn into_database(self) -> D {
        self.db.into_inner()
    }
}
