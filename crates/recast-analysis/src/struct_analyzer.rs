//! Usage-driven struct and pointer type inference.
//!
//! [`StructAnalyzer`] derives the type of a variable from how it is used. A variable
//! that is dereferenced at several offsets becomes a pointer to a new struct whose
//! members are built from those accesses; a variable that is only handed to a function
//! takes the type of the parameter it is passed as; assigns and writes of typed values
//! fix the type outright.
//!
//! ## Algorithm
//!
//! Variable inference (`analyze_lvar`/`analyze_gvar`) is memoized with an in-progress
//! marker, so mutually dependent variables terminate: re-entry yields unknown. The uses of
//! a variable are collected (for a global, from every function referencing it), their
//! value and argument types resolved, and the variable type picked in this order:
//!
//! 1. exactly one assign: its value type
//! 2. several assigns: the single distinct struct type among them, otherwise unknown
//! 3. any use that cannot be a pointer use: unknown
//! 4. passed whole to calls expecting different struct types: unknown
//! 5. one write at offset 0 and nothing else: pointer to the written type
//! 6. passed whole to exactly one call: the parameter type, or a pointer to the
//!    parameter's object when every write fits inside it
//! 7. otherwise a pointer to a new struct
//!
//! Struct members are then merged from the uses, and merged once more after the type is
//! cached, for uses whose types could only be resolved once the variable itself was.
//!
//! Everything stays provisional until [`StructAnalyzer::apply`]; [`StructAnalyzer::clear`]
//! drops it.

use recast_types::{StructId, TypeDatabase, TypeInfo, Variable};
use std::collections::BTreeSet;
use tracing::debug;

use crate::callgraph::CallEdge;
use crate::config::{AnalysisPass, AnalyzerConfig};
use crate::diagnostics::{Diagnostic, Diagnostics, Subsystem};
use crate::error::{AnalysisError, AnalysisResult};
use crate::expr::Expr;
use crate::program::{parse_address, Program};
use crate::type_analyzer::{Resolution, TypeAnalyzer};
use crate::uses::{is_helper_intrinsic, CallCast, CallTarget, ChainShape, FuncCall, VarUses};

/// Outcome of [`StructAnalyzer::apply`].
#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    /// Indirect call edges resolved through struct members.
    pub call_edges: Vec<CallEdge>,
    /// Variables whose declared type was written.
    pub variables_typed: usize,
    /// Structs created by the run, now part of the database.
    pub structs_committed: Vec<StructId>,
    /// Everything reported during the run.
    pub diagnostics: Vec<Diagnostic>,
}

/// Uses of one variable, grouped by the function they appear in.
#[derive(Debug, Default)]
struct CollectedUses {
    groups: Vec<(u64, VarUses)>,
}

impl CollectedUses {
    fn merged(&self) -> VarUses {
        let mut all = VarUses::default();
        for (_, uses) in &self.groups {
            all.extend(uses.clone());
        }
        all
    }
}

/// Struct analyzer over a program and a type database.
pub struct StructAnalyzer<'p, P: Program, D: TypeDatabase> {
    program: &'p P,
    state: TypeAnalyzer<D>,
    analyzed_functions: BTreeSet<u64>,
    /// Functions cut off by the depth limit, retried from the outermost call.
    deferred_functions: BTreeSet<u64>,
    propagated: BTreeSet<Variable>,
    depth: usize,
}

impl<'p, P: Program, D: TypeDatabase> StructAnalyzer<'p, P, D> {
    pub fn new(program: &'p P, db: D) -> Self {
        Self::with_config(program, db, AnalyzerConfig::default())
    }

    pub fn with_config(program: &'p P, db: D, config: AnalyzerConfig) -> Self {
        Self {
            program,
            state: TypeAnalyzer::new(db, config),
            analyzed_functions: BTreeSet::new(),
            deferred_functions: BTreeSet::new(),
            propagated: BTreeSet::new(),
            depth: 0,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        self.state.config()
    }

    /// The run state: memo tables, provisional structs and the staged database.
    pub fn state(&self) -> &TypeAnalyzer<D> {
        &self.state
    }

    /// Type database view including uncommitted changes.
    pub fn database(&self) -> &recast_types::StagedDatabase<D> {
        self.state.database()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.state.diagnostics()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.state.take_diagnostics()
    }

    /// The type inferred for a variable so far.
    pub fn var_type(&self, var: &Variable) -> TypeInfo {
        self.state.var_type(var)
    }

    /// Structs created by the current run.
    pub fn new_types(&self) -> &BTreeSet<StructId> {
        self.state.new_types()
    }

    /// Whether the analyzer holds no run state.
    pub fn is_clean(&self) -> bool {
        self.state.is_clean()
            && self.analyzed_functions.is_empty()
            && self.deferred_functions.is_empty()
            && self.propagated.is_empty()
    }

    /// Unwraps the database. Uncommitted changes are dropped.
    pub fn into_database(self) -> D {
        self.state.into_database()
    }

    fn enabled(&self, pass: AnalysisPass) -> bool {
        self.state.config.is_pass_enabled(pass)
    }

    fn enter(&mut self, subject: &dyn std::fmt::Display) -> bool {
        if self.depth >= self.state.config.max_depth {
            let err = AnalysisError::RecursionLimit(self.state.config.max_depth);
            self.state
                .diagnostics
                .contract_violation(Subsystem::Variables, subject, err.to_string());
            return false;
        }
        self.depth += 1;
        true
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ==================== Drivers ====================

    /// Analyzes a function bottom-up: callees first, then every local, then the return
    /// value. Each function is analyzed once per run.
    ///
    /// A function reached past the depth limit is deferred and analyzed, callees
    /// included, once the outermost call has finished.
    pub fn analyze_function(&mut self, function: u64) {
        self.analyze_function_at_depth(function);
        if self.depth == 0 {
            while let Some(deferred) = self.deferred_functions.pop_first() {
                self.analyze_function_at_depth(deferred);
            }
        }
    }

    fn analyze_function_at_depth(&mut self, function: u64) {
        let program = self.program;
        let Some(body) = program.function(function) else {
            return;
        };
        if self.analyzed_functions.contains(&function) {
            return;
        }

        if self.depth > 0 && self.depth >= self.state.config.max_depth {
            debug!(function = format_args!("{:#x}", function), "deferring function");
            self.deferred_functions.insert(function);
            return;
        }
        self.analyzed_functions.insert(function);
        debug!(function = format_args!("{:#x}", function), "analyzing function");

        if self.enter(&format_args!("sub_{:x}", function)) {
            for callee in program.calls_from(function) {
                self.analyze_function_at_depth(callee);
            }
            self.leave();
        }

        for slot in 0..body.local_count() {
            self.analyze_lvar(function, slot);
        }
        self.analyze_retval(function);

        for slot in 0..body.local_count() {
            self.propagate_var(&Variable::local(function, slot));
        }
    }

    /// Analyzes every function of the program in address order.
    pub fn analyze_everything(&mut self) {
        for function in self.program.function_addresses() {
            self.analyze_function(function);
        }
    }

    pub fn analyze_variable(&mut self, var: &Variable) -> TypeInfo {
        match *var {
            Variable::Local { function, slot } => self.analyze_lvar(function, slot),
            Variable::Global(address) => self.analyze_gvar(address),
        }
    }

    // ==================== Variables ====================

    /// Infers the type of local `slot` of `function`.
    pub fn analyze_lvar(&mut self, function: u64, slot: usize) -> TypeInfo {
        self.analyze_memoized(Variable::local(function, slot))
    }

    /// Infers the type of the global at `address`.
    pub fn analyze_gvar(&mut self, address: u64) -> TypeInfo {
        self.analyze_memoized(Variable::global(address))
    }

    fn analyze_memoized(&mut self, var: Variable) -> TypeInfo {
        match self.state.resolution(&var) {
            Some(Resolution::Resolved(ty)) => return ty.clone(),
            Some(Resolution::InProgress) => {
                debug!(var = %var, "re-entered while in progress");
                return TypeInfo::Unknown;
            }
            None => {}
        }
        if !self.enter(&var) {
            return TypeInfo::Unknown;
        }

        self.state.set_resolution(&var, Resolution::InProgress);
        let result = self.infer_var(&var);
        self.leave();

        let (ty, mut uses) = match result {
            Ok(inferred) => inferred,
            Err(err) => {
                self.state.diagnostics.contract_violation(
                    Subsystem::Variables,
                    var,
                    err.to_string(),
                );
                (TypeInfo::Unknown, CollectedUses::default())
            }
        };
        self.state
            .set_resolution(&var, Resolution::Resolved(ty.clone()));

        if self.state.is_provisional_type(&ty) {
            for (_, group) in &uses.groups {
                self.add_type_uses(group, &ty);
            }
            self.merge_deferred(&mut uses, &ty);
        }
        ty
    }

    fn infer_var(&mut self, var: &Variable) -> AnalysisResult<(TypeInfo, CollectedUses)> {
        let program = self.program;

        if let Variable::Local { function, slot } = *var {
            if program.is_import(function) {
                let declared = self.state.db.declared_type(var).unwrap_or_default();
                return Ok((declared, CollectedUses::default()));
            }
            let body = program
                .function(function)
                .ok_or(AnalysisError::UnknownFunction(function))?;
            let local = body
                .local(slot)
                .ok_or(AnalysisError::UnknownLocal { function, slot })?;
            if local.is_stack_local() && !self.enabled(AnalysisPass::StackVariables) {
                self.state.diagnostics.note(
                    Subsystem::Variables,
                    var,
                    format!("{} is a stack variable; skipped", local.name),
                );
                return Ok((TypeInfo::Unknown, CollectedUses::default()));
            }
        }

        if let Some(declared) = self.state.db.declared_type(var) {
            if declared.is_struct_bearing() {
                return Ok((declared, CollectedUses::default()));
            }
        }

        let uses = self.collect_uses(var);
        let ty = self.calculate_var_type_by_uses(var, &uses.merged());
        Ok((ty, uses))
    }

    /// Collects and resolves every use of `var`.
    fn collect_uses(&mut self, var: &Variable) -> CollectedUses {
        let program = self.program;
        let functions = match *var {
            Variable::Local { function, .. } => vec![function],
            Variable::Global(address) => program.calls_to(address),
        };

        let mut collected = CollectedUses::default();
        for function in functions {
            let Some(body) = program.function(function) else {
                continue;
            };
            let mut uses = body.uses_of(var);
            if uses.is_empty() {
                continue;
            }
            self.resolve_uses(function, &mut uses);
            collected.groups.push((function, uses));
        }
        collected
    }

    /// Fills in write value types and cast argument types.
    fn resolve_uses(&mut self, function: u64, uses: &mut VarUses) {
        for write in &mut uses.writes {
            write.value_type = self.analyze_cexpr(function, &write.value);
        }
        for cast in &mut uses.casts {
            cast.arg_type = self.cast_arg_type(cast);
        }
    }

    /// Type of the callee parameter a cast is passed as.
    fn cast_arg_type(&mut self, cast: &CallCast) -> TypeInfo {
        let Some(callee) = self.resolve_call_target(&cast.call, false) else {
            return TypeInfo::Unknown;
        };
        if self.program.is_import(callee) {
            return self
                .state
                .db
                .declared_type(&Variable::local(callee, cast.arg_index))
                .unwrap_or_default();
        }
        match self.program.function(callee) {
            Some(body) if cast.arg_index < body.local_count() => {
                self.analyze_lvar(callee, cast.arg_index)
            }
            _ => TypeInfo::Unknown,
        }
    }

    /// Picks a variable type from its resolved uses.
    pub fn calculate_var_type_by_uses(&mut self, var: &Variable, uses: &VarUses) -> TypeInfo {
        let diags = &mut self.state.diagnostics;
        if uses.is_empty() {
            diags.unknown_evidence(Subsystem::Variables, var, "found no uses");
            return TypeInfo::Unknown;
        }

        // A single assign can only be one type.
        let assigns: Vec<_> = uses.assigns().collect();
        if assigns.len() == 1 {
            return assigns[0].value_type.clone();
        }
        if assigns.len() > 1 {
            let struct_types = distinct(
                assigns
                    .iter()
                    .map(|a| &a.value_type)
                    .filter(|t| t.is_struct_bearing()),
            );
            if struct_types.len() == 1 {
                return struct_types[0].clone();
            }
            diags.unknown_evidence(
                Subsystem::Variables,
                var,
                format!(
                    "{} assigns with {} distinct struct types",
                    assigns.len(),
                    struct_types.len()
                ),
            );
            return TypeInfo::Unknown;
        }

        if let Some(w) = uses.writes.iter().find(|w| !w.is_possible_ptr()) {
            diags.unknown_evidence(
                Subsystem::Variables,
                var,
                format!("non-pointer write {}", w.chain),
            );
            return TypeInfo::Unknown;
        }
        if let Some(c) = uses.casts.iter().find(|c| !c.is_possible_ptr()) {
            diags.unknown_evidence(
                Subsystem::Variables,
                var,
                format!("non-pointer argument {}", c.chain),
            );
            return TypeInfo::Unknown;
        }
        if let Some(r) = uses.reads.iter().find(|r| !r.chain.is_possible_ptr()) {
            diags.unknown_evidence(
                Subsystem::Variables,
                var,
                format!("non-pointer read {}", r.chain),
            );
            return TypeInfo::Unknown;
        }

        let passed_as = distinct(
            uses.casts
                .iter()
                .filter(|c| c.is_var_arg())
                .map(|c| &c.arg_type)
                .filter(|t| t.is_struct_bearing()),
        );
        if passed_as.len() > 1 {
            let names: Vec<String> = passed_as.iter().map(|t| self.state.db.render(t)).collect();
            self.state.diagnostics.unknown_evidence(
                Subsystem::Variables,
                var,
                format!("passed as conflicting types {}", names.join(", ")),
            );
            return TypeInfo::Unknown;
        }

        // A single write at offset 0 does not create a new type.
        if uses.len() == 1
            && uses.writes.len() == 1
            && uses.writes[0].chain.shape() == ChainShape::Member(0)
        {
            let written = &uses.writes[0].value_type;
            if written.is_unknown() {
                self.state.diagnostics.unknown_evidence(
                    Subsystem::Variables,
                    var,
                    "single write of unknown value",
                );
                return TypeInfo::Unknown;
            }
            return TypeInfo::ptr(written.clone());
        }

        if uses.casts.len() == 1 && uses.casts[0].is_var_arg() {
            let arg_type = &uses.casts[0].arg_type;
            if uses.writes.is_empty() {
                return arg_type.clone();
            }
            if arg_type.is_known() {
                return self.cast_target_with_writes(var, arg_type, uses);
            }
        }

        let id = self.state.create_struct();
        TypeInfo::struct_ptr(id)
    }

    /// Pointer to the object a single cast passes, when every write fits inside it.
    fn cast_target_with_writes(
        &mut self,
        var: &Variable,
        arg_type: &TypeInfo,
        uses: &VarUses,
    ) -> TypeInfo {
        let target = arg_type.pointee().unwrap_or(arg_type).clone();
        let Some(cast_end) = self.state.db.size_of(&target) else {
            self.state.diagnostics.unknown_evidence(
                Subsystem::Variables,
                var,
                format!("cast target {} has no size", self.state.db.render(&target)),
            );
            return TypeInfo::Unknown;
        };

        for write in &uses.writes {
            let Some(start) = write.chain.ptr_offset() else {
                continue;
            };
            let size = self.state.db.size_of(&write.value_type).unwrap_or(1).max(1);
            if start + size > cast_end {
                self.state.diagnostics.unknown_evidence(
                    Subsystem::Variables,
                    var,
                    format!(
                        "write at {:#x} of size {} is outside of {}",
                        start,
                        size,
                        self.state.db.render(&target)
                    ),
                );
                return TypeInfo::Unknown;
            }
        }
        TypeInfo::ptr(target)
    }

    /// Merges uses whose types were unknown on the first pass and are known now.
    fn merge_deferred(&mut self, uses: &mut CollectedUses, ty: &TypeInfo) {
        for (function, group) in &mut uses.groups {
            let mut deferred = VarUses::default();
            for write in &mut group.writes {
                if write.is_assign() || write.value_type.is_known() {
                    continue;
                }
                write.value_type = self.analyze_cexpr(*function, &write.value);
                if write.value_type.is_known() {
                    deferred.writes.push(write.clone());
                }
            }
            for cast in &mut group.casts {
                if cast.is_var_arg() || cast.arg_type.is_known() {
                    continue;
                }
                cast.arg_type = self.cast_arg_type(cast);
                if cast.arg_type.is_known() {
                    deferred.casts.push(cast.clone());
                }
            }
            if !deferred.is_empty() {
                self.add_type_uses(&deferred, ty);
            }
        }
    }

    // ==================== Members ====================

    /// Merges the member evidence of `uses` into the struct `var_type` points to.
    fn add_type_uses(&mut self, uses: &VarUses, var_type: &TypeInfo) {
        let Some(id) = var_type.pointee().and_then(TypeInfo::struct_id) else {
            return;
        };

        for write in &uses.writes {
            match write.chain.shape() {
                ChainShape::Member(offset) => self.add_member_type(id, offset, &write.value_type),
                ChainShape::Through(offset) => self.add_member_type(id, offset, &TypeInfo::Unknown),
                _ => {}
            }
        }

        for read in &uses.reads {
            match read.chain.shape() {
                ChainShape::Member(offset)
                | ChainShape::Interior(offset)
                | ChainShape::Through(offset) => {
                    self.add_member_type(id, offset, &TypeInfo::Unknown)
                }
                ChainShape::Value | ChainShape::NotPointer => {}
            }
        }

        for cast in &uses.casts {
            match cast.chain.shape() {
                ChainShape::Value => self.size_from_cast(id, &cast.arg_type),
                ChainShape::Member(offset) => self.add_member_type(id, offset, &cast.arg_type),
                ChainShape::Interior(offset) => {
                    let object = cast.arg_type.pointee().cloned().unwrap_or_default();
                    self.add_member_type(id, offset, &object);
                }
                ChainShape::Through(offset) => self.add_member_type(id, offset, &TypeInfo::Unknown),
                ChainShape::NotPointer => {}
            }
        }
    }

    /// Grows a provisional struct passed where a pointer to a sized struct is expected.
    fn size_from_cast(&mut self, id: StructId, arg_type: &TypeInfo) {
        let Some(expected) = arg_type.pointee().and_then(TypeInfo::struct_id) else {
            return;
        };
        if expected == id || !self.state.is_new_type(id) {
            return;
        }
        let Some(size) = self.state.db.size_of(&TypeInfo::structure(expected)) else {
            return;
        };
        if size == 0 {
            return;
        }
        if let Ok(mut s) = self.state.db.provisional_structure(id) {
            if let Ok(true) = s.maximize_size(size) {
                debug!(id = id.0, size, "grew struct to cast target size");
            }
        }
    }

    /// Records that the struct `id` has a member of `member_type` at `offset`.
    ///
    /// Only structs created by the current run are changed. Refused changes leave the
    /// layout as it was and are reported.
    pub fn add_member_type(&mut self, id: StructId, offset: usize, member_type: &TypeInfo) {
        if !self.state.is_new_type(id) {
            self.state.diagnostics.note(
                Subsystem::MemberMerge,
                format_args!("{}+{:#x}", id, offset),
                "struct predates this run; left unchanged",
            );
            return;
        }

        // A use of the member exists, so the member should too.
        let added = self
            .state
            .db
            .provisional_structure(id)
            .and_then(|mut s| s.add_member(offset));
        if let Err(err) = added {
            self.state
                .diagnostics
                .contract_violation(Subsystem::MemberMerge, id, err.to_string());
            return;
        }

        if member_type.is_unknown() {
            return;
        }
        let db = &self.state.db;
        let Some(size) = db.size_of(member_type).filter(|&size| size > 0) else {
            return;
        };
        let Some(layout) = db.get_struct(id) else {
            return;
        };

        if let Some(next) = layout.next_member_offset(offset) {
            if offset + size > next && !layout.is_trailing_sentinel(next) {
                let message = format!(
                    "{} of size {} would overwrite the member at {:#x}",
                    db.render(member_type),
                    size,
                    next
                );
                self.state.diagnostics.refused(
                    Subsystem::MemberMerge,
                    format_args!("{}+{:#x}", layout.name, offset),
                    message,
                );
                return;
            }
        }

        if let Some(current) = layout.member_at(offset) {
            if let Some(nested) = current.member_type.struct_id() {
                if current.size > size {
                    let relative = offset - current.offset;
                    self.add_member_type(nested, relative, member_type);
                    return;
                }
            }
        }

        let name = layout.name.clone();
        let result = self
            .state
            .db
            .provisional_structure(id)
            .and_then(|mut s| s.set_member_type(offset, member_type.clone()));
        if let Err(err) = result {
            self.state.diagnostics.refused(
                Subsystem::MemberMerge,
                format_args!("{}+{:#x}", name, offset),
                err.to_string(),
            );
        }
    }

    // ==================== Expressions and return values ====================

    /// Type of an expression evaluated in `function`.
    pub fn analyze_cexpr(&mut self, function: u64, expr: &Expr) -> TypeInfo {
        // A cast to a struct type is evidence; any other cast is dropped.
        if let Expr::Cast { to, .. } = expr {
            if to.is_struct_bearing() {
                return to.clone();
            }
        }

        let program = self.program;
        match expr.strip_casts() {
            Expr::Local(slot) => return self.analyze_lvar(function, *slot),
            Expr::Call { callee, .. } => {
                if let Expr::Global(address) = callee.strip_casts() {
                    if program.is_function_start(*address) {
                        return self.analyze_retval(*address);
                    }
                }
            }
            Expr::Num { size, .. } => return TypeInfo::uint(*size),
            Expr::Global(address) if !program.is_function_start(*address) => {
                let gvar_type = self.analyze_gvar(*address);
                if gvar_type.is_unknown() {
                    return TypeInfo::Unknown;
                }
                let declared = self.state.db.declared_type(&Variable::global(*address));
                return match declared {
                    // Array storage decays to a pointer to its elements.
                    Some(TypeInfo::Array(_)) => match gvar_type {
                        TypeInfo::Array(array) => TypeInfo::Pointer(array.element),
                        other => TypeInfo::ptr(other),
                    },
                    _ => gvar_type,
                };
            }
            Expr::AddressOf(inner) => {
                if let Expr::Global(address) = inner.strip_casts() {
                    if !program.is_function_start(*address) {
                        let gvar_type = self.analyze_gvar(*address);
                        if gvar_type.is_unknown() {
                            return TypeInfo::Unknown;
                        }
                        return TypeInfo::ptr(gvar_type);
                    }
                }
            }
            _ => {}
        }

        self.state.diagnostics.unknown_evidence(
            Subsystem::Expressions,
            format_args!("sub_{:x}", function),
            format!("cannot type value {}", expr),
        );
        TypeInfo::Unknown
    }

    /// Infers the return type of a function.
    pub fn analyze_retval(&mut self, function: u64) -> TypeInfo {
        if let Some(resolution) = self.state.retvals.get(&function) {
            return resolution.resolved().cloned().unwrap_or_default();
        }
        let program = self.program;
        let Some(body) = program.function(function) else {
            return TypeInfo::Unknown;
        };
        let subject = format!("sub_{:x}", function);
        if !self.enter(&subject) {
            return TypeInfo::Unknown;
        }
        self.state.retvals.insert(function, Resolution::InProgress);

        let mut types: Vec<TypeInfo> = Vec::new();
        for ret in &body.returns {
            let var_type = self.analyze_variable(&ret.var);
            if var_type.is_unknown() || ret.chain.is_empty() {
                types.push(var_type);
                continue;
            }
            match ret.chain.walk(&self.state.db, &var_type) {
                Some(target) => types.push(target.ty),
                None => {
                    self.state.diagnostics.unknown_evidence(
                        Subsystem::ReturnValues,
                        &subject,
                        format!("cannot walk {} from {}", ret.chain, ret.var),
                    );
                    types.push(TypeInfo::Unknown);
                }
            }
        }
        self.leave();

        let distinct_types = distinct(types.iter());
        let ty = match distinct_types.as_slice() {
            [] => {
                self.state
                    .diagnostics
                    .note(Subsystem::ReturnValues, &subject, "no return values");
                TypeInfo::Unknown
            }
            [only] => (*only).clone(),
            _ => {
                self.state.diagnostics.unknown_evidence(
                    Subsystem::ReturnValues,
                    &subject,
                    format!("{} different return types", distinct_types.len()),
                );
                TypeInfo::Unknown
            }
        };
        self.state
            .retvals
            .insert(function, Resolution::Resolved(ty.clone()));
        ty
    }

    // ==================== Calls ====================

    /// Resolves the function a call reaches, if it is a real call.
    fn resolve_call_target(&mut self, call: &FuncCall, report: bool) -> Option<u64> {
        match &call.target {
            CallTarget::Explicit(target) => {
                let helper = self
                    .program
                    .function_name(*target)
                    .map(is_helper_intrinsic)
                    .unwrap_or(false);
                (!helper).then_some(*target)
            }
            CallTarget::Helper(_) => None,
            CallTarget::Implicit(_) => {
                if !self.enabled(AnalysisPass::ImplicitCalls) {
                    return None;
                }
                self.implicit_call_target(call, report)
            }
        }
    }

    /// Resolves an indirect call through the struct member its pointer was loaded from.
    ///
    /// The member's entry in the call-target table wins; without one, an address in the
    /// member comment or name is used. The result must be a function start.
    pub fn calculate_implicit_call_address(&mut self, call: &FuncCall) -> Option<u64> {
        self.implicit_call_target(call, true)
    }

    fn implicit_call_target(&mut self, call: &FuncCall, report: bool) -> Option<u64> {
        let subject = format!("call at {:#x}", call.address);
        let CallTarget::Implicit(source) = &call.target else {
            return None;
        };
        let Some(source) = source else {
            if report {
                self.state
                    .diagnostics
                    .unresolvable_call(&subject, "pointer origin unknown");
            }
            return None;
        };

        let var_type = self.state.var_type(&source.var);
        if var_type.is_unknown() {
            if report {
                self.state.diagnostics.unresolvable_call(
                    &subject,
                    format!("{} has no inferred type", source.var),
                );
            }
            return None;
        }

        let db = &self.state.db;
        let member = source
            .chain
            .walk(db, &var_type)
            .and_then(|target| target.member);
        let Some((id, offset)) = member else {
            if report {
                let message = format!(
                    "{} does not reach a member of {}",
                    source.chain,
                    db.render(&var_type)
                );
                self.state.diagnostics.unresolvable_call(&subject, message);
            }
            return None;
        };

        let mut address = db.member_call_target(id, offset);
        if address.is_none() && self.enabled(AnalysisPass::AnnotationFallback) {
            let member = db.get_struct(id).and_then(|s| s.members.get(&offset));
            address = member.and_then(|m| {
                m.comment
                    .as_deref()
                    .and_then(address_in_text)
                    .or_else(|| parse_address(&m.name))
            });
        }

        match address {
            Some(target) if self.program.is_function_start(target) => Some(target),
            Some(target) => {
                if report {
                    self.state.diagnostics.unresolvable_call(
                        &subject,
                        format!("member target {:#x} is not a function", target),
                    );
                }
                None
            }
            None => {
                if report {
                    let name = db.struct_name(id).unwrap_or_default().to_string();
                    self.state.diagnostics.unresolvable_call(
                        &subject,
                        format!("no call target for {}+{:#x}", name, offset),
                    );
                }
                None
            }
        }
    }

    // ==================== Propagation ====================

    /// Pushes the provisional struct type of `var` into the parameters it is passed as.
    ///
    /// An untyped parameter without assigns adopts the type and is propagated further.
    /// A parameter that already has another type is reported, never overwritten. Each
    /// variable is propagated at most once per run.
    pub fn propagate_var(&mut self, var: &Variable) {
        if !self.enabled(AnalysisPass::CrossCallPropagation) {
            return;
        }
        let var_type = self.state.var_type(var);
        if !self.state.is_provisional_type(&var_type) {
            return;
        }
        if !self.propagated.insert(*var) {
            return;
        }

        let program = self.program;
        for cast in self.var_call_casts(var) {
            if !cast.is_var_arg() {
                continue;
            }
            let Some(callee) = self.resolve_call_target(&cast.call, false) else {
                continue;
            };
            if program.is_import(callee) {
                continue;
            }
            let Some(body) = program.function(callee) else {
                continue;
            };
            if cast.arg_index >= body.local_count() {
                continue;
            }

            let param = Variable::local(callee, cast.arg_index);
            if matches!(self.state.resolution(&param), Some(Resolution::InProgress)) {
                continue;
            }
            let current = self.analyze_lvar(callee, cast.arg_index);
            if current.is_known() {
                if current != var_type {
                    let message = format!(
                        "cannot propagate {}: parameter already has type {}",
                        self.state.db.render(&var_type),
                        self.state.db.render(&current)
                    );
                    self.state.diagnostics.conflict(param, message);
                }
                continue;
            }

            let mut uses = body.uses_of(&param);
            if uses.assigns().next().is_some() {
                continue;
            }

            let retracted = self.state.diagnostics.retract_unknown(&param.to_string());
            debug!(from = %var, to = %param, retracted, "propagating type");
            self.state
                .set_resolution(&param, Resolution::Resolved(var_type.clone()));
            self.propagate_var(&param);
            self.resolve_uses(callee, &mut uses);
            self.add_type_uses(&uses, &var_type);
        }
    }

    /// Every cast of `var`; for a global, across all functions referencing it.
    fn var_call_casts(&self, var: &Variable) -> Vec<CallCast> {
        let functions = match *var {
            Variable::Local { function, .. } => vec![function],
            Variable::Global(address) => self.program.calls_to(address),
        };
        functions
            .into_iter()
            .filter_map(|f| self.program.function(f))
            .flat_map(|body| body.casts_of(var).cloned().collect::<Vec<_>>())
            .collect()
    }

    // ==================== Commit protocol ====================

    /// Commits the run: propagates every resolved variable, resolves indirect calls in
    /// the functions the run touched, writes known types back and flushes new structs.
    pub fn apply(&mut self) -> AnalysisResult<ApplySummary> {
        for var in self.state.tracked_variables() {
            self.propagate_var(&var);
        }

        let mut edges = Vec::new();
        if self.enabled(AnalysisPass::ImplicitCalls) {
            let program = self.program;
            let mut touched: BTreeSet<u64> = BTreeSet::new();
            for var in self.state.tracked_variables() {
                match var {
                    Variable::Local { function, .. } => {
                        touched.insert(function);
                    }
                    Variable::Global(address) => touched.extend(program.calls_to(address)),
                }
            }
            for function in touched {
                let Some(body) = program.function(function) else {
                    continue;
                };
                for call in body.calls.iter().filter(|c| c.is_implicit()) {
                    if let Some(target) = self.implicit_call_target(call, true) {
                        edges.push(CallEdge {
                            caller: function,
                            call_address: call.address,
                            target,
                        });
                    }
                }
            }
        }
        self.state.new_xrefs = edges;

        let write_back = self.state.commit()?;
        self.analyzed_functions.clear();
        self.deferred_functions.clear();
        self.propagated.clear();
        self.depth = 0;

        Ok(ApplySummary {
            call_edges: write_back.call_edges,
            variables_typed: write_back.variables_typed,
            structs_committed: write_back.structs_committed,
            diagnostics: self.state.take_diagnostics(),
        })
    }

    /// Drops every provisional struct and all run state.
    pub fn clear(&mut self) {
        self.state.rollback();
        self.analyzed_functions.clear();
        self.deferred_functions.clear();
        self.propagated.clear();
        self.depth = 0;
    }

    /// Creates an empty struct owned by the current run.
    pub fn create_struct(&mut self) -> StructId {
        self.state.create_struct()
    }
}

/// First address found among the words of a free-form annotation.
fn address_in_text(text: &str) -> Option<u64> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')' | ':' | '='))
        .find_map(parse_address)
}

/// Distinct values in first-seen order.
fn distinct<'a, I>(items: I) -> Vec<&'a TypeInfo>
where
    I: Iterator<Item = &'a TypeInfo>,
{
    let mut out: Vec<&TypeInfo> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
